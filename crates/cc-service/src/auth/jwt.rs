//! JWT validation for the Call Controller.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only EdDSA (Ed25519) algorithm is accepted
//! - Expiration and issued-at claims are validated with clock skew tolerance
//! - The `sub` claim must be a numeric user id
//! - Generic error messages prevent information leakage

use crate::errors::CcError;
use common::jwt::{check_token_size, decode_ed25519_public_key_jwk, validate_iat, UserClaims};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::time::Duration;
use tracing::instrument;

const INVALID_TOKEN_MESSAGE: &str = "The access token is invalid or expired";

/// Length of a raw Ed25519 public key.
const ED25519_PUBLIC_KEY_LEN: usize = 32;

/// JWT validator with a statically configured Ed25519 public key.
#[derive(Clone)]
pub struct JwtValidator {
    decoding_key: DecodingKey,

    /// Clock skew tolerance for iat validation.
    clock_skew: Duration,
}

impl JwtValidator {
    /// Create a new JWT validator.
    ///
    /// # Arguments
    ///
    /// * `public_key_x` - Ed25519 public key in JWK `x` form (base64url, no padding)
    /// * `clock_skew` - Clock skew tolerance for iat validation
    ///
    /// # Errors
    ///
    /// Returns `CcError::Internal` if the key cannot be decoded.
    pub fn new(public_key_x: &str, clock_skew: Duration) -> Result<Self, CcError> {
        let public_key_bytes = decode_ed25519_public_key_jwk(public_key_x)
            .map_err(|e| CcError::Internal(format!("Invalid JWT public key encoding: {e}")))?;

        if public_key_bytes.len() != ED25519_PUBLIC_KEY_LEN {
            return Err(CcError::Internal(format!(
                "Invalid JWT public key length: expected {ED25519_PUBLIC_KEY_LEN} bytes, got {}",
                public_key_bytes.len()
            )));
        }

        Ok(Self {
            decoding_key: DecodingKey::from_ed_der(&public_key_bytes),
            clock_skew,
        })
    }

    /// Validate a user access token and return its claims.
    ///
    /// # Security Checks
    ///
    /// 1. Size check - reject tokens > 8KB before parsing
    /// 2. Verify EdDSA signature
    /// 3. Validate exp claim (reject expired tokens)
    /// 4. Validate iat claim with clock skew tolerance
    /// 5. Require a numeric subject
    ///
    /// # Errors
    ///
    /// Returns `CcError::InvalidToken` for all validation failures with a
    /// generic message.
    #[instrument(skip_all, name = "cc.auth.validate")]
    pub fn validate(&self, token: &str) -> Result<UserClaims, CcError> {
        check_token_size(token).map_err(|e| {
            tracing::debug!(target: "cc.auth.jwt", error = ?e, "Token rejected before parsing");
            CcError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string())
        })?;

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.validate_exp = true;
        // Tokens carry no audience; the role claim gates access instead
        validation.validate_aud = false;

        let token_data =
            decode::<UserClaims>(token, &self.decoding_key, &validation).map_err(|e| {
                tracing::debug!(target: "cc.auth.jwt", error = %e, "Token verification failed");
                CcError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string())
            })?;
        let claims = token_data.claims;

        if let Err(e) = validate_iat(claims.iat, self.clock_skew) {
            tracing::debug!(target: "cc.auth.jwt", error = ?e, "Token iat validation failed");
            return Err(CcError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string()));
        }

        if claims.user_id().is_err() {
            return Err(CcError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string()));
        }

        tracing::debug!(target: "cc.auth.jwt", "Token validated successfully");
        Ok(claims)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use cc_test_utils::{test_signing_key, TestTokenBuilder};
    use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_JWT_SIZE_BYTES};
    use common::types::UserId;

    fn validator(seed: u8) -> JwtValidator {
        let key = test_signing_key(seed).unwrap();
        JwtValidator::new(&key.public_key_x, DEFAULT_CLOCK_SKEW).unwrap()
    }

    #[test]
    fn test_validate_accepts_signed_token() {
        let key = test_signing_key(1).unwrap();
        let token = TestTokenBuilder::new()
            .for_user(7)
            .with_role("attachee")
            .with_name("Amina")
            .sign(&key);

        let claims = validator(1).validate(&token).unwrap();
        assert_eq!(claims.user_id().unwrap(), UserId(7));
        assert!(claims.has_role("attachee"));
        assert_eq!(claims.name.as_deref(), Some("Amina"));
    }

    #[test]
    fn test_validate_rejects_wrong_key() {
        let other = test_signing_key(2).unwrap();
        let token = TestTokenBuilder::new().for_user(7).sign(&other);

        let result = validator(1).validate(&token);
        assert!(
            matches!(&result, Err(CcError::InvalidToken(msg)) if msg.contains("invalid or expired")),
            "Expected InvalidToken, got {:?}",
            result.map(|_| ())
        );
    }

    #[test]
    fn test_validate_rejects_expired_token() {
        let key = test_signing_key(1).unwrap();
        let token = TestTokenBuilder::new()
            .for_user(7)
            .expires_in(-3600)
            .sign(&key);

        assert!(matches!(
            validator(1).validate(&token),
            Err(CcError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_validate_rejects_future_iat() {
        let key = test_signing_key(1).unwrap();
        let far_future = chrono::Utc::now().timestamp() + 3600;
        let token = TestTokenBuilder::new()
            .for_user(7)
            .issued_at(far_future)
            .expires_in(7200)
            .sign(&key);

        assert!(matches!(
            validator(1).validate(&token),
            Err(CcError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_validate_rejects_non_numeric_subject() {
        let key = test_signing_key(1).unwrap();
        let token = TestTokenBuilder::new()
            .for_subject("alice@example.com")
            .sign(&key);

        assert!(matches!(
            validator(1).validate(&token),
            Err(CcError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_validate_rejects_oversized_token() {
        let token = format!("{}.payload.sig", "a".repeat(MAX_JWT_SIZE_BYTES));

        assert!(matches!(
            validator(1).validate(&token),
            Err(CcError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_validate_rejects_garbage() {
        assert!(validator(1).validate("not-a-jwt").is_err());
        assert!(validator(1).validate("a.b.c").is_err());
    }

    #[test]
    fn test_new_rejects_bad_public_key() {
        assert!(JwtValidator::new("!!!invalid-base64!!!", DEFAULT_CLOCK_SKEW).is_err());
        // Valid base64url, wrong length
        assert!(JwtValidator::new("dGVzdC1wdWJsaWMta2V5", DEFAULT_CLOCK_SKEW).is_err());
    }
}
