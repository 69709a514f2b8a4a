//! JWT utilities shared across the call controller crates.
//!
//! This module provides:
//! - Size limits applied before any parsing
//! - Clock skew constants for `iat` validation
//! - The user token claims structure
//! - Decoding of the Ed25519 verification key from its JWK `x` form
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Only EdDSA (Ed25519) signatures are accepted by the service validators
//! - Error messages are generic so callers cannot probe which check failed
//! - The `sub` field of [`UserClaims`] is redacted in Debug output
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{check_token_size, validate_iat, DEFAULT_CLOCK_SKEW};
//!
//! check_token_size(token)?;
//! // ... verify signature, decode UserClaims ...
//! validate_iat(claims.iat, DEFAULT_CLOCK_SKEW)?;
//! let user_id = claims.user_id()?;
//! ```

use crate::types::UserId;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Typical user tokens are 200-400 bytes. Anything larger is rejected before
/// base64 decoding or signature verification is attempted.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default JWT clock skew tolerance (5 minutes).
///
/// Tokens with `iat` timestamps more than this amount in the future are
/// rejected.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Maximum configurable JWT clock skew tolerance (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during JWT validation.
///
/// Every variant renders the same message. The variant itself is only used
/// for server-side debug logging.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,

    /// Token `sub` claim is not a numeric user identifier.
    #[error("The access token is invalid or expired")]
    InvalidSubject,
}

// =============================================================================
// Claims Types
// =============================================================================

/// Claims carried by end-user access tokens.
///
/// Tokens are issued by the application's login flow; this workspace only
/// validates them.
///
/// - `sub`: numeric user identifier, as a string
/// - `role`: one of `attachee`, `assessor`, `org_manager`, `admin`
/// - `name`: optional display name
#[derive(Clone, Serialize, Deserialize)]
pub struct UserClaims {
    /// Subject (user identifier). Redacted in Debug output.
    pub sub: String,

    /// Application role of the user.
    pub role: String,

    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,
}

impl fmt::Debug for UserClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserClaims")
            .field("sub", &"[REDACTED]")
            .field("role", &self.role)
            .field("name", &self.name.as_ref().map(|_| "[REDACTED]"))
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .finish()
    }
}

impl UserClaims {
    /// Parse the `sub` claim into a [`UserId`].
    ///
    /// # Errors
    ///
    /// Returns `JwtValidationError::InvalidSubject` when `sub` is not an integer.
    pub fn user_id(&self) -> Result<UserId, JwtValidationError> {
        self.sub.parse::<i64>().map(UserId).map_err(|e| {
            tracing::debug!(target: "common.jwt", error = %e, "Token sub is not a user id");
            JwtValidationError::InvalidSubject
        })
    }

    /// Returns true if the token carries the given role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Reject tokens larger than [`MAX_JWT_SIZE_BYTES`] before any parsing.
///
/// # Errors
///
/// Returns `JwtValidationError::TokenTooLarge` for oversized tokens and
/// `JwtValidationError::MalformedToken` for tokens without three segments.
pub fn check_token_size(token: &str) -> Result<(), JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    if token.split('.').count() != 3 {
        tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
        return Err(JwtValidationError::MalformedToken);
    }

    Ok(())
}

/// Validate the `iat` (issued-at) claim with clock skew tolerance.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` if `iat` is more than
/// `clock_skew` in the future.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

/// Deterministic `iat` validation against an explicit `now` timestamp.
pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // Safe cast: clock_skew is bounded by MAX_CLOCK_SKEW
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now + clock_skew_secs;

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

/// Decode an Ed25519 public key from its JWK `x` field (base64url, no padding).
///
/// # Errors
///
/// Returns `base64::DecodeError` if the content cannot be decoded.
pub fn decode_ed25519_public_key_jwk(x_b64url: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(x_b64url.trim())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::cast_possible_wrap)]
mod tests {
    use super::*;

    fn claims(sub: &str, role: &str) -> UserClaims {
        UserClaims {
            sub: sub.to_string(),
            role: role.to_string(),
            name: Some("Jane Doe".to_string()),
            exp: 1_700_003_600,
            iat: 1_700_000_000,
        }
    }

    #[test]
    fn test_max_jwt_size_is_8kb() {
        assert_eq!(MAX_JWT_SIZE_BYTES, 8192);
    }

    #[test]
    fn test_check_token_size_accepts_three_segments() {
        assert!(check_token_size("a.b.c").is_ok());
    }

    #[test]
    fn test_check_token_size_rejects_oversized() {
        let token = format!("{}.b.c", "a".repeat(MAX_JWT_SIZE_BYTES));
        assert_eq!(
            check_token_size(&token),
            Err(JwtValidationError::TokenTooLarge)
        );
    }

    #[test]
    fn test_check_token_size_rejects_malformed() {
        assert_eq!(
            check_token_size("only.two"),
            Err(JwtValidationError::MalformedToken)
        );
        assert_eq!(check_token_size(""), Err(JwtValidationError::MalformedToken));
    }

    #[test]
    fn test_validate_iat_past_time() {
        let past = chrono::Utc::now().timestamp() - 3600;
        assert!(validate_iat(past, DEFAULT_CLOCK_SKEW).is_ok());
    }

    #[test]
    fn test_validate_iat_far_future() {
        let far_future = chrono::Utc::now().timestamp() + 86400;
        assert!(matches!(
            validate_iat(far_future, DEFAULT_CLOCK_SKEW),
            Err(JwtValidationError::IatTooFarInFuture)
        ));
    }

    #[test]
    fn test_validate_iat_at_boundary_exact() {
        let now = 1_700_000_000_i64;

        assert!(validate_iat_at(now + 300, DEFAULT_CLOCK_SKEW, now).is_ok());
        assert!(matches!(
            validate_iat_at(now + 301, DEFAULT_CLOCK_SKEW, now),
            Err(JwtValidationError::IatTooFarInFuture)
        ));
    }

    #[test]
    fn test_user_claims_debug_redacts_identity() {
        let debug_str = format!("{:?}", claims("4242", "assessor"));

        assert!(!debug_str.contains("4242"));
        assert!(!debug_str.contains("Jane Doe"));
        assert!(debug_str.contains("[REDACTED]"));
        assert!(debug_str.contains("assessor"));
    }

    #[test]
    fn test_user_claims_user_id() {
        assert_eq!(claims("7", "attachee").user_id(), Ok(UserId(7)));
        assert_eq!(
            claims("not-a-number", "attachee").user_id(),
            Err(JwtValidationError::InvalidSubject)
        );
    }

    #[test]
    fn test_user_claims_has_role() {
        let c = claims("3", "assessor");
        assert!(c.has_role("assessor"));
        assert!(!c.has_role("attachee"));
    }

    #[test]
    fn test_user_claims_name_is_optional() {
        let json = r#"{"sub":"9","role":"attachee","exp":2,"iat":1}"#;
        let parsed: UserClaims = serde_json::from_str(json).unwrap();
        assert!(parsed.name.is_none());

        let serialized = serde_json::to_string(&parsed).unwrap();
        assert!(!serialized.contains("name"));
    }

    #[test]
    fn test_decode_ed25519_public_key_jwk() {
        let x = "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo";
        assert_eq!(decode_ed25519_public_key_jwk(x).unwrap().len(), 32);
    }

    #[test]
    fn test_decode_ed25519_public_key_jwk_invalid() {
        assert!(decode_ed25519_public_key_jwk("not-valid-base64url!!!").is_err());
    }
}
