//! Deterministic cryptographic fixtures for testing
//!
//! Provides reproducible Ed25519 keypairs for signing access tokens.
//! All fixtures are deterministic based on seed values.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::signature::{Ed25519KeyPair, KeyPair};
use thiserror::Error;

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

/// A deterministic Ed25519 signing key.
#[derive(Debug, Clone)]
pub struct TestSigningKey {
    /// Public key in JWK `x` form (base64url, no padding), as expected by
    /// `JWT_PUBLIC_KEY`.
    pub public_key_x: String,

    /// Private key as a PKCS#8 v1 DER document.
    pub private_key_pkcs8: Vec<u8>,
}

impl TestSigningKey {
    /// Sign a claims object with EdDSA.
    pub fn sign(&self, claims: &serde_json::Value) -> Result<String, FixtureError> {
        let key = EncodingKey::from_ed_der(&self.private_key_pkcs8);
        encode(&Header::new(Algorithm::EdDSA), claims, &key)
            .map_err(|e| FixtureError::Crypto(format!("Failed to sign test token: {e}")))
    }
}

/// Generate a deterministic Ed25519 signing key for testing.
///
/// The same seed always produces the same keypair, ensuring test reproducibility.
///
/// # Example
/// ```rust,ignore
/// let key = test_signing_key(1)?;
/// assert_eq!(key.public_key_x, test_signing_key(1)?.public_key_x);
/// ```
pub fn test_signing_key(seed: u8) -> Result<TestSigningKey, FixtureError> {
    let mut seed_bytes = [0u8; 32];
    seed_bytes[0] = seed;
    for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
        *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
    }

    // Deterministic and only suitable for tests
    let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
        .map_err(|e| FixtureError::Crypto(format!("Failed to generate test keypair: {:?}", e)))?;

    let public_key_x = URL_SAFE_NO_PAD.encode(key_pair.public_key().as_ref());

    Ok(TestSigningKey {
        public_key_x,
        private_key_pkcs8: build_pkcs8_from_seed(&seed_bytes),
    })
}

/// Build PKCS#8 v1 document from Ed25519 seed
///
/// Ring doesn't expose PKCS#8 for a seeded keypair, so we build it.
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    // SEQUENCE {
    //   version         INTEGER (0),
    //   algorithm       AlgorithmIdentifier (1.3.101.112),
    //   privateKey      OCTET STRING { OCTET STRING seed }
    // }
    let mut pkcs8 = Vec::with_capacity(48);

    pkcs8.extend_from_slice(&[0x30, 0x2e]);
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);

    pkcs8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_key_is_deterministic() {
        let first = test_signing_key(1).unwrap();
        let second = test_signing_key(1).unwrap();

        assert_eq!(first.public_key_x, second.public_key_x);
        assert_eq!(first.private_key_pkcs8, second.private_key_pkcs8);
    }

    #[test]
    fn test_different_seeds_produce_different_keys() {
        let first = test_signing_key(1).unwrap();
        let second = test_signing_key(2).unwrap();

        assert_ne!(first.public_key_x, second.public_key_x);
    }

    #[test]
    fn test_pkcs8_is_accepted_by_ring() {
        let key = test_signing_key(3).unwrap();
        assert_eq!(key.private_key_pkcs8.len(), 48);
        assert!(Ed25519KeyPair::from_pkcs8_maybe_unchecked(&key.private_key_pkcs8).is_ok());
    }

    #[test]
    fn test_public_key_is_32_bytes() {
        let key = test_signing_key(4).unwrap();
        let decoded = URL_SAFE_NO_PAD.decode(&key.public_key_x).unwrap();
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn test_sign_produces_three_part_token() {
        let key = test_signing_key(5).unwrap();
        let token = key
            .sign(&serde_json::json!({"sub": "7", "role": "attachee", "exp": 0, "iat": 0}))
            .unwrap();
        assert_eq!(token.split('.').count(), 3);
    }
}
