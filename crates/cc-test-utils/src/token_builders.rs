//! Builder patterns for test access tokens

use crate::crypto_fixtures::TestSigningKey;
use chrono::{Duration, Utc};
use serde_json::json;

/// Builder for creating test user access tokens
///
/// # Example
/// ```rust,ignore
/// let token = TestTokenBuilder::new()
///     .for_user(3)
///     .with_role("assessor")
///     .with_name("Grace")
///     .expires_in(3600)
///     .sign(&key);
/// ```
pub struct TestTokenBuilder {
    sub: String,
    role: String,
    name: Option<String>,
    exp: i64,
    iat: i64,
}

impl TestTokenBuilder {
    /// Create a new token builder with defaults
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            sub: "1".to_string(),
            role: "attachee".to_string(),
            name: None,
            exp: (now + Duration::seconds(3600)).timestamp(),
            iat: now.timestamp(),
        }
    }

    /// Set the subject to a numeric user id
    pub fn for_user(mut self, user_id: i64) -> Self {
        self.sub = user_id.to_string();
        self
    }

    /// Set an arbitrary subject string
    pub fn for_subject(mut self, subject: &str) -> Self {
        self.sub = subject.to_string();
        self
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.role = role.to_string();
        self
    }

    /// Set the display name
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Set expiration in seconds from now (negative for already expired)
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    /// Set issued-at timestamp
    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = timestamp;
        self
    }

    /// Build the claims as a JSON value
    pub fn build(self) -> serde_json::Value {
        let mut claims = json!({
            "sub": self.sub,
            "role": self.role,
            "exp": self.exp,
            "iat": self.iat,
        });
        if let (Some(name), Some(object)) = (self.name, claims.as_object_mut()) {
            object.insert("name".to_string(), json!(name));
        }
        claims
    }

    /// Build and sign the token.
    ///
    /// Panics if signing fails.
    pub fn sign(self, key: &TestSigningKey) -> String {
        key.sign(&self.build()).expect("Failed to sign test token")
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}
