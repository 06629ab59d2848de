//! Client token verification.
//!
//! Access tokens are HS256-signed JWTs carrying a [`Claims`] payload. The
//! `ENFORCE_JWT_AUTH` switch turns verification off for local development;
//! every token (including a missing one) then passes.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// JWT claims embedded in every client token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject the token was issued to.
    pub sub: String,
    /// Expiration time (UTC Unix timestamp).
    pub exp: i64,
}

/// Configuration for client token verification.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Whether tokens are verified at all.
    pub enforce: bool,
    /// HMAC-SHA256 secret used to sign and verify tokens.
    pub secret: String,
}

impl AuthConfig {
    /// Load auth configuration from environment variables.
    ///
    /// | Env Var            | Required               | Default |
    /// |--------------------|------------------------|---------|
    /// | `ENFORCE_JWT_AUTH` | no                     | `true`  |
    /// | `JWT_SECRET`       | when enforcement is on | --      |
    ///
    /// # Panics
    ///
    /// Panics if enforcement is on and `JWT_SECRET` is unset or empty.
    pub fn from_env() -> Self {
        let enforce: bool = std::env::var("ENFORCE_JWT_AUTH")
            .unwrap_or_else(|_| "true".into())
            .parse()
            .expect("ENFORCE_JWT_AUTH must be true or false");

        let secret = std::env::var("JWT_SECRET").unwrap_or_default();
        assert!(
            !enforce || !secret.is_empty(),
            "JWT_SECRET must be set when ENFORCE_JWT_AUTH is on"
        );

        Self { enforce, secret }
    }
}

/// Check a client token against the configured secret.
///
/// Validates the signature and expiration. With enforcement off every token
/// passes.
pub fn verify(token: &str, config: &AuthConfig) -> bool {
    if !config.enforce {
        return true;
    }

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &Validation::default(), // HS256, validates exp
    )
    .is_ok()
}

/// Issue an HS256 token for the given subject, valid for `ttl_secs`.
pub fn issue_token(
    sub: &str,
    ttl_secs: i64,
    config: &AuthConfig,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        sub: sub.to_string(),
        exp: chrono::Utc::now().timestamp() + ttl_secs,
    };

    encode(
        &Header::default(), // HS256
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
}
