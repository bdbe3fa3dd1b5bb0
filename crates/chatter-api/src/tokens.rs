use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

use chatter_gateway::auth::{AuthError, TokenVerifier};
use chatter_types::api::Claims;

/// HS256 signing and verification of bearer tokens.
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl JwtKeys {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    /// Issue a token for `username` expiring after the configured lifetime.
    pub fn issue(&self, username: &str) -> anyhow::Result<String> {
        let claims = Claims {
            sub: username.to_string(),
            exp: (Utc::now() + self.ttl).timestamp() as usize,
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }
}

impl TokenVerifier for JwtKeys {
    fn verify(&self, token: &str) -> Result<String, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default()).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::Malformed,
            }
        })?;

        if data.claims.sub.is_empty() {
            return Err(AuthError::Malformed);
        }
        Ok(data.claims.sub)
    }
}
