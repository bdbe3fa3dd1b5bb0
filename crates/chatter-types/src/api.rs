use serde::{Deserialize, Serialize};

// -- JWT Claims --

/// Bearer token claims. `sub` carries the username, which is what the
/// gateway labels messages with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// `application/x-www-form-urlencoded` login body (OAuth2 password form).
/// Extra OAuth2 fields such as `grant_type` or `scope` are tolerated.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

impl TokenResponse {
    pub fn bearer(access_token: String) -> Self {
        Self {
            access_token,
            token_type: "bearer".into(),
        }
    }
}

// -- Files --

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub filename: String,
}

// -- Errors --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}
