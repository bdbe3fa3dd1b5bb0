use std::path::PathBuf;
use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{Form, Json, extract::State};
use rand_core::OsRng;
use tracing::info;

use chatter_db::{Database, UsernameTaken};
use chatter_gateway::Hub;
use chatter_types::api::{LoginForm, RegisterRequest, TokenResponse};
use chatter_types::models::User;

use crate::error::{ApiError, run_blocking};
use crate::tokens::JwtKeys;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt: Arc<JwtKeys>,
    pub hub: Hub,
    pub upload_dir: PathBuf,
}

const MAX_USERNAME_CHARS: usize = 32;
/// Longest password accepted, in bytes.
const MAX_PASSWORD_BYTES: usize = 72;

fn validate_registration(req: &RegisterRequest) -> Result<(), ApiError> {
    let username_len = req.username.chars().count();
    if username_len == 0 || username_len > MAX_USERNAME_CHARS {
        return Err(ApiError::BadRequest(format!(
            "Username must be 1-{} characters",
            MAX_USERNAME_CHARS
        )));
    }
    if !req.email.contains('@') {
        return Err(ApiError::BadRequest("Invalid email address".into()));
    }
    if req.password.is_empty() {
        return Err(ApiError::BadRequest("Password must not be empty".into()));
    }
    if req.password.len() > MAX_PASSWORD_BYTES {
        return Err(ApiError::BadRequest(format!(
            "Password is too long (max {} bytes)",
            MAX_PASSWORD_BYTES
        )));
    }
    Ok(())
}

fn username_taken() -> ApiError {
    ApiError::BadRequest("Username already registered".into())
}

/// The pre-insert lookup can race another registration for the same name;
/// the UNIQUE constraint then decides and the loser gets the same 400.
fn map_create_error(err: anyhow::Error) -> ApiError {
    if err.is::<UsernameTaken>() {
        username_taken()
    } else {
        ApiError::Internal(err)
    }
}

/// POST /register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<User>, ApiError> {
    validate_registration(&req)?;

    let db = state.db.clone();
    let user = run_blocking(move || {
        if db.get_user_by_username(&req.username)?.is_some() {
            return Err(username_taken());
        }

        // Hash password with Argon2id
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(req.password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
            .to_string();

        let row = db
            .create_user(&req.username, &req.email, &password_hash)
            .map_err(map_create_error)?;
        Ok(User::from(row))
    })
    .await?;

    info!("Registered user {} ({})", user.username, user.id);
    Ok(Json(user))
}

/// POST /login with an OAuth2 password form.
pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Json<TokenResponse>, ApiError> {
    let st = state.clone();
    let token = run_blocking(move || {
        let user = st
            .db
            .get_user_by_username(&form.username)?
            .ok_or(ApiError::InvalidCredentials)?;

        let parsed_hash = PasswordHash::new(&user.password)
            .map_err(|e| anyhow::anyhow!("stored hash for {} unreadable: {}", user.username, e))?;

        Argon2::default()
            .verify_password(form.password.as_bytes(), &parsed_hash)
            .map_err(|_| ApiError::InvalidCredentials)?;

        Ok(st.jwt.issue(&user.username)?)
    })
    .await?;

    Ok(Json(TokenResponse::bearer(token)))
}
