use std::sync::Arc;

use thiserror::Error;
use tracing::error;

use chatter_db::Database;
use chatter_types::models::User;

/// WebSocket close codes sent when a handshake is rejected.
pub const CLOSE_MISSING_TOKEN: u16 = 4000;
pub const CLOSE_TOKEN_INVALID: u16 = 4001;
pub const CLOSE_USER_NOT_FOUND: u16 = 4002;
/// Standard "going away", used for shutdown.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Standard "internal error", used when the user store cannot answer.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Why a bearer token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("token expired")]
    Expired,
    #[error("token malformed")]
    Malformed,
    #[error("token signature invalid")]
    InvalidSignature,
}

/// Validates bearer tokens and yields the username they were issued for.
pub trait TokenVerifier: Send + Sync + 'static {
    fn verify(&self, token: &str) -> Result<String, AuthError>;
}

/// Read access to registered users. Implementations may block.
pub trait UserDirectory: Send + Sync + 'static {
    fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>>;
}

impl UserDirectory for Database {
    fn find_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        Ok(self.get_user_by_username(username)?.map(User::from))
    }
}

/// Reasons a connection never reaches the active state.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("no token supplied")]
    MissingToken,
    #[error("token rejected: {0}")]
    InvalidToken(#[from] AuthError),
    #[error("user {0} does not exist")]
    UnknownUser(String),
    #[error("user lookup failed: {0}")]
    Store(anyhow::Error),
    #[error("server is shutting down")]
    ShuttingDown,
}

impl HandshakeError {
    pub fn close_code(&self) -> u16 {
        match self {
            Self::MissingToken => CLOSE_MISSING_TOKEN,
            Self::InvalidToken(_) => CLOSE_TOKEN_INVALID,
            Self::UnknownUser(_) => CLOSE_USER_NOT_FOUND,
            Self::Store(_) => CLOSE_INTERNAL_ERROR,
            Self::ShuttingDown => CLOSE_GOING_AWAY,
        }
    }

    /// Short reason text carried in the close frame.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing token",
            Self::InvalidToken(_) => "invalid token",
            Self::UnknownUser(_) => "user not found",
            Self::Store(_) => "internal error",
            Self::ShuttingDown => "server shutting down",
        }
    }
}

/// Authentication collaborators the gateway consults during a handshake.
#[derive(Clone)]
pub struct Authenticator {
    tokens: Arc<dyn TokenVerifier>,
    users: Arc<dyn UserDirectory>,
}

impl Authenticator {
    pub fn new(tokens: Arc<dyn TokenVerifier>, users: Arc<dyn UserDirectory>) -> Self {
        Self { tokens, users }
    }

    /// Resolve the token from the upgrade request to an existing user.
    /// An empty token counts as missing.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<User, HandshakeError> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or(HandshakeError::MissingToken)?;

        let username = self.tokens.verify(token)?;

        // User lookup hits SQLite; keep it off the async workers.
        let users = self.users.clone();
        let lookup = username.clone();
        let found = tokio::task::spawn_blocking(move || users.find_by_username(&lookup))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                HandshakeError::Store(anyhow::anyhow!("user lookup task failed: {}", e))
            })?
            .map_err(HandshakeError::Store)?;

        found.ok_or(HandshakeError::UnknownUser(username))
    }
}
