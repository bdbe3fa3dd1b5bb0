pub mod auth;
pub mod error;
pub mod files;
pub mod messages;
pub mod tokens;
pub mod users;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;
pub use tokens::JwtKeys;
