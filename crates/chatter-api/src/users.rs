use axum::{Json, extract::State};

use chatter_types::models::User;

use crate::auth::AppState;
use crate::error::{ApiError, run_blocking};

/// GET /users. Every registered user, oldest first.
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, ApiError> {
    let db = state.db.clone();
    let users = run_blocking(move || {
        Ok(db.list_users()?.into_iter().map(User::from).collect::<Vec<_>>())
    })
    .await?;
    Ok(Json(users))
}
