use axum::{Json, extract::State};

use chatter_types::models::ChatMessage;

use crate::auth::AppState;

/// GET /messages. The in-memory message log, oldest first.
pub async fn get_messages(State(state): State<AppState>) -> Json<Vec<ChatMessage>> {
    Json(state.hub.messages().list())
}
