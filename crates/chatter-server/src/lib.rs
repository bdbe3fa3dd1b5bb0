//! HTTP and WebSocket surface of the chat server, assembled into one
//! router. `main.rs` only loads configuration and runs it.

pub mod config;

use std::path::Path;
use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use chatter_api::{AppState, AppStateInner, JwtKeys, auth, files, messages, users};
use chatter_db::Database;
use chatter_gateway::Hub;
use chatter_gateway::auth::Authenticator;
use chatter_gateway::connection;

use crate::config::Config;

#[derive(Clone)]
struct GatewayState {
    hub: Hub,
    auth: Authenticator,
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// Shared state for every handler, built once at startup.
pub fn app_state(config: &Config, db: Arc<Database>, hub: Hub) -> AppState {
    let jwt = JwtKeys::new(
        &config.jwt_secret,
        chrono::Duration::minutes(config.token_ttl_minutes),
    );
    Arc::new(AppStateInner {
        db,
        jwt: Arc::new(jwt),
        hub,
        upload_dir: config.upload_dir.clone(),
    })
}

pub fn router(state: AppState, static_dir: &Path, max_upload_bytes: usize) -> Router {
    let gateway = GatewayState {
        hub: state.hub.clone(),
        auth: Authenticator::new(state.jwt.clone(), state.db.clone()),
    };

    let api_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/users", get(users::list_users))
        .route("/messages", get(messages::get_messages))
        .route(
            "/upload",
            post(files::upload_file).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .with_state(state);

    let ws_route = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(gateway);

    Router::new()
        .merge(api_routes)
        .merge(ws_route)
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        let session = connection::handle_connection(socket, state.hub.clone(), state.auth, query.token);
        state.hub.track(session)
    })
}
