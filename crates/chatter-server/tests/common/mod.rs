#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chatter_api::AppState;
use chatter_db::Database;
use chatter_gateway::Hub;
use chatter_server::config::Config;

pub const SECRET: &str = "integration-secret";

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
}

static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

pub fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!(
        "chatter-test-{}-{}",
        std::process::id(),
        NEXT_DIR.fetch_add(1, Ordering::Relaxed)
    ))
}

pub fn test_config() -> Config {
    let mut config = Config::from_lookup(|_| None).unwrap();
    config.jwt_secret = SECRET.into();
    config.upload_dir = scratch_dir();
    config.max_upload_bytes = 1024;
    config
}

pub fn test_state() -> AppState {
    let db = Arc::new(Database::open_in_memory().unwrap());
    chatter_server::app_state(&test_config(), db, Hub::new())
}

pub async fn spawn_server() -> TestServer {
    let state = test_state();
    let app = chatter_server::router(state.clone(), Path::new("static"), 1024);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer { addr, state }
}

impl TestServer {
    pub fn hub(&self) -> &Hub {
        &self.state.hub
    }

    /// Create a user straight in the store and return a valid token for it.
    pub fn user(&self, username: &str) -> String {
        self.state
            .db
            .create_user(username, &format!("{}@example.com", username), "unused-hash")
            .unwrap();
        self.state.jwt.issue(username).unwrap()
    }

    pub fn ws_url(&self, token: Option<&str>) -> String {
        match token {
            Some(t) => format!("ws://{}/ws?token={}", self.addr, t),
            None => format!("ws://{}/ws", self.addr),
        }
    }

    pub async fn connect(&self, token: Option<&str>) -> Client {
        let (ws, _) = tokio_tungstenite::connect_async(self.ws_url(token))
            .await
            .unwrap();
        ws
    }

    /// Wait until the registry holds exactly `n` connections.
    pub async fn wait_for_connections(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.hub().registry().len() != n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "registry never reached {} connections (has {})",
                n,
                self.hub().registry().len()
            )
        });
    }
}

/// Next text frame, skipping control frames.
pub async fn next_text(ws: &mut Client) -> String {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(t))) => return t.as_str().to_owned(),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                other => panic!("expected text frame, got {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for a text frame")
}

/// Close code of the next close frame.
pub async fn close_code(ws: &mut Client) -> u16 {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(Some(frame)))) => return u16::from(frame.code),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                other => panic!("expected close frame, got {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for a close frame")
}
