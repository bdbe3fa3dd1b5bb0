mod common;

use std::path::Path;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use chatter_gateway::auth::TokenVerifier;
use chatter_gateway::registry::Connection;
use serde_json::{Value, json};
use tower::ServiceExt;

use chatter_api::AppState;
use common::test_state;

fn app(state: &AppState) -> Router {
    chatter_server::router(state.clone(), Path::new("static"), 1024)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}

fn register_req(username: &str, password: &str) -> Request<Body> {
    let body = json!({
        "username": username,
        "email": format!("{}@example.com", username),
        "password": password,
    });
    Request::post("/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn login_req(username: &str, password: &str) -> Request<Body> {
    Request::post("/login")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(format!(
            "grant_type=password&username={}&password={}",
            username, password
        )))
        .unwrap()
}

#[tokio::test]
async fn register_returns_public_user() {
    let state = test_state();
    let app = app(&state);

    let (status, body) = send(&app, register_req("alice", "wonderland")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["email"], "alice@example.com");
    assert!(body["id"].is_i64());
    assert!(body.get("password").is_none());
}

#[tokio::test]
async fn duplicate_username_is_rejected() {
    let state = test_state();
    let app = app(&state);

    send(&app, register_req("alice", "wonderland")).await;
    let (status, body) = send(&app, register_req("alice", "another")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Username already registered");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_of_one_name_admit_exactly_one() {
    let state = test_state();
    let app = app(&state);

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..8 {
        let app = app.clone();
        tasks.spawn(async move { send(&app, register_req("alice", &format!("pw{}", i))).await });
    }

    let mut admitted = 0;
    while let Some(res) = tasks.join_next().await {
        let (status, body) = res.unwrap();
        match status {
            StatusCode::OK => admitted += 1,
            StatusCode::BAD_REQUEST => assert_eq!(body["detail"], "Username already registered"),
            other => panic!("unexpected status {} with {}", other, body),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(state.db.list_users().unwrap().len(), 1);
}

#[tokio::test]
async fn overlong_password_is_rejected() {
    let state = test_state();
    let app = app(&state);

    let (status, body) = send(&app, register_req("alice", &"p".repeat(73))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Password is too long (max 72 bytes)");
}

#[tokio::test]
async fn login_issues_a_token_for_the_gateway() {
    let state = test_state();
    let app = app(&state);
    send(&app, register_req("alice", "wonderland")).await;

    let (status, body) = send(&app, login_req("alice", "wonderland")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "bearer");

    let token = body["access_token"].as_str().unwrap();
    assert_eq!(state.jwt.verify(token).unwrap(), "alice");
}

#[tokio::test]
async fn bad_credentials_are_401() {
    let state = test_state();
    let app = app(&state);
    send(&app, register_req("alice", "wonderland")).await;

    let (status, body) = send(&app, login_req("alice", "looking-glass")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Invalid credentials");

    let (status, _) = send(&app, login_req("nobody", "whatever")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn users_lists_registrations() {
    let state = test_state();
    let app = app(&state);
    send(&app, register_req("alice", "pw")).await;
    send(&app, register_req("bob", "pw")).await;

    let (status, body) = send(&app, Request::get("/users").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["username"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["alice", "bob"]);
}

#[tokio::test]
async fn messages_expose_the_log() {
    let state = test_state();
    let app = app(&state);

    let (status, body) = send(&app, Request::get("/messages").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (conn, _rx) = Connection::new("alice");
    let _reg = state.hub.register(conn.clone());
    state.hub.publish(&conn, "first".into());
    state.hub.publish(&conn, "second".into());

    let (_, body) = send(&app, Request::get("/messages").body(Body::empty()).unwrap()).await;
    let log = body.as_array().unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0]["sender"], "alice");
    assert_eq!(log[0]["text"], "first");
    assert_eq!(log[1]["text"], "second");
    assert!(log[0]["sent_at"].is_string());
}

fn multipart_req(field: &str, filename: &str, content: &[u8]) -> Request<Body> {
    let boundary = "chatter-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    Request::post("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn upload_stores_file_under_generated_name() {
    let state = test_state();
    let app = app(&state);

    let (status, body) = send(&app, multipart_req("file", "notes.txt", b"hello upload")).await;
    assert_eq!(status, StatusCode::OK);

    let filename = body["filename"].as_str().unwrap();
    assert!(filename.ends_with(".txt"));
    assert_ne!(filename, "notes.txt");

    let stored = std::fs::read(state.upload_dir.join(filename)).unwrap();
    assert_eq!(stored, b"hello upload");
    let _ = std::fs::remove_dir_all(&state.upload_dir);
}

#[tokio::test]
async fn upload_without_file_field_is_400() {
    let state = test_state();
    let app = app(&state);

    let (status, body) = send(&app, multipart_req("attachment", "notes.txt", b"x")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Missing 'file' field");
}

#[tokio::test]
async fn oversized_upload_is_413() {
    let state = test_state();
    let app = app(&state);

    let (status, _) = send(&app, multipart_req("file", "big.bin", &vec![0u8; 4096])).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}
