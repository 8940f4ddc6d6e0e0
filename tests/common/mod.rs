// Each integration test file is a separate binary; helpers not used in every
// binary would otherwise trigger dead_code warnings from clippy.
#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use pulsar_relay::auth::jwt::hash_password;
use pulsar_relay::auth::models::{Permission, User};
use pulsar_relay::config::Settings;
use pulsar_relay::handlers;
use pulsar_relay::state::AppState;
use pulsar_relay::store::{Claim, UserStore};

pub const TEST_JWT_SECRET: &str = "test-secret-min-32-characters-long!!";

pub fn test_settings() -> Settings {
    Settings {
        jwt_secret_key: TEST_JWT_SECRET.into(),
        ..Settings::default()
    }
}

/// Fresh state over the in-memory backends. Tests keep the state handle to
/// seed users and inspect hubs alongside the routed app.
pub fn test_state() -> AppState {
    AppState::memory(test_settings())
}

/// Build the full application router over the given state.
pub fn create_test_app(state: AppState) -> Router {
    handlers::router(state)
}

/// Seed a user directly in the store and mint a token for it.
///
/// The password hash is a placeholder; tests exercising `/auth/login` use
/// [`seed_user_with_password`] instead.
pub async fn seed_user(
    state: &AppState,
    username: &str,
    permissions: &[Permission],
) -> (User, String) {
    let user = User {
        user_id: Uuid::new_v4(),
        username: username.into(),
        email: None,
        hashed_password: "not-a-real-hash".into(),
        is_active: true,
        created_at: Utc::now(),
        permissions: permissions.iter().copied().collect(),
        owned_topics: Default::default(),
    };
    let user = match state.users.create_user(user).await.unwrap() {
        Claim::Created(user) => user,
        Claim::AlreadyExists => panic!("seed user '{username}' collided"),
    };
    let token = state.signer.mint(&user).unwrap();
    (user, token)
}

/// Seed a user with a real argon2 hash so `/auth/login` accepts it.
pub async fn seed_user_with_password(
    state: &AppState,
    username: &str,
    password: &str,
    permissions: &[Permission],
) -> User {
    let user = User {
        user_id: Uuid::new_v4(),
        username: username.into(),
        email: None,
        hashed_password: hash_password(password.into()).await.unwrap(),
        is_active: true,
        created_at: Utc::now(),
        permissions: permissions.iter().copied().collect(),
        owned_topics: Default::default(),
    };
    match state.users.create_user(user).await.unwrap() {
        Claim::Created(user) => user,
        Claim::AlreadyExists => panic!("seed user '{username}' collided"),
    }
}

// ── Request helpers ──────────────────────────────────────────────────────────

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, req).await
}

pub async fn post_form(app: Router, uri: &str, body: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, req).await
}

pub async fn post_json_authed(
    app: Router,
    uri: &str,
    token: &str,
    body: Value,
) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, req).await
}

pub async fn get_authed(app: Router, uri: &str, token: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    send(app, req).await
}

pub async fn get_public(app: Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, req).await
}

pub async fn put_json_authed(
    app: Router,
    uri: &str,
    token: &str,
    body: Value,
) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(Method::PUT)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, req).await
}

pub async fn patch_json_authed(
    app: Router,
    uri: &str,
    token: &str,
    body: Value,
) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(Method::PATCH)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, req).await
}

pub async fn delete_authed(app: Router, uri: &str, token: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    send(app, req).await
}

/// Publish a message over HTTP and return its `message_id`.
pub async fn publish(app: Router, token: &str, topic: &str, payload: Value) -> String {
    let (status, body) = post_json_authed(
        app,
        "/api/v1/messages",
        token,
        serde_json::json!({ "topic": topic, "payload": payload }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "publish failed: {body}");
    body["message_id"].as_str().unwrap().to_string()
}
