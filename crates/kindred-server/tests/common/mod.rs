#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::{Duration, NaiveDate, Utc};
use http_body_util::BodyExt;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::Value;
use tower::ServiceExt;

use kindred_api::storage::LocalBlobStore;
use kindred_api::{ApiSettings, AppState, AppStateInner};
use kindred_db::Database;
use kindred_db::models::NewUser;
use kindred_gateway::{Hub, HubConfig};
use kindred_server::build_app;
use kindred_types::api::{Claims, TokenType};
use kindred_types::models::{Gender, UserId};

pub const SECRET: &str = "integration-test-secret";

pub struct TestApp {
    pub state: AppState,
    pub app: Router,
    pub upload_dir: PathBuf,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.upload_dir);
    }
}

pub async fn test_app(otp_enabled: bool) -> TestApp {
    let upload_dir = std::env::temp_dir().join(format!("kindred-it-{}", uuid::Uuid::new_v4()));
    let db = Arc::new(Database::open_in_memory().unwrap());
    let hub = Hub::spawn(HubConfig::default());
    let blobs = Arc::new(
        LocalBlobStore::new(upload_dir.clone(), "http://localhost:8080")
            .await
            .unwrap(),
    );
    let settings = ApiSettings {
        jwt_secret: SECRET.into(),
        jwt_expiry_hours: 1,
        refresh_expiry_days: 1,
        otp_enabled,
        otp_expiry_minutes: 5,
        max_file_size: 1024 * 1024,
    };
    let state = AppStateInner::new(db, hub, blobs, settings);
    let app = build_app(state.clone(), &upload_dir);
    TestApp {
        state,
        app,
        upload_dir,
    }
}

/// Insert a verified, active user directly, skipping password hashing.
pub fn user(state: &AppState, email: &str, gender: Gender) -> UserId {
    state
        .db
        .create_user(&NewUser {
            email: email.into(),
            phone: None,
            password_hash: "unused".into(),
            first_name: email.split('@').next().unwrap_or("user").into(),
            last_name: "Tester".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1995, 6, 15).unwrap(),
            gender,
            is_verified: true,
        })
        .unwrap()
}

pub fn token(user_id: UserId, token_type: TokenType) -> String {
    let claims = Claims {
        sub: user_id,
        email: format!("user{}@example.com", user_id),
        token_type,
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

pub fn access(user_id: UserId) -> String {
    token(user_id, TokenType::Access)
}

/// Send one request through the router; the body is parsed as JSON when possible.
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

/// Raw request with an arbitrary body and content type.
pub async fn send_raw(
    app: &Router,
    method: &str,
    uri: &str,
    bearer: &str,
    content_type: &str,
    body: Vec<u8>,
) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", bearer))
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

/// Like both ways and return the new conversation id.
pub async fn match_users(app: &Router, a: UserId, b: UserId) -> i64 {
    let (status, _) = send(
        app,
        "POST",
        &format!("/api/v1/matches/like/{}", b),
        Some(&access(a)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(
        app,
        "POST",
        &format!("/api/v1/matches/like/{}", a),
        Some(&access(b)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["match"]["conversation_id"].as_i64().unwrap()
}
