//! Token manager against a mocked auth service

use std::sync::Arc;

use chatdesk_core::storage::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use chatdesk_core::{
    AuthError, ClientConfig, FileStore, KeyValueStore, MemoryStore, TokenManager, TokenSource,
};
use reqwest::Method;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> ClientConfig {
    ClientConfig {
        api_base_url: server.uri(),
        ..ClientConfig::default()
    }
}

fn seeded_store(access: &str, refresh: &str) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.set(ACCESS_TOKEN_KEY, access).unwrap();
    store.set(REFRESH_TOKEN_KEY, refresh).unwrap();
    store
}

fn user_json() -> serde_json::Value {
    json!({ "id": "u-1", "email": "ann@example.com", "name": "Ann" })
}

// ----------------------------------------------------------------------------
// Login and Registration
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_login_stores_pair() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({ "email": "ann@example.com", "password": "hunter22" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "Login successful",
            "user": user_json(),
            "tokens": { "accessToken": "a1", "refreshToken": "r1" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let manager = TokenManager::new(&config_for(&server), store.clone()).unwrap();
    assert!(!manager.is_authenticated());

    let session = manager.login("ann@example.com", "hunter22").await.unwrap();

    assert_eq!(session.user.name, "Ann");
    assert_eq!(session.tokens.access_token, "a1");
    assert!(manager.is_authenticated());
    assert!(manager.tokens_ready());
    assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("a1"));
    assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("r1"));
}

#[tokio::test]
async fn test_login_error_is_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "success": false,
            "error": "Invalid email or password"
        })))
        .mount(&server)
        .await;

    let manager = TokenManager::new(&config_for(&server), Arc::new(MemoryStore::new())).unwrap();
    let err = manager.login("ann@example.com", "wrong").await.unwrap_err();

    assert!(matches!(err, AuthError::Rejected { status: 401, .. }));
    assert_eq!(err.to_string(), "Invalid email or password");
    assert!(!manager.is_authenticated());
}

#[tokio::test]
async fn test_register_joins_validation_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .and(body_json(json!({ "email": "bad", "password": "x", "name": "Ann" })))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "success": false,
            "errors": ["Email is invalid", "Password too short"]
        })))
        .mount(&server)
        .await;

    let manager = TokenManager::new(&config_for(&server), Arc::new(MemoryStore::new())).unwrap();
    let err = manager.register("bad", "x", "Ann").await.unwrap_err();

    assert_eq!(err.to_string(), "Email is invalid, Password too short");
}

#[tokio::test]
async fn test_register_generic_failure_without_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let manager = TokenManager::new(&config_for(&server), Arc::new(MemoryStore::new())).unwrap();
    let err = manager.register("ann@example.com", "hunter22", "Ann").await.unwrap_err();

    assert_eq!(err.to_string(), "Registration failed");
}

#[tokio::test]
async fn test_session_survives_restart_with_file_store() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "user": user_json(),
            "tokens": { "accessToken": "a1", "refreshToken": "r1" }
        })))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();

    {
        let store = Arc::new(FileStore::in_dir(dir.path()).unwrap());
        let manager = TokenManager::new(&config_for(&server), store).unwrap();
        manager.login("ann@example.com", "hunter22").await.unwrap();
    }

    let store = Arc::new(FileStore::in_dir(dir.path()).unwrap());
    let manager = TokenManager::new(&config_for(&server), store).unwrap();
    assert!(manager.is_authenticated());
    assert_eq!(manager.get_refresh_token().as_deref(), Some("r1"));
}

// ----------------------------------------------------------------------------
// Refresh
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_refresh_replaces_both_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({ "refreshToken": "r1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "tokens": { "accessToken": "a2", "refreshToken": "r2" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = seeded_store("a1", "r1");
    let manager = TokenManager::new(&config_for(&server), store.clone()).unwrap();

    let pair = manager.refresh().await.unwrap();

    assert_eq!(pair.access_token, "a2");
    assert_eq!(manager.get_access_token().as_deref(), Some("a2"));
    assert_eq!(manager.get_refresh_token().as_deref(), Some("r2"));
    assert_eq!(TokenSource::access_token(&manager).as_deref(), Some("a2"));
    assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("a2"));
}

#[tokio::test]
async fn test_invalid_refresh_clears_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "success": false,
            "error": "Invalid refresh token"
        })))
        .mount(&server)
        .await;

    let store = seeded_store("a1", "r1");
    let manager = TokenManager::new(&config_for(&server), store.clone()).unwrap();

    let err = manager.refresh().await.unwrap_err();

    assert!(matches!(err, AuthError::RefreshFailed { .. }));
    assert!(!manager.is_authenticated());
    assert!(manager.get_access_token().is_none());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_malformed_refresh_response_clears_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": false })))
        .mount(&server)
        .await;

    let manager = TokenManager::new(&config_for(&server), seeded_store("a1", "r1")).unwrap();

    assert!(matches!(
        manager.refresh().await,
        Err(AuthError::MalformedResponse(_))
    ));
    assert!(!manager.is_authenticated());
}

#[tokio::test]
async fn test_concurrent_refreshes_share_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "tokens": { "accessToken": "a2", "refreshToken": "r2" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let manager = TokenManager::new(&config_for(&server), seeded_store("a1", "r1")).unwrap();

    let (first, second) = tokio::join!(manager.refresh(), manager.refresh());

    assert_eq!(first.unwrap().access_token, "a2");
    assert_eq!(second.unwrap().access_token, "a2");
}

// ----------------------------------------------------------------------------
// Authenticated Requests
// ----------------------------------------------------------------------------

async fn mount_refresh(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({ "refreshToken": "r1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "tokens": { "accessToken": "a2", "refreshToken": "r2" }
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_expired_token_refreshes_once_and_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/profile"))
        .and(header("authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "error": "Token expired" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/profile"))
        .and(header("authorization", "Bearer a2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "user": user_json() })))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, 1).await;

    let manager = TokenManager::new(&config_for(&server), seeded_store("a1", "r1")).unwrap();
    let user = manager.profile().await.unwrap();

    assert_eq!(user.email, "ann@example.com");
    assert_eq!(manager.get_access_token().as_deref(), Some("a2"));
}

#[tokio::test]
async fn test_second_forbidden_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tickets"))
        .respond_with(ResponseTemplate::new(403))
        .expect(2)
        .mount(&server)
        .await;
    mount_refresh(&server, 1).await;

    let manager = TokenManager::new(&config_for(&server), seeded_store("a1", "r1")).unwrap();
    let result = manager
        .authenticated_request(Method::GET, "/api/tickets", None)
        .await;

    assert!(matches!(result, Err(AuthError::Forbidden)));
}

#[tokio::test]
async fn test_concurrent_forbidden_requests_refresh_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/profile"))
        .and(header("authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(403))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/profile"))
        .and(header("authorization", "Bearer a2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "user": user_json() })))
        .expect(2)
        .mount(&server)
        .await;
    mount_refresh(&server, 1).await;

    let manager = TokenManager::new(&config_for(&server), seeded_store("a1", "r1")).unwrap();
    let (first, second) = tokio::join!(manager.profile(), manager.profile());

    assert!(first.is_ok());
    assert!(second.is_ok());
}

#[tokio::test]
async fn test_refresh_failure_during_request_propagates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/profile"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "error": "expired" })))
        .mount(&server)
        .await;

    let manager = TokenManager::new(&config_for(&server), seeded_store("a1", "r1")).unwrap();

    assert!(matches!(
        manager.profile().await,
        Err(AuthError::RefreshFailed { .. })
    ));
    assert!(!manager.is_authenticated());
}

#[tokio::test]
async fn test_post_body_is_forwarded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/feedback"))
        .and(header("authorization", "Bearer a1"))
        .and(body_json(json!({ "rating": 5 })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let manager = TokenManager::new(&config_for(&server), seeded_store("a1", "r1")).unwrap();
    let response = manager
        .authenticated_request(Method::POST, "api/feedback", Some(&json!({ "rating": 5 })))
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 201);
}

// ----------------------------------------------------------------------------
// Logout
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_logout_notifies_server_and_clears() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .and(header("authorization", "Bearer a1"))
        .and(body_json(json!({ "refreshToken": "r1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let store = seeded_store("a1", "r1");
    let manager = TokenManager::new(&config_for(&server), store.clone()).unwrap();
    manager.logout().await;

    assert!(!manager.is_authenticated());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_logout_is_best_effort() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let manager = TokenManager::new(&config_for(&server), seeded_store("a1", "r1")).unwrap();
    manager.logout().await;
    assert!(!manager.is_authenticated());

    // Unreachable server
    let config = ClientConfig {
        api_base_url: "http://127.0.0.1:9".to_string(),
        request_timeout_ms: 500,
        ..ClientConfig::default()
    };
    let manager = TokenManager::new(&config, seeded_store("a1", "r1")).unwrap();
    manager.logout().await;
    assert!(!manager.is_authenticated());
}
