//! End-to-end tests: the full router over in-process store fakes.

use std::sync::Arc;

use axum::http::{StatusCode, header};
use axum_test::{TestResponse, TestServer};
use serde_json::json;

use crate::api::models::{AuthResponse, SessionResponse};
use crate::auth::SESSION_COOKIE;
use crate::test_utils::{FakeDirectory, MemoryKv, create_test_config, create_test_router};
use crate::{AppState, build_router};

fn server(directory: Arc<FakeDirectory>, kv: Arc<MemoryKv>) -> TestServer {
    TestServer::new(create_test_router(directory, kv)).expect("Failed to create test server")
}

/// Pull the session token out of a response's Set-Cookie header.
fn session_token(response: &TestResponse) -> String {
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("response should set the session cookie")
        .to_str()
        .unwrap();

    cookie
        .strip_prefix("shopfront_session=")
        .expect("unexpected cookie name")
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

fn cookie_header(token: &str) -> String {
    format!("{SESSION_COOKIE}={token}")
}

async fn register(server: &TestServer, email: &str, password: &str) -> (AuthResponse, String) {
    let response = server
        .post("/auth/register")
        .json(&json!({ "name": "Avery", "email": email, "password": password }))
        .await;

    response.assert_status(StatusCode::CREATED);
    let token = session_token(&response);
    (response.json::<AuthResponse>(), token)
}

#[tokio::test]
async fn test_register_sets_working_session_cookie() {
    let server = server(Arc::new(FakeDirectory::new()), Arc::new(MemoryKv::new()));

    let (auth, token) = register(&server, "avery@example.com", "correct horse").await;
    assert_eq!(auth.user.email, "avery@example.com");
    assert!(!token.is_empty());

    let session = server
        .get("/auth/session")
        .add_header("cookie", cookie_header(&token))
        .await
        .json::<SessionResponse>();

    assert!(!session.is_guest);
    assert_eq!(session.user_id, Some(auth.user.id));
    assert_eq!(session.identity.as_deref(), Some("avery@example.com"));
}

#[tokio::test]
async fn test_visitor_without_cookie_is_a_guest() {
    let server = server(Arc::new(FakeDirectory::new()), Arc::new(MemoryKv::new()));

    let session = server.get("/auth/session").await.json::<SessionResponse>();

    assert!(session.is_guest);
    assert_eq!(session.user_id, None);
    assert!(session.permissions.is_empty());
}

#[tokio::test]
async fn test_login_failures_are_indistinguishable() {
    let server = server(Arc::new(FakeDirectory::new()), Arc::new(MemoryKv::new()));
    register(&server, "avery@example.com", "correct horse").await;

    let wrong_password = server
        .post("/auth/login")
        .json(&json!({ "email": "avery@example.com", "password": "wrong" }))
        .await;
    let unknown_user = server
        .post("/auth/login")
        .json(&json!({ "email": "ghost@example.com", "password": "wrong" }))
        .await;

    wrong_password.assert_status(StatusCode::UNAUTHORIZED);
    unknown_user.assert_status(StatusCode::UNAUTHORIZED);
    // Same body either way: the response must not reveal whether the account exists
    assert_eq!(wrong_password.text(), unknown_user.text());
}

#[tokio::test]
async fn test_tenant_and_permission_hydration() {
    let directory = Arc::new(FakeDirectory::new());
    let tenant = directory.add_tenant("acme", "Acme Fresh Goods");
    let server = server(directory.clone(), Arc::new(MemoryKv::new()));

    let (auth, token) = register(&server, "avery@example.com", "correct horse").await;
    directory.grant(tenant.id, auth.user.id, &["catalog:read", "orders:read"]);

    let session = server
        .get("/auth/session")
        .add_header("host", "acme.shopfront.test")
        .add_header("cookie", cookie_header(&token))
        .await
        .json::<SessionResponse>();

    assert_eq!(session.tenant_id, Some(tenant.id));
    assert_eq!(session.permissions, vec!["catalog:read".to_string(), "orders:read".to_string()]);
}

#[tokio::test]
async fn test_unknown_subdomain_carries_no_tenant() {
    let server = server(Arc::new(FakeDirectory::new()), Arc::new(MemoryKv::new()));

    let session = server
        .get("/auth/session")
        .add_header("host", "nobody.shopfront.test")
        .await
        .json::<SessionResponse>();

    assert_eq!(session.tenant_id, None);
}

#[tokio::test]
async fn test_refresh_rotates_but_keeps_old_cookie_usable() {
    let server = server(Arc::new(FakeDirectory::new()), Arc::new(MemoryKv::new()));
    let (auth, old_token) = register(&server, "avery@example.com", "correct horse").await;

    let refresh = server
        .post("/auth/refresh")
        .add_header("cookie", cookie_header(&old_token))
        .await;
    refresh.assert_status_ok();
    let new_token = session_token(&refresh);
    assert_ne!(new_token, old_token);

    // A request still in flight with the old cookie is redirected through
    // the grace-period stub to the same principal
    for token in [&old_token, &new_token] {
        let session = server
            .get("/auth/session")
            .add_header("cookie", cookie_header(token))
            .await
            .json::<SessionResponse>();
        assert_eq!(session.user_id, Some(auth.user.id));
    }
}

#[tokio::test]
async fn test_logout_drops_the_session() {
    let server = server(Arc::new(FakeDirectory::new()), Arc::new(MemoryKv::new()));
    let (_, token) = register(&server, "avery@example.com", "correct horse").await;

    let logout = server.post("/auth/logout").add_header("cookie", cookie_header(&token)).await;
    logout.assert_status_ok();
    assert!(
        logout
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .contains("Max-Age=0")
    );

    let session = server
        .get("/auth/session")
        .add_header("cookie", cookie_header(&token))
        .await
        .json::<SessionResponse>();
    assert!(session.is_guest);
}

#[tokio::test]
async fn test_logout_all_drops_every_device() {
    let server = server(Arc::new(FakeDirectory::new()), Arc::new(MemoryKv::new()));
    let (_, first) = register(&server, "avery@example.com", "correct horse").await;

    let login = server
        .post("/auth/login")
        .json(&json!({ "email": "avery@example.com", "password": "correct horse" }))
        .await;
    let second = session_token(&login);

    server
        .post("/auth/logout-all")
        .add_header("cookie", cookie_header(&second))
        .await
        .assert_status_ok();

    for token in [&first, &second] {
        let session = server
            .get("/auth/session")
            .add_header("cookie", cookie_header(token))
            .await
            .json::<SessionResponse>();
        assert!(session.is_guest, "token should no longer resolve after logout-all");
    }
}

#[tokio::test]
async fn test_logout_all_requires_a_signed_in_session() {
    let server = server(Arc::new(FakeDirectory::new()), Arc::new(MemoryKv::new()));

    server.post("/auth/logout-all").await.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_registration_can_be_disabled() {
    let mut config = create_test_config();
    config.auth.allow_registration = false;
    let state = AppState::from_stores(config, Arc::new(FakeDirectory::new()), Arc::new(MemoryKv::new()));
    let server = TestServer::new(build_router(&state)).unwrap();

    let response = server
        .post("/auth/register")
        .json(&json!({ "name": "Avery", "email": "avery@example.com", "password": "correct horse" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let server = server(Arc::new(FakeDirectory::new()), Arc::new(MemoryKv::new()));
    register(&server, "avery@example.com", "correct horse").await;

    let response = server
        .post("/auth/register")
        .json(&json!({ "name": "Avery", "email": "avery@example.com", "password": "correct horse" }))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(response.text(), "An account with this email address already exists");
}

#[tokio::test]
async fn test_permission_outage_fails_open_to_no_permissions() {
    let directory = Arc::new(FakeDirectory::new());
    let tenant = directory.add_tenant("acme", "Acme Fresh Goods");
    let server = server(directory.clone(), Arc::new(MemoryKv::new()));

    let (auth, token) = register(&server, "avery@example.com", "correct horse").await;
    directory.grant(tenant.id, auth.user.id, &["catalog:read"]);

    // Warm the tenant resolution cache with a guest request, then take the
    // database down before the permission set was ever cached
    server.get("/auth/session").add_header("host", "acme.shopfront.test").await;
    directory.fail_queries(true);

    // The request still succeeds; the principal just holds no permissions
    let session = server
        .get("/auth/session")
        .add_header("host", "acme.shopfront.test")
        .add_header("cookie", cookie_header(&token))
        .await
        .json::<SessionResponse>();

    assert_eq!(session.tenant_id, Some(tenant.id));
    assert_eq!(session.user_id, Some(auth.user.id));
    assert!(session.permissions.is_empty());
}
