//! End-to-end login flows against an in-process mock of the auth API.
//!
//! The mock is a small axum app bound to a loopback port; the coordinator
//! talks to it through [`HttpAuthApi`]. A simulated browser stands in for the
//! provider popup: it follows the auth URL and posts the redirect page's
//! callback message back to the host.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use zvault_login::exchange::query_param;
use zvault_login::{
    AttemptStatus, HostWindow, HttpAuthApi, LoginCoordinator, LoginError, LoginRequest,
    LoginTimings, MessageEvent, PopupFeatures, PopupOpener, PopupWindow, SessionStore,
    WindowChannel,
};
use zvault_storage::MemoryBackend;

const HOST_ORIGIN: &str = "https://vault.example.com";

#[derive(Default)]
struct MockVault {
    saml_polls: AtomicUsize,
}

type Reply = (StatusCode, Json<Value>);

fn errors(status: StatusCode, message: &str) -> Reply {
    (status, Json(json!({ "errors": [message] })))
}

fn auth_block(token: &str) -> Value {
    json!({
        "auth": {
            "client_token": token,
            "accessor": "acc",
            "policies": ["default"],
            "renewable": true,
            "lease_duration": 3600,
            "entity_id": "entity-1",
        }
    })
}

async fn auth_url(Path(mount): Path<String>, Json(body): Json<Value>) -> Reply {
    let role = body["role"].as_str().unwrap_or_default();
    if role.is_empty() {
        return errors(StatusCode::BAD_REQUEST, "missing required 'role' parameter");
    }
    if role == "restricted" {
        return errors(StatusCode::FORBIDDEN, "permission denied");
    }
    let redirect = urlencoding::encode(body["redirect_uri"].as_str().unwrap_or_default()).into_owned();
    (
        StatusCode::OK,
        Json(json!({
            "data": {
                "auth_url": format!(
                    "https://idp.test/{mount}/authorize?client_id=vault&redirect_uri={redirect}&state=st-1&nonce=n"
                )
            }
        })),
    )
}

async fn oidc_callback(Query(params): Query<HashMap<String, String>>) -> Reply {
    match (params.get("state"), params.get("code")) {
        (Some(state), Some(code)) if state == "st-1" && code == "good" => {
            (StatusCode::OK, Json(auth_block("s.oidc")))
        }
        _ => errors(StatusCode::BAD_REQUEST, "invalid code"),
    }
}

async fn lookup_self(headers: HeaderMap) -> Reply {
    let token = headers
        .get("x-vault-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !token.starts_with("s.") {
        return errors(StatusCode::FORBIDDEN, "permission denied");
    }
    let namespace_path = headers
        .get("x-vault-namespace")
        .and_then(|v| v.to_str().ok())
        .map(|ns| format!("{ns}/"))
        .unwrap_or_default();
    (
        StatusCode::OK,
        Json(json!({
            "data": {
                "display_name": "oidc-alice",
                "policies": ["default"],
                "entity_id": "entity-1",
                "ttl": 3599,
                "renewable": true,
                "namespace_path": namespace_path,
            }
        })),
    )
}

async fn sso_service_url(Json(body): Json<Value>) -> Reply {
    if body["client_type"] != "browser" || body["client_challenge"].as_str().is_none() {
        return errors(StatusCode::BAD_REQUEST, "invalid client challenge");
    }
    (
        StatusCode::OK,
        Json(json!({
            "data": {
                "sso_service_url": "https://idp.test/sso",
                "token_poll_id": "poll-9",
            }
        })),
    )
}

async fn saml_token(State(vault): State<Arc<MockVault>>, Json(body): Json<Value>) -> Reply {
    if body["token_poll_id"] != "poll-9" {
        return errors(StatusCode::BAD_REQUEST, "unknown poll id");
    }
    if vault.saml_polls.fetch_add(1, Ordering::SeqCst) < 2 {
        return errors(StatusCode::UNAUTHORIZED, "token not yet available");
    }
    (StatusCode::OK, Json(auth_block("s.saml")))
}

async fn spawn_mock() -> (String, Arc<MockVault>) {
    let vault = Arc::new(MockVault::default());
    let app = Router::new()
        .route("/v1/auth/{mount}/oidc/auth_url", post(auth_url))
        .route("/v1/auth/{mount}/oidc/callback", get(oidc_callback))
        .route("/v1/auth/token/lookup-self", get(lookup_self))
        .route("/v1/auth/{mount}/sso_service_url", post(sso_service_url))
        .route("/v1/auth/{mount}/token", post(saml_token))
        .with_state(Arc::clone(&vault));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    (format!("http://{addr}"), vault)
}

#[derive(Default)]
struct BrowserWindow {
    closed: AtomicBool,
}

impl PopupWindow for BrowserWindow {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Follows the provider URL and, for OIDC, posts the redirect page's message.
struct SimulatedBrowser {
    channel: WindowChannel,
    code: &'static str,
    namespace: Option<&'static str>,
    windows: std::sync::Mutex<Vec<Arc<BrowserWindow>>>,
}

impl SimulatedBrowser {
    fn new(channel: &WindowChannel, code: &'static str) -> Self {
        Self {
            channel: channel.clone(),
            code,
            namespace: None,
            windows: std::sync::Mutex::default(),
        }
    }

    fn all_closed(&self) -> bool {
        self.windows.lock().unwrap().iter().all(|w| w.is_closed())
    }
}

impl PopupOpener for SimulatedBrowser {
    fn open(&self, url: &str, _name: &str, _features: &PopupFeatures) -> Option<Arc<dyn PopupWindow>> {
        let window = Arc::new(BrowserWindow::default());
        self.windows.lock().unwrap().push(Arc::clone(&window));

        if let Some(state) = query_param(url, "state") {
            let state = match self.namespace {
                Some(ns) => format!("{state},ns={ns}"),
                None => state,
            };
            let channel = self.channel.clone();
            let code = self.code;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                channel.post_message(MessageEvent::oidc_callback(HOST_ORIGIN, "oidc", &state, code));
            });
        }
        Some(window)
    }
}

fn coordinator(base_url: &str, browser: &Arc<SimulatedBrowser>, channel: WindowChannel) -> LoginCoordinator {
    LoginCoordinator::new(
        Arc::new(HttpAuthApi::new(base_url).unwrap()),
        Arc::clone(browser) as Arc<dyn PopupOpener>,
        channel,
        HostWindow::new(HOST_ORIGIN),
    )
    .with_timings(LoginTimings::testing())
}

#[tokio::test]
async fn oidc_login_over_http() {
    let (base_url, _) = spawn_mock().await;
    let channel = WindowChannel::default();
    let browser = Arc::new(SimulatedBrowser::new(&channel, "good"));
    let store = SessionStore::new(Arc::new(MemoryBackend::new()));
    let coordinator = coordinator(&base_url, &browser, channel.clone()).with_store(store.clone());

    let session = coordinator
        .login(LoginRequest::oidc("oidc", "dev"))
        .await
        .unwrap();

    assert_eq!(session.token, "s.oidc");
    assert_eq!(session.display_name, "oidc-alice");
    assert_eq!(session.ttl, 3599);
    assert_eq!(session.user_root_namespace, "");
    assert_eq!(session.token_name(), "vault-oidc☃s.oidc");
    assert!(browser.all_closed());
    assert_eq!(channel.listener_count(), 0);
    assert_eq!(coordinator.snapshot().status, AttemptStatus::Success);
    assert_eq!(store.current().await.unwrap(), Some(session));
}

#[tokio::test]
async fn namespace_from_state_reaches_the_backend() {
    let (base_url, _) = spawn_mock().await;
    let channel = WindowChannel::default();
    let mut browser = SimulatedBrowser::new(&channel, "good");
    browser.namespace = Some("teamA");
    let browser = Arc::new(browser);

    let session = coordinator(&base_url, &browser, channel)
        .login(LoginRequest::oidc("oidc", "dev"))
        .await
        .unwrap();
    assert_eq!(session.user_root_namespace, "teamA");
}

#[tokio::test]
async fn backend_error_reaches_the_banner() {
    let (base_url, _) = spawn_mock().await;
    let channel = WindowChannel::default();
    let browser = Arc::new(SimulatedBrowser::new(&channel, "good"));
    let coordinator = coordinator(&base_url, &browser, channel);

    let err = coordinator
        .login(LoginRequest::oidc("oidc", ""))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Authentication failed: missing required 'role' parameter"
    );
    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.status, AttemptStatus::Error);
    assert_eq!(
        snapshot.error.as_deref(),
        Some("Authentication failed: missing required 'role' parameter")
    );
}

#[tokio::test]
async fn rejected_code_fails_and_closes_popup() {
    let (base_url, _) = spawn_mock().await;
    let channel = WindowChannel::default();
    let browser = Arc::new(SimulatedBrowser::new(&channel, "stolen"));

    let err = coordinator(&base_url, &browser, channel)
        .login(LoginRequest::oidc("oidc", "dev"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Authentication failed: invalid code");
    assert!(browser.all_closed());
}

#[tokio::test]
async fn restricted_role_is_not_an_error() {
    let (base_url, _) = spawn_mock().await;
    let channel = WindowChannel::default();
    let browser = Arc::new(SimulatedBrowser::new(&channel, "good"));
    let coordinator = coordinator(&base_url, &browser, channel);

    let err = coordinator
        .login(LoginRequest::oidc("oidc", "restricted"))
        .await
        .unwrap_err();
    assert!(matches!(err, LoginError::RoleUnusable { .. }));
    assert_eq!(err.banner_message(), None);
    assert_eq!(coordinator.snapshot().status, AttemptStatus::Idle);
    assert!(browser.windows.lock().unwrap().is_empty());
}

#[tokio::test]
async fn saml_login_polls_until_token_is_issued() {
    let (base_url, vault) = spawn_mock().await;
    let channel = WindowChannel::default();
    let browser = Arc::new(SimulatedBrowser::new(&channel, "unused"));

    let session = coordinator(&base_url, &browser, channel)
        .login(LoginRequest::saml("saml"))
        .await
        .unwrap();

    assert_eq!(session.token, "s.saml");
    assert_eq!(session.backend.auth_type, "saml");
    assert_eq!(vault.saml_polls.load(Ordering::SeqCst), 3);
    assert!(browser.all_closed());
}
