//! Loopback relay for the OIDC redirect.
//!
//! The provider redirects the system browser to
//! `http://127.0.0.1:<port>/ui/vault/auth/<mount>/oidc/callback`. The relay
//! plays the console's callback page: it turns the query string into the
//! callback message and posts it on the host's [`WindowChannel`] as a
//! trusted, same-origin event.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Json};
use axum::routing::get;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use zvault_login::types::CALLBACK_SOURCE;
use zvault_login::{MessageEvent, WindowChannel};

const CALLBACK_SUFFIX: &str = "/oidc/callback";

const SIGNED_IN_PAGE: &str = "<!doctype html><html><head><title>ZVault</title></head>\
<body><h1>Signed in</h1><p>You can close this window and return to the terminal.</p></body></html>";

const NOT_WAITING_PAGE: &str = "<!doctype html><html><head><title>ZVault</title></head>\
<body><h1>No login in progress</h1><p>Start a new login from the terminal.</p></body></html>";

/// Shared state of the relay routes.
#[derive(Debug, Clone)]
pub struct RelayState {
    pub channel: WindowChannel,
    pub origin: String,
}

/// A running relay server.
#[derive(Debug)]
pub struct CallbackRelay {
    origin: String,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl CallbackRelay {
    /// Bind `127.0.0.1:<port>` and serve the relay routes.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be bound.
    pub async fn start(port: u16, channel: WindowChannel) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port)))
            .await
            .with_context(|| format!("failed to bind callback listener on port {port}"))?;
        let addr = listener
            .local_addr()
            .context("failed to read callback listener address")?;
        let origin = format!("http://{addr}");

        let app = router(Arc::new(RelayState {
            channel,
            origin: origin.clone(),
        }));
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "callback relay stopped with an error");
            }
        });
        info!(%origin, "callback relay listening");

        Ok(Self {
            origin,
            shutdown,
            task,
        })
    }

    /// Origin the relay is reachable at, e.g. `http://127.0.0.1:49152`.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Stop serving and wait for in-flight requests.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "callback relay task failed");
        }
    }
}

/// Build the relay router.
pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/ui/vault/auth/{*rest}", get(oidc_callback))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn oidc_callback(
    State(state): State<Arc<RelayState>>,
    Path(rest): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(mount) = rest
        .trim_end_matches('/')
        .strip_suffix(CALLBACK_SUFFIX)
        .filter(|m| !m.is_empty())
    else {
        return (StatusCode::NOT_FOUND, Html(NOT_WAITING_PAGE));
    };

    let mut data = json!({
        "source": CALLBACK_SOURCE,
        "path": mount,
        "state": params.get("state"),
        "code": params.get("code"),
    });
    if let Some(ns) = params.get("namespace").filter(|ns| !ns.is_empty()) {
        data["namespace"] = Value::from(ns.as_str());
    }

    let delivered = state
        .channel
        .post_message(MessageEvent::trusted(state.origin.as_str(), data));
    debug!(mount, delivered, "relayed provider callback");
    if delivered == 0 {
        return (StatusCode::GONE, Html(NOT_WAITING_PAGE));
    }
    (StatusCode::OK, Html(SIGNED_IN_PAGE))
}
