//! Fakes shared by the unit tests.

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::ExchangeError;
use crate::exchange::{AuthApi, AuthResponse, SamlPoll, SsoServiceUrl, TokenFields};
use crate::popup::{PopupFeatures, PopupOpener, PopupWindow};

/// A popup that closes when told to, or when the "user" closes it.
#[derive(Debug, Default)]
pub struct FakeWindow {
    closed: AtomicBool,
    close_calls: AtomicUsize,
    pub url: String,
    pub features: Option<PopupFeatures>,
}

impl FakeWindow {
    pub fn user_closes(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PopupWindow for FakeWindow {
    fn is_closed(&self) -> bool {
        self.closed()
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Records every open call; optionally behaves like a popup blocker.
#[derive(Debug, Default)]
pub struct FakeOpener {
    block: bool,
    attempts: AtomicUsize,
    windows: Mutex<Vec<Arc<FakeWindow>>>,
}

impl FakeOpener {
    pub fn blocking() -> Self {
        Self {
            block: true,
            ..Self::default()
        }
    }

    pub fn open_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn window(&self, index: usize) -> Arc<FakeWindow> {
        Arc::clone(&self.windows.lock().unwrap()[index])
    }

    pub fn open_windows(&self) -> usize {
        self.windows
            .lock()
            .unwrap()
            .iter()
            .filter(|w| !w.closed())
            .count()
    }
}

impl PopupOpener for FakeOpener {
    fn open(
        &self,
        url: &str,
        _name: &str,
        features: &PopupFeatures,
    ) -> Option<Arc<dyn PopupWindow>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.block {
            return None;
        }
        let window = Arc::new(FakeWindow {
            url: url.to_owned(),
            features: Some(*features),
            ..FakeWindow::default()
        });
        self.windows.lock().unwrap().push(Arc::clone(&window));
        Some(window)
    }
}

/// Canned reply: success value or `(status, errors)`.
pub type Reply<T> = Result<T, (u16, Vec<String>)>;

fn reply<T: Clone>(slot: &Mutex<Reply<T>>) -> Result<T, ExchangeError> {
    slot.lock()
        .unwrap()
        .clone()
        .map_err(|(status, messages)| ExchangeError::Api { status, messages })
}

/// An [`AuthApi`] answering from canned replies and recording calls.
#[derive(Debug)]
pub struct StubAuthApi {
    pub auth_url: Mutex<Reply<String>>,
    pub callback: Mutex<Reply<AuthResponse>>,
    pub lookup: Mutex<Reply<TokenFields>>,
    pub sso: Mutex<Reply<SsoServiceUrl>>,
    pub saml_polls: Mutex<VecDeque<Reply<SamlPoll>>>,
    /// How long each SAML token request takes to answer.
    pub saml_delay: Mutex<Duration>,
    pub calls: Mutex<Vec<String>>,
}

impl Default for StubAuthApi {
    fn default() -> Self {
        Self {
            auth_url: Mutex::new(Ok(
                "https://idp.example.com/authorize?client_id=vault&state=state&nonce=n".to_owned(),
            )),
            callback: Mutex::new(Ok(AuthResponse {
                client_token: "s.client-token".to_owned(),
                policies: vec!["default".to_owned()],
                renewable: true,
                lease_duration: 3600,
                ..AuthResponse::default()
            })),
            lookup: Mutex::new(Ok(TokenFields {
                display_name: "oidc-alice".to_owned(),
                policies: vec!["default".to_owned()],
                entity_id: "entity-1".to_owned(),
                ttl: 3600,
                renewable: true,
                ..TokenFields::default()
            })),
            sso: Mutex::new(Ok(SsoServiceUrl {
                sso_service_url: "https://idp.example.com/sso".to_owned(),
                token_poll_id: "poll-1".to_owned(),
            })),
            saml_polls: Mutex::new(VecDeque::new()),
            saml_delay: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl StubAuthApi {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl AuthApi for StubAuthApi {
    async fn oidc_auth_url(
        &self,
        mount: &str,
        role: &str,
        redirect_uri: &str,
        namespace: Option<&str>,
    ) -> Result<String, ExchangeError> {
        self.record(format!(
            "auth_url {mount} role={role} redirect={redirect_uri} ns={}",
            namespace.unwrap_or("")
        ));
        reply(&self.auth_url)
    }

    async fn oidc_callback(
        &self,
        mount: &str,
        namespace: Option<&str>,
        state: &str,
        code: &str,
    ) -> Result<AuthResponse, ExchangeError> {
        self.record(format!(
            "callback {mount} state={state} code={code} ns={}",
            namespace.unwrap_or("")
        ));
        reply(&self.callback)
    }

    async fn lookup_self(
        &self,
        token: &str,
        namespace: Option<&str>,
    ) -> Result<TokenFields, ExchangeError> {
        self.record(format!("lookup-self {token} ns={}", namespace.unwrap_or("")));
        reply(&self.lookup)
    }

    async fn saml_sso_service_url(
        &self,
        mount: &str,
        _role: Option<&str>,
        acs_url: &str,
        _client_challenge: &str,
        _namespace: Option<&str>,
    ) -> Result<SsoServiceUrl, ExchangeError> {
        self.record(format!("sso_service_url {mount} acs={acs_url}"));
        reply(&self.sso)
    }

    async fn saml_token(
        &self,
        mount: &str,
        token_poll_id: &str,
        _client_verifier: &str,
        _namespace: Option<&str>,
    ) -> Result<SamlPoll, ExchangeError> {
        self.record(format!("token {mount} poll={token_poll_id}"));
        let delay = *self.saml_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let next = self.saml_polls.lock().unwrap().pop_front();
        match next {
            Some(Ok(poll)) => Ok(poll),
            Some(Err((status, messages))) => Err(ExchangeError::Api { status, messages }),
            None => Ok(SamlPoll::Pending),
        }
    }

    async fn renew_self(
        &self,
        token: &str,
        _namespace: Option<&str>,
    ) -> Result<AuthResponse, ExchangeError> {
        self.record(format!("renew-self {token}"));
        reply(&self.callback)
    }

    async fn revoke_self(&self, token: &str, _namespace: Option<&str>) -> Result<(), ExchangeError> {
        self.record(format!("revoke-self {token}"));
        Ok(())
    }

    fn saml_acs_url(&self, mount: &str) -> String {
        format!("https://vault.example.com/v1/auth/{mount}/callback")
    }
}
