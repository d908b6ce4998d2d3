//! OIDC/SAML login state machine.
//!
//! [`LoginCoordinator::login`] drives one attempt through
//!
//! ```text
//! idle -> awaiting_role -> popup_open -> awaiting_callback -> exchanging
//!      -> success | error | cancelled
//! ```
//!
//! # Attempt ownership
//!
//! - At most one attempt is live. Starting a new one cancels the previous
//!   attempt and closes its popup before anything else happens.
//! - Each attempt owns its popup, its message subscription and its liveness
//!   poll. Entering any terminal state closes the popup and drops the other
//!   two, including when the caller drops the `login` future mid-flight.
//! - Every suspension point races against the attempt's cancellation token,
//!   which is a child of the host's unload token.
//!
//! Progress is published as an [`AttemptSnapshot`] on a `watch` channel.
//! Snapshots of a superseded attempt are never published.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CancelReason, ExchangeError, LoginError};
use crate::exchange::{
    AuthApi, ClientVerifier, SamlPoll, TokenFields, exchange_oidc_code, oidc_redirect_uri,
    query_param, resolve_token,
};
use crate::messaging::{CallbackFilter, WindowChannel};
use crate::popup::{DEFAULT_POLL_INTERVAL, PopupHandle, PopupManager, PopupOpener, ScreenSize};
use crate::session::{Backend, SessionOptions, SessionRecord, build_session};
use crate::store::SessionStore;
use crate::types::{AttemptSnapshot, AttemptStatus, AuthMethod, CallbackPayload, LoginRequest};

/// Window name of the OIDC provider popup.
pub const OIDC_WINDOW_NAME: &str = "vaultOIDCWindow";
/// Window name of the SAML provider popup.
pub const SAML_WINDOW_NAME: &str = "vaultSAMLWindow";

/// Poll intervals and deadlines of the login flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginTimings {
    /// How often popup liveness is checked.
    pub popup_poll: Duration,
    /// How often the SAML token endpoint is polled.
    pub saml_poll: Duration,
    /// How long SAML polling may run before the attempt times out.
    pub saml_max_wait: Duration,
}

impl LoginTimings {
    /// 500 ms liveness poll, 1 s SAML poll, 180 s SAML window.
    #[must_use]
    pub fn production() -> Self {
        Self {
            popup_poll: DEFAULT_POLL_INTERVAL,
            saml_poll: Duration::from_secs(1),
            saml_max_wait: Duration::from_secs(180),
        }
    }

    /// Production timings with a 50 ms SAML poll.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            saml_poll: Duration::from_millis(50),
            ..Self::production()
        }
    }
}

impl Default for LoginTimings {
    fn default() -> Self {
        Self::production()
    }
}

/// The page hosting the login form.
#[derive(Debug, Clone)]
pub struct HostWindow {
    origin: String,
    screen: ScreenSize,
    unload: CancellationToken,
}

impl HostWindow {
    /// A host served from `origin`, e.g. `https://vault.example.com`.
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into().trim_end_matches('/').to_owned(),
            screen: ScreenSize::default(),
            unload: CancellationToken::new(),
        }
    }

    /// Set the screen size popups are centred on.
    #[must_use]
    pub fn with_screen(mut self, screen: ScreenSize) -> Self {
        self.screen = screen;
        self
    }

    #[must_use]
    pub fn screen(&self) -> ScreenSize {
        self.screen
    }

    /// Signal that the page is going away. Cancels the live attempt.
    pub fn unload(&self) {
        self.unload.cancel();
    }

    #[must_use]
    pub fn is_unloaded(&self) -> bool {
        self.unload.is_cancelled()
    }
}

struct ActiveAttempt {
    id: String,
    cancel: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
    popup: Option<PopupHandle>,
}

/// Runs login attempts and owns the single live one.
pub struct LoginCoordinator {
    api: Arc<dyn AuthApi>,
    popups: PopupManager,
    channel: WindowChannel,
    host: HostWindow,
    timings: LoginTimings,
    store: Option<SessionStore>,
    active: Mutex<Option<ActiveAttempt>>,
    status: watch::Sender<AttemptSnapshot>,
}

impl fmt::Debug for LoginCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCoordinator")
            .field("origin", &self.host.origin)
            .field("timings", &self.timings)
            .field("status", &self.status.borrow().status)
            .finish_non_exhaustive()
    }
}

impl LoginCoordinator {
    /// A coordinator with production timings and no session store.
    pub fn new(
        api: Arc<dyn AuthApi>,
        opener: Arc<dyn PopupOpener>,
        channel: WindowChannel,
        host: HostWindow,
    ) -> Self {
        let timings = LoginTimings::production();
        let popups = PopupManager::new(opener, host.screen()).with_poll_interval(timings.popup_poll);
        let (status, _) = watch::channel(AttemptSnapshot::default());
        Self {
            api,
            popups,
            channel,
            host,
            timings,
            store: None,
            active: Mutex::new(None),
            status,
        }
    }

    #[must_use]
    pub fn with_timings(mut self, timings: LoginTimings) -> Self {
        self.popups = self.popups.with_poll_interval(timings.popup_poll);
        self.timings = timings;
        self
    }

    /// Persist successful sessions and the last used method in `store`.
    #[must_use]
    pub fn with_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Receive a snapshot on every transition.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<AttemptSnapshot> {
        self.status.subscribe()
    }

    /// The latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> AttemptSnapshot {
        self.status.borrow().clone()
    }

    /// Run one login attempt to completion.
    ///
    /// Cancels any attempt already in progress.
    ///
    /// # Errors
    ///
    /// - [`LoginError::RoleUnusable`] if the OIDC role was refused; the
    ///   attempt returns to idle without an error banner.
    /// - [`LoginError::PopupFailed`], [`LoginError::WindowClosed`],
    ///   [`LoginError::MissingParams`] or [`LoginError::Timeout`] for popup
    ///   and callback failures.
    /// - [`LoginError::Exchange`] or [`LoginError::MfaRequired`] if the
    ///   backend rejects the login.
    /// - [`LoginError::Cancelled`] if a newer attempt or the host cancelled
    ///   this one, or the caller dropped the future.
    pub async fn login(&self, request: LoginRequest) -> Result<SessionRecord, LoginError> {
        request.validate()?;
        let mut scope = self.begin(&request);
        let result = match request.method {
            AuthMethod::Oidc => self.run_oidc(&mut scope, &request).await,
            AuthMethod::Saml => self.run_saml(&mut scope, &request).await,
        };
        scope.finish(&result);
        result
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveAttempt>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, request: &LoginRequest) -> AttemptScope<'_> {
        let id = uuid::Uuid::new_v4().to_string();
        let cancel = self.host.unload.child_token();
        let reason = Arc::new(OnceLock::new());

        let previous = self.lock_active().replace(ActiveAttempt {
            id: id.clone(),
            cancel: cancel.clone(),
            reason: Arc::clone(&reason),
            popup: None,
        });
        if let Some(previous) = previous {
            let _ = previous.reason.set(CancelReason::Superseded);
            previous.cancel.cancel();
            self.popups.close(previous.popup.as_ref());
            info!(attempt = %previous.id, "previous login attempt superseded");
        }

        let snapshot = AttemptSnapshot {
            id,
            method: Some(request.method),
            mount_path: request.mount_path.clone(),
            namespace: request.namespace.clone(),
            role: request.role.clone(),
            status: AttemptStatus::Idle,
            error: None,
        };
        debug!(
            attempt = %snapshot.id,
            method = %request.method,
            mount = %request.mount_path,
            "login attempt started"
        );
        self.status.send_replace(snapshot.clone());

        AttemptScope {
            coordinator: self,
            cancel,
            reason,
            snapshot,
            popup: None,
            finished: false,
        }
    }

    async fn request_auth_url(&self, request: &LoginRequest) -> Result<String, ExchangeError> {
        let role = request.role.as_deref().unwrap_or_default();
        let redirect_uri = oidc_redirect_uri(&self.host.origin, &request.mount_path);
        self.api
            .oidc_auth_url(
                &request.mount_path,
                role,
                &redirect_uri,
                request.namespace.as_deref(),
            )
            .await
    }

    async fn run_oidc(
        &self,
        scope: &mut AttemptScope<'_>,
        request: &LoginRequest,
    ) -> Result<SessionRecord, LoginError> {
        scope.transition(AttemptStatus::AwaitingRole);
        let auth_url = match scope.race(self.request_auth_url(request)).await {
            Ok(url) => url,
            Err(LoginError::Exchange(e)) if e.is_forbidden() => {
                return Err(LoginError::RoleUnusable {
                    role: request.role.clone().unwrap_or_default(),
                });
            }
            Err(e) => return Err(e),
        };

        let popup = self
            .popups
            .open(&auth_url, OIDC_WINDOW_NAME)
            .ok_or(LoginError::PopupFailed)?;
        scope.attach_popup(&popup);
        scope.transition(AttemptStatus::PopupOpen);

        let expected_state = query_param(&auth_url, "state");
        let mut messages = self
            .channel
            .subscribe(CallbackFilter::new(self.host.origin.as_str()));
        let mut liveness = self.popups.poll(&popup);
        scope.transition(AttemptStatus::AwaitingCallback);

        let callback = loop {
            let event = tokio::select! {
                biased;
                () = scope.cancel.cancelled() => return Err(scope.cancelled()),
                event = messages.next_match() => event?,
                () = liveness.closed() => return Err(LoginError::WindowClosed),
            };
            let payload = CallbackPayload::from_event(&event).ok_or(LoginError::MissingParams)?;
            if expected_state
                .as_deref()
                .is_some_and(|expected| payload.has_foreign_state(expected))
            {
                debug!(attempt = %scope.snapshot.id, "ignoring callback for another attempt");
                continue;
            }
            break payload.resolve()?;
        };
        drop(messages);
        drop(liveness);
        self.popups.close(Some(&popup));

        scope.transition(AttemptStatus::Exchanging);
        let namespace = callback
            .namespace
            .clone()
            .or_else(|| request.namespace.clone());
        let token = scope
            .race(exchange_oidc_code(
                self.api.as_ref(),
                &callback.path,
                namespace.as_deref(),
                &callback.state,
                &callback.code,
            ))
            .await?;
        self.complete(scope, request, token.auth.client_token, &token.fields, namespace)
            .await
    }

    async fn run_saml(
        &self,
        scope: &mut AttemptScope<'_>,
        request: &LoginRequest,
    ) -> Result<SessionRecord, LoginError> {
        let mount = request.mount_path.as_str();
        let namespace = request.namespace.as_deref();
        let verifier = ClientVerifier::generate();
        let acs_url = self.api.saml_acs_url(mount);
        let role = request.role.as_deref().filter(|r| !r.is_empty());

        let sso = scope
            .race(
                self.api
                    .saml_sso_service_url(mount, role, &acs_url, &verifier.challenge, namespace),
            )
            .await?;

        let popup = self
            .popups
            .open(&sso.sso_service_url, SAML_WINDOW_NAME)
            .ok_or(LoginError::PopupFailed)?;
        scope.attach_popup(&popup);
        scope.transition(AttemptStatus::PopupOpen);

        let deadline = Instant::now() + self.timings.saml_max_wait;
        let period = self.timings.saml_poll.max(Duration::from_millis(1));
        let mut token_poll = tokio::time::interval_at(Instant::now() + period, period);
        token_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut liveness = self.popups.poll(&popup);
        scope.transition(AttemptStatus::AwaitingCallback);

        let auth = loop {
            tokio::select! {
                biased;
                () = scope.cancel.cancelled() => return Err(scope.cancelled()),
                () = tokio::time::sleep_until(deadline) => return Err(LoginError::Timeout),
                () = liveness.closed() => return Err(LoginError::WindowClosed),
                _ = token_poll.tick() => {}
            }

            // An in-flight token request must not hold off the deadline or
            // the liveness check.
            let token_request =
                self.api
                    .saml_token(mount, &sso.token_poll_id, &verifier.verifier, namespace);
            let poll = tokio::select! {
                biased;
                () = scope.cancel.cancelled() => return Err(scope.cancelled()),
                () = tokio::time::sleep_until(deadline) => return Err(LoginError::Timeout),
                () = liveness.closed() => return Err(LoginError::WindowClosed),
                poll = token_request => poll?,
            };
            match poll {
                SamlPoll::Ready(auth) => break auth,
                SamlPoll::Pending => debug!(attempt = %scope.snapshot.id, "saml token pending"),
            }
        };
        drop(liveness);
        self.popups.close(Some(&popup));

        scope.transition(AttemptStatus::Exchanging);
        let token = scope
            .race(resolve_token(self.api.as_ref(), auth, namespace))
            .await?;
        self.complete(
            scope,
            request,
            token.auth.client_token,
            &token.fields,
            request.namespace.clone(),
        )
        .await
    }

    async fn complete(
        &self,
        scope: &AttemptScope<'_>,
        request: &LoginRequest,
        token: String,
        fields: &TokenFields,
        namespace: Option<String>,
    ) -> Result<SessionRecord, LoginError> {
        let previous_root_namespace = match &self.store {
            Some(store) => scope
                .race(store.current())
                .await?
                .map(|s| s.user_root_namespace)
                .filter(|ns| !ns.is_empty()),
            None => None,
        };
        let options = SessionOptions {
            token,
            backend: Backend {
                mount_path: request.mount_path.clone(),
                auth_type: request.method.as_str().to_owned(),
            },
            namespace,
            previous_root_namespace,
            now_ms: chrono::Utc::now().timestamp_millis(),
        };
        let session = build_session(fields, &options);

        if let Some(store) = &self.store {
            scope.race(store.save(&session)).await?;
            scope
                .race(store.remember_auth_method(request.method, &request.mount_path))
                .await?;
        }
        Ok(session)
    }
}

/// Owns the resources of one attempt until it reaches a terminal state.
///
/// Dropping an unfinished scope ends the attempt as cancelled.
struct AttemptScope<'a> {
    coordinator: &'a LoginCoordinator,
    cancel: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
    snapshot: AttemptSnapshot,
    popup: Option<PopupHandle>,
    finished: bool,
}

impl AttemptScope<'_> {
    fn is_active(&self) -> bool {
        self.coordinator
            .lock_active()
            .as_ref()
            .is_some_and(|a| a.id == self.snapshot.id)
    }

    fn transition(&mut self, status: AttemptStatus) {
        self.snapshot.status = status;
        if self.is_active() {
            debug!(attempt = %self.snapshot.id, ?status, "login attempt transition");
            self.coordinator.status.send_replace(self.snapshot.clone());
        }
    }

    fn attach_popup(&mut self, popup: &PopupHandle) {
        self.popup = Some(popup.clone());
        let mut guard = self.coordinator.lock_active();
        if let Some(active) = guard.as_mut().filter(|a| a.id == self.snapshot.id) {
            active.popup = Some(popup.clone());
        }
    }

    fn cancelled(&self) -> LoginError {
        let reason = match self.reason.get() {
            Some(reason) => *reason,
            None if self.coordinator.host.is_unloaded() => CancelReason::HostUnloaded,
            None => CancelReason::Abandoned,
        };
        LoginError::Cancelled { reason }
    }

    /// Await `fut` unless the attempt is cancelled first.
    async fn race<T, E, F>(&self, fut: F) -> Result<T, LoginError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<LoginError>,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(self.cancelled()),
            result = fut => result.map_err(Into::into),
        }
    }

    fn finish(&mut self, result: &Result<SessionRecord, LoginError>) {
        let id = self.snapshot.id.clone();
        match result {
            Ok(session) => {
                info!(attempt = %id, backend = %session.backend.auth_type, "login succeeded");
                self.terminate(AttemptStatus::Success, None);
            }
            Err(LoginError::RoleUnusable { role }) => {
                info!(attempt = %id, role = %role, "role cannot be used to sign in");
                self.terminate(AttemptStatus::Idle, None);
            }
            Err(e @ LoginError::Cancelled { .. }) => {
                info!(attempt = %id, error = %e, "login cancelled");
                self.terminate(AttemptStatus::Cancelled, e.banner_message());
            }
            Err(e) => {
                warn!(attempt = %id, error = %e, "login failed");
                self.terminate(AttemptStatus::Error, e.banner_message());
            }
        }
    }

    fn terminate(&mut self, status: AttemptStatus, error: Option<String>) {
        self.finished = true;
        self.coordinator.popups.close(self.popup.take().as_ref());
        self.cancel.cancel();

        let was_active = {
            let mut active = self.coordinator.lock_active();
            if active.as_ref().is_some_and(|a| a.id == self.snapshot.id) {
                *active = None;
                true
            } else {
                false
            }
        };
        self.snapshot.status = status;
        self.snapshot.error = error;
        if was_active {
            self.coordinator.status.send_replace(self.snapshot.clone());
        }
    }
}

impl Drop for AttemptScope<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let err = self.cancelled();
            info!(attempt = %self.snapshot.id, error = %err, "login attempt dropped");
            self.terminate(AttemptStatus::Cancelled, err.banner_message());
        }
    }
}
