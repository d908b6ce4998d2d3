//! Browser-login coordinator for `ZVault`.
//!
//! Drives OIDC and SAML logins that run in a provider popup: open the popup,
//! wait for the callback message (or the token, for SAML), exchange it with
//! the auth backend and build the session record. The browser pieces are
//! traits so the same state machine runs in a web host or a native one:
//!
//! - [`PopupOpener`] / [`PopupWindow`]: `window.open` and its handle
//! - [`WindowChannel`]: the host window's `message` events
//! - [`HostWindow`]: the host origin and its unload signal
//! - [`AuthApi`]: the backend HTTP API, implemented by [`HttpAuthApi`]
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use zvault_login::{
//!     HostWindow, HttpAuthApi, LoginCoordinator, LoginRequest, PopupFeatures, PopupOpener,
//!     PopupWindow, WindowChannel,
//! };
//!
//! struct NoPopups;
//!
//! impl PopupOpener for NoPopups {
//!     fn open(&self, _: &str, _: &str, _: &PopupFeatures) -> Option<Arc<dyn PopupWindow>> {
//!         None
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let api = Arc::new(HttpAuthApi::new("https://vault.example.com")?);
//! let coordinator = LoginCoordinator::new(
//!     api,
//!     Arc::new(NoPopups),
//!     WindowChannel::default(),
//!     HostWindow::new("https://vault.example.com"),
//! );
//! let session = coordinator.login(LoginRequest::oidc("oidc", "dev")).await?;
//! assert!(!session.token.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod exchange;
pub mod http;
pub mod machine;
pub mod messaging;
pub mod popup;
pub mod session;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_support;

pub use error::{CancelReason, ExchangeError, LoginError, MessagingError, StoreError};
pub use exchange::{AuthApi, AuthResponse, SamlPoll, SsoServiceUrl, TokenFields};
pub use http::{HttpAuthApi, HttpAuthApiConfig};
pub use machine::{HostWindow, LoginCoordinator, LoginTimings};
pub use messaging::{CallbackFilter, MessageEvent, WindowChannel};
pub use popup::{PopupFeatures, PopupHandle, PopupManager, PopupOpener, PopupWindow, ScreenSize};
pub use session::{Backend, SessionOptions, SessionRecord, build_session};
pub use store::{LastAuthMethod, SessionStore};
pub use types::{
    AttemptSnapshot, AttemptStatus, AuthMethod, CallbackPayload, LoginRequest,
    split_namespace_from_state,
};
