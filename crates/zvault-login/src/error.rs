//! Error types for `zvault-login`.
//!
//! Every failure reaching the login form is reduced to one human-readable
//! message through [`LoginError::banner_message`]. The four transport and
//! protocol messages are fixed strings; backend failures carry the messages
//! the server returned.

use zvault_storage::StorageError;

/// The provider popup went away before a callback arrived.
pub const ERROR_WINDOW_CLOSED: &str = "The provider window was closed before authentication was complete. \
     Your web browser may have blocked or closed a pop-up window. \
     Please check your settings and click Sign In to try again.";

/// The callback did not carry `path`, `state` and `code`.
pub const ERROR_MISSING_PARAMS: &str = "The callback from the provider did not supply all of the required parameters. \
     Please click Sign In to try again. \
     If the problem persists, you may want to contact your administrator.";

/// The popup could not be opened at all.
pub const ERROR_POPUP_FAILED: &str = "The provider window could not be opened. \
     Your web browser may be blocking pop-up windows for this site. \
     Please check your settings and click Sign In to try again.";

/// SAML token polling ran out of time.
pub const ERROR_TIMEOUT: &str =
    "The authentication request has timed out. Please click Sign In to try again.";

/// Failures talking to the backend auth API.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// The server answered with a non-success status.
    #[error("{}", .messages.join(", "))]
    Api {
        /// HTTP status code.
        status: u16,
        /// Entries of the response's `errors` array.
        messages: Vec<String>,
    },

    /// The request did not complete within the client timeout.
    #[error("request to vault timed out")]
    Timeout,

    /// Connection or protocol failure below HTTP status handling.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The body was not the JSON shape the endpoint documents.
    #[error("invalid response body: {0}")]
    Json(#[from] serde_json::Error),

    /// The body parsed but a required value was empty.
    #[error("{0}")]
    InvalidResponse(String),

    /// The client could not be built from the given settings.
    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl ExchangeError {
    /// HTTP status of an API error, if this is one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the server refused with 403.
    #[must_use]
    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(403)
    }
}

/// Failures of the window messaging channel.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Every sender is gone; no message can arrive anymore.
    #[error("window message channel closed")]
    Closed,
}

/// Failures of the persisted session store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The storage backend failed.
    #[error("session store error: {0}")]
    Storage(#[from] StorageError),

    /// A stored record could not be encoded or decoded.
    #[error("session record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Why a login attempt was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// A newer attempt was started.
    Superseded,
    /// The host page is unloading.
    HostUnloaded,
    /// The caller dropped the attempt before it finished.
    Abandoned,
}

/// Terminal failures of a login attempt.
#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    /// The popup could not be opened.
    #[error("{}", ERROR_POPUP_FAILED)]
    PopupFailed,

    /// The popup closed before the callback arrived.
    #[error("{}", ERROR_WINDOW_CLOSED)]
    WindowClosed,

    /// The callback payload lacked `path`, `state` or `code`.
    #[error("{}", ERROR_MISSING_PARAMS)]
    MissingParams,

    /// SAML token polling exceeded its window.
    #[error("{}", ERROR_TIMEOUT)]
    Timeout,

    /// The attempt was cancelled before reaching a result.
    #[error("the login attempt was cancelled ({reason:?})")]
    Cancelled {
        /// What cancelled it.
        reason: CancelReason,
    },

    /// The auth URL request for this role was refused with 403.
    #[error("role \"{role}\" cannot be used to sign in on this mount")]
    RoleUnusable {
        /// The rejected role name.
        role: String,
    },

    /// The backend rejected or failed a request.
    #[error("Authentication failed: {0}")]
    Exchange(#[from] ExchangeError),

    /// The exchange succeeded but the backend requires an MFA step.
    #[error("Authentication failed: multi-factor authentication is required for this login")]
    MfaRequired,

    /// The request was malformed before any I/O happened.
    #[error("invalid login request: {0}")]
    InvalidRequest(String),

    /// The messaging channel closed while waiting for a callback.
    #[error("{0}")]
    Messaging(#[from] MessagingError),

    /// The session could not be persisted.
    #[error("{0}")]
    Store(#[from] StoreError),
}

impl LoginError {
    /// The single message the login form shows for this failure.
    ///
    /// `None` for outcomes that are not errors to the user: a role the user
    /// may replace, or an attempt replaced by a newer one.
    #[must_use]
    pub fn banner_message(&self) -> Option<String> {
        match self {
            Self::RoleUnusable { .. }
            | Self::Cancelled {
                reason: CancelReason::Superseded,
            } => None,
            other => Some(other.to_string()),
        }
    }
}

/// A method name that is neither `oidc` nor `saml`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported auth method '{0}' (expected 'oidc' or 'saml')")]
pub struct UnknownAuthMethod(pub String);
