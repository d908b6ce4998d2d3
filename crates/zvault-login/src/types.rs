//! Login request, attempt and callback types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LoginError, UnknownAuthMethod};
use crate::messaging::MessageEvent;

/// `data.source` value that marks a message as an auth callback.
pub const CALLBACK_SOURCE: &str = "oidc-callback";

/// Separator that embeds a namespace in the OIDC `state` value.
pub const STATE_NAMESPACE_SEPARATOR: &str = ",ns=";

/// External identity protocols driven through a popup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// OpenID Connect authorization-code flow.
    Oidc,
    /// SAML SP-initiated redirect with token polling.
    Saml,
}

impl AuthMethod {
    /// Backend type name, as used in mount configuration.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Oidc => "oidc",
            Self::Saml => "saml",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMethod {
    type Err = UnknownAuthMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "oidc" | "jwt" => Ok(Self::Oidc),
            "saml" => Ok(Self::Saml),
            _ => Err(UnknownAuthMethod(s.to_owned())),
        }
    }
}

/// Progress of a login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    #[default]
    Idle,
    AwaitingRole,
    PopupOpen,
    AwaitingCallback,
    Exchanging,
    Success,
    Error,
    Cancelled,
}

impl AttemptStatus {
    /// Whether no further transition can happen.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }
}

/// What the user submitted on the login form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub method: AuthMethod,
    /// Auth mount path, without surrounding slashes.
    pub mount_path: String,
    /// Login role. Empty means the mount's default role.
    pub role: Option<String>,
    pub namespace: Option<String>,
}

impl LoginRequest {
    /// An OIDC login against `mount_path` with `role`.
    pub fn oidc(mount_path: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            method: AuthMethod::Oidc,
            mount_path: normalize_mount(&mount_path.into()),
            role: Some(role.into()),
            namespace: None,
        }
    }

    /// A SAML login against `mount_path`.
    pub fn saml(mount_path: impl Into<String>) -> Self {
        Self {
            method: AuthMethod::Saml,
            mount_path: normalize_mount(&mount_path.into()),
            role: None,
            namespace: None,
        }
    }

    /// Scope the login to a namespace. Empty strings mean the root namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        let ns = namespace.into();
        self.namespace = (!ns.is_empty()).then_some(ns);
        self
    }

    /// Select a role. For SAML the role is optional.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), LoginError> {
        if self.mount_path.is_empty() {
            return Err(LoginError::InvalidRequest(
                "auth mount path must not be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Trim surrounding slashes from a mount path: `/oidc/` becomes `oidc`.
#[must_use]
pub fn normalize_mount(path: &str) -> String {
    path.trim_matches('/').to_owned()
}

/// Read-only view of the live attempt, published on every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptSnapshot {
    pub id: String,
    pub method: Option<AuthMethod>,
    pub mount_path: String,
    pub namespace: Option<String>,
    pub role: Option<String>,
    pub status: AttemptStatus,
    /// The login form's error banner; cleared when a new attempt starts.
    pub error: Option<String>,
}

/// The `postMessage` payload relayed from the provider's redirect page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub source: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

/// A callback whose parameters are all present and whose state is split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCallback {
    pub path: String,
    pub state: String,
    pub code: String,
    pub namespace: Option<String>,
}

impl CallbackPayload {
    /// Decode the payload carried by a message event.
    ///
    /// Returns `None` when `data` is not an object of the callback shape.
    #[must_use]
    pub fn from_event(event: &MessageEvent) -> Option<Self> {
        serde_json::from_value(event.data.clone()).ok()
    }

    /// Whether the payload carries a state other than `expected`.
    ///
    /// The comparison ignores an embedded `,ns=` suffix. A payload without a
    /// state is not foreign; [`resolve`](Self::resolve) rejects it instead.
    #[must_use]
    pub fn has_foreign_state(&self, expected: &str) -> bool {
        let namespace = self.namespace.as_deref().filter(|ns| !ns.is_empty());
        self.state
            .as_deref()
            .filter(|state| !state.is_empty())
            .is_some_and(|state| split_namespace_from_state(state, namespace).0 != expected)
    }

    /// Check the required parameters and separate an embedded namespace.
    ///
    /// # Errors
    ///
    /// Returns [`LoginError::MissingParams`] if `path`, `state` or `code` is
    /// absent or empty.
    pub fn resolve(self) -> Result<ResolvedCallback, LoginError> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
        let (Some(path), Some(state), Some(code)) = (
            non_empty(self.path),
            non_empty(self.state),
            non_empty(self.code),
        ) else {
            return Err(LoginError::MissingParams);
        };

        let (state, namespace) =
            split_namespace_from_state(&state, non_empty(self.namespace).as_deref());
        if state.is_empty() {
            return Err(LoginError::MissingParams);
        }
        Ok(ResolvedCallback {
            path: normalize_mount(&path),
            state,
            code,
            namespace,
        })
    }
}

/// Separate a namespace embedded in `state` as `<state>,ns=<namespace>`.
///
/// Only applied when `namespace` is `None`; a supplied namespace wins and the
/// state is returned untouched.
///
/// ```
/// use zvault_login::split_namespace_from_state;
///
/// let (state, ns) = split_namespace_from_state("abc,ns=teamA", None);
/// assert_eq!(state, "abc");
/// assert_eq!(ns.as_deref(), Some("teamA"));
/// ```
#[must_use]
pub fn split_namespace_from_state(state: &str, namespace: Option<&str>) -> (String, Option<String>) {
    if let Some(ns) = namespace {
        return (state.to_owned(), Some(ns.to_owned()));
    }
    match state.find(STATE_NAMESPACE_SEPARATOR) {
        Some(i) => {
            let ns = &state[i + STATE_NAMESPACE_SEPARATOR.len()..];
            (
                state[..i].to_owned(),
                (!ns.is_empty()).then(|| ns.to_owned()),
            )
        }
        None => (state.to_owned(), None),
    }
}
