//! Session records built from a successful exchange.
//!
//! [`build_session`] is pure: it maps the looked-up token fields and the
//! login context into the [`SessionRecord`] the rest of the console reads.

use serde::{Deserialize, Serialize};

use crate::exchange::TokenFields;

const TOKEN_PREFIX: &str = "vault-";
const ROOT_PREFIX: &str = "_root_";
const TOKEN_SEPARATOR: char = '☃';

/// Auth backend a session was obtained through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    pub mount_path: String,
    #[serde(rename = "type")]
    pub auth_type: String,
}

/// The persisted result of a login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub token: String,
    pub display_name: String,
    pub policies: Vec<String>,
    pub is_root_token: bool,
    pub renewable: bool,
    pub entity_id: String,
    /// Seconds the token was valid for when the session was built.
    pub ttl: u64,
    /// Expiry as Unix epoch milliseconds.
    pub token_expiration_epoch: i64,
    /// Namespace the token is rooted in; `""` is the root namespace.
    pub user_root_namespace: String,
    pub backend: Backend,
}

impl SessionRecord {
    /// Name the record is stored under:
    /// `vault-<type>☃<token>`, or `vault-_root_☃<token>` for root tokens.
    #[must_use]
    pub fn token_name(&self) -> String {
        let kind = if self.is_root_token {
            ROOT_PREFIX
        } else {
            self.backend.auth_type.as_str()
        };
        format!("{TOKEN_PREFIX}{kind}{TOKEN_SEPARATOR}{}", self.token)
    }

    /// Whether the token has expired at `now_ms`.
    #[must_use]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.ttl > 0 && now_ms >= self.token_expiration_epoch
    }

    /// Reset the expiry after a renewal that granted `ttl` seconds.
    pub fn renewed(&mut self, ttl: u64, now_ms: i64) {
        self.ttl = ttl;
        self.token_expiration_epoch = expiration_epoch(now_ms, ttl);
    }
}

/// Login context the adapter needs besides the token fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Client token returned by the exchange.
    pub token: String,
    pub backend: Backend,
    /// Namespace the login form was scoped to.
    pub namespace: Option<String>,
    /// Root namespace of the session being replaced, if any.
    pub previous_root_namespace: Option<String>,
    /// Current time in epoch milliseconds.
    pub now_ms: i64,
}

/// Build the session record for a successful login. No I/O.
#[must_use]
pub fn build_session(fields: &TokenFields, options: &SessionOptions) -> SessionRecord {
    let ttl = if fields.ttl > 0 {
        fields.ttl
    } else {
        fields.lease_duration
    };

    // An empty `namespace_path` is the root namespace, not a missing value.
    let server_namespace = fields
        .namespace_path
        .as_deref()
        .map(|ns| ns.trim_end_matches('/').to_owned());
    let user_root_namespace = match server_namespace {
        Some(ns) => ns,
        None if options.backend.auth_type == "token" => String::new(),
        None => options
            .previous_root_namespace
            .clone()
            .or_else(|| options.namespace.clone())
            .unwrap_or_default(),
    };

    SessionRecord {
        token: options.token.clone(),
        display_name: fields.display_name.clone(),
        policies: fields.policies.clone(),
        is_root_token: fields.policies.iter().any(|p| p == "root"),
        renewable: fields.renewable,
        entity_id: fields.entity_id.clone(),
        ttl,
        token_expiration_epoch: expiration_epoch(options.now_ms, ttl),
        user_root_namespace,
        backend: options.backend.clone(),
    }
}

fn expiration_epoch(now_ms: i64, ttl: u64) -> i64 {
    let ttl_ms = i64::try_from(ttl).unwrap_or(i64::MAX / 1000).saturating_mul(1000);
    now_ms.saturating_add(ttl_ms)
}
