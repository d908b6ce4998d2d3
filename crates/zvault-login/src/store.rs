//! Persisted sessions and login preferences.
//!
//! Layout in the backing store:
//!
//! - `sessions/<token name>`: JSON [`SessionRecord`]
//! - `sessions/current`: token name of the active session
//! - `auth/last-method`: JSON [`LastAuthMethod`]

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zvault_storage::StorageBackend;

use crate::error::StoreError;
use crate::session::SessionRecord;
use crate::types::AuthMethod;

const SESSION_PREFIX: &str = "sessions/";
const CURRENT_KEY: &str = "sessions/current";
const LAST_METHOD_KEY: &str = "auth/last-method";

/// The auth method pre-selected on the next login form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastAuthMethod {
    pub method: AuthMethod,
    pub mount_path: String,
}

/// Typed session storage over a [`StorageBackend`].
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn StorageBackend>,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore").finish_non_exhaustive()
    }
}

impl SessionStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Store `record` and make it the current session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if encoding or the backend fails.
    pub async fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let name = record.token_name();
        let bytes = serde_json::to_vec(record)?;
        self.backend
            .put(&format!("{SESSION_PREFIX}{name}"), &bytes)
            .await?;
        self.backend.put(CURRENT_KEY, name.as_bytes()).await?;
        debug!(backend = %record.backend.auth_type, "session saved");
        Ok(())
    }

    /// The current session, if one is stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if decoding or the backend fails.
    pub async fn current(&self) -> Result<Option<SessionRecord>, StoreError> {
        let Some(name) = self.current_name().await? else {
            return Ok(None);
        };
        match self.backend.get(&format!("{SESSION_PREFIX}{name}")).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Drop the current session and its record. Returns the removed record.
    ///
    /// The remembered auth method is kept.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    pub async fn clear_current(&self) -> Result<Option<SessionRecord>, StoreError> {
        let record = self.current().await?;
        if let Some(name) = self.current_name().await? {
            self.backend.delete(&format!("{SESSION_PREFIX}{name}")).await?;
        }
        self.backend.delete(CURRENT_KEY).await?;
        if record.is_some() {
            info!("session cleared");
        }
        Ok(record)
    }

    /// Token names of every stored session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    pub async fn session_names(&self) -> Result<Vec<String>, StoreError> {
        let keys = self.backend.list(SESSION_PREFIX).await?;
        Ok(keys
            .into_iter()
            .filter(|k| k != CURRENT_KEY)
            .filter_map(|k| k.strip_prefix(SESSION_PREFIX).map(str::to_owned))
            .collect())
    }

    /// Record the method of a successful login.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if encoding or the backend fails.
    pub async fn remember_auth_method(
        &self,
        method: AuthMethod,
        mount_path: &str,
    ) -> Result<(), StoreError> {
        let value = LastAuthMethod {
            method,
            mount_path: mount_path.to_owned(),
        };
        self.backend
            .put(LAST_METHOD_KEY, &serde_json::to_vec(&value)?)
            .await?;
        Ok(())
    }

    /// The method of the last successful login, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if decoding or the backend fails.
    pub async fn last_auth_method(&self) -> Result<Option<LastAuthMethod>, StoreError> {
        match self.backend.get(LAST_METHOD_KEY).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn current_name(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .backend
            .get(CURRENT_KEY)
            .await?
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .filter(|name| !name.is_empty()))
    }
}
