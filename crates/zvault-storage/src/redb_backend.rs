//! Persistent storage in a single redb file.
//!
//! redb is synchronous, so every call hops onto the Tokio blocking pool.
//! Each write is its own transaction: a session save either lands whole or
//! not at all.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, TableDefinition};
use tracing::debug;

use crate::{StorageBackend, StorageError};

const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");

/// A [`StorageBackend`] backed by a redb database file.
///
/// ```no_run
/// # use zvault_storage::RedbBackend;
/// let store = RedbBackend::open("/home/me/.zvault/login.redb").unwrap();
/// ```
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
    path: PathBuf,
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn txn_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::Transaction {
        reason: e.to_string(),
    }
}

impl RedbBackend {
    /// Open the database at `path`, creating the file and its table if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the file cannot be created or opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let open_err = |e: &dyn std::fmt::Display| StorageError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        let db = Database::create(path).map_err(|e| open_err(&e))?;
        let txn = db.begin_write().map_err(|e| open_err(&e))?;
        txn.open_table(ENTRIES).map_err(|e| open_err(&e))?;
        txn.commit().map_err(|e| open_err(&e))?;

        debug!(path = %path.display(), "opened redb session store");
        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    /// Filesystem path of the database.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn blocking<T, F>(&self, key: &str, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| StorageError::Transaction {
                reason: format!("blocking task for '{key}' failed: {e}"),
            })?
    }
}

#[async_trait::async_trait]
impl StorageBackend for RedbBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let owned = key.to_owned();
        self.blocking(key, move |db| {
            let txn = db.begin_read().map_err(txn_err)?;
            let table = txn.open_table(ENTRIES).map_err(txn_err)?;
            let value = table.get(owned.as_str()).map_err(|e| StorageError::Read {
                key: owned.clone(),
                reason: e.to_string(),
            })?;
            Ok(value.map(|v| v.value().to_vec()))
        })
        .await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let owned = key.to_owned();
        let value = value.to_vec();
        self.blocking(key, move |db| {
            let txn = db.begin_write().map_err(txn_err)?;
            {
                let mut table = txn.open_table(ENTRIES).map_err(txn_err)?;
                table
                    .insert(owned.as_str(), value.as_slice())
                    .map_err(|e| StorageError::Write {
                        key: owned.clone(),
                        reason: e.to_string(),
                    })?;
            }
            txn.commit().map_err(txn_err)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let owned = key.to_owned();
        self.blocking(key, move |db| {
            let txn = db.begin_write().map_err(txn_err)?;
            {
                let mut table = txn.open_table(ENTRIES).map_err(txn_err)?;
                table
                    .remove(owned.as_str())
                    .map_err(|e| StorageError::Delete {
                        key: owned.clone(),
                        reason: e.to_string(),
                    })?;
            }
            txn.commit().map_err(txn_err)
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let owned = prefix.to_owned();
        self.blocking(prefix, move |db| {
            let list_err = |e: &dyn std::fmt::Display| StorageError::List {
                prefix: owned.clone(),
                reason: e.to_string(),
            };
            let txn = db.begin_read().map_err(txn_err)?;
            let table = txn.open_table(ENTRIES).map_err(txn_err)?;
            let mut keys = Vec::new();
            for item in table.range(owned.as_str()..).map_err(|e| list_err(&e))? {
                let (k, _) = item.map_err(|e| list_err(&e))?;
                let k = k.value();
                if !k.starts_with(owned.as_str()) {
                    break;
                }
                keys.push(k.to_owned());
            }
            Ok(keys)
        })
        .await
    }
}
