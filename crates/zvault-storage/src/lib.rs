//! Client-side storage for `ZVault` login sessions.
//!
//! The browser console keeps its token data and a few preferences (such as
//! the last auth method used) in local storage. This crate provides the same
//! concern for native hosts: the [`StorageBackend`] trait is a small
//! string-keyed byte store, and the login crate layers typed records on top.
//!
//! Two implementations are provided:
//!
//! - [`MemoryBackend`]: per-process, lost on exit (tests, `--store memory`)
//! - [`RedbBackend`]: a single redb file (feature `redb-backend`, default)

mod error;
mod memory;
#[cfg(feature = "redb-backend")]
mod redb_backend;

pub use error::StorageError;
pub use memory::MemoryBackend;
#[cfg(feature = "redb-backend")]
pub use redb_backend::RedbBackend;

/// A string-keyed byte store shared across async tasks.
///
/// Keys use `/` as a separator (`sessions/current`, `auth/last-method`).
/// Values are opaque; callers serialize their own records.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Read an entry. Returns `Ok(None)` when the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the backend fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write an entry, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the backend fails.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Remove an entry. Removing a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the backend fails.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List keys starting with `prefix`, in lexical order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] if the backend fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}
