//! Storage error types.

/// Errors raised by a [`StorageBackend`](crate::StorageBackend).
///
/// Variants name the key or path involved so a failed session save can be
/// traced back to the entry that caused it.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backing file could not be opened or created.
    #[error("failed to open session store at '{path}': {reason}")]
    Open { path: String, reason: String },

    /// Reading an entry failed.
    #[error("failed to read '{key}': {reason}")]
    Read { key: String, reason: String },

    /// Writing an entry failed.
    #[error("failed to write '{key}': {reason}")]
    Write { key: String, reason: String },

    /// Removing an entry failed.
    #[error("failed to remove '{key}': {reason}")]
    Delete { key: String, reason: String },

    /// Prefix listing failed.
    #[error("failed to list entries under '{prefix}': {reason}")]
    List { prefix: String, reason: String },

    /// A transaction could not be started or committed.
    #[error("storage transaction failed: {reason}")]
    Transaction { reason: String },
}
