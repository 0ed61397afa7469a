//! Storage error types for updates-db.
//!
//! [`StorageError`] covers every anticipated failure mode in the storage
//! layer: the open sequence (corruption archival, stale-file cleanup, schema
//! setup), per-operation constraint violations, and serialization of the
//! JSON columns. Every variant chains the underlying cause.

use std::io;

use thiserror::Error;
use uuid::Uuid;

/// Domain tag reported alongside [`StorageError::code`] to callers that
/// need the structured (domain, code, message, cause) form.
pub const ERROR_DOMAIN: &str = "UpdatesDatabase";

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The database file could not be opened for a reason other than
    /// corruption (permissions, disk full). Never retried.
    #[error("could not open database: {0}")]
    Open(#[source] rusqlite::Error),

    /// A corrupt database file could not be moved to its archival name.
    #[error("could not archive corrupt database: {0}")]
    ArchiveCorrupt(#[source] io::Error),

    /// A stale file left behind by an interrupted or failed migration could
    /// not be removed. The on-disk state is ambiguous, so this is fatal.
    #[error("could not remove stale database file from a failed migration: {0}")]
    StaleDatabaseRemoval(#[source] io::Error),

    /// The schema creation script failed on a freshly initialized store.
    #[error("could not apply database schema: {0}")]
    SchemaSetup(#[source] rusqlite::Error),

    /// A uniqueness or foreign-key constraint rejected a write. Surfaced
    /// per-operation; the store itself remains usable.
    #[error("constraint violation: {0}")]
    Constraint(#[source] rusqlite::Error),

    /// An update with the given identifier was not found.
    #[error("update not found: {0}")]
    UpdateNotFound(Uuid),

    /// Any other storage-engine failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    /// A JSON column failed to serialize or deserialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Stable numeric code for each failure class, for callers that report
    /// errors across a bridge that cannot carry the enum itself.
    pub fn code(&self) -> i32 {
        match self {
            StorageError::Open(_) => 1,
            StorageError::ArchiveCorrupt(_) => 2,
            StorageError::StaleDatabaseRemoval(_) => 3,
            StorageError::SchemaSetup(_) => 4,
            StorageError::Constraint(_) => 5,
            StorageError::UpdateNotFound(_) => 6,
            StorageError::Sqlite(_) => 7,
            StorageError::Serialization(_) => 8,
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StorageError::Constraint(err)
            }
            _ => StorageError::Sqlite(err),
        }
    }
}
