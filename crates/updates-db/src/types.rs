//! Typed entities mirroring the rows of the on-disk schema.
//!
//! Row decoding is strict: an unknown enum discriminant fails with a
//! conversion error instead of producing partially-typed data.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Surrogate rowid of a stored asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetId(pub i64);

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetId({})", self.0)
    }
}

/// Lifecycle state of an update record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateStatus {
    Failed,
    Ready,
    Launched,
    Pending,
    Unused,
    Embedded,
    Development,
}

impl UpdateStatus {
    /// The INTEGER discriminant stored in the `status` column.
    pub fn as_i64(self) -> i64 {
        match self {
            UpdateStatus::Failed => 0,
            UpdateStatus::Ready => 1,
            UpdateStatus::Launched => 2,
            UpdateStatus::Pending => 3,
            UpdateStatus::Unused => 4,
            UpdateStatus::Embedded => 5,
            UpdateStatus::Development => 6,
        }
    }

    /// Decodes a stored discriminant; `None` for values this version does
    /// not know about.
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(UpdateStatus::Failed),
            1 => Some(UpdateStatus::Ready),
            2 => Some(UpdateStatus::Launched),
            3 => Some(UpdateStatus::Pending),
            4 => Some(UpdateStatus::Unused),
            5 => Some(UpdateStatus::Embedded),
            6 => Some(UpdateStatus::Development),
            _ => None,
        }
    }
}

/// Algorithm tag for the `assets.hash` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashType {
    Sha1,
}

impl HashType {
    pub fn as_i64(self) -> i64 {
        match self {
            HashType::Sha1 => 0,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(HashType::Sha1),
            _ => None,
        }
    }
}

/// One versioned app-content bundle manifest record.
///
/// `(scope_key, commit_time)` is unique across the store: no two updates in
/// the same scope may share a commit timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEntity {
    /// Binary identifier, stored as a 16-byte BLOB.
    pub id: Uuid,
    /// Tenant/channel namespace this update belongs to.
    pub scope_key: String,
    /// Manifest commit time, milliseconds since the Unix epoch.
    pub commit_time: i64,
    pub runtime_version: String,
    /// Asset launched when this update runs, once known.
    pub launch_asset_id: Option<AssetId>,
    /// Free-form manifest document, persisted as JSON TEXT.
    pub manifest: Option<Value>,
    pub status: UpdateStatus,
    /// Retention hint: kept updates are exempt from cleanup.
    pub keep: bool,
}

/// One content-addressed file referenced by one or more updates.
///
/// `key`, when present, is globally unique; assets are deduplicated across
/// updates through the join table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetEntity {
    /// Rowid, assigned by the store on insert.
    pub id: AssetId,
    pub url: Option<String>,
    /// Content-address key; `None` for assets that are never shared.
    pub key: Option<String>,
    /// Request headers used for the download, persisted as JSON TEXT.
    pub headers: Option<Value>,
    /// File extension or mime hint.
    pub asset_type: String,
    pub metadata: Option<Value>,
    /// Download completion time, milliseconds since the Unix epoch.
    pub download_time: i64,
    /// Path relative to the client's updates directory.
    pub relative_path: String,
    pub hash: Vec<u8>,
    pub hash_type: HashType,
    /// Set by the sweep when no update references this asset anymore.
    pub marked_for_deletion: bool,
}

/// Raised when a stored enum discriminant does not decode.
#[derive(Debug)]
pub struct InvalidDiscriminant {
    pub column: &'static str,
    pub value: i64,
}

impl fmt::Display for InvalidDiscriminant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} discriminant: {}", self.column, self.value)
    }
}

impl std::error::Error for InvalidDiscriminant {}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
