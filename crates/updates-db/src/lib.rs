//! Local update-manifest store for an over-the-air app-update client.
//!
//! Persists downloaded update bundles, their content-addressed assets, and
//! scoped JSON key/value state in a single SQLite file with a
//! filename-versioned schema. Opening the store migrates a prior-version
//! file in place and recovers automatically from on-disk corruption.
//!
//! # Architecture
//!
//! The store has two layers:
//! - **Initialization** ([`open_database_in_directory`]) runs once at
//!   startup: migrate, open, archive-and-retry on corruption, apply schema.
//! - **Repository** ([`UpdatesDatabase`]) owns the resulting connection and
//!   exposes typed, transactional CRUD for all subsequent reads and writes.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`types`]: update/asset entities and strict row decoding
//! - [`schema`]: versioned filenames and embedded SQL
//! - [`migration`]: in-place prior-version file migration
//! - [`initialization`]: the open sequence and corruption recovery
//! - [`sqlite`]: the UpdatesDatabase repository

pub mod error;
pub mod initialization;
pub mod migration;
pub mod schema;
pub mod sqlite;
pub mod types;

// Re-export key types for ergonomic use.
pub use error::{StorageError, ERROR_DOMAIN};
pub use initialization::{open_database_in_directory, open_database_with_schema};
pub use migration::migrate_database_in_directory;
pub use schema::{LATEST_FILENAME, LATEST_SCHEMA, PREVIOUS_FILENAME};
pub use sqlite::UpdatesDatabase;
pub use types::{AssetEntity, AssetId, HashType, UpdateEntity, UpdateStatus};
