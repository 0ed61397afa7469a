//! Canonical filenames and embedded SQL for the versioned on-disk schema.
//!
//! The schema version is identified by the database *filename*, not by
//! `user_version`: each layout revision lives under its own fixed name, and
//! migration renames the prior file while rewriting its tables. SQL is
//! embedded at compile time via `include_str!`.

/// Filename of the current (v5) schema within the store directory.
pub const LATEST_FILENAME: &str = "updates-v5.db";

/// Filename of the prior (v4) schema, recognized only during migration.
pub const PREVIOUS_FILENAME: &str = "updates-v4.db";

/// Scratch name a v4 file is upgraded under. A file only ever appears at
/// [`LATEST_FILENAME`] fully migrated; anything under this name after a
/// crash is discarded.
pub(crate) const MIGRATION_SCRATCH_FILENAME: &str = "updates-v5.db.migrating";

/// Creation script for the current schema, executed as a single batch.
pub const LATEST_SCHEMA: &str = include_str!("sql/schema_v5.sql");

/// In-place upgrade script from the v4 layout to v5: one table-rebuild
/// transaction with foreign keys disabled for its duration. Future version
/// bumps chain further single-step scripts of the same shape.
pub(crate) const UPGRADE_V4_TO_V5: &str = include_str!("sql/upgrade_v4_to_v5.sql");
