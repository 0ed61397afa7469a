//! In-place migration of a prior-version database file to the current
//! schema.
//!
//! Migration is best-effort: any failure is logged and reported as "not
//! migrated" so the caller falls back to fresh schema initialization. The
//! one exception is a stale file that cannot be removed, which leaves the
//! on-disk state ambiguous and is therefore fatal.
//!
//! The upgrade runs against a scratch filename and is only renamed to the
//! canonical name once complete, so a crash at any step leaves either the
//! intact prior-version file, a scratch file (discarded on the next run),
//! or the fully migrated file.

use std::fs;
use std::path::Path;

use rusqlite::Connection;
use tracing::{info, warn};

use crate::error::StorageError;
use crate::schema::{
    LATEST_FILENAME, MIGRATION_SCRATCH_FILENAME, PREVIOUS_FILENAME, UPGRADE_V4_TO_V5,
};

/// Migrates a prior-version database file in `directory` to the current
/// schema version.
///
/// Returns `Ok(true)` if a file was migrated. Idempotent: once a
/// current-version file exists (or no prior-version file does), this is a
/// no-op returning `Ok(false)`.
pub fn migrate_database_in_directory(directory: &Path) -> Result<bool, StorageError> {
    let latest_path = directory.join(LATEST_FILENAME);
    if latest_path.exists() {
        return Ok(false);
    }

    let scratch_path = directory.join(MIGRATION_SCRATCH_FILENAME);
    if scratch_path.exists() {
        warn!(path = %scratch_path.display(), "removing scratch file from an interrupted migration");
        fs::remove_file(&scratch_path).map_err(StorageError::StaleDatabaseRemoval)?;
    }

    let previous_path = directory.join(PREVIOUS_FILENAME);
    if !previous_path.exists() {
        return Ok(false);
    }

    if let Err(err) = fs::rename(&previous_path, &scratch_path) {
        warn!(%err, "could not rename prior-version database; skipping migration");
        return Ok(false);
    }

    if let Err(err) = run_upgrade(&scratch_path) {
        warn!(%err, "schema upgrade failed; discarding prior-version database");
        fs::remove_file(&scratch_path).map_err(StorageError::StaleDatabaseRemoval)?;
        return Ok(false);
    }

    if let Err(err) = fs::rename(&scratch_path, &latest_path) {
        warn!(%err, "could not move migrated database into place; discarding it");
        fs::remove_file(&scratch_path).map_err(StorageError::StaleDatabaseRemoval)?;
        return Ok(false);
    }

    info!("migrated database {} -> {}", PREVIOUS_FILENAME, LATEST_FILENAME);
    Ok(true)
}

/// Runs the v4->v5 table rebuild. The script is a single transaction; if it
/// fails partway the open transaction is rolled back before the connection
/// closes, so a partial migration is never observable.
fn run_upgrade(path: &Path) -> Result<(), rusqlite::Error> {
    let conn = Connection::open(path)?;
    if let Err(err) = conn.execute_batch(UPGRADE_V4_TO_V5) {
        let _ = conn.execute_batch("ROLLBACK");
        return Err(err);
    }
    Ok(())
}
