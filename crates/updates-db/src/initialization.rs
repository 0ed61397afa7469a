//! Opening the on-disk store: migration, corruption recovery, schema setup.
//!
//! The open sequence is a two-state retry: attempt the open, and on the
//! specific corruption error class archive the file and retry exactly once
//! against the now-vacant canonical path. No other failure is retried.

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, ErrorCode};
use tracing::warn;

use crate::error::StorageError;
use crate::migration::migrate_database_in_directory;
use crate::schema::{LATEST_FILENAME, LATEST_SCHEMA};

/// Opens (or creates) the store at its canonical path within `directory`,
/// migrating a prior-version file and recovering from corruption as needed.
///
/// On return the connection has foreign-key enforcement enabled (best
/// effort) and the full current-version schema applied.
pub fn open_database_in_directory(directory: &Path) -> Result<Connection, StorageError> {
    open_database_with_schema(directory, LATEST_FILENAME, LATEST_SCHEMA, true)
}

/// Same sequence with an injectable filename and schema, and an optional
/// migration step. Exposed for tests; [`open_database_in_directory`] is
/// this with the canonical constants.
pub fn open_database_with_schema(
    directory: &Path,
    filename: &str,
    schema: &str,
    should_migrate: bool,
) -> Result<Connection, StorageError> {
    let path = directory.join(filename);

    let mut needs_schema_setup = !path.exists();
    if needs_schema_setup && should_migrate && migrate_database_in_directory(directory)? {
        needs_schema_setup = false;
    }

    let conn = match open_and_probe(&path) {
        Ok(conn) => conn,
        Err(err) if is_corruption(&err) => {
            warn!(%err, path = %path.display(), "database file is corrupt; archiving it");
            archive_corrupt_database(&path)?;
            needs_schema_setup = true;
            // The canonical path is vacant now, so the corruption class
            // cannot recur; anything else that goes wrong is fatal.
            open_and_probe(&path).map_err(StorageError::Open)?
        }
        Err(err) => return Err(StorageError::Open(err)),
    };

    // Foreign keys are a safety net here, not a correctness requirement.
    if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
        warn!(%err, "could not enable foreign key enforcement");
    }

    if needs_schema_setup {
        conn.execute_batch(schema).map_err(StorageError::SchemaSetup)?;
    }

    Ok(conn)
}

/// Opens `path` and forces a header read, so corruption surfaces here
/// instead of on the first repository operation.
fn open_and_probe(path: &Path) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(path)?;
    conn.query_row("PRAGMA schema_version", [], |row| row.get::<_, i64>(0))?;
    Ok(conn)
}

fn is_corruption(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::DatabaseCorrupt
                || failure.code == ErrorCode::NotADatabase
    )
}

/// Moves a corrupt file aside under `<unix-epoch-seconds>-<filename>` in the
/// same directory, leaving it for manual inspection.
fn archive_corrupt_database(path: &Path) -> Result<(), StorageError> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| LATEST_FILENAME.to_string());
    let archived = path.with_file_name(format!("{:.6}-{}", timestamp.as_secs_f64(), filename));
    fs::rename(path, &archived).map_err(StorageError::ArchiveCorrupt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PREVIOUS_FILENAME;
    use tempfile::tempdir;

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn fresh_install_creates_empty_store() {
        let dir = tempdir().unwrap();
        let conn = open_database_in_directory(dir.path()).unwrap();

        assert!(dir.path().join(LATEST_FILENAME).exists());
        for table in ["updates", "assets", "updates_assets", "json_data"] {
            assert_eq!(count(&conn, table), 0, "{table} not empty");
        }
    }

    #[test]
    fn reopening_existing_store_skips_schema_setup() {
        let dir = tempdir().unwrap();
        let conn = open_database_in_directory(dir.path()).unwrap();
        conn.execute(
            "INSERT INTO json_data (key, value, last_updated, scope_key) VALUES ('k', '1', 0, 's')",
            [],
        )
        .unwrap();
        drop(conn);

        let conn = open_database_in_directory(dir.path()).unwrap();
        assert_eq!(count(&conn, "json_data"), 1);
    }

    #[test]
    fn corrupt_file_is_archived_and_store_reinitialized() {
        let dir = tempdir().unwrap();
        let canonical = dir.path().join(LATEST_FILENAME);
        std::fs::write(&canonical, b"this is definitely not a sqlite database file header")
            .unwrap();

        let conn = open_database_in_directory(dir.path()).unwrap();
        assert_eq!(count(&conn, "updates"), 0);
        assert!(canonical.exists());

        let archived: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(&format!("-{LATEST_FILENAME}")))
            .collect();
        assert_eq!(archived.len(), 1);

        // `<unix-epoch-seconds-with-fraction>-<canonical filename>`
        let prefix = archived[0]
            .strip_suffix(&format!("-{LATEST_FILENAME}"))
            .unwrap();
        assert!(prefix.parse::<f64>().unwrap() > 0.0);
    }

    #[test]
    fn failed_migration_falls_back_to_fresh_schema() {
        let dir = tempdir().unwrap();
        // A prior-version file whose upgrade script cannot succeed.
        let conn = Connection::open(dir.path().join(PREVIOUS_FILENAME)).unwrap();
        conn.execute_batch("CREATE TABLE unrelated (x INTEGER);").unwrap();
        drop(conn);

        let conn = open_database_in_directory(dir.path()).unwrap();
        assert_eq!(count(&conn, "assets"), 0);
        assert!(!dir.path().join(PREVIOUS_FILENAME).exists());
        assert!(dir.path().join(LATEST_FILENAME).exists());
    }

    #[test]
    fn successful_migration_skips_schema_setup() {
        let dir = tempdir().unwrap();
        let conn = Connection::open(dir.path().join(PREVIOUS_FILENAME)).unwrap();
        conn.execute_batch(
            "CREATE TABLE updates (id BLOB PRIMARY KEY, scope_key TEXT NOT NULL,
               commit_time INTEGER NOT NULL, runtime_version TEXT NOT NULL,
               launch_asset_id INTEGER, manifest TEXT, status INTEGER NOT NULL,
               keep INTEGER NOT NULL);
             CREATE TABLE assets (id INTEGER PRIMARY KEY AUTOINCREMENT, url TEXT,
               key TEXT UNIQUE, headers TEXT, type TEXT NOT NULL, metadata TEXT,
               download_time INTEGER NOT NULL, relative_path TEXT NOT NULL,
               hash BLOB NOT NULL, hash_type INTEGER NOT NULL,
               marked_for_deletion INTEGER NOT NULL, scale REAL, scales TEXT);
             INSERT INTO assets (type, download_time, relative_path, hash, hash_type, marked_for_deletion)
               VALUES ('js', 0, 'bundle.js', x'00', 0, 0);",
        )
        .unwrap();
        drop(conn);

        let conn = open_database_in_directory(dir.path()).unwrap();
        // Migrated data present; a fresh schema would have zero rows.
        assert_eq!(count(&conn, "assets"), 1);
    }

    #[test]
    fn migration_can_be_disabled_through_the_seam() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(PREVIOUS_FILENAME), b"").unwrap();

        let conn =
            open_database_with_schema(dir.path(), LATEST_FILENAME, LATEST_SCHEMA, false).unwrap();
        assert_eq!(count(&conn, "updates"), 0);
        // Prior-version file untouched when migration is skipped.
        assert!(dir.path().join(PREVIOUS_FILENAME).exists());
    }
}
