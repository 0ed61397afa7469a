//! The record repository over an opened store.
//!
//! [`UpdatesDatabase`] owns the connection produced by
//! [`crate::initialization`] and exposes typed operations over updates,
//! assets, their join rows, and scoped JSON data. Every multi-statement
//! write runs inside a transaction; constraint violations surface as
//! [`StorageError::Constraint`].

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StorageError;
use crate::initialization::open_database_in_directory;
use crate::types::{
    now_unix_millis, AssetEntity, AssetId, HashType, InvalidDiscriminant, UpdateEntity,
    UpdateStatus,
};

const UPDATE_COLUMNS: &str =
    "id, scope_key, commit_time, runtime_version, launch_asset_id, manifest, status, keep";

const ASSET_COLUMNS: &str = "id, url, key, headers, type, metadata, download_time, \
     relative_path, hash, hash_type, marked_for_deletion";

/// Repository over the update-manifest store.
///
/// One instance per process; writes are serialized through the owned
/// connection, and the database file itself provides cross-process locking.
pub struct UpdatesDatabase {
    conn: Connection,
}

impl UpdatesDatabase {
    /// Opens the store in `directory`, running migration and corruption
    /// recovery before any repository operation is possible.
    pub fn open_in_directory(directory: &Path) -> Result<Self, StorageError> {
        Ok(UpdatesDatabase {
            conn: open_database_in_directory(directory)?,
        })
    }

    /// Wraps an already-opened connection, such as one produced by the
    /// schema-injecting seam in [`crate::initialization`].
    pub fn from_connection(conn: Connection) -> Self {
        UpdatesDatabase { conn }
    }

    // -----------------------------------------------------------------------
    // Updates
    // -----------------------------------------------------------------------

    /// Persists a newly downloaded update manifest.
    pub fn add_update(&mut self, update: &UpdateEntity) -> Result<(), StorageError> {
        let manifest = update
            .manifest
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO updates (id, scope_key, commit_time, runtime_version, launch_asset_id, manifest, status, keep)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                update.id,
                update.scope_key,
                update.commit_time,
                update.runtime_version,
                update.launch_asset_id.map(|asset| asset.0),
                manifest,
                update.status.as_i64(),
                update.keep,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn update_with_id(&self, id: Uuid) -> Result<Option<UpdateEntity>, StorageError> {
        self.conn
            .query_row(
                &format!("SELECT {UPDATE_COLUMNS} FROM updates WHERE id = ?1"),
                params![id],
                Self::row_to_update,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn all_updates(&self) -> Result<Vec<UpdateEntity>, StorageError> {
        self.query_updates(
            &format!("SELECT {UPDATE_COLUMNS} FROM updates ORDER BY commit_time"),
            params![],
        )
    }

    pub fn updates_in_scope(&self, scope_key: &str) -> Result<Vec<UpdateEntity>, StorageError> {
        self.query_updates(
            &format!(
                "SELECT {UPDATE_COLUMNS} FROM updates WHERE scope_key = ?1 ORDER BY commit_time"
            ),
            params![scope_key],
        )
    }

    /// Updates in `scope_key` that a client could launch right now.
    pub fn launchable_updates_in_scope(
        &self,
        scope_key: &str,
    ) -> Result<Vec<UpdateEntity>, StorageError> {
        self.query_updates(
            &format!(
                "SELECT {UPDATE_COLUMNS} FROM updates
                 WHERE scope_key = ?1 AND status IN (?2, ?3, ?4)
                 ORDER BY commit_time"
            ),
            params![
                scope_key,
                UpdateStatus::Ready.as_i64(),
                UpdateStatus::Embedded.as_i64(),
                UpdateStatus::Development.as_i64(),
            ],
        )
    }

    pub fn set_update_status(
        &mut self,
        id: Uuid,
        status: UpdateStatus,
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        let rows = tx.execute(
            "UPDATE updates SET status = ?2 WHERE id = ?1",
            params![id, status.as_i64()],
        )?;
        tx.commit()?;
        if rows == 0 {
            return Err(StorageError::UpdateNotFound(id));
        }
        Ok(())
    }

    /// Marks an update fully downloaded: status becomes [`UpdateStatus::Ready`]
    /// and the retention hint is set.
    pub fn mark_update_finished(&mut self, id: Uuid) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        let rows = tx.execute(
            "UPDATE updates SET status = ?2, keep = 1 WHERE id = ?1",
            params![id, UpdateStatus::Ready.as_i64()],
        )?;
        tx.commit()?;
        if rows == 0 {
            return Err(StorageError::UpdateNotFound(id));
        }
        Ok(())
    }

    pub fn set_update_keep(&mut self, id: Uuid, keep: bool) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        let rows = tx.execute(
            "UPDATE updates SET keep = ?2 WHERE id = ?1",
            params![id, keep],
        )?;
        tx.commit()?;
        if rows == 0 {
            return Err(StorageError::UpdateNotFound(id));
        }
        Ok(())
    }

    /// Records which asset is launched when this update runs. The asset must
    /// already be stored; the foreign key rejects anything else.
    pub fn set_update_launch_asset(
        &mut self,
        id: Uuid,
        asset_id: AssetId,
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        let rows = tx.execute(
            "UPDATE updates SET launch_asset_id = ?2 WHERE id = ?1",
            params![id, asset_id.0],
        )?;
        tx.commit()?;
        if rows == 0 {
            return Err(StorageError::UpdateNotFound(id));
        }
        Ok(())
    }

    /// Deletes updates by identifier. Join rows cascade; assets survive and
    /// are reclaimed by the separate sweep.
    pub fn delete_updates(&mut self, ids: &[Uuid]) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM updates WHERE id = ?1")?;
            for id in ids {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Assets
    // -----------------------------------------------------------------------

    /// Inserts a newly downloaded asset and associates it with `update_id`
    /// in one transaction. Assigns `asset.id` from the new rowid.
    pub fn add_new_asset(
        &mut self,
        update_id: Uuid,
        asset: &mut AssetEntity,
    ) -> Result<(), StorageError> {
        let headers = asset
            .headers
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let metadata = asset
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO assets (url, key, headers, type, metadata, download_time, relative_path, hash, hash_type, marked_for_deletion)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                asset.url,
                asset.key,
                headers,
                asset.asset_type,
                metadata,
                asset.download_time,
                asset.relative_path,
                asset.hash,
                asset.hash_type.as_i64(),
                asset.marked_for_deletion,
            ],
        )?;
        let rowid = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO updates_assets (update_id, asset_id) VALUES (?1, ?2)",
            params![update_id, rowid],
        )?;
        tx.commit()?;
        // Only now is the rowid durable; a rollback must not leak it into
        // the caller's entity.
        asset.id = AssetId(rowid);
        Ok(())
    }

    /// Associates an already-stored asset, looked up by content key, with
    /// `update_id`. Returns `false` when no asset has that key.
    pub fn add_existing_asset(
        &mut self,
        update_id: Uuid,
        key: &str,
    ) -> Result<bool, StorageError> {
        let tx = self.conn.transaction()?;
        let existing: Option<i64> = tx
            .query_row("SELECT id FROM assets WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        let Some(asset_id) = existing else {
            return Ok(false);
        };
        tx.execute(
            "INSERT OR IGNORE INTO updates_assets (update_id, asset_id) VALUES (?1, ?2)",
            params![update_id, asset_id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    pub fn asset_with_key(&self, key: &str) -> Result<Option<AssetEntity>, StorageError> {
        self.conn
            .query_row(
                &format!("SELECT {ASSET_COLUMNS} FROM assets WHERE key = ?1"),
                params![key],
                Self::row_to_asset,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn assets_for_update(&self, update_id: Uuid) -> Result<Vec<AssetEntity>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT assets.id, url, key, headers, type, metadata, download_time,
                    relative_path, hash, hash_type, marked_for_deletion
             FROM assets
             JOIN updates_assets ON updates_assets.asset_id = assets.id
             WHERE updates_assets.update_id = ?1
             ORDER BY assets.id",
        )?;
        let rows = stmt.query_map(params![update_id], Self::row_to_asset)?;
        let mut assets = Vec::new();
        for row in rows {
            assets.push(row?);
        }
        Ok(assets)
    }

    pub fn all_assets(&self) -> Result<Vec<AssetEntity>, StorageError> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("SELECT {ASSET_COLUMNS} FROM assets ORDER BY id"))?;
        let rows = stmt.query_map([], Self::row_to_asset)?;
        let mut assets = Vec::new();
        for row in rows {
            assets.push(row?);
        }
        Ok(assets)
    }

    /// First phase of the asset sweep: flags assets no update references,
    /// either through the join table or as a launch asset. Returns how many
    /// were flagged.
    pub fn mark_unreferenced_assets_for_deletion(&mut self) -> Result<usize, StorageError> {
        let tx = self.conn.transaction()?;
        let rows = tx.execute(
            "UPDATE assets SET marked_for_deletion = 1
             WHERE id NOT IN (SELECT asset_id FROM updates_assets)
               AND id NOT IN (SELECT launch_asset_id FROM updates WHERE launch_asset_id IS NOT NULL)",
            [],
        )?;
        tx.commit()?;
        Ok(rows)
    }

    /// Second phase of the sweep: removes flagged rows and returns them so
    /// the caller can delete the files at their relative paths.
    pub fn delete_assets_marked_for_deletion(&mut self) -> Result<Vec<AssetEntity>, StorageError> {
        let tx = self.conn.transaction()?;
        let deleted = {
            let mut stmt = tx.prepare_cached(&format!(
                "SELECT {ASSET_COLUMNS} FROM assets WHERE marked_for_deletion = 1 ORDER BY id"
            ))?;
            let rows = stmt.query_map([], Self::row_to_asset)?;
            let mut assets = Vec::new();
            for row in rows {
                assets.push(row?);
            }
            assets
        };
        tx.execute("DELETE FROM assets WHERE marked_for_deletion = 1", [])?;
        tx.commit()?;
        Ok(deleted)
    }

    // -----------------------------------------------------------------------
    // Scoped JSON data
    // -----------------------------------------------------------------------

    pub fn json_data_with_key(
        &self,
        key: &str,
        scope_key: &str,
    ) -> Result<Option<Value>, StorageError> {
        let serialized: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM json_data WHERE key = ?1 AND scope_key = ?2",
                params![key, scope_key],
                |row| row.get(0),
            )
            .optional()?;
        match serialized {
            Some(serialized) => Ok(Some(serde_json::from_str(&serialized)?)),
            None => Ok(None),
        }
    }

    /// Replaces the value stored under (`key`, `scope_key`), stamping the
    /// last-updated time. Delete and insert run in one transaction.
    pub fn set_json_data(
        &mut self,
        key: &str,
        value: &Value,
        scope_key: &str,
    ) -> Result<(), StorageError> {
        let serialized = serde_json::to_string(value)?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM json_data WHERE key = ?1 AND scope_key = ?2",
            params![key, scope_key],
        )?;
        tx.execute(
            "INSERT INTO json_data (key, value, last_updated, scope_key) VALUES (?1, ?2, ?3, ?4)",
            params![key, serialized, now_unix_millis(), scope_key],
        )?;
        tx.commit()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Row mapping
    // -----------------------------------------------------------------------

    fn row_to_update(row: &Row<'_>) -> rusqlite::Result<UpdateEntity> {
        let manifest: Option<String> = row.get(5)?;
        let manifest = manifest
            .map(|raw| {
                serde_json::from_str(&raw).map_err(|err| {
                    rusqlite::Error::FromSqlConversionFailure(
                        5,
                        rusqlite::types::Type::Text,
                        Box::new(err),
                    )
                })
            })
            .transpose()?;
        let status_raw: i64 = row.get(6)?;
        let status = UpdateStatus::from_i64(status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Integer,
                Box::new(InvalidDiscriminant {
                    column: "status",
                    value: status_raw,
                }),
            )
        })?;

        Ok(UpdateEntity {
            id: row.get(0)?,
            scope_key: row.get(1)?,
            commit_time: row.get(2)?,
            runtime_version: row.get(3)?,
            launch_asset_id: row.get::<_, Option<i64>>(4)?.map(AssetId),
            manifest,
            status,
            keep: row.get(7)?,
        })
    }

    fn row_to_asset(row: &Row<'_>) -> rusqlite::Result<AssetEntity> {
        let headers = Self::json_column(row, 3)?;
        let metadata = Self::json_column(row, 5)?;
        let hash_type_raw: i64 = row.get(9)?;
        let hash_type = HashType::from_i64(hash_type_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                9,
                rusqlite::types::Type::Integer,
                Box::new(InvalidDiscriminant {
                    column: "hash_type",
                    value: hash_type_raw,
                }),
            )
        })?;

        Ok(AssetEntity {
            id: AssetId(row.get(0)?),
            url: row.get(1)?,
            key: row.get(2)?,
            headers,
            asset_type: row.get(4)?,
            metadata,
            download_time: row.get(6)?,
            relative_path: row.get(7)?,
            hash: row.get(8)?,
            hash_type,
            marked_for_deletion: row.get(10)?,
        })
    }

    fn json_column(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<Value>> {
        let raw: Option<String> = row.get(index)?;
        raw.map(|raw| {
            serde_json::from_str(&raw).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    index,
                    rusqlite::types::Type::Text,
                    Box::new(err),
                )
            })
        })
        .transpose()
    }

    fn query_updates(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<UpdateEntity>, StorageError> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, Self::row_to_update)?;
        let mut updates = Vec::new();
        for row in rows {
            updates.push(row?);
        }
        Ok(updates)
    }
}
