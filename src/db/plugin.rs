//! Plugin record persistence
//!
//! `PluginRecord` rows are the authoritative answer to "may this plugin serve
//! requests". Rows are created by installation tooling and flipped by the
//! registry's enable/disable operations.

use serde::{Deserialize, Serialize};

use super::DbPool;
use crate::{Error, Result};

/// Visibility of a plugin in administrative listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    #[default]
    Normal,
    Hidden,
}

impl PluginStatus {
    /// Database representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Hidden => "hidden",
        }
    }

    /// Parse from the database representation, defaulting to `Normal`
    #[must_use]
    pub fn from_db(s: &str) -> Self {
        match s {
            "hidden" => Self::Hidden,
            _ => Self::Normal,
        }
    }
}

/// Persisted installation and enablement state of a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRecord {
    /// Plugin identifier, equal to the manifest id
    pub uuid: String,
    pub title: String,
    pub version: String,
    pub enabled: bool,
    pub installed: bool,
    pub status: PluginStatus,
    pub download_url: Option<String>,
    pub checksum: Option<String>,
}

impl PluginRecord {
    /// Create an installed, disabled record
    #[must_use]
    pub fn new(uuid: impl Into<String>, title: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            title: title.into(),
            version: version.into(),
            enabled: false,
            installed: true,
            status: PluginStatus::Normal,
            download_url: None,
            checksum: None,
        }
    }
}

/// Key lookup over persisted plugin records
///
/// The registry and the request gate only need these three operations, so
/// any backing store can stand in for the `SQLite` repository.
pub trait PluginStore: Send + Sync {
    /// Look up a record by plugin id
    ///
    /// # Errors
    ///
    /// Returns error if the backing store cannot be queried
    fn get(&self, uuid: &str) -> Result<Option<PluginRecord>>;

    /// All records with `enabled == true`
    ///
    /// # Errors
    ///
    /// Returns error if the backing store cannot be queried
    fn list_enabled(&self) -> Result<Vec<PluginRecord>>;

    /// Persist the enabled flag, returning false if no such record exists
    ///
    /// # Errors
    ///
    /// Returns error if the backing store cannot be updated
    fn set_enabled(&self, uuid: &str, enabled: bool) -> Result<bool>;
}

const RECORD_COLUMNS: &str =
    "uuid, title, version, enabled, installed, status, download_url, checksum";

/// `SQLite` plugin repository
#[derive(Clone)]
pub struct PluginRepo {
    pool: DbPool,
}

impl PluginRepo {
    /// Create a new plugin repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert or replace a record
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn upsert(&self, record: &PluginRecord) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        conn.execute(
            r"
            INSERT INTO plugins (
                uuid, title, version, enabled, installed, status, download_url, checksum
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(uuid) DO UPDATE SET
                title = excluded.title,
                version = excluded.version,
                enabled = excluded.enabled,
                installed = excluded.installed,
                status = excluded.status,
                download_url = excluded.download_url,
                checksum = excluded.checksum,
                updated_at = datetime('now')
            ",
            rusqlite::params![
                record.uuid,
                record.title,
                record.version,
                record.enabled,
                record.installed,
                record.status.as_str(),
                record.download_url,
                record.checksum,
            ],
        )?;

        tracing::info!(plugin_id = %record.uuid, version = %record.version, "plugin record saved");
        Ok(())
    }

    /// List all records ordered by id
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list(&self) -> Result<Vec<PluginRecord>> {
        self.query(&format!("SELECT {RECORD_COLUMNS} FROM plugins ORDER BY uuid"))
    }

    fn query(&self, sql: &str) -> Result<Vec<PluginRecord>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], Self::row_to_record)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }

        Ok(records)
    }

    /// Convert a database row to a `PluginRecord`
    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<PluginRecord> {
        let status: String = row.get(5)?;
        Ok(PluginRecord {
            uuid: row.get(0)?,
            title: row.get(1)?,
            version: row.get(2)?,
            enabled: row.get(3)?,
            installed: row.get(4)?,
            status: PluginStatus::from_db(&status),
            download_url: row.get(6)?,
            checksum: row.get(7)?,
        })
    }
}

impl PluginStore for PluginRepo {
    fn get(&self, uuid: &str) -> Result<Option<PluginRecord>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM plugins WHERE uuid = ?1"
        ))?;

        match stmt.query_row(rusqlite::params![uuid], Self::row_to_record) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Database(e.to_string())),
        }
    }

    fn list_enabled(&self) -> Result<Vec<PluginRecord>> {
        self.query(&format!(
            "SELECT {RECORD_COLUMNS} FROM plugins WHERE enabled = 1 ORDER BY uuid"
        ))
    }

    fn set_enabled(&self, uuid: &str, enabled: bool) -> Result<bool> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let rows = conn.execute(
            r"
            UPDATE plugins
            SET enabled = ?1, updated_at = datetime('now')
            WHERE uuid = ?2
            ",
            rusqlite::params![enabled, uuid],
        )?;

        if rows > 0 {
            tracing::info!(plugin_id = %uuid, enabled = %enabled, "plugin enabled state persisted");
        }

        Ok(rows > 0)
    }
}
