//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Installed plugins; uuid matches the manifest id
        CREATE TABLE IF NOT EXISTS plugins (
            uuid TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            version TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 0,
            installed INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'normal'
                CHECK (status IN ('normal', 'hidden')),
            download_url TEXT,
            checksum TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_plugins_enabled ON plugins(enabled);

        PRAGMA user_version = 1;
        ",
    )?;

    tracing::debug!("migrated database to v1");
    Ok(())
}
