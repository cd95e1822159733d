//! Store layer: SQLite mapping from projects to the sandbox currently
//! serving them.
//!
//! The liveness core does not own this data; it is the local adapter for the
//! "which sandbox runs project X" collaborator. All data lives in a single
//! database file at `store.db_path`.

pub mod projects;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;

/// Open the database and create tables if needed.
pub fn init_db(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(db_path)?;

    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA foreign_keys=ON;

         CREATE TABLE IF NOT EXISTS project_sandboxes (
             project_id TEXT PRIMARY KEY,
             sandbox_id TEXT NOT NULL,
             updated_at TEXT NOT NULL
         );",
    )?;

    Ok(conn)
}
