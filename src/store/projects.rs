//! Project -> sandbox persistence, so a restarted service can resolve the
//! sandbox behind a project id.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

/// Load the sandbox currently serving `project_id`, if any.
pub fn load_sandbox_id(conn: &Connection, project_id: &str) -> Result<Option<String>> {
    let mut stmt =
        conn.prepare("SELECT sandbox_id FROM project_sandboxes WHERE project_id = ?1")?;

    let result = stmt
        .query_row(params![project_id], |row| row.get(0))
        .optional()?;
    Ok(result)
}

/// Record the sandbox serving `project_id` (upsert).
pub fn save_sandbox_id(conn: &Connection, project_id: &str, sandbox_id: &str) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO project_sandboxes (project_id, sandbox_id, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(project_id) DO UPDATE SET
             sandbox_id = excluded.sandbox_id,
             updated_at = excluded.updated_at",
        params![project_id, sandbox_id, now],
    )?;
    Ok(())
}

/// Forget the sandbox for `project_id`. Returns whether a row was removed.
pub fn clear_sandbox_id(conn: &Connection, project_id: &str) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM project_sandboxes WHERE project_id = ?1",
        params![project_id],
    )?;
    Ok(removed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::init_db;

    #[test]
    fn save_load_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let conn = init_db(&dir.path().join("liveness.db")).unwrap();

        assert_eq!(load_sandbox_id(&conn, "p1").unwrap(), None);

        save_sandbox_id(&conn, "p1", "sb-1").unwrap();
        save_sandbox_id(&conn, "p2", "sb-2").unwrap();
        assert_eq!(load_sandbox_id(&conn, "p1").unwrap().as_deref(), Some("sb-1"));

        save_sandbox_id(&conn, "p1", "sb-9").unwrap();
        assert_eq!(load_sandbox_id(&conn, "p1").unwrap().as_deref(), Some("sb-9"));
        assert_eq!(load_sandbox_id(&conn, "p2").unwrap().as_deref(), Some("sb-2"));

        assert!(clear_sandbox_id(&conn, "p1").unwrap());
        assert!(!clear_sandbox_id(&conn, "p1").unwrap());
        assert_eq!(load_sandbox_id(&conn, "p1").unwrap(), None);
    }

    #[test]
    fn init_db_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("liveness.db");
        init_db(&path).unwrap();
        assert!(path.exists());
    }
}
