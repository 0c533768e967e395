pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Cannot create database directory {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid change timestamp: {0}")]
    BadDatetime(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Local warehouse: the current library table and the append-only diff log.
pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| DbError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version < 1 {
            self.migrate_v1()?;
        }
        if version < 2 {
            self.migrate_v2()?;
        }

        self.conn.pragma_update(None, "user_version", 2)?;
        Ok(())
    }

    /// V1: append-only diff log. The `library` table is created per load
    /// from the track schema, so it has no migration.
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS diff (
                op          TEXT NOT NULL,
                id          INTEGER NOT NULL,
                field_name  TEXT,
                field_type  TEXT,
                old_val     TEXT,
                new_val     TEXT,
                datetime    TEXT NOT NULL,
                remarks     TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_diff_id ON diff(id);
            CREATE INDEX IF NOT EXISTS idx_diff_datetime ON diff(datetime);
            ",
        )?;
        Ok(())
    }

    /// V2: one row per library load, for `history`.
    fn migrate_v2(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS library_loads (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                report_time  TEXT NOT NULL,
                row_count    INTEGER NOT NULL,
                loaded_at    TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tables(db: &Database) -> Vec<String> {
        let mut stmt = db
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<String>, _>>()
            .unwrap()
    }

    #[test]
    fn test_in_memory_has_tables() {
        let db = Database::open_in_memory().unwrap();
        let names = tables(&db);
        assert!(names.contains(&"diff".to_string()));
        assert!(names.contains(&"library_loads".to_string()));
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("music.db");
        {
            Database::open(&path).unwrap();
        }
        let db = Database::open(&path).unwrap();
        let version: i32 = db
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, 2);
    }
}
