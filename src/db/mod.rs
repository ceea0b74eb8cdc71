//! Database module for the shared job store.

pub mod queries;

use crate::error::{RelaxError, Result};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Default timeout for the SQLite busy handler.
///
/// Claims and completions from many worker processes serialize on the write
/// lock; a worker waits up to this long before the store counts as unavailable.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Current schema version.
const SCHEMA_VERSION: u32 = 1;

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a job store at the given path.
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() && path.is_dir() {
            let path_str = path.display().to_string();
            let path_trimmed = path_str.trim_end_matches('/');
            return Err(RelaxError::InvalidPath(format!(
                "'{}' is a directory, not a file. Expected a path like '{}/jobs.db'",
                path.display(),
                path_trimmed
            )));
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;

        // WAL lets readers (status, peek) proceed while a worker holds the
        // write lock for a claim.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;

        let db = Self { conn };
        db.init_schema()?;
        db.migrate_if_needed()?;
        Ok(db)
    }

    /// Create the `meta`, `jobs` and `job_flags` tables if missing.
    ///
    /// `properties` is `NULL` until a worker completes the job; the partial
    /// index covers exactly the rows a claim can select.
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                structure TEXT NOT NULL,
                properties TEXT,
                locked INTEGER NOT NULL DEFAULT 0,
                locked_at INTEGER,
                created_at INTEGER NOT NULL,
                completed_at INTEGER
            );

            -- Status map: a row means the flag is set
            CREATE TABLE IF NOT EXISTS job_flags (
                job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                flag TEXT NOT NULL,
                PRIMARY KEY (job_id, flag)
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_claimable ON jobs(id)
                WHERE locked = 0 AND properties IS NULL;
            CREATE INDEX IF NOT EXISTS idx_jobs_locked ON jobs(locked_at)
                WHERE locked = 1;
            CREATE INDEX IF NOT EXISTS idx_job_flags_flag ON job_flags(flag, job_id);
            "#,
        )?;

        let version = self.get_meta("schema_version")?;
        if version.is_none() {
            self.set_meta("schema_version", &SCHEMA_VERSION.to_string())?;
        }

        Ok(())
    }

    /// Apply pending schema migrations.
    fn migrate_if_needed(&self) -> Result<()> {
        let version_str = self.get_meta("schema_version")?;
        let version_str = version_str.as_deref().unwrap_or("0");
        let current_version: u32 = version_str.parse().map_err(|_| {
            RelaxError::CorruptStore(format!(
                "invalid schema_version '{}': expected integer",
                version_str
            ))
        })?;

        if current_version > SCHEMA_VERSION {
            return Err(RelaxError::StoreTooNew {
                store_version: current_version,
                supported_version: SCHEMA_VERSION,
            });
        }

        if current_version < SCHEMA_VERSION {
            self.set_meta("schema_version", &SCHEMA_VERSION.to_string())?;
        }

        Ok(())
    }

    /// Get a metadata value.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self.conn.prepare("SELECT value FROM meta WHERE key = ?")?;
        let mut rows = stmt.query([key])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    /// Set a metadata value.
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
            [key, value],
        )?;
        Ok(())
    }

    /// Get the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Get the underlying connection for write transactions.
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_database_open_creates_schema() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("jobs.db");
        let db = Database::open(&db_path, DEFAULT_BUSY_TIMEOUT).unwrap();

        let tables: Vec<String> = db
            .connection()
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();

        assert!(tables.contains(&"meta".to_string()));
        assert!(tables.contains(&"jobs".to_string()));
        assert!(tables.contains(&"job_flags".to_string()));
    }

    #[test]
    fn test_database_meta_operations() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("jobs.db"), DEFAULT_BUSY_TIMEOUT).unwrap();

        assert_eq!(db.get_meta("queue").unwrap(), None);
        db.set_meta("queue", "relax").unwrap();
        assert_eq!(db.get_meta("queue").unwrap(), Some("relax".to_string()));
        db.set_meta("queue", "lj13").unwrap();
        assert_eq!(db.get_meta("queue").unwrap(), Some("lj13".to_string()));
    }

    #[test]
    fn test_schema_versioning() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("jobs.db"), DEFAULT_BUSY_TIMEOUT).unwrap();
        assert_eq!(
            db.get_meta("schema_version").unwrap(),
            Some(SCHEMA_VERSION.to_string())
        );
    }

    #[test]
    fn test_open_directory_is_rejected() {
        let dir = tempdir().unwrap();
        let err = Database::open(dir.path(), DEFAULT_BUSY_TIMEOUT)
            .err()
            .expect("directory should be rejected");
        assert!(matches!(err, RelaxError::InvalidPath(_)));
    }

    #[test]
    fn test_open_rejects_newer_schema() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("jobs.db");
        {
            let db = Database::open(&db_path, DEFAULT_BUSY_TIMEOUT).unwrap();
            db.set_meta("schema_version", "99").unwrap();
        }
        let result = Database::open(&db_path, DEFAULT_BUSY_TIMEOUT);
        assert!(matches!(
            result,
            Err(RelaxError::StoreTooNew {
                store_version: 99,
                ..
            })
        ));
    }

    #[test]
    fn test_open_rejects_garbled_schema_version() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("jobs.db");
        {
            let db = Database::open(&db_path, DEFAULT_BUSY_TIMEOUT).unwrap();
            db.set_meta("schema_version", "one").unwrap();
        }
        let result = Database::open(&db_path, DEFAULT_BUSY_TIMEOUT);
        assert!(matches!(result, Err(RelaxError::CorruptStore(_))));
    }
}
