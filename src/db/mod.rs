//! SQLite-based local state for case signals, decision intelligence, and audit.
//!
//! The database lives at `~/.caseintel/caseintel.db` and is the working store
//! for everything the engine derives: the active signal set per case, the
//! persisted intelligence rows, and the audit trail. Case artifacts
//! (submissions, evidence, info requests, license checks) share the same file
//! so the platform ships as a single-database deployment.

use std::path::PathBuf;

use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Malformed row: {0}")]
    MalformedRow(String),
}

pub struct CaseDb {
    conn: Connection,
}

impl CaseDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Self) -> Result<T, DbError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database at `~/.caseintel/caseintel.db` and apply the schema.
    pub fn open() -> Result<Self, DbError> {
        let path = Self::db_path()?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        // Run schema migrations
        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        // FK enforcement on after migrations; table-recreation migrations
        // need PRAGMA foreign_keys = OFF while they run.
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn })
    }

    /// Open the database in read-only mode. Used by `SqliteCaseReader` for
    /// safe concurrent reads while the engine owns writes.
    pub fn open_readonly() -> Result<Self, DbError> {
        let path = Self::db_path()?;
        Self::open_readonly_at(&path)
    }

    /// Open a database at an explicit path in read-only mode.
    pub fn open_readonly_at(path: &std::path::Path) -> Result<Self, DbError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self { conn })
    }

    /// Resolve the default database path: `~/.caseintel/caseintel.db`.
    pub fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".caseintel").join("caseintel.db"))
    }
}

// =============================================================================
// Shared test utilities
// =============================================================================

#[cfg(test)]
pub mod test_utils {
    use super::CaseDb;

    /// Create a temporary database for testing.
    ///
    /// We leak the `TempDir` so the directory persists for the duration of the test.
    /// Test temp dirs are cleaned up by the OS. FK enforcement is disabled so that
    /// unit tests can insert rows without satisfying every foreign key constraint.
    pub fn test_db() -> CaseDb {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        let db = CaseDb::open_at(path).expect("Failed to open test database");
        db.conn_ref()
            .execute_batch("PRAGMA foreign_keys = OFF;")
            .expect("disable FK for tests");
        db
    }
}

// =============================================================================
// Tests
// =============================================================================
