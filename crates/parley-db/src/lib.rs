pub mod migrations;
pub mod models;
pub mod queries;
pub mod reads;
pub mod seed;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use parley_types::error::ChatError;

pub type Result<T> = std::result::Result<T, ChatError>;

/// Sole owner of all persistent state. Every mutation goes through the
/// single connection behind the mutex, so message ids stay strictly
/// increasing and receipt inserts never interleave mid-statement.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(map_sqlite)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(map_sqlite)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(map_sqlite)?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(map_sqlite)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(map_sqlite)?;

        migrations::run(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ChatError::Unavailable(format!("store lock poisoned: {e}")))?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| ChatError::Unavailable(format!("store lock poisoned: {e}")))?;
        f(&mut conn)
    }
}

/// Translate SQLite failures into the core taxonomy: foreign-key
/// violations mean a referenced parent row is missing, unique violations
/// are conflicts. Duplicate receipts never reach this point — those
/// inserts use INSERT OR IGNORE.
pub(crate) fn map_sqlite(e: rusqlite::Error) -> ChatError {
    match &e {
        rusqlite::Error::QueryReturnedNoRows => ChatError::NotFound("row"),
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            match err.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                    ChatError::NotFound("referenced row")
                }
                rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE => {
                    ChatError::Conflict("unique constraint violated")
                }
                _ => ChatError::Conflict("constraint violated"),
            }
        }
        _ => ChatError::Unavailable(e.to_string()),
    }
}
