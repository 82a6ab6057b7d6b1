pub mod error;
pub mod migrations;
pub mod models;

mod conversations;
mod users;

pub use conversations::validate_content;
pub use users::validate_search_prefix;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{info, warn};

use crate::error::{StoreError, StoreResult};

/// How many times a transaction is retried when SQLite reports the
/// database busy or locked before giving up.
const BUSY_RETRIES: u32 = 3;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Self::init(Connection::open(path)?)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::internal("connection lock poisoned"))?;
        f(&conn)
    }

    /// Run `f` inside a transaction: commit on Ok, roll back on Err.
    /// Transient busy/locked failures retry up to BUSY_RETRIES times
    /// before surfacing as an internal error.
    pub fn with_tx<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: Fn(&rusqlite::Transaction) -> StoreResult<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::internal("connection lock poisoned"))?;

        let mut attempts = 0;
        loop {
            let result = conn
                .transaction()
                .map_err(StoreError::from)
                .and_then(|tx| {
                    let value = f(&tx)?;
                    tx.commit()?;
                    Ok(value)
                });

            match result {
                Err(StoreError::Busy) if attempts < BUSY_RETRIES => {
                    attempts += 1;
                    warn!("database busy, retrying transaction (attempt {attempts})");
                }
                Err(StoreError::Busy) => {
                    return Err(StoreError::internal("database busy after retries"));
                }
                other => return other,
            }
        }
    }
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> StoreResult<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> StoreResult<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
