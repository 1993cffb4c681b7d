use crate::{Store, StoreError, StoreResult, Transaction};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::{
    fmt,
    path::{Path, PathBuf},
};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    key BLOB PRIMARY KEY NOT NULL,
    value BLOB NOT NULL
)";

/// Durable store backed by a single SQLite database file.
///
/// One connection serves every transaction; the connection mutex is the
/// single-writer lock.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish()
    }
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| StoreError::io(format!("open {}: {e}", path.display())))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "opened sqlite store");
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Private in-memory database; useful for tests that want SQLite semantics.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

struct SqliteTxn<'a> {
    conn: &'a Connection,
}

impl Transaction for SqliteTxn<'_> {
    fn read(&mut self, key: &[u8]) -> StoreResult<Vec<u8>> {
        self.conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?
            .ok_or_else(|| StoreError::not_found(key))
    }

    fn write(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> StoreResult<()> {
        self.conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

impl Store for SqliteStore {
    fn write_transaction<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let out = body(&mut SqliteTxn { conn: &tx });
        match out {
            Ok(value) => {
                tx.commit().map_err(StoreError::from)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::warn!(error = %rollback, "sqlite rollback failed");
                }
                Err(err)
            }
        }
    }

    fn read_transaction<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Deferred)
            .map_err(StoreError::from)?;
        let out = body(&mut SqliteTxn { conn: &tx });
        // Read transactions never commit.
        if let Err(rollback) = tx.rollback() {
            tracing::warn!(error = %rollback, "sqlite rollback failed");
        }
        out
    }
}
