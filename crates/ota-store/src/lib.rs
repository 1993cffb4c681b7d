//! Transactional key/value storage abstractions plus in-memory and SQLite backends.

mod mem_store;
mod sqlite_store;

pub use mem_store::MemStore;
pub use sqlite_store::SqliteStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Working set handed to a transaction body.
///
/// Reads observe writes made earlier in the same transaction. Nothing is
/// visible outside the transaction until the owning store commits it.
pub trait Transaction {
    fn read(&mut self, key: &[u8]) -> StoreResult<Vec<u8>>;
    fn write(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()>;
    fn remove(&mut self, key: &[u8]) -> StoreResult<()>;
}

/// Trait implemented by all transactional stores.
///
/// Write transactions are serialized. A body returning `Err` rolls back every
/// write it made. Read transactions never have a durable effect: writes made
/// inside one are discarded on exit regardless of the body's result.
///
/// Transaction bodies must not call back into the same store.
pub trait Store: Send + Sync {
    fn write_transaction<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
        E: From<StoreError>;

    fn read_transaction<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
        E: From<StoreError>;

    fn read(&self, key: &[u8]) -> StoreResult<Vec<u8>> {
        self.read_transaction(|txn| txn.read(key))
    }

    fn write(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.write_transaction(|txn| txn.write(key, value))
    }

    fn remove(&self, key: &[u8]) -> StoreResult<()> {
        self.write_transaction(|txn| txn.remove(key))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreErrorKind {
    KeyNotFound,
    Io,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("key not found: {key}")]
    KeyNotFound { key: String },
    #[error("storage I/O error: {message}")]
    Io { message: String },
}

impl StoreError {
    pub fn not_found(key: &[u8]) -> Self {
        StoreError::KeyNotFound {
            key: String::from_utf8_lossy(key).into_owned(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        StoreError::Io {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> StoreErrorKind {
        match self {
            StoreError::KeyNotFound { .. } => StoreErrorKind::KeyNotFound,
            StoreError::Io { .. } => StoreErrorKind::Io,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == StoreErrorKind::KeyNotFound
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::io(err.to_string())
    }
}
