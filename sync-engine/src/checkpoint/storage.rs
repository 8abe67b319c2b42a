//! redb-based checkpoint storage
//!
//! Note: redb operations are synchronous; a checkpoint write is a single
//! small transaction per reconciliation run.

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::CheckpointStore;

/// Checkpoints table: key = (namespace, key), value = raw bytes
const CHECKPOINTS_TABLE: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("checkpoints");

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),
}

pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Checkpoint store backed by a redb file
#[derive(Clone)]
pub struct RedbCheckpointStore {
    db: Arc<Database>,
}

impl RedbCheckpointStore {
    /// Open or create database
    pub fn open(path: impl AsRef<Path>) -> CheckpointResult<Self> {
        Self::init(Database::create(path)?)
    }

    /// Open in-memory database
    pub fn open_in_memory() -> CheckpointResult<Self> {
        let db =
            Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> CheckpointResult<Self> {
        // Initialize tables
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(CHECKPOINTS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl CheckpointStore for RedbCheckpointStore {
    fn get(&self, namespace: &str, key: &str) -> CheckpointResult<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CHECKPOINTS_TABLE)?;

        Ok(table.get((namespace, key))?.map(|guard| guard.value().to_vec()))
    }

    fn update(&self, namespace: &str, key: &str, value: &[u8]) -> CheckpointResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CHECKPOINTS_TABLE)?;
            table.insert((namespace, key), value)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_overwrites() {
        let store = RedbCheckpointStore::open_in_memory().unwrap();
        store.update("ns", "job", b"first").unwrap();
        store.update("ns", "job", b"second").unwrap();

        assert_eq!(store.get("ns", "job").unwrap(), Some(b"second".to_vec()));
        assert_eq!(store.get("other", "job").unwrap(), None);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.redb");

        {
            let store = RedbCheckpointStore::open(&path).unwrap();
            store.update("ns", "job", b"2024-01-01T00:00:00.000Z").unwrap();
        }

        let store = RedbCheckpointStore::open(&path).unwrap();
        assert_eq!(
            store.get("ns", "job").unwrap(),
            Some(b"2024-01-01T00:00:00.000Z".to_vec())
        );
    }
}
