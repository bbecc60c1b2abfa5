//! Redb-backed durable state store.
//!
//! The native counterpart of the browser's persistent storage: the outgoing
//! queue, key-pair records, and the advisory-lock lease all survive process
//! restarts. Redb's ACID copy-on-write transactions give crash safety
//! without a WAL to manage.

use std::{path::Path, sync::Arc};

use chatwire_core::{StateStore, StorageError};
use redb::{Database, ReadableTable, TableDefinition};

/// Single table: namespaced string keys to opaque values. Namespacing is
/// done in the keys (`chatwire:queue:...`, `chatwire:keys:...`), mirroring
/// flat profile storage.
const STATE: TableDefinition<&str, &[u8]> = TableDefinition::new("state");

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc), and
/// clones observe each other's writes - which is what the advisory lock
/// relies on.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or
    /// created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(|e| StorageError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(STATE).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl StateStore for RedbStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(STATE).map_err(|e| StorageError::Io(e.to_string()))?;

        let value = table
            .get(key)
            .map_err(|e| StorageError::Io(e.to_string()))?
            .map(|guard| guard.value().to_vec());

        Ok(value)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let mut table = txn.open_table(STATE).map_err(|e| StorageError::Io(e.to_string()))?;
            table.insert(key, value).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let mut table = txn.open_table(STATE).map_err(|e| StorageError::Io(e.to_string()))?;
            table.remove(key).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(STATE).map_err(|e| StorageError::Io(e.to_string()))?;

        let mut keys = Vec::new();
        for entry in table.range(prefix..).map_err(|e| StorageError::Io(e.to_string()))? {
            let (key, _) = entry.map_err(|e| StorageError::Io(e.to_string()))?;
            let key = key.value();

            if !key.starts_with(prefix) {
                break;
            }
            keys.push(key.to_string());
        }

        Ok(keys)
    }
}
