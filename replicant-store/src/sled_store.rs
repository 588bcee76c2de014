//! Embedded on-disk store

use replicant_core::TransactionConfig;
use sled::{Db, Tree};
use std::path::Path;
use tracing::debug;

use crate::Store;
use crate::error::{Result, StoreError};

const TRANSACTIONS_TREE: &str = "transactions";

/// Store backed by a `sled` database, configs encoded as JSON
pub struct SledStore {
    db: Db,
    transactions: Tree,
}

impl SledStore {
    /// Opens (or creates) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        let transactions = db.open_tree(TRANSACTIONS_TREE)?;
        debug!(path = %path.as_ref().display(), entries = transactions.len(), "Opened sled store");

        Ok(Self { db, transactions })
    }
}

impl Store for SledStore {
    fn set(&self, name: &str, config: &TransactionConfig) -> Result<()> {
        let value = serde_json::to_vec(config)?;
        self.transactions.insert(name.as_bytes(), value)?;
        Ok(())
    }

    fn get(&self, name: &str) -> Result<TransactionConfig> {
        let value = self
            .transactions
            .get(name.as_bytes())?
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        Ok(serde_json::from_slice(&value)?)
    }

    fn has(&self, name: &str) -> Result<bool> {
        Ok(self.transactions.contains_key(name.as_bytes())?)
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.transactions
            .remove(name.as_bytes())?
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn iter(&self, visit: &mut dyn FnMut(&str, TransactionConfig) -> bool) -> Result<()> {
        for entry in self.transactions.iter() {
            let (key, value) = entry?;
            let name = String::from_utf8_lossy(&key);
            let config: TransactionConfig = serde_json::from_slice(&value)?;
            if !visit(&name, config) {
                break;
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn temp_store() -> (tempfile::TempDir, SledStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path().join("db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_set_get() {
        let (_dir, store) = temp_store();
        testing::set_get_roundtrip(&store);
    }

    #[test]
    fn test_has_delete() {
        let (_dir, store) = temp_store();
        testing::has_and_delete(&store);
    }

    #[test]
    fn test_iter() {
        let (_dir, store) = temp_store();
        testing::iter_visits_everything(&store);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");

        {
            let store = SledStore::open(&path).unwrap();
            store.set("txn1", &testing::config("txn1")).unwrap();
            store.close().unwrap();
        }

        let store = SledStore::open(&path).unwrap();
        assert_eq!(store.get("txn1").unwrap(), testing::config("txn1"));
    }

    #[test]
    fn test_corrupt_entry_is_a_serialization_error() {
        let (_dir, store) = temp_store();
        store.transactions.insert("broken", "not json").unwrap();

        let err = store.get("broken").unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
