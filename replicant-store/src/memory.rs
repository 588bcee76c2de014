//! In-memory store

use parking_lot::RwLock;
use replicant_core::TransactionConfig;
use std::collections::HashMap;

use crate::Store;
use crate::error::{Result, StoreError};

/// Volatile store backed by a hash map
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, TransactionConfig>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn set(&self, name: &str, config: &TransactionConfig) -> Result<()> {
        self.entries.write().insert(name.to_string(), config.clone());
        Ok(())
    }

    fn get(&self, name: &str) -> Result<TransactionConfig> {
        self.entries
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn has(&self, name: &str) -> Result<bool> {
        Ok(self.entries.read().contains_key(name))
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.entries
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn iter(&self, visit: &mut dyn FnMut(&str, TransactionConfig) -> bool) -> Result<()> {
        // Snapshot so the callback may call back into the store
        let snapshot: Vec<(String, TransactionConfig)> = self
            .entries
            .read()
            .iter()
            .map(|(name, config)| (name.clone(), config.clone()))
            .collect();

        for (name, config) in snapshot {
            if !visit(&name, config) {
                break;
            }
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
