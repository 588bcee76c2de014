//! Replicant Store
//!
//! Key/value persistence of transaction configs, keyed by transaction name.
//! The store never runs anything; the executor and the HTTP layer read
//! configs from it and hand them over to a run.

mod error;
mod memory;
mod sled_store;

use replicant_core::TransactionConfig;
use std::sync::Arc;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sled_store::SledStore;

/// Transaction config store
///
/// Every entry present when `iter` starts is visited exactly once as long as
/// the callback keeps returning `true`. No ordering is guaranteed.
pub trait Store: Send + Sync {
    /// Stores a config, replacing any previous one with the same name
    fn set(&self, name: &str, config: &TransactionConfig) -> Result<()>;

    /// Returns the config stored under `name`, or `StoreError::NotFound`
    fn get(&self, name: &str) -> Result<TransactionConfig>;

    fn has(&self, name: &str) -> Result<bool>;

    /// Removes the config stored under `name`, or `StoreError::NotFound`
    fn delete(&self, name: &str) -> Result<()>;

    /// Visits stored configs until the callback returns `false`
    fn iter(&self, visit: &mut dyn FnMut(&str, TransactionConfig) -> bool) -> Result<()>;

    /// Flushes pending writes
    fn close(&self) -> Result<()>;
}

/// Opens a store from a URI
///
/// Supported forms:
/// - `memory:` - volatile, process-local store
/// - `sled:<path>` - embedded on-disk store at `path`
pub fn open(uri: &str) -> Result<Arc<dyn Store>> {
    let (scheme, rest) = uri
        .split_once(':')
        .ok_or_else(|| StoreError::InvalidUri(uri.to_string()))?;

    match scheme {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "sled" if !rest.is_empty() => Ok(Arc::new(SledStore::open(rest)?)),
        _ => Err(StoreError::InvalidUri(uri.to_string())),
    }
}
