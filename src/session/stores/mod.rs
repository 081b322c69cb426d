//! Chat store implementations.

pub mod memory;
#[cfg(feature = "store-sqlite")]
pub mod sqlite;

use std::sync::Arc;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::AppError;

use super::store::ChatStore;

/// Open the configured store.
pub fn open(config: &StoreConfig) -> Result<Arc<dyn ChatStore>, AppError> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(memory::MemoryChatStore::new())),
        #[cfg(feature = "store-sqlite")]
        StoreBackend::Sqlite => Ok(Arc::new(sqlite::SqliteChatStore::open(&config.path, &config.table)?)),
        #[cfg(not(feature = "store-sqlite"))]
        StoreBackend::Sqlite => Err(AppError::Config(
            "store backend 'sqlite' requires the `store-sqlite` feature".into(),
        )),
    }
}
