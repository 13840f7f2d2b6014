//! Storage Adapters
//!
//! Implementations of the [`UserStorage`] port.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                 Port: UserStorage (trait)                   │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ SqlUserStorage (PostgreSQL / MySQL) │ InMemoryUserStorage  │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use vless_userdb::adapters::connect_storage;
//! use vless_userdb::config::StorageConfig;
//!
//! let storage = connect_storage(&StorageConfig::memory()).await?;
//! let count = storage.get_count().await?;
//! ```

mod memory;
mod sql;

pub use memory::{InMemoryUserStorage, MemoryStorageStats};
pub use sql::{SqlDriver, SqlPool, SqlUserStorage};

use std::sync::Arc;

use tracing::info;

use crate::config::{StorageConfig, StorageKind};
use crate::domain::UserStorage;
use crate::error::Result;

/// Build the storage backend selected by `config.kind`.
pub async fn connect_storage(config: &StorageConfig) -> Result<Arc<dyn UserStorage>> {
    config.validate()?;

    let storage: Arc<dyn UserStorage> = match config.storage_kind()? {
        StorageKind::Memory => Arc::new(InMemoryUserStorage::new()),
        StorageKind::Postgres | StorageKind::MySql => Arc::new(SqlUserStorage::connect(config).await?),
    };

    info!(
        backend = storage.name(),
        table = %config.table,
        "Successfully connected to database"
    );
    Ok(storage)
}
