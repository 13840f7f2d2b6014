//! VLESS User Registry
//!
//! User lookup layer for a proxy server: resolves connection credentials
//! (a UUID or an email alias) to user records held in an authoritative SQL
//! store, with an optional in-memory TTL + LRU cache in front of it.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────────┐
//!   add / del ───▶│        Validator         │◀─── get / get_by_email
//!                 └─────┬──────────────┬─────┘
//!                       │ read-through │ write-through
//!                       ▼              ▼
//!              ┌──────────────┐  ┌──────────────────────────┐
//!              │  UserCache   │  │   UserStorage (port)     │
//!              │  TTL + LRU   │  │  SQL │ In-memory         │
//!              └──────────────┘  └──────────────────────────┘
//! ```
//!
//! Storage is always the source of truth. The cache is optional; without it
//! every lookup goes to storage.
//!
//! # Modules
//!
//! - [`adapters`] - Storage backends implementing the domain port
//! - [`cache`] - TTL + LRU user cache
//! - [`config`] - YAML configuration
//! - [`domain`] - User records and the storage port
//! - [`error`] - Error types
//! - [`metrics`] - Prometheus counters for lookups and storage failures
//! - [`validator`] - Read-through / write-through front

pub mod adapters;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod validator;

// Re-export commonly used types
pub use adapters::{connect_storage, InMemoryUserStorage, SqlDriver, SqlUserStorage};
pub use cache::{CacheStats, UserCache};
pub use config::{CacheSettings, Config, StorageConfig};
pub use domain::{Account, UserRecord, UserStorage, VlessAccount};
pub use error::{Error, ErrorKind, Result};
pub use validator::Validator;
