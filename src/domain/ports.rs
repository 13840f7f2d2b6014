//! Domain Ports (Port/Adapter Pattern)
//!
//! The registry core depends on a single port: the authoritative user store.
//! Infrastructure adapters (SQL, in-memory) implement it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Validator                               │
//! │        (read-through / write-through orchestration)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   UserStorage (Trait)                        │
//! │        SqlUserStorage │ InMemoryUserStorage                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use uuid::Uuid;

use super::user::UserRecord;
use crate::error::Result;

// =============================================================================
// User Storage Port
// =============================================================================

/// Port for the authoritative user record set.
///
/// Implementations must be safe to call concurrently and must classify
/// failures as:
///
/// - [`Error::NotFound`](crate::Error::NotFound) when the record is absent
/// - [`Error::Connection`](crate::Error::Connection) when the backing store is
///   unreachable or the connection dropped
/// - [`Error::DuplicateKey`](crate::Error::DuplicateKey) when an insert
///   violates identifier or alias uniqueness
/// - [`Error::Query`](crate::Error::Query) for everything else
#[async_trait]
pub trait UserStorage: Send + Sync {
    /// Fetch a user by primary identifier.
    async fn get_user_by_id(&self, id: Uuid) -> Result<UserRecord>;

    /// Fetch a user by alias.
    async fn get_user_by_email(&self, email: &str) -> Result<UserRecord>;

    /// Fetch one page of users.
    async fn get_users(&self, offset: usize, limit: usize) -> Result<Vec<UserRecord>>;

    /// Insert a user.
    async fn add_user(&self, user: &UserRecord) -> Result<()>;

    /// Delete a user by alias. Deleting an unknown alias is not an error.
    async fn del_user(&self, email: &str) -> Result<()>;

    /// Number of stored users.
    async fn get_count(&self) -> Result<u64>;

    /// Release the underlying resource. Backends without one keep the default.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}
