//! In-Memory User Storage
//!
//! Implements the `UserStorage` port in process memory. Used for tests and for
//! running the registry without a database.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{UserRecord, UserStorage};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct MemoryState {
    /// Users ordered by identifier for stable pagination
    users: BTreeMap<Uuid, UserRecord>,
    emails: HashMap<String, Uuid>,
}

/// Operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStorageStats {
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
}

impl MemoryStorageStats {
    /// Total operations of any kind
    pub fn total(&self) -> u64 {
        self.reads + self.writes + self.deletes
    }
}

/// Process-local user store.
///
/// Enforces identifier and alias uniqueness like a SQL table with two unique
/// keys would. After [`close`](UserStorage::close) every operation fails with
/// a connection error.
#[derive(Debug, Default)]
pub struct InMemoryUserStorage {
    state: RwLock<MemoryState>,
    closed: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl InMemoryUserStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> MemoryStorageStats {
        MemoryStorageStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Connection {
                context: "in-memory storage is closed".to_string(),
                source: None,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl UserStorage for InMemoryUserStorage {
    async fn get_user_by_id(&self, id: Uuid) -> Result<UserRecord> {
        self.ensure_open()?;
        self.reads.fetch_add(1, Ordering::Relaxed);

        self.state
            .read()
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("user not found with ID: {}", id)))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<UserRecord> {
        self.ensure_open()?;
        self.reads.fetch_add(1, Ordering::Relaxed);

        let state = self.state.read();
        state
            .emails
            .get(email)
            .and_then(|id| state.users.get(id))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("user not found with email: {}", email)))
    }

    async fn get_users(&self, offset: usize, limit: usize) -> Result<Vec<UserRecord>> {
        self.ensure_open()?;
        self.reads.fetch_add(1, Ordering::Relaxed);

        Ok(self
            .state
            .read()
            .users
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn add_user(&self, user: &UserRecord) -> Result<()> {
        self.ensure_open()?;
        let id = user
            .vless_id()
            .ok_or_else(|| Error::Validation("not a VLESS user".to_string()))?;
        self.writes.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.write();
        if state.users.contains_key(&id) || state.emails.contains_key(&user.email) {
            return Err(Error::DuplicateKey {
                context: format!("id {} or email {}", id, user.email),
                source: None,
            });
        }

        state.emails.insert(user.email.clone(), id);
        state.users.insert(id, user.clone());
        debug!(id = %id, email = %user.email, "Stored user in memory");
        Ok(())
    }

    async fn del_user(&self, email: &str) -> Result<()> {
        self.ensure_open()?;
        self.deletes.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.write();
        match state.emails.remove(email) {
            Some(id) => {
                state.users.remove(&id);
            }
            None => debug!(email = %email, "No user found to delete"),
        }
        Ok(())
    }

    async fn get_count(&self) -> Result<u64> {
        self.ensure_open()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.state.read().users.len() as u64)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn user(n: u128) -> UserRecord {
        UserRecord::vless(Uuid::from_u128(n), format!("user{}@example.com", n), "")
    }

    #[tokio::test]
    async fn test_add_and_fetch() {
        let storage = InMemoryUserStorage::new();
        storage.add_user(&user(1)).await.unwrap();

        assert_eq!(storage.get_user_by_id(Uuid::from_u128(1)).await.unwrap(), user(1));
        assert_eq!(
            storage.get_user_by_email("user1@example.com").await.unwrap(),
            user(1)
        );
        assert_eq!(storage.get_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_user_is_not_found() {
        let storage = InMemoryUserStorage::new();
        assert_matches!(
            storage.get_user_by_id(Uuid::from_u128(9)).await,
            Err(Error::NotFound(_))
        );
        assert_matches!(
            storage.get_user_by_email("nobody@example.com").await,
            Err(Error::NotFound(_))
        );
    }

    #[tokio::test]
    async fn test_duplicate_id_and_alias() {
        let storage = InMemoryUserStorage::new();
        storage.add_user(&user(1)).await.unwrap();

        let same_id = UserRecord::vless(Uuid::from_u128(1), "other@example.com", "");
        assert_matches!(storage.add_user(&same_id).await, Err(Error::DuplicateKey { .. }));

        let same_alias = UserRecord::vless(Uuid::from_u128(2), "user1@example.com", "");
        let err = storage.add_user(&same_alias).await.unwrap_err();
        assert!(err.is_duplicate_key());

        assert_eq!(storage.get_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pagination_is_ordered_and_bounded() {
        let storage = InMemoryUserStorage::new();
        for n in (1..=5).rev() {
            storage.add_user(&user(n)).await.unwrap();
        }

        let first = storage.get_users(0, 2).await.unwrap();
        let second = storage.get_users(2, 2).await.unwrap();
        let third = storage.get_users(4, 2).await.unwrap();
        let past_end = storage.get_users(10, 2).await.unwrap();

        assert_eq!(first, vec![user(1), user(2)]);
        assert_eq!(second, vec![user(3), user(4)]);
        assert_eq!(third, vec![user(5)]);
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn test_delete_unknown_alias_succeeds() {
        let storage = InMemoryUserStorage::new();
        storage.del_user("ghost@example.com").await.unwrap();
        assert_eq!(storage.stats().deletes, 1);
    }

    #[tokio::test]
    async fn test_closed_storage_reports_connection_error() {
        let storage = InMemoryUserStorage::new();
        storage.add_user(&user(1)).await.unwrap();
        storage.close().await.unwrap();

        let err = storage.get_user_by_id(Uuid::from_u128(1)).await.unwrap_err();
        assert!(err.is_connection_error());
        assert!(storage.get_count().await.unwrap_err().is_connection_error());
    }

    #[tokio::test]
    async fn test_rejects_foreign_account() {
        let storage = InMemoryUserStorage::new();
        let foreign = UserRecord {
            email: "t@example.com".to_string(),
            level: 0,
            account: crate::domain::Account::Trojan {
                password: "pw".to_string(),
            },
        };
        assert_matches!(storage.add_user(&foreign).await, Err(Error::Validation(_)));
        assert_eq!(storage.stats().writes, 0);
    }
}
