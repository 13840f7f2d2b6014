//! User Registry Integration Tests
//!
//! Exercises the validator through the public API:
//! - Cached and uncached lookup flows over the in-memory backend
//! - Storage fault handling with a recording, fault-injecting backend
//! - Concurrent access
//! - Paginated listing properties

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use vless_userdb::adapters::InMemoryUserStorage;
use vless_userdb::config::CacheSettings;
use vless_userdb::error::{Error, ErrorKind, Result};
use vless_userdb::validator::PAGE_SIZE;
use vless_userdb::{Account, UserRecord, UserStorage, Validator};

fn user(n: u128) -> UserRecord {
    UserRecord::vless(Uuid::from_u128(n), format!("user{}@example.com", n), "")
}

// =============================================================================
// Recording / Fault-Injecting Storage
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    GetById(Uuid),
    GetByEmail(String),
    GetUsers { offset: usize, limit: usize },
    Add(String),
    Del(String),
    Count,
    Close,
}

/// Wraps the in-memory backend, records every call and can fail on demand.
#[derive(Default)]
struct RecordingStorage {
    inner: InMemoryUserStorage,
    calls: Mutex<Vec<Call>>,
    fault: Mutex<Option<ErrorKind>>,
    /// Fail only once this many calls have succeeded
    fail_after: AtomicUsize,
}

impl RecordingStorage {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn fail_with(&self, kind: ErrorKind) {
        *self.fault.lock() = Some(kind);
    }

    fn fail_after(&self, successes: usize, kind: ErrorKind) {
        self.fail_after.store(successes, Ordering::SeqCst);
        self.fail_with(kind);
    }

    fn heal(&self) {
        *self.fault.lock() = None;
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn record(&self, call: Call) -> Result<()> {
        self.calls.lock().push(call);

        let Some(kind) = *self.fault.lock() else {
            return Ok(());
        };
        if self
            .fail_after
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Ok(());
        }

        Err(match kind {
            ErrorKind::Connection => Error::Connection {
                context: "connection refused".to_string(),
                source: None,
            },
            ErrorKind::DuplicateKey => Error::DuplicateKey {
                context: "unique violation".to_string(),
                source: None,
            },
            ErrorKind::NotFound => Error::NotFound("injected".to_string()),
            _ => Error::Query {
                context: "syntax error".to_string(),
                source: None,
            },
        })
    }
}

#[async_trait]
impl UserStorage for RecordingStorage {
    async fn get_user_by_id(&self, id: Uuid) -> Result<UserRecord> {
        self.record(Call::GetById(id))?;
        self.inner.get_user_by_id(id).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<UserRecord> {
        self.record(Call::GetByEmail(email.to_string()))?;
        self.inner.get_user_by_email(email).await
    }

    async fn get_users(&self, offset: usize, limit: usize) -> Result<Vec<UserRecord>> {
        self.record(Call::GetUsers { offset, limit })?;
        self.inner.get_users(offset, limit).await
    }

    async fn add_user(&self, user: &UserRecord) -> Result<()> {
        self.record(Call::Add(user.email.clone()))?;
        self.inner.add_user(user).await
    }

    async fn del_user(&self, email: &str) -> Result<()> {
        self.record(Call::Del(email.to_string()))?;
        self.inner.del_user(email).await
    }

    async fn get_count(&self) -> Result<u64> {
        self.record(Call::Count)?;
        self.inner.get_count().await
    }

    async fn close(&self) -> Result<()> {
        self.calls.lock().push(Call::Close);
        self.inner.close().await
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

fn cached(storage: Arc<RecordingStorage>) -> Validator {
    Validator::new(storage, Some(&CacheSettings::new(300, 100))).unwrap()
}

fn uncached(storage: Arc<RecordingStorage>) -> Validator {
    Validator::new(storage, None).unwrap()
}

// =============================================================================
// Lookup Flows
// =============================================================================

mod flow_tests {
    use super::*;

    #[tokio::test]
    async fn test_validator_with_cache() {
        let storage = Arc::new(InMemoryUserStorage::new());
        let validator = Validator::new(storage.clone(), Some(&CacheSettings::new(5, 10))).unwrap();
        let id = Uuid::new_v4();
        let u = UserRecord::vless(id, "test@example.com", "xtls-rprx-vision");

        validator.add(u.clone()).await.unwrap();

        assert_eq!(validator.get(id).await, Some(u.clone()));
        assert_eq!(validator.get_by_email("test@example.com").await, Some(u.clone()));
        assert_eq!(validator.get_all().await, Some(vec![u.clone()]));
        assert_eq!(validator.get_count().await, 1);

        validator.del("test@example.com").await.unwrap();

        assert_eq!(validator.get(id).await, None);
        assert_eq!(validator.get_by_email("test@example.com").await, None);
        assert_eq!(validator.get_count().await, 0);
        assert_eq!(storage.get_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_validator_without_cache() {
        let storage = Arc::new(InMemoryUserStorage::new());
        let validator = Validator::new(storage.clone(), None).unwrap();
        let id = Uuid::new_v4();
        let u = UserRecord::vless(id, "plain@example.com", "");

        validator.add(u.clone()).await.unwrap();

        assert!(validator.cache().is_none());
        assert_eq!(validator.get(id).await, Some(u.clone()));
        assert_eq!(validator.get_by_email("plain@example.com").await, Some(u));
        assert_eq!(validator.get_count().await, 1);

        validator.del("plain@example.com").await.unwrap();
        assert_eq!(validator.get(id).await, None);
        assert_eq!(validator.get_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_alias_surfaces_duplicate_key() {
        let storage = Arc::new(InMemoryUserStorage::new());
        let validator = Validator::new(storage, Some(&CacheSettings::default())).unwrap();

        validator.add(user(1)).await.unwrap();
        let clash = UserRecord::vless(Uuid::from_u128(2), "user1@example.com", "");
        let err = validator.add(clash).await.unwrap_err();

        assert!(err.is_duplicate_key());
        assert_eq!(
            validator.get_by_email("user1@example.com").await.unwrap().vless_id(),
            Some(Uuid::from_u128(1))
        );
        assert_eq!(validator.get(Uuid::from_u128(2)).await, None);
    }

    #[tokio::test]
    async fn test_uncached_listing_pages_through_storage() {
        let storage = RecordingStorage::new();
        for n in 0..101 {
            storage.inner.add_user(&user(n)).await.unwrap();
        }
        let validator = uncached(storage.clone());

        let all = validator.get_all().await.unwrap();

        assert_eq!(all.len(), 101);
        assert_eq!(
            storage.calls(),
            vec![
                Call::GetUsers {
                    offset: 0,
                    limit: PAGE_SIZE
                },
                Call::GetUsers {
                    offset: PAGE_SIZE,
                    limit: PAGE_SIZE
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_cache_expiry_falls_back_to_storage() {
        let storage = RecordingStorage::new();
        let validator = Validator::new(storage.clone(), Some(&CacheSettings::new(1, 10))).unwrap();
        validator.add(user(1)).await.unwrap();

        assert!(validator.get(Uuid::from_u128(1)).await.is_some());
        assert!(!storage.calls().contains(&Call::GetById(Uuid::from_u128(1))));

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(validator.get(Uuid::from_u128(1)).await.is_some());
        assert!(storage.calls().contains(&Call::GetById(Uuid::from_u128(1))));
    }

    #[tokio::test]
    async fn test_close_reaches_storage() {
        let storage = RecordingStorage::new();
        let validator = cached(storage.clone());
        validator.add(user(1)).await.unwrap();

        validator.close().await.unwrap();

        assert_eq!(storage.calls().last(), Some(&Call::Close));
        assert_eq!(validator.get_count().await, 0);
    }
}

// =============================================================================
// Storage Faults
// =============================================================================

mod fault_tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_foreign_account_makes_no_storage_calls() {
        let storage = RecordingStorage::new();
        let validator = cached(storage.clone());
        let trojan = UserRecord {
            email: "trojan@example.com".to_string(),
            level: 0,
            account: Account::Trojan {
                password: "secret".to_string(),
            },
        };

        assert_matches!(validator.add(trojan).await, Err(Error::Validation(_)));
        assert!(storage.calls().is_empty());
        assert_eq!(validator.get_count().await, 0);
    }

    // Fail-closed: an unreachable store is reported exactly like an absent
    // user. Callers cannot tell the two apart from the return value.
    #[tokio::test]
    async fn test_connection_failure_reads_as_absent() {
        let storage = RecordingStorage::new();
        storage.inner.add_user(&user(1)).await.unwrap();
        let validator = cached(storage.clone());
        storage.fail_with(ErrorKind::Connection);

        assert_eq!(validator.get(Uuid::from_u128(1)).await, None);
        assert_eq!(validator.get_by_email("user1@example.com").await, None);

        let metrics = validator.metrics();
        assert_eq!(metrics.storage_error_count("get", ErrorKind::Connection), 1);
        assert_eq!(
            metrics.storage_error_count("get_by_email", ErrorKind::Connection),
            1
        );

        storage.heal();
        assert_eq!(validator.get(Uuid::from_u128(1)).await, Some(user(1)));
    }

    #[tokio::test]
    async fn test_query_failure_reads_as_absent() {
        let storage = RecordingStorage::new();
        let validator = uncached(storage.clone());
        storage.fail_with(ErrorKind::Query);

        assert_eq!(validator.get(Uuid::from_u128(3)).await, None);
        assert_eq!(
            validator
                .metrics()
                .storage_error_count("get", ErrorKind::Query),
            1
        );
    }

    #[tokio::test]
    async fn test_plain_miss_is_not_counted_as_storage_error() {
        let storage = RecordingStorage::new();
        let validator = uncached(storage.clone());

        assert_eq!(validator.get(Uuid::from_u128(3)).await, None);
        assert_eq!(
            validator
                .metrics()
                .storage_error_count("get", ErrorKind::NotFound),
            0
        );
    }

    #[tokio::test]
    async fn test_listing_fails_if_any_page_fails() {
        let storage = RecordingStorage::new();
        for n in 0..150 {
            storage.inner.add_user(&user(n)).await.unwrap();
        }
        let validator = uncached(storage.clone());
        storage.fail_after(1, ErrorKind::Connection);

        assert_eq!(validator.get_all().await, None);
        assert_eq!(storage.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_count_failure_reports_zero() {
        let storage = RecordingStorage::new();
        storage.inner.add_user(&user(1)).await.unwrap();
        let validator = uncached(storage.clone());
        storage.fail_with(ErrorKind::Query);

        assert_eq!(validator.get_count().await, 0);

        storage.heal();
        assert_eq!(validator.get_count().await, 1);
    }

    #[tokio::test]
    async fn test_failed_add_leaves_cache_untouched() {
        let storage = RecordingStorage::new();
        let validator = cached(storage.clone());
        storage.fail_with(ErrorKind::DuplicateKey);

        let err = validator.add(user(1)).await.unwrap_err();

        assert!(err.is_duplicate_key());
        assert!(validator.cache().unwrap().is_empty());
        assert_eq!(validator.get_all().await, Some(vec![]));
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_cached_user() {
        let storage = RecordingStorage::new();
        let validator = cached(storage.clone());
        validator.add(user(1)).await.unwrap();
        storage.fail_with(ErrorKind::Connection);

        let err = validator.del("user1@example.com").await.unwrap_err();

        assert!(err.is_connection_error());
        assert_eq!(validator.get_by_email("user1@example.com").await, Some(user(1)));
    }
}

// =============================================================================
// Concurrency
// =============================================================================

mod concurrency_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_and_readers() {
        let storage = Arc::new(InMemoryUserStorage::new());
        let validator = Arc::new(
            Validator::new(storage.clone(), Some(&CacheSettings::new(300, 0))).unwrap(),
        );

        let mut handles = Vec::new();
        for worker in 0..8u128 {
            let validator = validator.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25u128 {
                    let n = worker * 1000 + i;
                    validator.add(user(n)).await.unwrap();
                    assert_eq!(validator.get(Uuid::from_u128(n)).await, Some(user(n)));
                    let email = format!("user{}@example.com", n);
                    assert!(validator.get_by_email(&email).await.is_some());
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(validator.get_count().await, 200);
        assert_eq!(storage.get_count().await.unwrap(), 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_bounded_cache_under_contention() {
        let storage = Arc::new(InMemoryUserStorage::new());
        for n in 0..64 {
            storage.add_user(&user(n)).await.unwrap();
        }
        let validator = Arc::new(
            Validator::new(storage, Some(&CacheSettings::new(300, 16))).unwrap(),
        );

        let mut handles = Vec::new();
        for worker in 0..4u128 {
            let validator = validator.clone();
            handles.push(tokio::spawn(async move {
                for round in 0..200u128 {
                    let n = (worker * 7 + round * 13) % 64;
                    assert_eq!(validator.get(Uuid::from_u128(n)).await, Some(user(n)));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let cache = validator.cache().unwrap();
        assert!(cache.len() <= 16);
        assert!(cache.stats().evictions > 0);
    }
}

// =============================================================================
// Listing Properties
// =============================================================================

mod listing_proptest {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        /// Uncached listing returns every stored user exactly once, in
        /// identifier order, using one page request per started page.
        #[test]
        fn prop_listing_returns_every_user(count in 0usize..=350) {
            let (all, calls) = tokio_test::block_on(async {
                let storage = RecordingStorage::new();
                for n in 0..count {
                    storage.inner.add_user(&user(n as u128)).await.unwrap();
                }
                let validator = uncached(storage.clone());
                (validator.get_all().await, storage.calls().len())
            });

            let all = all.unwrap();
            prop_assert_eq!(all.len(), count);
            let ids: Vec<u128> = all.iter().map(|u| u.vless_id().unwrap().as_u128()).collect();
            prop_assert_eq!(ids, (0..count as u128).collect::<Vec<_>>());
            prop_assert_eq!(calls, count / PAGE_SIZE + 1);
        }
    }
}
