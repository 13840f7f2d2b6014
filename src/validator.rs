//! User Validator
//!
//! Resolves connection credentials to user records, keeping the optional
//! [`UserCache`] consistent with the authoritative [`UserStorage`].
//!
//! # Consistency Rules
//!
//! - Writes go to storage first; the cache is only touched after storage
//!   confirms success (write-through)
//! - Reads consult the cache first and backfill it from storage on a miss
//!   (read-through)
//! - Every storage error on the read path resolves to "not found", so an
//!   unreachable store denies the caller instead of admitting it
//! - With caching enabled, `get_all`/`get_count` report only what the cache
//!   currently holds; they never touch storage

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::connect_storage;
use crate::cache::UserCache;
use crate::config::{CacheSettings, Config};
use crate::domain::{UserRecord, UserStorage};
use crate::error::{Error, ErrorKind, Result};
use crate::metrics::{LookupSource, ValidatorMetrics};

/// Page size used when listing users straight from storage
pub const PAGE_SIZE: usize = 100;

/// Read-through / write-through front for the user store
pub struct Validator {
    storage: Arc<dyn UserStorage>,
    cache: Option<UserCache>,
    metrics: ValidatorMetrics,
}

impl Validator {
    /// Create a validator. Caching is enabled iff `cache_settings` is given.
    pub fn new(
        storage: Arc<dyn UserStorage>,
        cache_settings: Option<&CacheSettings>,
    ) -> Result<Self> {
        let cache = match cache_settings {
            Some(settings) => {
                settings.validate()?;
                Some(UserCache::from_settings(settings))
            }
            None => None,
        };

        info!(
            storage = storage.name(),
            cache_enabled = cache.is_some(),
            "User validator initialised"
        );

        Ok(Self {
            storage,
            cache,
            metrics: ValidatorMetrics::new()?,
        })
    }

    /// Connect the configured storage and build a validator over it
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let storage = connect_storage(&config.storage).await?;
        Self::new(storage, config.cache.as_ref())
    }

    pub fn is_cache_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// The lookup cache, if caching is enabled
    pub fn cache(&self) -> Option<&UserCache> {
        self.cache.as_ref()
    }

    pub fn metrics(&self) -> &ValidatorMetrics {
        &self.metrics
    }

    /// Persist a new user and mirror it into the cache.
    pub async fn add(&self, user: UserRecord) -> Result<()> {
        let Some(id) = user.id_key() else {
            self.metrics.record_write("add", false);
            return Err(Error::Validation(format!(
                "not a VLESS user: {} account for {}",
                user.account.protocol(),
                user.email
            )));
        };

        if let Err(e) = self.storage.add_user(&user).await {
            self.metrics.record_write("add", false);
            self.metrics.record_storage_error("add", e.kind());
            return Err(e);
        }
        self.metrics.record_write("add", true);

        if let Some(cache) = &self.cache {
            cache.set(&id, user);
        }
        Ok(())
    }

    /// Resolve a user by identifier.
    pub async fn get(&self, id: Uuid) -> Option<UserRecord> {
        let key = id.to_string();

        if let Some(cache) = &self.cache {
            if let Some(user) = cache.get(&key) {
                self.metrics.record_lookup("get", LookupSource::Cache, true);
                return Some(user);
            }
        }

        match self.storage.get_user_by_id(id).await {
            Ok(user) => {
                if let Some(cache) = &self.cache {
                    cache.set(&key, user.clone());
                }
                self.metrics.record_lookup("get", LookupSource::Storage, true);
                Some(user)
            }
            Err(e) => {
                self.swallow_read_error("get", &key, &e);
                self.metrics.record_lookup("get", LookupSource::None, false);
                None
            }
        }
    }

    /// Resolve a user by alias.
    pub async fn get_by_email(&self, email: &str) -> Option<UserRecord> {
        if let Some(cache) = &self.cache {
            if let Some(user) = cache.get_by_email(email) {
                self.metrics
                    .record_lookup("get_by_email", LookupSource::Cache, true);
                return Some(user);
            }
        }

        match self.storage.get_user_by_email(email).await {
            Ok(user) => {
                if let (Some(cache), Some(id)) = (&self.cache, user.id_key()) {
                    cache.set(&id, user.clone());
                }
                self.metrics
                    .record_lookup("get_by_email", LookupSource::Storage, true);
                Some(user)
            }
            Err(e) => {
                self.swallow_read_error("get_by_email", email, &e);
                self.metrics
                    .record_lookup("get_by_email", LookupSource::None, false);
                None
            }
        }
    }

    /// List users.
    ///
    /// With caching enabled this is the cache snapshot only and can omit
    /// stored users that were never looked up. Without a cache, storage is
    /// paged through; any page failure yields `None`.
    pub async fn get_all(&self) -> Option<Vec<UserRecord>> {
        if let Some(cache) = &self.cache {
            return Some(cache.get_all());
        }

        let mut all = Vec::new();
        let mut offset = 0;

        loop {
            let page = match self.storage.get_users(offset, PAGE_SIZE).await {
                Ok(page) => page,
                Err(e) => {
                    self.metrics.record_storage_error("get_all", e.kind());
                    warn!(offset, error = %e, "Listing users from storage failed");
                    return None;
                }
            };

            if page.is_empty() {
                break;
            }

            let short = page.len() < PAGE_SIZE;
            all.extend(page);
            if short {
                break;
            }

            offset += PAGE_SIZE;
        }

        debug!(count = all.len(), "Listed users from storage");
        Some(all)
    }

    /// Delete a user by alias, then invalidate its cache entry.
    pub async fn del(&self, email: &str) -> Result<()> {
        if let Err(e) = self.storage.del_user(email).await {
            self.metrics.record_write("del", false);
            self.metrics.record_storage_error("del", e.kind());
            return Err(e);
        }
        self.metrics.record_write("del", true);

        if let Some(cache) = &self.cache {
            cache.delete_by_email(email);
        }
        Ok(())
    }

    /// Number of users: the cache's live count when caching is enabled,
    /// otherwise the storage count with failures reported as zero.
    pub async fn get_count(&self) -> u64 {
        if let Some(cache) = &self.cache {
            return cache.get_count();
        }

        match self.storage.get_count().await {
            Ok(count) => count,
            Err(e) => {
                self.metrics.record_storage_error("get_count", e.kind());
                debug!(error = %e, "Counting users failed, reporting zero");
                0
            }
        }
    }

    /// Clear the cache and close storage.
    pub async fn close(&self) -> Result<()> {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
        self.storage.close().await
    }

    fn swallow_read_error(&self, op: &str, key: &str, err: &Error) {
        let kind = err.kind();
        if kind != ErrorKind::NotFound {
            self.metrics.record_storage_error(op, kind);
        }

        if err.is_connection_error() {
            warn!(op, key, error = %err, "Storage unreachable, treating user as not found");
        } else {
            debug!(op, key, error = %err, "User lookup missed storage");
        }
    }
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("storage", &self.storage.name())
            .field("cache", &self.cache)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
