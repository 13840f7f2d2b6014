//! User Lookup Cache
//!
//! Dual-indexed (identifier and alias), capacity-bounded, time-expiring cache
//! of user records.
//!
//! # Design
//!
//! - One coarse `RwLock` guards both maps and the recency index. Lookups take
//!   the write lock because they promote entries and purge expired ones;
//!   snapshots (`get_all`, `get_count`) take the read lock
//! - Both maps hold the same `Arc`'d entry, so the two access paths always
//!   agree on the record, its expiry and its recency node
//! - Expiry is lazy: an expired entry stays resident until it is looked up,
//!   evicted or the cache is cleared, and still counts toward `max_size`
//! - Callers only ever receive clones of the wrapped [`UserRecord`]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, trace};

use super::lru::{LruIndex, NodeId};
use crate::config::CacheSettings;
use crate::domain::UserRecord;

/// Upper bound applied to the configured TTL so expiry instants never overflow.
const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

#[derive(Debug)]
struct CachedUser {
    user: UserRecord,
    expires_at: Instant,
    node: NodeId,
}

impl CachedUser {
    #[inline]
    fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Default)]
struct CacheState {
    by_id: HashMap<String, Arc<CachedUser>>,
    by_email: HashMap<String, Arc<CachedUser>>,
    lru: LruIndex,
}

impl CacheState {
    /// Identifier key under which `entry` is stored.
    ///
    /// Resolved from the record's own VLESS identity; only records without one
    /// fall back to scanning the identifier map.
    fn companion_id(&self, entry: &Arc<CachedUser>) -> Option<String> {
        if let Some(key) = entry.user.id_key() {
            if self
                .by_id
                .get(&key)
                .is_some_and(|e| Arc::ptr_eq(e, entry))
            {
                return Some(key);
            }
        }

        self.by_id
            .iter()
            .find(|(_, e)| Arc::ptr_eq(e, entry))
            .map(|(key, _)| key.clone())
    }

    /// Drop `entry` from both maps and the recency index.
    fn remove_entry(&mut self, id: Option<&str>, entry: &Arc<CachedUser>) {
        if let Some(id) = id {
            if self.by_id.get(id).is_some_and(|e| Arc::ptr_eq(e, entry)) {
                self.by_id.remove(id);
            }
        }

        let email = entry.user.email.as_str();
        if self
            .by_email
            .get(email)
            .is_some_and(|e| Arc::ptr_eq(e, entry))
        {
            self.by_email.remove(email);
        }

        self.lru.remove(entry.node);
    }

    /// Evict the least recently touched entry. Returns false on an empty index.
    fn evict_lru(&mut self) -> bool {
        let Some(key) = self.lru.tail_key().map(str::to_owned) else {
            return false;
        };

        match self.by_id.get(&key).cloned() {
            Some(entry) => self.remove_entry(Some(&key), &entry),
            None => {
                self.lru.remove_tail();
            }
        }
        true
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    /// Resident entries, expired ones included
    pub resident: usize,
    /// Configured entry lifetime
    pub ttl: Duration,
    /// Configured bound (0 = unbounded)
    pub max_size: usize,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups not answered from the cache
    pub misses: u64,
    /// Entries removed to make room
    pub evictions: u64,
    /// Entries purged on access after expiring
    pub expirations: u64,
}

impl CacheStats {
    /// Hit ratio (0.0 - 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Thread-safe user cache keyed by identifier and by alias.
pub struct UserCache {
    state: RwLock<CacheState>,
    ttl: Duration,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl UserCache {
    /// Create a cache with the given entry lifetime and bound (0 = unbounded).
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            ttl: ttl.min(MAX_TTL),
            max_size,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Create a cache from configuration
    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.ttl(), settings.max_size)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Look up a user by identifier.
    pub fn get(&self, id: &str) -> Option<UserRecord> {
        let mut state = self.state.write();

        let Some(entry) = state.by_id.get(id).cloned() else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if entry.is_expired_at(Instant::now()) {
            state.remove_entry(Some(id), &entry);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(id = %id, "Cache entry expired");
            return None;
        }

        state.lru.move_to_front(entry.node);
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.user.clone())
    }

    /// Look up a user by alias.
    ///
    /// Recency is tracked on the node registered under the entry's identifier,
    /// so both lookup paths promote the same node.
    pub fn get_by_email(&self, email: &str) -> Option<UserRecord> {
        let mut state = self.state.write();

        let Some(entry) = state.by_email.get(email).cloned() else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if entry.is_expired_at(Instant::now()) {
            let id = state.companion_id(&entry);
            state.remove_entry(id.as_deref(), &entry);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(email = %email, "Cache entry expired");
            return None;
        }

        state.lru.move_to_front(entry.node);
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.user.clone())
    }

    /// Insert or refresh a user under `id` and its alias.
    ///
    /// When the cache is full the least recently touched entry is evicted
    /// first, even if `id` is already resident.
    pub fn set(&self, id: &str, user: UserRecord) {
        let mut state = self.state.write();

        if self.max_size > 0 && state.by_id.len() >= self.max_size && state.evict_lru() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(max_size = self.max_size, "Evicted least recently used cache entry");
        }

        // Previous entry under this id may have been stored under another alias
        if let Some(prev) = state.by_id.get(id).cloned() {
            if prev.user.email != user.email
                && state
                    .by_email
                    .get(&prev.user.email)
                    .is_some_and(|e| Arc::ptr_eq(e, &prev))
            {
                state.by_email.remove(&prev.user.email);
            }
        }

        // The alias may still belong to an entry under a different id
        if let Some(holder) = state.by_email.get(&user.email).cloned() {
            let holder_id = state.companion_id(&holder);
            if holder_id.as_deref() != Some(id) {
                state.remove_entry(holder_id.as_deref(), &holder);
            }
        }

        let node = state.lru.add(id.to_string());
        let entry = Arc::new(CachedUser {
            user,
            expires_at: Instant::now() + self.ttl,
            node,
        });

        state
            .by_email
            .insert(entry.user.email.clone(), Arc::clone(&entry));
        state.by_id.insert(id.to_string(), entry);
    }

    /// Remove the entry stored under `id`, if any.
    pub fn delete(&self, id: &str) {
        let mut state = self.state.write();
        if let Some(entry) = state.by_id.get(id).cloned() {
            state.remove_entry(Some(id), &entry);
        }
    }

    /// Remove the entry reachable through `email`, if any.
    pub fn delete_by_email(&self, email: &str) {
        let mut state = self.state.write();
        if let Some(entry) = state.by_email.get(email).cloned() {
            let id = state.companion_id(&entry);
            state.remove_entry(id.as_deref(), &entry);
        }
    }

    /// All non-expired users. Does not purge or promote anything.
    pub fn get_all(&self) -> Vec<UserRecord> {
        let state = self.state.read();
        let now = Instant::now();
        state
            .by_id
            .values()
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.user.clone())
            .collect()
    }

    /// Number of non-expired users.
    pub fn get_count(&self) -> u64 {
        let state = self.state.read();
        let now = Instant::now();
        state
            .by_id
            .values()
            .filter(|entry| !entry.is_expired_at(now))
            .count() as u64
    }

    /// Resident entries, expired ones included.
    pub fn len(&self) -> usize {
        self.state.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut state = self.state.write();
        *state = CacheState::default();
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            resident: self.len(),
            ttl: self.ttl,
            max_size: self.max_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    /// Identifiers from most to least recently touched.
    #[cfg(test)]
    pub(crate) fn recency_order(&self) -> Vec<String> {
        self.state.read().lru.keys()
    }

    /// Panic if the two maps and the recency index disagree.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let state = self.state.read();

        assert_eq!(state.by_id.len(), state.by_email.len());
        assert_eq!(state.by_id.len(), state.lru.len());

        for (id, entry) in &state.by_id {
            let by_email = state
                .by_email
                .get(&entry.user.email)
                .expect("entry missing from alias map");
            assert!(Arc::ptr_eq(entry, by_email));
            assert_eq!(state.lru.get_node(id), Some(entry.node));
        }
    }
}

impl std::fmt::Debug for UserCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCache")
            .field("ttl", &self.ttl)
            .field("max_size", &self.max_size)
            .field("resident", &self.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
