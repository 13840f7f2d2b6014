//! User Lookup Cache
//!
//! In-memory cache sitting in front of the authoritative user store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         UserCache                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │   by_id: id → entry     by_email: alias → entry               │
//! │            │                        │                         │
//! │            └──────────┬─────────────┘                         │
//! │                       ▼                                       │
//! │          Arc<entry { user, expires_at, node }>                │
//! │                       │                                       │
//! │                       ▼                                       │
//! │   LruIndex (arena-backed recency list, head = most recent)    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Semantics
//!
//! - TTL expiry is lazy, evaluated only on lookup
//! - When `max_size` is reached the least recently touched entry is evicted
//!   before every insert
//! - `max_size == 0` means unbounded

mod lru;
mod proptest;
mod user_cache;

pub use lru::{LruIndex, NodeId};
pub use user_cache::{CacheStats, UserCache};
