//! Property-Based Tests for the User Cache
//!
//! Drives the cache with random operation sequences and compares it against a
//! plain recency-list model.
//!
//! # Test Properties
//!
//! 1. **Capacity Bound**: never more than `max_size` resident entries
//! 2. **LRU Eviction**: the evicted entry is always the least recently touched
//! 3. **Dual-Index Consistency**: both maps and the recency index agree after
//!    every operation

#![cfg(test)]

use std::collections::VecDeque;
use std::time::Duration;

use proptest::prelude::*;
use uuid::Uuid;

use super::UserCache;
use crate::domain::UserRecord;

#[derive(Debug, Clone)]
enum Op {
    Set(u8),
    Get(u8),
    GetByEmail(u8),
    Delete(u8),
    DeleteByEmail(u8),
}

fn op_strategy(keys: u8) -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..keys).prop_map(Op::Set),
        3 => (0..keys).prop_map(Op::Get),
        2 => (0..keys).prop_map(Op::GetByEmail),
        1 => (0..keys).prop_map(Op::Delete),
        1 => (0..keys).prop_map(Op::DeleteByEmail),
    ]
}

fn id_of(n: u8) -> String {
    Uuid::from_u128(n as u128 + 1).to_string()
}

fn email_of(n: u8) -> String {
    format!("user{}@example.com", n)
}

fn user_of(n: u8) -> UserRecord {
    UserRecord::vless(Uuid::from_u128(n as u128 + 1), email_of(n), "")
}

/// Reference model: identifiers from most to least recently touched.
struct Model {
    order: VecDeque<u8>,
    max_size: usize,
}

impl Model {
    fn touch(&mut self, n: u8) -> bool {
        match self.order.iter().position(|&k| k == n) {
            Some(pos) => {
                self.order.remove(pos);
                self.order.push_front(n);
                true
            }
            None => false,
        }
    }

    fn set(&mut self, n: u8) {
        if self.max_size > 0 && self.order.len() >= self.max_size {
            self.order.pop_back();
        }
        self.order.retain(|&k| k != n);
        self.order.push_front(n);
    }

    fn delete(&mut self, n: u8) {
        self.order.retain(|&k| k != n);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: the cache behaves exactly like the recency-list model.
    #[test]
    fn prop_matches_lru_model(
        max_size in 0usize..6,
        ops in prop::collection::vec(op_strategy(10), 1..120),
    ) {
        let cache = UserCache::new(Duration::from_secs(300), max_size);
        let mut model = Model { order: VecDeque::new(), max_size };

        for op in ops {
            match op {
                Op::Set(n) => {
                    cache.set(&id_of(n), user_of(n));
                    model.set(n);
                }
                Op::Get(n) => {
                    let found = cache.get(&id_of(n)).is_some();
                    prop_assert_eq!(found, model.touch(n));
                }
                Op::GetByEmail(n) => {
                    let found = cache.get_by_email(&email_of(n)).is_some();
                    prop_assert_eq!(found, model.touch(n));
                }
                Op::Delete(n) => {
                    cache.delete(&id_of(n));
                    model.delete(n);
                }
                Op::DeleteByEmail(n) => {
                    cache.delete_by_email(&email_of(n));
                    model.delete(n);
                }
            }

            cache.assert_consistent();
            if max_size > 0 {
                prop_assert!(cache.len() <= max_size);
            }

            let expected: Vec<String> = model.order.iter().map(|&n| id_of(n)).collect();
            prop_assert_eq!(cache.recency_order(), expected);
        }

        prop_assert_eq!(cache.get_count(), model.order.len() as u64);
    }

    /// Property: inserting n+1 distinct users into a cache of size n evicts
    /// exactly the first one inserted.
    #[test]
    fn prop_overflow_evicts_oldest(max_size in 1usize..20) {
        let cache = UserCache::new(Duration::from_secs(300), max_size);

        for n in 0..=(max_size as u8) {
            cache.set(&id_of(n), user_of(n));
        }

        prop_assert_eq!(cache.len(), max_size);
        prop_assert!(cache.get(&id_of(0)).is_none());
        prop_assert!(cache.get_by_email(&email_of(0)).is_none());
        for n in 1..=(max_size as u8) {
            prop_assert!(cache.get(&id_of(n)).is_some());
        }
    }
}
