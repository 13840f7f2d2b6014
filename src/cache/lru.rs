//! LRU Recency Index
//!
//! Doubly-linked recency list plus key → node lookup, all O(1).
//!
//! # Design
//!
//! - Nodes live in an arena (`Vec` of slots) and link to each other by
//!   [`NodeId`] handles instead of pointers
//! - Freed slots are recycled; every slot carries a generation so a handle to
//!   a freed slot never resolves to the node that later reuses it
//! - Head is the most recently touched key, tail the least recently touched

use std::collections::HashMap;

/// Stable handle to a node in the [`LruIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Node {
    key: String,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Recency index over string keys.
#[derive(Debug, Default)]
pub struct LruIndex {
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    lookup: HashMap<String, NodeId>,
}

impl LruIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed keys
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Insert `key` at the head and return its node.
    ///
    /// A key that is already indexed keeps its node, which is moved to the head.
    pub fn add(&mut self, key: String) -> NodeId {
        if let Some(&id) = self.lookup.get(&key) {
            self.move_to_front(id);
            return id;
        }

        let id = self.alloc(Node {
            key: key.clone(),
            prev: None,
            next: None,
        });
        self.attach_front(id);
        self.lookup.insert(key, id);
        id
    }

    /// Move an existing node to the head. No-op if it is already the head or
    /// the handle is stale.
    pub fn move_to_front(&mut self, id: NodeId) {
        if self.head == Some(id) || !self.contains(id) {
            return;
        }
        self.detach(id);
        self.attach_front(id);
    }

    /// Remove a node, returning its key. A stale handle is a no-op.
    pub fn remove(&mut self, id: NodeId) -> Option<String> {
        if !self.contains(id) {
            return None;
        }
        self.detach(id);

        let slot = &mut self.slots[id.index as usize];
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);

        self.lookup.remove(&node.key);
        Some(node.key)
    }

    /// Remove the least recently touched node, returning its key.
    pub fn remove_tail(&mut self) -> Option<String> {
        let tail = self.tail?;
        self.remove(tail)
    }

    /// Node currently indexed under `key`
    pub fn get_node(&self, key: &str) -> Option<NodeId> {
        self.lookup.get(key).copied()
    }

    /// Check whether a handle refers to a live node
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Key stored at a node
    pub fn key(&self, id: NodeId) -> Option<&str> {
        self.node(id).map(|n| n.key.as_str())
    }

    /// Most recently touched key
    pub fn head_key(&self) -> Option<&str> {
        self.head.and_then(|id| self.key(id))
    }

    /// Least recently touched key
    pub fn tail_key(&self) -> Option<&str> {
        self.tail.and_then(|id| self.key(id))
    }

    /// Keys from most to least recently touched
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(id) = cursor {
            match self.node(id) {
                Some(node) => {
                    keys.push(node.key.clone());
                    cursor = node.next;
                }
                None => break,
            }
        }
        keys
    }

    /// Drop every node
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    /// Unlink a node from its neighbours, fixing up head and tail.
    fn detach(&mut self, id: NodeId) {
        let (prev, next) = match self.node(id) {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(node) = self.node_mut(p) {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.node_mut(n) {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(node) = self.node_mut(id) {
            node.prev = None;
            node.next = None;
        }
    }

    fn attach_front(&mut self, id: NodeId) {
        let old_head = self.head;
        if let Some(node) = self.node_mut(id) {
            node.prev = None;
            node.next = old_head;
        }

        match old_head {
            Some(h) => {
                if let Some(node) = self.node_mut(h) {
                    node.prev = Some(id);
                }
            }
            None => self.tail = Some(id),
        }
        self.head = Some(id);
    }
}

// =============================================================================
// Tests
// =============================================================================
