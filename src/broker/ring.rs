//! Peer Ring
//!
//! Circular doubly linked list of registered stores, kept as an indexed
//! collection (name -> record with prev/next name indices) instead of a
//! pointer cycle.
//!
//! ## Mechanism
//! - **Successor**: each store backs up the store after it in the ring and
//!   takes over that store's data when it dies.
//! - **Surgery**: registration splices at the tail, eviction unlinks and, if
//!   the head was removed, advances the head to its old successor.

use std::collections::HashMap;

use crate::common::{Error, Result};

/// One store's position in the ring.
#[derive(Debug, Clone)]
pub struct RingNode {
    pub name: String,
    pub address: String,
    prev: String,
    next: String,
}

/// The circular peer topology.
///
/// `head` is `None` iff the ring is empty; a single-node ring links the node
/// to itself.
#[derive(Debug, Default)]
pub struct PeerRing {
    nodes: HashMap<String, RingNode>,
    head: Option<String>,
}

impl PeerRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Appends a store at the tail (the position just before the head).
    pub fn add_tail(&mut self, name: &str, address: &str) {
        match self.head.clone() {
            None => {
                self.nodes.insert(
                    name.to_string(),
                    RingNode {
                        name: name.to_string(),
                        address: address.to_string(),
                        prev: name.to_string(),
                        next: name.to_string(),
                    },
                );
                self.head = Some(name.to_string());
            }
            Some(head) => {
                let tail = self.nodes[&head].prev.clone();
                if let Some(tail_node) = self.nodes.get_mut(&tail) {
                    tail_node.next = name.to_string();
                }
                if let Some(head_node) = self.nodes.get_mut(&head) {
                    head_node.prev = name.to_string();
                }
                self.nodes.insert(
                    name.to_string(),
                    RingNode {
                        name: name.to_string(),
                        address: address.to_string(),
                        prev: tail,
                        next: head,
                    },
                );
            }
        }
    }

    /// Unlinks a store by name. Removing the head advances the head to its
    /// successor; removing the last node clears the ring.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let node = self
            .nodes
            .remove(name)
            .ok_or_else(|| Error::StoreNotFound(name.to_string()))?;

        if self.nodes.is_empty() {
            self.head = None;
            return Ok(());
        }

        if let Some(prev_node) = self.nodes.get_mut(&node.prev) {
            prev_node.next = node.next.clone();
        }
        if let Some(next_node) = self.nodes.get_mut(&node.next) {
            next_node.prev = node.prev.clone();
        }
        if self.head.as_deref() == Some(name) {
            self.head = Some(node.next);
        }
        Ok(())
    }

    pub fn successor_of(&self, name: &str) -> Option<&RingNode> {
        let node = self.nodes.get(name)?;
        self.nodes.get(&node.next)
    }

    pub fn predecessor_of(&self, name: &str) -> Option<&RingNode> {
        let node = self.nodes.get(name)?;
        self.nodes.get(&node.prev)
    }

    /// Yields every node once, in ring order starting at the head.
    pub fn traverse(&self) -> Vec<&RingNode> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let Some(head) = self.head.as_ref() else {
            return out;
        };
        let mut current = head;
        loop {
            let node = &self.nodes[current];
            out.push(node);
            current = &node.next;
            if current == head {
                break;
            }
        }
        out
    }

    /// The `(address, successor address)` pairs that peer notification sends
    /// to, in ring order.
    pub fn successor_pairs(&self) -> Vec<(String, String)> {
        self.traverse()
            .into_iter()
            .map(|node| (node.address.clone(), self.nodes[&node.next].address.clone()))
            .collect()
    }
}
