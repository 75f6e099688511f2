//! Bounded memory of recently resolved queries.
//!
//! Entries leave in insertion order once capacity is exceeded. Updating an
//! existing key replaces the card but keeps the key's place in line.

use crate::catalog::CardRecord;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Default number of remembered selections
pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug)]
pub struct RecentSelectionCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, Arc<CardRecord>>,
}

impl Default for RecentSelectionCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RecentSelectionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// Look up a normalized query
    pub fn get(&self, key: &str) -> Option<Arc<CardRecord>> {
        self.entries.get(key).cloned()
    }

    /// Remember `card` for a normalized query, evicting the oldest entry
    /// when full.
    pub fn insert(&mut self, key: String, card: Arc<CardRecord>) {
        if self.capacity == 0 || key.is_empty() {
            return;
        }
        if let Some(slot) = self.entries.get_mut(&key) {
            *slot = card;
            return;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                debug!("Evicting recent selection '{}'", oldest);
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, card);
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
