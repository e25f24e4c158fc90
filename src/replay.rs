//! Replay cache
//!
//! The cache is an external, thread-safe collaborator; the library only ever
//! performs a check-and-insert. An in-memory implementation is provided for
//! embeddings without a distributed store.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Store of recently seen values with expiration.
pub trait ReplayCache: Send + Sync {
    /// Check-and-insert: returns true when the value was fresh (and is now
    /// recorded until `expires`), false when it was already present.
    fn check(&self, context: &str, value: &str, expires: DateTime<Utc>) -> bool;
}

/// Process-local replay cache.
#[derive(Default)]
pub struct InMemoryReplayCache {
    entries: Mutex<HashMap<(String, String), DateTime<Utc>>>,
}

impl InMemoryReplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries; returns how many were evicted.
    pub fn purge(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, expires| *expires > now);
        before - entries.len()
    }
}

impl ReplayCache for InMemoryReplayCache {
    fn check(&self, context: &str, value: &str, expires: DateTime<Utc>) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let key = (context.to_string(), value.to_string());
        let now = Utc::now();
        match entries.get(&key) {
            Some(expiry) if *expiry > now => false,
            _ => {
                entries.insert(key, expires);
                true
            }
        }
    }
}
