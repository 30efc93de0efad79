use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// Expiring set of topics that have had a live subscriber recently.
///
/// Only topics present here accrue history, which keeps the cache from
/// filling with traffic nobody can replay. Entries are refreshed on
/// subscribe and on every heartbeat, and removed lazily on lookup.
#[derive(Debug, Default)]
pub struct RecentTopics {
    entries: DashMap<String, Instant>,
}

impl RecentTopics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh `topic` for another `ttl`.
    pub fn add(&self, topic: &str, ttl: Duration) {
        self.entries.insert(topic.to_string(), Instant::now() + ttl);
    }

    /// Whether an unexpired entry exists for `topic`.
    pub fn has(&self, topic: &str) -> bool {
        // Copy the expiry out so the shard guard is released before any
        // removal below.
        match self.entries.get(topic).map(|expiry| *expiry) {
            Some(expiry) if expiry > Instant::now() => true,
            Some(_) => {
                self.entries.remove(topic);
                false
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
