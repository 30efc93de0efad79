use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use bytes::Bytes;

pub const MIN_CACHE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug)]
struct Entry {
    cursor: u64,
    payload: Bytes,
}

#[derive(Debug, Default)]
struct Inner {
    // Per-topic FIFO; cursors are non-decreasing within a topic.
    topics: HashMap<String, VecDeque<Entry>>,
    // Global insertion order, used for byte-bounded eviction. The oldest
    // global entry for a topic is always that topic's front.
    order: VecDeque<String>,
    bytes: usize,
}

/// Byte-bounded, per-topic FIFO message history.
///
/// Entries are appended at publish time and replayed with
/// [`iter_after`](Self::iter_after) to satisfy `Last-Event-ID`. The total
/// payload size is capped; eviction drops the globally oldest insertion
/// regardless of topic.
#[derive(Debug)]
pub struct HistoryCache {
    inner: Mutex<Inner>,
    max_bytes: usize,
}

impl HistoryCache {
    /// A cache holding at most `max_bytes` of payload, clamped to the
    /// 16 MiB floor.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_bytes: max_bytes.max(MIN_CACHE_BYTES),
        }
    }

    #[cfg(test)]
    fn with_unchecked_capacity(max_bytes: usize) -> Self {
        // Tiny caches make eviction observable in tests.
        Self {
            inner: Mutex::new(Inner::default()),
            max_bytes,
        }
    }

    /// Append an entry for `topic`. Callers supply cursors in
    /// non-decreasing order per topic.
    pub fn add(&self, topic: &str, cursor: u64, payload: Bytes) {
        let mut guard = self.inner.lock().expect("history lock");
        let inner = &mut *guard;
        inner.bytes += payload.len();
        inner
            .topics
            .entry(topic.to_string())
            .or_default()
            .push_back(Entry { cursor, payload });
        inner.order.push_back(topic.to_string());
        while inner.bytes > self.max_bytes {
            let Some(oldest_topic) = inner.order.pop_front() else {
                break;
            };
            let mut freed = 0;
            let mut emptied = false;
            if let Some(entries) = inner.topics.get_mut(&oldest_topic) {
                if let Some(entry) = entries.pop_front() {
                    freed = entry.payload.len();
                }
                emptied = entries.is_empty();
            }
            inner.bytes -= freed;
            if emptied {
                inner.topics.remove(&oldest_topic);
            }
        }
    }

    /// Entries for `topic` with cursors strictly greater than `cursor`,
    /// as a snapshot of the cache at call time.
    pub fn iter_after(&self, topic: &str, cursor: u64) -> Vec<Bytes> {
        let inner = self.inner.lock().expect("history lock");
        inner
            .topics
            .get(topic)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| entry.cursor > cursor)
                    .map(|entry| entry.payload.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Cursor of the oldest entry across all topics, if any.
    pub fn first(&self) -> Option<u64> {
        let inner = self.inner.lock().expect("history lock");
        let topic = inner.order.front()?;
        inner
            .topics
            .get(topic)
            .and_then(|entries| entries.front())
            .map(|entry| entry.cursor)
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("history lock").order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total payload bytes currently held.
    pub fn size_bytes(&self) -> usize {
        self.inner.lock().expect("history lock").bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn payload(text: &str) -> Bytes {
        Bytes::copy_from_slice(text.as_bytes())
    }

    #[test]
    fn iter_after_is_strictly_greater() {
        let cache = HistoryCache::new(MIN_CACHE_BYTES);
        cache.add("t", 10, payload("a"));
        cache.add("t", 20, payload("b"));
        cache.add("t", 30, payload("c"));

        assert_eq!(cache.iter_after("t", 10), vec![payload("b"), payload("c")]);
        assert_eq!(cache.iter_after("t", 30), Vec::<Bytes>::new());
        assert_eq!(cache.iter_after("t", 0).len(), 3);
        assert!(cache.iter_after("other", 0).is_empty());
    }

    #[test]
    fn entries_are_scoped_to_their_topic() {
        let cache = HistoryCache::new(MIN_CACHE_BYTES);
        cache.add("a", 1, payload("a1"));
        cache.add("b", 2, payload("b1"));

        assert_eq!(cache.iter_after("a", 0), vec![payload("a1")]);
        assert_eq!(cache.iter_after("b", 0), vec![payload("b1")]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.size_bytes(), 4);
        assert_eq!(cache.first(), Some(1));
    }

    #[test]
    fn eviction_is_fifo_across_topics() {
        // Room for roughly three 4-byte payloads.
        let cache = HistoryCache::with_unchecked_capacity(12);
        cache.add("a", 1, payload("aaaa"));
        cache.add("b", 2, payload("bbbb"));
        cache.add("a", 3, payload("cccc"));
        assert_eq!(cache.len(), 3);

        // Overflow evicts the globally oldest insertion: ("a", 1).
        cache.add("c", 4, payload("dddd"));
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.size_bytes(), 12);
        assert_eq!(cache.iter_after("a", 0), vec![payload("cccc")]);
        assert_eq!(cache.first(), Some(2));
    }

    #[test]
    fn oversized_entry_evicts_everything_else() {
        let cache = HistoryCache::with_unchecked_capacity(8);
        cache.add("a", 1, payload("aaaa"));
        cache.add("a", 2, payload("bbbbbbbb"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.iter_after("a", 0), vec![payload("bbbbbbbb")]);
    }

    #[test]
    fn capacity_is_clamped_to_the_floor() {
        let cache = HistoryCache::new(1);
        assert_eq!(cache.max_bytes, MIN_CACHE_BYTES);
    }

    #[test]
    fn concurrent_adds_and_reads_do_not_corrupt() {
        let cache = Arc::new(HistoryCache::new(MIN_CACHE_BYTES));
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..250u64 {
                        cache.add(&format!("topic-{w}"), i, payload("xxxx"));
                        let _ = cache.iter_after(&format!("topic-{w}"), i / 2);
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().expect("writer");
        }
        assert_eq!(cache.len(), 1000);
        assert_eq!(cache.size_bytes(), 4000);
        for w in 0..4 {
            let entries = cache.iter_after(&format!("topic-{w}"), 0);
            assert_eq!(entries.len(), 250);
        }
    }
}
