use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::connection::Connection;
use crate::message::Message;

/// Counter incremented when a slow subscriber is severed.
pub const CONNECTIONS_TERMINATED: &str = "cinnabar_connections_terminated";

pub const DEFAULT_SHARD_COUNT: usize = 16;

// topic -> connection id -> connection
type TopicMap = HashMap<String, HashMap<String, Arc<Connection>>>;

enum Event {
    Register(Arc<Connection>),
    Unregister(Arc<Connection>),
    Broadcast(Arc<Message>),
}

struct Shard {
    // Dispatcher-owned map; outside readers take the read lock.
    subscriptions: Arc<RwLock<TopicMap>>,
    events: mpsc::UnboundedSender<Event>,
}

/// Sharded topic fan-out.
///
/// A topic lives on the shard selected by `crc32(topic) % N`. Each shard
/// runs one dispatcher task that is the sole writer of its map; a single
/// FIFO event channel keeps register/unregister ordered per connection.
/// Broadcast delivery is a non-blocking enqueue per subscriber, and a
/// full outbound queue severs that subscriber instead of stalling the
/// dispatcher.
pub struct Hub {
    shards: Vec<Shard>,
}

impl Hub {
    /// Spawn one dispatcher per shard. Dispatchers stop when `shutdown`
    /// is cancelled.
    pub fn new(shard_count: usize, shutdown: CancellationToken) -> Self {
        let shard_count = shard_count.max(1);
        let shards = (0..shard_count)
            .map(|index| {
                let subscriptions = Arc::new(RwLock::new(TopicMap::new()));
                let (events, rx) = mpsc::unbounded_channel();
                tokio::spawn(dispatch(
                    rx,
                    Arc::clone(&subscriptions),
                    index,
                    shard_count,
                    shutdown.clone(),
                ));
                Shard {
                    subscriptions,
                    events,
                }
            })
            .collect();
        Self { shards }
    }

    /// Register the connection with every shard owning one of its topics.
    pub fn register(&self, conn: &Arc<Connection>) {
        for index in self.shard_indexes(conn.topics()) {
            let _ = self.shards[index].events.send(Event::Register(Arc::clone(conn)));
        }
    }

    /// Remove the connection from its shards and close its queue once.
    pub fn unregister(&self, conn: &Arc<Connection>) {
        for index in self.shard_indexes(conn.topics()) {
            let _ = self.shards[index]
                .events
                .send(Event::Unregister(Arc::clone(conn)));
        }
    }

    /// Hand the message to every shard owning one of its topics. Returns
    /// as soon as the shard channels have accepted it.
    pub fn broadcast(&self, msg: Message) {
        let msg = Arc::new(msg);
        for index in self.shard_indexes(&msg.topics) {
            let _ = self.shards[index].events.send(Event::Broadcast(Arc::clone(&msg)));
        }
    }

    /// Every registered connection, deduplicated across shards.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        let mut seen: HashMap<String, Arc<Connection>> = HashMap::new();
        for shard in &self.shards {
            let guard = shard.subscriptions.read().expect("shard lock");
            for conns in guard.values() {
                for conn in conns.values() {
                    seen.entry(conn.id().to_string())
                        .or_insert_with(|| Arc::clone(conn));
                }
            }
        }
        seen.into_values().collect()
    }

    fn shard_indexes(&self, topics: &[String]) -> Vec<usize> {
        let mut picked = vec![false; self.shards.len()];
        let mut indexes = Vec::new();
        for topic in topics {
            let index = shard_of(topic, self.shards.len());
            if !picked[index] {
                picked[index] = true;
                indexes.push(index);
            }
        }
        indexes
    }
}

fn shard_of(topic: &str, shard_count: usize) -> usize {
    crc32fast::hash(topic.as_bytes()) as usize % shard_count
}

fn owned_topics<'a>(
    topics: &'a [String],
    index: usize,
    shard_count: usize,
) -> impl Iterator<Item = &'a String> {
    topics
        .iter()
        .filter(move |topic| shard_of(topic, shard_count) == index)
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<Event>,
    subscriptions: Arc<RwLock<TopicMap>>,
    index: usize,
    shard_count: usize,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => return,
            event = rx.recv() => match event {
                Some(event) => event,
                None => return,
            },
        };
        match event {
            Event::Register(conn) => {
                let mut guard = subscriptions.write().expect("shard lock");
                for topic in owned_topics(conn.topics(), index, shard_count) {
                    guard
                        .entry(topic.clone())
                        .or_default()
                        .insert(conn.id().to_string(), Arc::clone(&conn));
                }
            }
            Event::Unregister(conn) => {
                {
                    let mut guard = subscriptions.write().expect("shard lock");
                    for topic in owned_topics(conn.topics(), index, shard_count) {
                        let now_empty = match guard.get_mut(topic.as_str()) {
                            Some(conns) => {
                                conns.remove(conn.id());
                                conns.is_empty()
                            }
                            None => false,
                        };
                        if now_empty {
                            guard.remove(topic.as_str());
                        }
                    }
                }
                conn.close();
            }
            Event::Broadcast(msg) => {
                let guard = subscriptions.read().expect("shard lock");
                for topic in owned_topics(&msg.topics, index, shard_count) {
                    let Some(conns) = guard.get(topic.as_str()) else {
                        continue;
                    };
                    for conn in conns.values() {
                        match conn.try_send(Arc::clone(&msg)) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                // Slow subscriber: sever it rather than
                                // block the shard.
                                if conn.close() {
                                    metrics::counter!(CONNECTIONS_TERMINATED).increment(1);
                                    tracing::debug!(
                                        connection = conn.id(),
                                        topic = topic.as_str(),
                                        "terminated slow subscriber"
                                    );
                                }
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => {}
                        }
                    }
                }
            }
        }
    }
}
