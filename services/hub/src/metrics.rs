//! Metric names and increment points.
//!
//! All call sites go through the `metrics` facade, so a process without
//! an installed recorder gets no-ops for free; nothing here may assume an
//! exporter exists.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cinnabar_storage::HistoryCache;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use tokio_util::sync::CancellationToken;

pub use cinnabar_broker::CONNECTIONS_TERMINATED;

pub const MESSAGES_PUBLISHED: &str = "cinnabar_messages_published";
pub const MESSAGES_SENT: &str = "cinnabar_messages_sent";
pub const CONNECTIONS_TOTAL: &str = "cinnabar_connections_total";
pub const CONNECTIONS_ACTIVE: &str = "cinnabar_connections_active";
pub const SUBSCRIPTIONS_TOTAL: &str = "cinnabar_subscriptions_total";
pub const SUBSCRIPTIONS_ACTIVE: &str = "cinnabar_subscriptions_active";
pub const MESSAGE_CACHE_AGE: &str = "cinnabar_message_cache_age";
pub const MESSAGE_CACHE_COUNT: &str = "cinnabar_message_cache_count";
pub const MESSAGE_CACHE_SIZE: &str = "cinnabar_message_cache_size";

pub fn describe() {
    describe_counter!(MESSAGES_PUBLISHED, "Total messages published");
    describe_counter!(MESSAGES_SENT, "Total messages written to subscribers");
    describe_counter!(CONNECTIONS_TOTAL, "Total connections created");
    describe_counter!(CONNECTIONS_TERMINATED, "Connections severed as slow consumers");
    describe_counter!(SUBSCRIPTIONS_TOTAL, "Total subscriptions created");
    describe_gauge!(CONNECTIONS_ACTIVE, "Connections currently open");
    describe_gauge!(SUBSCRIPTIONS_ACTIVE, "Subscriptions currently active");
    describe_gauge!(MESSAGE_CACHE_AGE, "Age in seconds of the oldest cached message");
    describe_gauge!(MESSAGE_CACHE_COUNT, "Messages presently stored in the cache");
    describe_gauge!(MESSAGE_CACHE_SIZE, "Bytes presently stored in the cache");

    // Zero-register so every series is present in the exposition from
    // the first scrape.
    counter!(MESSAGES_PUBLISHED).increment(0);
    counter!(MESSAGES_SENT).increment(0);
    counter!(CONNECTIONS_TOTAL).increment(0);
    counter!(CONNECTIONS_TERMINATED).increment(0);
    counter!(SUBSCRIPTIONS_TOTAL).increment(0);
    gauge!(CONNECTIONS_ACTIVE).set(0.0);
    gauge!(SUBSCRIPTIONS_ACTIVE).set(0.0);
}

pub fn connect() {
    counter!(CONNECTIONS_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

pub fn disconnect() {
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

pub fn subscribe(count: usize) {
    counter!(SUBSCRIPTIONS_TOTAL).increment(count as u64);
    gauge!(SUBSCRIPTIONS_ACTIVE).increment(count as f64);
}

pub fn unsubscribe(count: usize) {
    gauge!(SUBSCRIPTIONS_ACTIVE).decrement(count as f64);
}

pub fn publish() {
    counter!(MESSAGES_PUBLISHED).increment(1);
}

pub fn send() {
    counter!(MESSAGES_SENT).increment(1);
}

/// Sample the history-cache gauges once a second until shutdown.
pub fn spawn_cache_sampler(cache: Arc<HistoryCache>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let age_secs = cache
                .first()
                .map(|cursor| now_ticks().saturating_sub(cursor) / 10_000_000)
                .unwrap_or(0);
            gauge!(MESSAGE_CACHE_AGE).set(age_secs as f64);
            gauge!(MESSAGE_CACHE_COUNT).set(cache.len() as f64);
            gauge!(MESSAGE_CACHE_SIZE).set(cache.size_bytes() as f64);
        }
    });
}

// Wall clock in the cursor unit (100 ns ticks since the Unix epoch).
fn now_ticks() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_secs() * 10_000_000 + u64::from(now.subsec_nanos()) / 100
}
