//! In-process pub/sub fan-out for the cinnabar hub.
//!
//! The hub is sharded by topic CRC32. Each shard runs one dispatcher task
//! that owns its topic map and delivers broadcasts with non-blocking
//! enqueues, so a slow subscriber can never stall the fan-out path.

pub mod connection;
pub mod hub;
pub mod ids;
pub mod message;
pub mod subscription;

pub use connection::{Connection, OUTBOUND_CAPACITY};
pub use hub::{Hub, CONNECTIONS_TERMINATED, DEFAULT_SHARD_COUNT};
pub use message::{Message, SUBSCRIPTION_TOPIC};
pub use subscription::{Subscription, SubscriptionList};
