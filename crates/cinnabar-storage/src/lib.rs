//! Short-horizon storage for the cinnabar hub: the per-topic message
//! history used for `Last-Event-ID` replay, and the expiring set of
//! topics that currently have live subscribers.

pub mod history;
pub mod recent;

pub use history::HistoryCache;
pub use recent::RecentTopics;
