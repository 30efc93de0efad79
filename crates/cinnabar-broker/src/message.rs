use serde::{Deserialize, Serialize};

use crate::ids;

/// Reserved topic carrying subscription lifecycle events.
pub const SUBSCRIPTION_TOPIC: &str = "/.well-known/mercure/subscriptions/topic/subscriber";

/// A published message held by reference while it fans out.
///
/// The id is assigned by the hub at publish time; its embedded timestamp
/// doubles as the history cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type", default)]
    pub event_type: String,
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
}

impl Message {
    pub fn new(
        event_type: impl Into<String>,
        topics: Vec<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            id: ids::new_urn(),
            event_type: event_type.into(),
            topics,
            data: data.into(),
        }
    }

    /// History cursor derived from the id. 0 for ids minted elsewhere.
    pub fn timestamp(&self) -> u64 {
        ids::timestamp_of(&self.id)
    }

    /// A message with no id, type, or data produces no SSE frame.
    pub fn is_empty(&self) -> bool {
        self.id.is_empty() && self.event_type.is_empty() && self.data.is_empty()
    }

    /// Serialized form stored in the history cache.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(raw: &[u8]) -> Option<Self> {
        serde_json::from_slice(raw).ok()
    }
}
