use serde::{Deserialize, Serialize};

/// One (connection, topic) pair as exposed on the wire, both as lifecycle
/// events and in the listing document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub topic: String,
    pub subscriber: String,
    pub active: bool,
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// JSON-LD document returned by the subscription listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionList {
    #[serde(rename = "@context")]
    pub context: String,
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    #[serde(rename = "lastEventID")]
    pub last_event_id: String,
    pub subscriptions: Vec<Subscription>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_serializes_json_ld_field_names() {
        let list = SubscriptionList {
            context: "github.com/pantopic/mercure-lite".to_string(),
            id: "/.well-known/mercure/subscriptions/topic/subscriber".to_string(),
            record_type: "Subscriptions".to_string(),
            last_event_id: "urn:uuid:0".to_string(),
            subscriptions: vec![],
        };
        let value: serde_json::Value = serde_json::to_value(&list).expect("json");
        assert_eq!(value["@context"], "github.com/pantopic/mercure-lite");
        assert_eq!(value["type"], "Subscriptions");
        assert_eq!(value["lastEventID"], "urn:uuid:0");
        assert!(value["subscriptions"].as_array().expect("array").is_empty());
    }
}
