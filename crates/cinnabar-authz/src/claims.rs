use serde::{Deserialize, Serialize};

/// Mercure claims carried by publisher and subscriber tokens.
///
/// `exp` is optional: a token without it never expires.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub mercure: MercureScopes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MercureScopes {
    #[serde(default)]
    pub publish: Vec<String>,
    #[serde(default)]
    pub subscribe: Vec<String>,
}

/// Requested topics the grant list authorizes. The literal `"*"` grants
/// everything.
pub fn grant_filter(granted: &[String], requested: &[String]) -> Vec<String> {
    if granted.iter().any(|topic| topic == "*") {
        return requested.to_vec();
    }
    requested
        .iter()
        .filter(|topic| granted.contains(topic))
        .cloned()
        .collect()
}
