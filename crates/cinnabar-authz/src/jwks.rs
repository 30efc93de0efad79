use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use jsonwebtoken::DecodingKey;

use crate::keys::{KeyKind, VerifyingKey};
use crate::{AuthzError, Result};

/// Refresh interval when the endpoint sends no usable `max-age`.
pub const DEFAULT_REFRESH_SECS: u64 = 3600;
/// Floor applied to any advertised `max-age`.
pub const MIN_REFRESH_SECS: u64 = 60;

/// Raw JWKS endpoint response, before any parsing.
#[derive(Debug, Clone)]
pub struct JwksResponse {
    pub status: u16,
    pub body: String,
    pub cache_control: Option<String>,
}

/// Fetch seam for JWKS endpoints so tests can substitute a stub for the
/// HTTP client.
#[async_trait]
pub trait JwksSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<JwksResponse>;
}

/// Parse a fetched JWKS response into verifying keys.
///
/// A non-200 status, malformed JSON, or any single unusable key fails the
/// whole document so the caller retains its previous key set.
pub fn keys_from_response(response: &JwksResponse) -> Result<Vec<VerifyingKey>> {
    if response.status != 200 {
        return Err(AuthzError::Jwks(format!(
            "endpoint returned {}",
            response.status
        )));
    }
    parse_keys(&response.body)
}

/// Parse a JWKS document body into verifying keys.
pub fn parse_keys(body: &str) -> Result<Vec<VerifyingKey>> {
    let set: JwkSet =
        serde_json::from_str(body).map_err(|err| AuthzError::Jwks(err.to_string()))?;
    let mut keys = Vec::with_capacity(set.keys.len());
    for jwk in &set.keys {
        let kind = match &jwk.algorithm {
            AlgorithmParameters::RSA(_) => KeyKind::Rsa,
            AlgorithmParameters::EllipticCurve(_) => KeyKind::Ec,
            AlgorithmParameters::OctetKey(_) => KeyKind::Hmac,
            AlgorithmParameters::OctetKeyPair(_) => {
                return Err(AuthzError::UnsupportedAlgorithm("OKP".to_string()));
            }
        };
        let decoding = DecodingKey::from_jwk(jwk)
            .map_err(|err| AuthzError::Jwks(format!("unusable key: {err}")))?;
        keys.push(VerifyingKey { kind, decoding });
    }
    Ok(keys)
}

/// Refresh interval from a `Cache-Control` response header: `max-age`
/// clamped to the floor, or the default when the header is absent or
/// unparseable.
pub fn refresh_interval(cache_control: Option<&str>) -> Duration {
    let Some(value) = cache_control else {
        return Duration::from_secs(DEFAULT_REFRESH_SECS);
    };
    for directive in value.split(',') {
        if let Some(raw) = directive.trim().strip_prefix("max-age=") {
            if let Ok(secs) = raw.trim().parse::<u64>() {
                return Duration::from_secs(secs.max(MIN_REFRESH_SECS));
            }
        }
    }
    Duration::from_secs(DEFAULT_REFRESH_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RSA verification key from the integration fixtures.
    const RS512_JWK: &str = r#"{
      "kty": "RSA",
      "use": "sig",
      "alg": "RS512",
      "kid": "0b33c817-fe9d-4ed0-ba03-bc7286c3acc7",
      "n": "qxkJ3xWZY2pz_WoFi15_QRrDQUdEb1VBHGy9dHg7Hue1Ss3Ghh3y9Pm-m9dXyqMF9ki7qp6EAcR37s25fo0d1Vd1TNjkh0mYuiZgc2rrYAArS9V6kssCBseZbW9Z3fBZHqAGdmM8CWAlARPc_kpTU1I_xZwy38Rb_r8AI1Lsa5dMUxcgMVoADC2GCIihgjUQXsj9ZNNb8wfOzZsWOXD1xIdSnWVXwkw_08xEkIhMjvRzrPxoK8-453VGnn8UNUyDsLBxR9ln6U3xMpEOV0fO7FZ9J78iBv9oaHVYl62qczQpksVxMr1uKRVhqIz-3I7NHDpWdHbVaG6w8AR5xkGMXw",
      "e": "AQAB"
    }"#;

    fn document(keys: &[&str]) -> String {
        format!(r#"{{"keys":[{}]}}"#, keys.join(","))
    }

    #[test]
    fn parses_rsa_keys() {
        let keys = parse_keys(&document(&[RS512_JWK])).expect("keys");
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].kind, KeyKind::Rsa);
    }

    #[test]
    fn malformed_documents_are_rejected() {
        assert!(parse_keys("not json").is_err());
        assert!(parse_keys(r#"{"keys":[4,["a"]]}"#).is_err());
    }

    #[test]
    fn empty_documents_parse_to_no_keys() {
        assert!(parse_keys(r#"{"keys":[]}"#).expect("keys").is_empty());
    }

    #[test]
    fn non_200_responses_fail() {
        let response = JwksResponse {
            status: 404,
            body: document(&[RS512_JWK]),
            cache_control: None,
        };
        assert!(keys_from_response(&response).is_err());
    }

    #[test]
    fn refresh_interval_honors_max_age() {
        assert_eq!(
            refresh_interval(Some("max-age=600")),
            Duration::from_secs(600)
        );
        assert_eq!(
            refresh_interval(Some("public, max-age=120, must-revalidate")),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn refresh_interval_clamps_to_the_floor() {
        assert_eq!(
            refresh_interval(Some("max-age=10")),
            Duration::from_secs(MIN_REFRESH_SECS)
        );
    }

    #[test]
    fn refresh_interval_defaults_when_unusable() {
        assert_eq!(
            refresh_interval(None),
            Duration::from_secs(DEFAULT_REFRESH_SECS)
        );
        assert_eq!(
            refresh_interval(Some("no-store")),
            Duration::from_secs(DEFAULT_REFRESH_SECS)
        );
        assert_eq!(
            refresh_interval(Some("max-age=banana")),
            Duration::from_secs(DEFAULT_REFRESH_SECS)
        );
    }
}
