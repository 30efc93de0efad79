use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use cinnabar_authz::jwks::keys_from_response;
use cinnabar_authz::{
    refresh_interval, static_keys, verify_token, AuthzError, Claims, JwksResponse, JwksSource,
    VerifyingKey,
};
use tokio_util::sync::CancellationToken;

use crate::config::JwtConfig;

const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
const AUTH_COOKIE: &str = "mercureAuthorization";

/// Static plus JWKS-fetched keys for one role.
///
/// The JWKS slice is swapped atomically by the refresher under the write
/// lock; verifiers copy a snapshot and treat it as immutable.
pub struct KeySet {
    statics: Vec<VerifyingKey>,
    jwks: RwLock<Vec<VerifyingKey>>,
}

impl KeySet {
    pub fn new(statics: Vec<VerifyingKey>) -> Self {
        Self {
            statics,
            jwks: RwLock::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> Vec<VerifyingKey> {
        let mut all = self.statics.clone();
        all.extend(self.jwks.read().expect("key lock").iter().cloned());
        all
    }

    pub fn replace_jwks(&self, keys: Vec<VerifyingKey>) {
        *self.jwks.write().expect("key lock") = keys;
    }

    pub fn is_empty(&self) -> bool {
        self.statics.is_empty() && self.jwks.read().expect("key lock").is_empty()
    }
}

/// Token verification for both roles.
pub struct Authenticator {
    pub publisher: Arc<KeySet>,
    pub subscriber: Arc<KeySet>,
    debug: bool,
}

impl Authenticator {
    pub fn new(publisher: Arc<KeySet>, subscriber: Arc<KeySet>, debug: bool) -> Self {
        Self {
            publisher,
            subscriber,
            debug,
        }
    }

    pub fn verify_publisher(&self, headers: &HeaderMap, fallback: Option<&str>) -> Option<Claims> {
        self.verify(&self.publisher, headers, fallback)
    }

    pub fn verify_subscriber(&self, headers: &HeaderMap, fallback: Option<&str>) -> Option<Claims> {
        self.verify(&self.subscriber, headers, fallback)
    }

    fn verify(&self, keys: &KeySet, headers: &HeaderMap, fallback: Option<&str>) -> Option<Claims> {
        let token = extract_token(headers, fallback)?;
        match verify_token(&token, &keys.snapshot()) {
            Ok(claims) => Some(claims),
            Err(err) => {
                if self.debug {
                    tracing::warn!(error = %err, token = %token, "invalid token");
                }
                None
            }
        }
    }
}

/// Token lookup order: `Authorization: Bearer`, then the
/// `mercureAuthorization` cookie, then the request-supplied fallback
/// field (form field on publish, query parameter on subscribe).
pub fn extract_token(headers: &HeaderMap, fallback: Option<&str>) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        let mut parts = value.splitn(2, ' ');
        if let (Some(_scheme), Some(token)) = (parts.next(), parts.next()) {
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    if let Some(token) = cookie_value(headers, AUTH_COOKIE) {
        return Some(token);
    }
    fallback
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for value in headers.get_all(header::COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        for pair in raw.split(';') {
            if let Some((key, value)) = pair.trim().split_once('=') {
                if key == name && !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

/// reqwest-backed JWKS source used outside of tests.
pub struct HttpJwksSource {
    client: reqwest::Client,
}

impl HttpJwksSource {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(JWKS_FETCH_TIMEOUT)
                .build()
                .expect("build http client"),
        }
    }
}

impl Default for HttpJwksSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JwksSource for HttpJwksSource {
    async fn fetch(&self, url: &str) -> cinnabar_authz::Result<JwksResponse> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| AuthzError::Jwks(err.to_string()))?;
        let status = response.status().as_u16();
        let cache_control = response
            .headers()
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|err| AuthzError::Jwks(err.to_string()))?;
        Ok(JwksResponse {
            status,
            body,
            cache_control,
        })
    }
}

/// Build a role's key set: statically configured keys plus the initial
/// JWKS fetch when a URL is configured.
///
/// Returns the refresh interval to use when a JWKS URL is present. Any
/// initial failure leaves the dynamic slice empty and falls back to the
/// default interval; whether the role is usable at all is the caller's
/// startup check.
pub async fn build_key_set(
    role: &'static str,
    cfg: &JwtConfig,
    source: &dyn JwksSource,
) -> (Arc<KeySet>, Option<Duration>) {
    let statics = match static_keys(&cfg.alg, &cfg.key) {
        Ok(keys) => keys,
        Err(err) => {
            tracing::error!(role, error = %err, "unable to parse configured keys");
            Vec::new()
        }
    };
    let key_set = Arc::new(KeySet::new(statics));
    let Some(url) = &cfg.jwks_url else {
        return (key_set, None);
    };
    let interval = match source.fetch(url).await {
        Ok(response) => match keys_from_response(&response) {
            Ok(keys) => {
                if keys.is_empty() {
                    tracing::warn!(role, "jwks endpoint returned no keys");
                } else {
                    key_set.replace_jwks(keys);
                }
                refresh_interval(response.cache_control.as_deref())
            }
            Err(err) => {
                tracing::warn!(role, error = %err, "unable to parse jwks");
                refresh_interval(None)
            }
        },
        Err(err) => {
            tracing::warn!(role, error = %err, "jwks fetch failed");
            refresh_interval(None)
        }
    };
    (key_set, Some(interval))
}

/// Periodically re-fetch a role's JWKS document, swapping the dynamic key
/// slice on success and keeping the previous keys on any failure. The
/// interval follows the endpoint's `max-age` as it changes.
pub fn spawn_jwks_refresher(
    role: &'static str,
    url: String,
    key_set: Arc<KeySet>,
    source: Arc<dyn JwksSource>,
    initial: Duration,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut interval = initial;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            match source.fetch(&url).await {
                Ok(response) => match keys_from_response(&response) {
                    Ok(keys) => {
                        let next = refresh_interval(response.cache_control.as_deref());
                        if next != interval {
                            tracing::debug!(
                                role,
                                secs = next.as_secs(),
                                "jwks refresh interval changed"
                            );
                            interval = next;
                        }
                        if keys.is_empty() {
                            tracing::warn!(role, "jwks refresh returned no keys");
                        } else {
                            key_set.replace_jwks(keys);
                        }
                    }
                    Err(err) => {
                        tracing::warn!(role, error = %err, "jwks refresh failed; keeping previous keys");
                    }
                },
                Err(err) => {
                    tracing::warn!(role, error = %err, "jwks fetch failed; keeping previous keys");
                }
            }
        }
    });
}
