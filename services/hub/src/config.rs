use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_LISTEN: &str = "0.0.0.0:8001";
const DEFAULT_HUB_COUNT: usize = 16;
const DEFAULT_CACHE_SIZE_MB: usize = 16;
const MIN_CACHE_SIZE_MB: usize = 16;
const DEFAULT_PING_PERIOD: Duration = Duration::from_secs(30);

/// Hub configuration sourced from environment variables, with an optional
/// YAML override file named by `HUB_CONFIG`.
#[derive(Debug, Clone)]
pub struct Config {
    // Protocol listener bind address.
    pub listen: SocketAddr,
    // Prometheus listener bind address; None disables the exporter.
    pub metrics_listen: Option<SocketAddr>,
    // Number of hub shards messages are fanned out across.
    pub hub_count: usize,
    // History cache cap in MiB.
    pub cache_size_mb: usize,
    // Value for Access-Control-Allow-Origin.
    pub cors_origins: String,
    // JWT verification for publishers.
    pub publisher: JwtConfig,
    // JWT verification for subscribers.
    pub subscriber: JwtConfig,
    // Log rejected tokens for investigation.
    pub debug: bool,
    // Heartbeat cadence on idle SSE streams. Not environment-driven;
    // tests shorten it.
    pub ping_period: Duration,
}

/// Per-role JWT verification config.
///
/// `key` may hold multiple keys: newline-delimited secrets for HMAC
/// algorithms, concatenated PEM blocks for asymmetric ones.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub alg: String,
    pub key: String,
    pub jwks_url: Option<String>,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            alg: "HS256".to_string(),
            key: "SECRET".to_string(),
            jwks_url: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.parse().expect("default listen addr"),
            metrics_listen: None,
            hub_count: DEFAULT_HUB_COUNT,
            cache_size_mb: DEFAULT_CACHE_SIZE_MB,
            cors_origins: "*".to_string(),
            publisher: JwtConfig::default(),
            subscriber: JwtConfig::default(),
            debug: false,
            ping_period: DEFAULT_PING_PERIOD,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigOverride {
    listen: Option<String>,
    metrics: Option<String>,
    hub_count: Option<usize>,
    cache_size_mb: Option<usize>,
    cors_origins: Option<String>,
    publisher_jwt_alg: Option<String>,
    publisher_jwt_key: Option<String>,
    publisher_jwks_url: Option<String>,
    subscriber_jwt_alg: Option<String>,
    subscriber_jwt_key: Option<String>,
    subscriber_jwks_url: Option<String>,
    debug: Option<bool>,
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "yes" | "TRUE" | "YES")
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Environment variables provide defaults for local development.
        let listen = env_nonempty("LISTEN")
            .unwrap_or_else(|| DEFAULT_LISTEN.to_string())
            .parse()
            .with_context(|| "parse LISTEN")?;
        let metrics_listen = match env_nonempty("METRICS") {
            Some(value) => Some(value.parse().with_context(|| "parse METRICS")?),
            None => None,
        };
        let hub_count = env_nonempty("HUB_COUNT")
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(DEFAULT_HUB_COUNT)
            .max(1);
        let cache_size_mb = env_nonempty("CACHE_SIZE_MB")
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(DEFAULT_CACHE_SIZE_MB)
            .max(MIN_CACHE_SIZE_MB);
        let cors_origins = env_nonempty("CORS_ORIGINS").unwrap_or_else(|| "*".to_string());
        let publisher = JwtConfig {
            alg: env_nonempty("PUBLISHER_JWT_ALG").unwrap_or_else(|| "HS256".to_string()),
            key: env_nonempty("PUBLISHER_JWT_KEY").unwrap_or_else(|| "SECRET".to_string()),
            jwks_url: env_nonempty("PUBLISHER_JWKS_URL"),
        };
        let subscriber = JwtConfig {
            alg: env_nonempty("SUBSCRIBER_JWT_ALG").unwrap_or_else(|| "HS256".to_string()),
            key: env_nonempty("SUBSCRIBER_JWT_KEY").unwrap_or_else(|| "SECRET".to_string()),
            jwks_url: env_nonempty("SUBSCRIBER_JWKS_URL"),
        };
        let debug = env_nonempty("DEBUG")
            .map(|value| truthy(&value))
            .unwrap_or(false);
        Ok(Self {
            listen,
            metrics_listen,
            hub_count,
            cache_size_mb,
            cors_origins,
            publisher,
            subscriber,
            debug,
            ping_period: DEFAULT_PING_PERIOD,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("HUB_CONFIG") {
            // YAML overrides allow ops-friendly config files.
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read HUB_CONFIG: {path}"))?;
            let overrides: ConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse hub config yaml")?;
            if let Some(value) = overrides.listen {
                config.listen = value.parse().with_context(|| "parse listen")?;
            }
            if let Some(value) = overrides.metrics {
                config.metrics_listen = if value.is_empty() {
                    None
                } else {
                    Some(value.parse().with_context(|| "parse metrics")?)
                };
            }
            if let Some(value) = overrides.hub_count {
                config.hub_count = value.max(1);
            }
            if let Some(value) = overrides.cache_size_mb {
                config.cache_size_mb = value.max(MIN_CACHE_SIZE_MB);
            }
            if let Some(value) = overrides.cors_origins {
                config.cors_origins = value;
            }
            if let Some(value) = overrides.publisher_jwt_alg {
                config.publisher.alg = value;
            }
            if let Some(value) = overrides.publisher_jwt_key {
                config.publisher.key = value;
            }
            if let Some(value) = overrides.publisher_jwks_url {
                config.publisher.jwks_url = Some(value);
            }
            if let Some(value) = overrides.subscriber_jwt_alg {
                config.subscriber.alg = value;
            }
            if let Some(value) = overrides.subscriber_jwt_key {
                config.subscriber.key = value;
            }
            if let Some(value) = overrides.subscriber_jwks_url {
                config.subscriber.jwks_url = Some(value);
            }
            if let Some(value) = overrides.debug {
                config.debug = value;
            }
        }
        Ok(config)
    }
}
