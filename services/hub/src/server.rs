use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{RawForm, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use cinnabar_authz::grant_filter;
use cinnabar_broker::{ids, Hub, Message, SubscriptionList, SUBSCRIPTION_TOPIC};
use cinnabar_storage::{HistoryCache, RecentTopics};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::auth::{build_key_set, spawn_jwks_refresher, Authenticator, HttpJwksSource, KeySet};
use crate::config::Config;
use crate::{metrics, observability, sse};

pub const MERCURE_PATH: &str = "/.well-known/mercure";
pub const SUBSCRIPTIONS_PATH: &str = "/.well-known/mercure/subscriptions";
pub const JSON_LD_CONTEXT: &str = "github.com/pantopic/mercure-lite";

/// Window a topic stays in the recent set after a subscribe or heartbeat.
pub const RECENT_TOPIC_TTL: Duration = Duration::from_secs(3600);

const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub history: Arc<HistoryCache>,
    pub recent: Arc<RecentTopics>,
    pub auth: Arc<Authenticator>,
    pub cors_origins: String,
    pub ping_period: Duration,
    pub shutdown: CancellationToken,
}

pub fn build_router(state: AppState) -> Router {
    // Unmatched methods on these routes answer 405; everything else 404.
    Router::new()
        .route(
            MERCURE_PATH,
            post(publish).get(sse::subscribe).options(preflight),
        )
        .route(SUBSCRIPTIONS_PATH, get(list_subscriptions))
        .fallback(|| async { StatusCode::NOT_FOUND })
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub(crate) fn cors_headers(origins: &str) -> [(HeaderName, String); 3] {
    [
        (
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            origins.to_string(),
        ),
        (
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            "Authorization, Last-Event-ID, Cache-Control".to_string(),
        ),
        (
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            "true".to_string(),
        ),
    ]
}

async fn publish(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawForm(body): RawForm,
) -> Response {
    let mut topics = Vec::new();
    let mut data = String::new();
    let mut event_type = String::new();
    let mut authorization = None;
    for (key, value) in form_urlencoded::parse(&body) {
        match key.as_ref() {
            "topic" => topics.push(value.into_owned()),
            "data" => data = value.into_owned(),
            "type" => event_type = value.into_owned(),
            "authorization" => authorization = Some(value.into_owned()),
            _ => {}
        }
    }

    let claims = state.auth.verify_publisher(&headers, authorization.as_deref());
    let granted = claims
        .map(|claims| grant_filter(&claims.mercure.publish, &topics))
        .unwrap_or_default();
    if granted.is_empty() {
        return StatusCode::FORBIDDEN.into_response();
    }

    let msg = Message::new(event_type, granted, data);
    // Only topics someone is around to replay accrue history.
    for topic in &msg.topics {
        if state.recent.has(topic) {
            state
                .history
                .add(topic, msg.timestamp(), Bytes::from(msg.to_json()));
        }
    }
    let id = msg.id.clone();
    state.hub.broadcast(msg);
    metrics::publish();

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        id,
    )
        .into_response()
}

async fn preflight(State(state): State<AppState>) -> Response {
    (cors_headers(&state.cors_origins), StatusCode::OK).into_response()
}

async fn list_subscriptions(State(state): State<AppState>) -> Response {
    let mut subscriptions = Vec::new();
    for conn in state.hub.connections() {
        for topic in conn.topics() {
            subscriptions.push(conn.subscription(topic, true));
        }
    }
    let document = SubscriptionList {
        context: JSON_LD_CONTEXT.to_string(),
        id: SUBSCRIPTION_TOPIC.to_string(),
        record_type: "Subscriptions".to_string(),
        last_event_id: ids::new_urn(),
        subscriptions,
    };
    (
        [(header::CONTENT_TYPE, "application/ld+json")],
        Json(document),
    )
        .into_response()
}

/// The hub service. `start` validates keys, spawns the background tasks,
/// binds the listeners, and serves until `Running::stop`.
pub struct Server {
    config: Config,
    jwks_source: Arc<dyn cinnabar_authz::JwksSource>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            jwks_source: Arc::new(HttpJwksSource::new()),
        }
    }

    /// Substitute the JWKS fetch implementation; tests use a stub.
    pub fn with_jwks_source(mut self, source: Arc<dyn cinnabar_authz::JwksSource>) -> Self {
        self.jwks_source = source;
        self
    }

    pub async fn start(self) -> Result<Running> {
        let config = self.config;
        let shutdown = CancellationToken::new();

        let (publisher, publisher_refresh) =
            build_key_set("publisher", &config.publisher, self.jwks_source.as_ref()).await;
        if publisher.is_empty() {
            anyhow::bail!("no publisher keys available");
        }
        let (subscriber, subscriber_refresh) =
            build_key_set("subscriber", &config.subscriber, self.jwks_source.as_ref()).await;
        if subscriber.is_empty() {
            anyhow::bail!("no subscriber keys available");
        }
        spawn_refresher_for_role(
            "publisher",
            &config.publisher.jwks_url,
            &publisher,
            &self.jwks_source,
            publisher_refresh,
            &shutdown,
        );
        spawn_refresher_for_role(
            "subscriber",
            &config.subscriber.jwks_url,
            &subscriber,
            &self.jwks_source,
            subscriber_refresh,
            &shutdown,
        );

        let hub = Arc::new(Hub::new(config.hub_count, shutdown.clone()));
        let history = Arc::new(HistoryCache::new(config.cache_size_mb * 1024 * 1024));
        let recent = Arc::new(RecentTopics::new());

        metrics::spawn_cache_sampler(Arc::clone(&history), shutdown.clone());
        if let Some(addr) = config.metrics_listen {
            let handle = observability::install_metrics_recorder()?;
            metrics::describe();
            let metrics_shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(err) =
                    observability::serve_metrics(handle, addr, metrics_shutdown).await
                {
                    tracing::error!(error = %err, "metrics listener failed");
                }
            });
        }

        let state = AppState {
            hub,
            history,
            recent,
            auth: Arc::new(Authenticator::new(publisher, subscriber, config.debug)),
            cors_origins: config.cors_origins.clone(),
            ping_period: config.ping_period,
            shutdown: shutdown.clone(),
        };
        let router = build_router(state);

        let listener = tokio::net::TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("bind {}", config.listen))?;
        let addr = listener.local_addr().context("listener address")?;
        tracing::info!(%addr, "listening");

        let serve_shutdown = shutdown.clone();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async move { serve_shutdown.cancelled().await });
            if let Err(err) = serve.await {
                tracing::error!(error = %err, "server error");
            }
        });

        Ok(Running {
            addr,
            shutdown,
            task,
        })
    }
}

fn spawn_refresher_for_role(
    role: &'static str,
    url: &Option<String>,
    key_set: &Arc<KeySet>,
    source: &Arc<dyn cinnabar_authz::JwksSource>,
    interval: Option<Duration>,
    shutdown: &CancellationToken,
) {
    if let (Some(url), Some(interval)) = (url.clone(), interval) {
        spawn_jwks_refresher(
            role,
            url,
            Arc::clone(key_set),
            Arc::clone(source),
            interval,
            shutdown.clone(),
        );
    }
}

/// Handle to a running hub.
pub struct Running {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl Running {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop all background tasks, drain in-flight responses for the drain
    /// window, then force-close.
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut self.task)
            .await
            .is_err()
        {
            self.task.abort();
        }
    }
}
