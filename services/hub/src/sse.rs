//! The subscribe handler and its SSE writer loop.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_stream::stream;
use axum::extract::{RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use cinnabar_authz::grant_filter;
use cinnabar_broker::{ids, Connection, Message};
use futures::Stream;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};

use crate::server::{cors_headers, AppState, RECENT_TOPIC_TTL};
use crate::{metrics, topic};

pub async fn subscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    let query = query.unwrap_or_default();
    let mut topics = Vec::new();
    let mut authorization = None;
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "topic" => topics.push(value.into_owned()),
            "authorization" => authorization = Some(value.into_owned()),
            _ => {}
        }
    }

    let claims = state.auth.verify_subscriber(&headers, authorization.as_deref());
    let granted = claims
        .as_ref()
        .map(|claims| grant_filter(&claims.mercure.subscribe, &topics))
        .unwrap_or_default();
    if granted.is_empty() {
        // Nothing this subscriber may watch; close silently.
        return StatusCode::OK.into_response();
    }

    // Rewrite templates matching the reserved subscription topic so the
    // hub only registers exact strings.
    let mut normalized = Vec::with_capacity(granted.len());
    for requested in granted {
        match topic::canonicalize(&requested) {
            Ok(exact) => normalized.push(exact),
            Err(_) => {
                tracing::debug!(topic = %requested, "invalid topic template");
                return StatusCode::BAD_REQUEST.into_response();
            }
        }
    }

    let jwt_deadline = claims.and_then(|claims| claims.exp).map(|exp| {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Instant::now() + Duration::from_secs(exp.saturating_sub(now))
    });

    for topic in &normalized {
        state.recent.add(topic, RECENT_TOPIC_TTL);
    }

    // Replay history strictly after the client's last seen cursor.
    let mut replay = Vec::new();
    let cursor = headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .map(ids::timestamp_of)
        .filter(|cursor| *cursor > 0);
    if let Some(cursor) = cursor {
        for topic in &normalized {
            for payload in state.history.iter_after(topic, cursor) {
                if let Some(msg) = Message::from_json(&payload) {
                    replay.push(msg);
                }
            }
        }
    }

    let (conn, rx) = Connection::new(normalized);
    conn.announce(&state.hub, true);
    state.hub.register(&conn);
    metrics::connect();
    metrics::subscribe(conn.topics().len());

    let cors = cors_headers(&state.cors_origins);
    let stream = writer_stream(state, conn, rx, replay, jwt_deadline);
    (
        [
            (header::CACHE_CONTROL, "private, no-cache".to_string()),
            (header::CONNECTION, "keep-alive".to_string()),
            (header::TRANSFER_ENCODING, "chunked".to_string()),
        ],
        cors,
        Sse::new(stream),
    )
        .into_response()
}

enum Step {
    Frame(Event),
    Ping,
    Skip,
    Stop,
}

fn writer_stream(
    state: AppState,
    conn: Arc<Connection>,
    mut rx: mpsc::Receiver<Arc<Message>>,
    replay: Vec<Message>,
    jwt_deadline: Option<Instant>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream! {
        // Runs on every exit path, including the stream being dropped on
        // client disconnect.
        let _cleanup = WriterCleanup {
            state: state.clone(),
            conn: Arc::clone(&conn),
        };

        let mut last = String::new();
        for msg in replay {
            let Some(event) = frame(&msg) else { continue };
            last = msg.id.clone();
            metrics::send();
            yield Ok::<_, Infallible>(event);
        }
        yield Ok(Event::default().comment(""));

        let mut pinger = interval_at(Instant::now() + state.ping_period, state.ping_period);
        let jwt_expired = async move {
            match jwt_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(jwt_expired);

        loop {
            let step = tokio::select! {
                received = rx.recv() => match received {
                    Some(msg) if msg.id == last => Step::Skip,
                    Some(msg) => match frame(&msg) {
                        Some(event) => {
                            last = msg.id.clone();
                            Step::Frame(event)
                        }
                        None => Step::Skip,
                    },
                    None => Step::Stop,
                },
                _ = conn.cancelled() => Step::Stop,
                _ = pinger.tick() => Step::Ping,
                _ = &mut jwt_expired => Step::Stop,
                _ = state.shutdown.cancelled() => Step::Stop,
            };
            match step {
                Step::Frame(event) => {
                    metrics::send();
                    yield Ok(event);
                }
                Step::Ping => {
                    // Heartbeats keep the subscriber's topics hot so
                    // history keeps accruing for them.
                    for topic in conn.topics() {
                        state.recent.add(topic, RECENT_TOPIC_TTL);
                    }
                    yield Ok(Event::default().comment(""));
                }
                Step::Skip => {}
                Step::Stop => break,
            }
        }
    }
}

fn frame(msg: &Message) -> Option<Event> {
    if msg.is_empty() {
        return None;
    }
    let mut event = Event::default();
    if !msg.id.is_empty() {
        event = event.id(&msg.id);
    }
    if !msg.event_type.is_empty() {
        event = event.event(&msg.event_type);
    }
    if !msg.data.is_empty() {
        event = event.data(&msg.data);
    }
    Some(event)
}

struct WriterCleanup {
    state: AppState,
    conn: Arc<Connection>,
}

impl Drop for WriterCleanup {
    fn drop(&mut self) {
        self.conn.announce(&self.state.hub, false);
        self.state.hub.unregister(&self.conn);
        metrics::disconnect();
        metrics::unsubscribe(self.conn.topics().len());
    }
}
