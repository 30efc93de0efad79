use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::hub::Hub;
use crate::ids;
use crate::message::{Message, SUBSCRIPTION_TOPIC};
use crate::subscription::Subscription;

/// Outbound queue capacity per subscriber. A full queue marks the
/// subscriber as slow and the hub severs it.
pub const OUTBOUND_CAPACITY: usize = 256;

// Unreserved URI characters stay readable in subscription record ids.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Per-subscriber state shared between the shard dispatchers and the SSE
/// writer loop.
///
/// The closed flag transitions once; whichever path decides to terminate
/// the connection first (writer exit or slow-consumer severance) owns the
/// transition, and the writer observes it through the cancellation token.
#[derive(Debug)]
pub struct Connection {
    id: String,
    topics: Vec<String>,
    outbound: mpsc::Sender<Arc<Message>>,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl Connection {
    /// Create a connection for the given authorized topics, returning the
    /// receive side of its outbound queue for the writer loop.
    pub fn new(topics: Vec<String>) -> (Arc<Self>, mpsc::Receiver<Arc<Message>>) {
        let (outbound, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let conn = Arc::new(Self {
            id: ids::new_urn(),
            topics,
            outbound,
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });
        (conn, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Mark the connection closed and wake its writer. True only for the
    /// caller that performed the transition.
    pub fn close(&self) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.cancel.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once `close` has been called from any path.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub(crate) fn try_send(
        &self,
        msg: Arc<Message>,
    ) -> Result<(), mpsc::error::TrySendError<Arc<Message>>> {
        self.outbound.try_send(msg)
    }

    /// Broadcast one subscription lifecycle record per topic on the
    /// reserved topic.
    pub fn announce(&self, hub: &Hub, active: bool) {
        for topic in &self.topics {
            let record = self.subscription(topic, active);
            let data = serde_json::to_string(&record).unwrap_or_default();
            hub.broadcast(Message::new(
                "Subscription",
                vec![SUBSCRIPTION_TOPIC.to_string()],
                data,
            ));
        }
    }

    pub fn subscription(&self, topic: &str, active: bool) -> Subscription {
        Subscription {
            id: format!(
                "/.well-known/mercure/subscriptions/{}/{}",
                utf8_percent_encode(topic, COMPONENT),
                utf8_percent_encode(&self.id, COMPONENT),
            ),
            record_type: "Subscription".to_string(),
            topic: topic.to_string(),
            subscriber: self.id.clone(),
            active,
            payload: serde_json::Map::new(),
        }
    }
}
