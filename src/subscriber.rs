//! Per-connection subscriber state

use crate::topic::{SelectorList, TopicMatcher};
use crate::update::Update;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// State of one subscribed connection.
///
/// The inbox is a bounded single-producer, single-consumer queue: the
/// transport enqueues, the subscribe handler drains. The disconnect token
/// is the one-shot signal coupling the two sides: cancelling it stops the
/// handler's delivery loop, and the transport skips cancelled subscribers.
pub struct Subscriber {
    id: Uuid,
    remote_addr: Option<String>,
    requested_topics: Vec<String>,
    requested: SelectorList,
    authorized: SelectorList,
    authorized_topics: Vec<String>,
    all_topics: bool,
    last_event_id: Option<String>,
    tx: mpsc::Sender<Arc<Update>>,
    disconnect: CancellationToken,
}

impl Subscriber {
    /// Build a subscriber and the receiving half of its inbox.
    pub fn new(
        requested_topics: Vec<String>,
        authorized_selectors: Vec<String>,
        last_event_id: Option<String>,
        remote_addr: Option<String>,
        capacity: usize,
        matcher: &TopicMatcher,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<Update>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let requested = matcher.selectors(&requested_topics);
        let authorized = matcher.selectors(&authorized_selectors);
        let all_topics = authorized.has_wildcard();

        let subscriber = Arc::new(Self {
            id: Uuid::new_v4(),
            remote_addr,
            requested_topics,
            requested,
            authorized,
            authorized_topics: authorized_selectors,
            all_topics,
            last_event_id,
            tx,
            disconnect: CancellationToken::new(),
        });

        (subscriber, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    /// The raw topic selectors the client asked for, in request order.
    pub fn requested_topics(&self) -> &[String] {
        &self.requested_topics
    }

    /// The raw selectors the client's token authorizes.
    pub fn authorized_topics(&self) -> &[String] {
        &self.authorized_topics
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Whether this subscriber should observe the update: some topic must
    /// match a requested selector, and private updates additionally need a
    /// topic matching an authorized selector (or a wildcard authorization).
    pub fn can_receive(&self, update: &Update) -> bool {
        if !update.topics.iter().any(|t| self.requested.matches(t)) {
            return false;
        }

        if !update.private || self.all_topics {
            return true;
        }

        update.topics.iter().any(|t| self.authorized.matches(t))
    }

    /// Enqueue an update without blocking.
    ///
    /// A full inbox means the consumer is too slow to keep up; the
    /// subscriber is disconnected so dispatch to others is never held back.
    /// Updates offered after disconnection are discarded.
    pub fn send(&self, update: Arc<Update>) -> bool {
        if self.disconnect.is_cancelled() {
            return false;
        }

        match self.tx.try_send(update) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(subscriber = %self.id, "Inbox full, disconnecting slow subscriber");
                self.disconnect.cancel();
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscriber = %self.id, "Inbox closed, dropping update");
                false
            }
        }
    }

    /// Signal disconnection. Idempotent.
    pub fn disconnect(&self) {
        self.disconnect.cancel();
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnect.is_cancelled()
    }

    /// Resolves once the subscriber is disconnected.
    pub async fn disconnected(&self) {
        self.disconnect.cancelled().await;
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("requested_topics", &self.requested_topics)
            .field("all_topics", &self.all_topics)
            .field("last_event_id", &self.last_event_id)
            .finish()
    }
}
