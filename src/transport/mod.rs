//! Transport backends
//!
//! A transport owns the live subscriber registry and broadcasts dispatched
//! updates into subscriber inboxes. Durable transports additionally persist
//! every update and can replay history to a reconnecting subscriber.

mod local;
mod redb;

pub use local::LocalTransport;
pub use redb::RedbTransport;

use crate::subscriber::Subscriber;
use crate::update::Update;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// `Last-Event-ID` sentinel requesting the full retained history.
pub const EARLIEST: &str = "earliest";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("transport does not support history replay")]
    HistoryUnsupported,

    #[error("invalid transport URL '{0}'")]
    InvalidUrl(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// The capability set a hub needs from its delivery backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Broadcast an update to every registered subscriber. Durable
    /// transports persist the update before fanning it out.
    async fn dispatch(&self, update: Update) -> Result<(), TransportError>;

    /// Register a subscriber. For durable transports this also replays
    /// history when the subscriber carries a `Last-Event-ID`, before the
    /// first live update can be observed.
    async fn add_subscriber(&self, subscriber: Arc<Subscriber>) -> Result<(), TransportError>;

    /// Deregister a subscriber and signal its disconnection. Idempotent.
    async fn remove_subscriber(&self, subscriber: &Subscriber);

    /// Replay every persisted update strictly after `since_id` into the
    /// subscriber's inbox, filtered by the subscriber's own
    /// matching+authorization rules. [`EARLIEST`] and unknown ids both
    /// replay from the beginning of the retained history.
    async fn dispatch_history(
        &self,
        subscriber: &Subscriber,
        since_id: &str,
    ) -> Result<(), TransportError> {
        let _ = (subscriber, since_id);
        Err(TransportError::HistoryUnsupported)
    }

    fn supports_history(&self) -> bool {
        false
    }

    /// Number of currently registered subscribers.
    fn subscriber_count(&self) -> usize;

    /// Stop accepting subscribers and dispatches, and disconnect every
    /// registered subscriber. Idempotent.
    async fn close(&self);
}

/// Build a transport from a `transport_url` value.
///
/// Recognized schemes: `local://` for the in-memory transport and
/// `redb://<path>[?size=<n>]` for the durable one.
pub fn new_transport(url: &str) -> Result<Arc<dyn Transport>, TransportError> {
    let Some((scheme, rest)) = url.split_once("://") else {
        return Err(TransportError::InvalidUrl(url.to_string()));
    };

    match scheme {
        "local" => Ok(Arc::new(LocalTransport::new())),
        "redb" => {
            let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
            if path.is_empty() {
                return Err(TransportError::InvalidUrl(url.to_string()));
            }

            let mut size = None;
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                if key == "size" {
                    size = Some(
                        value
                            .parse::<u64>()
                            .map_err(|_| TransportError::InvalidUrl(url.to_string()))?,
                    );
                }
            }

            Ok(Arc::new(RedbTransport::new(path, size)?))
        }
        _ => Err(TransportError::InvalidUrl(url.to_string())),
    }
}
