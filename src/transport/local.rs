//! In-memory transport

use crate::subscriber::Subscriber;
use crate::transport::{Transport, TransportError};
use crate::update::Update;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Live subscriber registry shared by the transport backends.
///
/// Dispatch is the read path, add/remove/close the write path. Closing
/// takes the subscribers out of the map before cancelling them, so no lock
/// is held while disconnect signals fire.
pub(crate) struct SubscriberRegistry {
    inner: RwLock<RegistryInner>,
}

struct RegistryInner {
    subscribers: HashMap<Uuid, Arc<Subscriber>>,
    closed: bool,
}

impl SubscriberRegistry {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                subscribers: HashMap::new(),
                closed: false,
            }),
        }
    }

    pub(crate) fn add(&self, subscriber: Arc<Subscriber>) -> Result<(), TransportError> {
        self.add_with(subscriber, |_| Ok(()))
    }

    /// Register a subscriber, running `prepare` under the write lock first.
    ///
    /// Durable transports replay history in `prepare`: dispatchers contend
    /// on the read lock, so the subscriber cannot observe a live update
    /// until the replay has completed and the lock is released.
    pub(crate) fn add_with(
        &self,
        subscriber: Arc<Subscriber>,
        prepare: impl FnOnce(&Subscriber) -> Result<(), TransportError>,
    ) -> Result<(), TransportError> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(TransportError::Closed);
        }

        prepare(&subscriber)?;
        inner.subscribers.insert(subscriber.id(), subscriber);
        Ok(())
    }

    pub(crate) fn remove(&self, subscriber: &Subscriber) {
        let removed = self.inner.write().subscribers.remove(&subscriber.id());
        // Deregistration and the disconnect signal are coupled.
        subscriber.disconnect();
        if removed.is_some() {
            debug!(subscriber = %subscriber.id(), "Subscriber removed");
        }
    }

    pub(crate) fn broadcast(&self, update: &Arc<Update>) -> Result<(), TransportError> {
        self.broadcast_with(update, || Ok(()))
    }

    /// Broadcast an update, running `prepare` while the read lock is held.
    ///
    /// Durable transports persist in `prepare`: a subscriber registering
    /// concurrently either sees the update in its replay or in this
    /// broadcast, never in both.
    pub(crate) fn broadcast_with(
        &self,
        update: &Arc<Update>,
        prepare: impl FnOnce() -> Result<(), TransportError>,
    ) -> Result<(), TransportError> {
        let inner = self.inner.read();
        if inner.closed {
            return Err(TransportError::Closed);
        }

        prepare()?;

        for subscriber in inner.subscribers.values() {
            if subscriber.is_disconnected() {
                continue;
            }
            if !subscriber.send(update.clone()) {
                debug!(subscriber = %subscriber.id(), "Update not enqueued");
            }
        }

        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.read().subscribers.len()
    }

    pub(crate) fn close(&self) {
        let drained: Vec<Arc<Subscriber>> = {
            let mut inner = self.inner.write();
            inner.closed = true;
            inner.subscribers.drain().map(|(_, s)| s).collect()
        };

        for subscriber in drained {
            subscriber.disconnect();
        }
    }
}

/// Broadcast-only transport with no persistence and no history support.
pub struct LocalTransport {
    registry: SubscriberRegistry,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self {
            registry: SubscriberRegistry::new(),
        }
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn dispatch(&self, update: Update) -> Result<(), TransportError> {
        self.registry.broadcast(&Arc::new(update))
    }

    async fn add_subscriber(&self, subscriber: Arc<Subscriber>) -> Result<(), TransportError> {
        self.registry.add(subscriber)
    }

    async fn remove_subscriber(&self, subscriber: &Subscriber) {
        self.registry.remove(subscriber);
    }

    fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    async fn close(&self) {
        self.registry.close();
    }
}
