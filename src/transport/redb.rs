//! Durable transport backed by redb
//!
//! Every dispatched update is persisted under a monotonic sequence number
//! before being fanned out, with a secondary `event id -> sequence` index
//! for `Last-Event-ID` replay lookups. A configurable size bound evicts the
//! oldest entries. Sequences are gap-free within a process; gaps across
//! restarts are permitted.

use crate::subscriber::Subscriber;
use crate::transport::local::SubscriberRegistry;
use crate::transport::{Transport, TransportError, EARLIEST};
use crate::update::Update;
use async_trait::async_trait;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Update log: sequence -> JSON-serialized update.
const UPDATES_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("updates");

/// Replay-start index: event id -> sequence.
const EVENT_IDS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("event_ids");

fn storage(e: impl std::fmt::Display) -> TransportError {
    TransportError::Storage(e.to_string())
}

pub struct RedbTransport {
    db: Database,
    next_seq: AtomicU64,
    size: Option<u64>,
    registry: SubscriberRegistry,
}

impl RedbTransport {
    /// Open (or create) the database at `path`. `size` bounds the number of
    /// retained updates; `None` retains everything.
    pub fn new(path: impl AsRef<Path>, size: Option<u64>) -> Result<Self, TransportError> {
        let db = Database::create(path).map_err(storage)?;

        let txn = db.begin_write().map_err(storage)?;
        let next_seq = {
            let updates = txn.open_table(UPDATES_TABLE).map_err(storage)?;
            let _event_ids = txn.open_table(EVENT_IDS_TABLE).map_err(storage)?;
            let last = updates.last().map_err(storage)?;
            last.map(|(key, _)| key.value() + 1).unwrap_or(1)
        };
        txn.commit().map_err(storage)?;

        Ok(Self {
            db,
            next_seq: AtomicU64::new(next_seq),
            size,
            registry: SubscriberRegistry::new(),
        })
    }

    fn persist(&self, update: &Update) -> Result<(), TransportError> {
        let payload = serde_json::to_vec(update).map_err(storage)?;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);

        let txn = self.db.begin_write().map_err(storage)?;
        {
            let mut updates = txn.open_table(UPDATES_TABLE).map_err(storage)?;
            let mut event_ids = txn.open_table(EVENT_IDS_TABLE).map_err(storage)?;

            updates.insert(seq, payload.as_slice()).map_err(storage)?;
            if !update.event.id.is_empty() {
                event_ids
                    .insert(update.event.id.as_str(), seq)
                    .map_err(storage)?;
            }

            if let Some(max) = self.size {
                while updates.len().map_err(storage)? > max {
                    let evicted = match updates.pop_first().map_err(storage)? {
                        Some((key, value)) => {
                            (key.value(), serde_json::from_slice::<Update>(value.value()).ok())
                        }
                        None => break,
                    };

                    // Drop the index entry unless the id has been reused by
                    // a newer, still-retained update.
                    if let (evicted_seq, Some(old)) = evicted {
                        if !old.event.id.is_empty() {
                            let id = old.event.id.as_str();
                            let indexed =
                                event_ids.get(id).map_err(storage)?.map(|g| g.value());
                            if indexed == Some(evicted_seq) {
                                event_ids.remove(id).map_err(storage)?;
                            }
                        }
                    }
                }
            }
        }
        txn.commit().map_err(storage)?;

        Ok(())
    }

    /// Push every retained update strictly after `since_id` through the
    /// subscriber's matching+authorization rules into its inbox.
    fn replay(&self, subscriber: &Subscriber, since_id: &str) -> Result<(), TransportError> {
        let txn = self.db.begin_read().map_err(storage)?;
        let updates = txn.open_table(UPDATES_TABLE).map_err(storage)?;

        let from = if since_id == EARLIEST {
            0
        } else {
            let event_ids = txn.open_table(EVENT_IDS_TABLE).map_err(storage)?;
            // An unknown id replays the whole retained history.
            event_ids
                .get(since_id)
                .map_err(storage)?
                .map(|g| g.value() + 1)
                .unwrap_or(0)
        };

        let mut replayed = 0usize;
        for entry in updates.range(from..).map_err(storage)? {
            let (_, value) = entry.map_err(storage)?;
            let update: Update = serde_json::from_slice(value.value()).map_err(storage)?;
            if subscriber.can_receive(&update) {
                subscriber.send(Arc::new(update));
                replayed += 1;
            }
        }

        debug!(subscriber = %subscriber.id(), since_id, replayed, "History replayed");
        Ok(())
    }
}

#[async_trait]
impl Transport for RedbTransport {
    async fn dispatch(&self, update: Update) -> Result<(), TransportError> {
        let update = Arc::new(update);
        self.registry
            .broadcast_with(&update, || self.persist(&update))
    }

    async fn add_subscriber(&self, subscriber: Arc<Subscriber>) -> Result<(), TransportError> {
        self.registry
            .add_with(subscriber, |s| match s.last_event_id() {
                Some(since_id) => self.replay(s, since_id),
                None => Ok(()),
            })
    }

    async fn remove_subscriber(&self, subscriber: &Subscriber) {
        self.registry.remove(subscriber);
    }

    async fn dispatch_history(
        &self,
        subscriber: &Subscriber,
        since_id: &str,
    ) -> Result<(), TransportError> {
        self.replay(subscriber, since_id)
    }

    fn supports_history(&self) -> bool {
        true
    }

    fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    async fn close(&self) {
        self.registry.close();
    }
}
