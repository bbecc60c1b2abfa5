//! Ordered, durable outgoing-event queue.
//!
//! Buffers outbound wire events while the connection is down and replays
//! them, FIFO per routing key, once it comes back. The whole queue map is
//! persisted through the [`StateStore`] on every mutation so buffered events
//! survive a restart.
//!
//! # Delivery semantics
//!
//! At-least-once: an entry leaves the queue when the transport accepts the
//! emit, not when the peer acknowledges it. The only durable delivery
//! confirmation is a later inbound ack, which the router handles. If the
//! transport rejects an emit during a flush, the driver hands the entry back
//! via [`OutgoingQueue::requeue`] and the bucket keeps its original order.
//!
//! # Invariants
//!
//! - FIFO within a bucket; no ordering across buckets.
//! - Empty buckets are deleted, not kept around.
//! - Persistence failure never fails the caller: the in-memory queue stays
//!   authoritative and the error is surfaced for logging.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chatwire_proto::{RoomId, ServerBound, Timestamp};
use serde::{Deserialize, Serialize};

use crate::storage::{StateStore, StorageError};

/// Grouping key for queued events: the room, or a fallback bucket for
/// events emitted before any room is known.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RoutingKey {
    /// Events queued before any room is known (pre-handshake sends).
    Fallback,
    /// Per-room bucket.
    Room(RoomId),
}

impl RoutingKey {
    /// Routing key for an outbound event.
    pub fn for_event(event: &ServerBound) -> Self {
        event.room_id().map_or(Self::Fallback, |room| Self::Room(room.clone()))
    }
}

/// One buffered outbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// The buffered event.
    pub event: ServerBound,
    /// When it was queued, unix milliseconds.
    pub timestamp: Timestamp,
}

/// Result of [`OutgoingQueue::enqueue_or_send`].
#[derive(Debug)]
pub enum SendOutcome {
    /// The connection is open; the caller emits this event now.
    Sent(ServerBound),
    /// The event was buffered for replay.
    Queued {
        /// Set when the durable write failed; the entry is still queued in
        /// memory and the caller logs the error.
        persist_error: Option<StorageError>,
    },
}

/// Persisted shape of the queue: bucket list, FIFO within each bucket.
#[derive(Serialize, Deserialize)]
struct PersistedBucket {
    key: RoutingKey,
    entries: Vec<QueueEntry>,
}

/// The outgoing queue.
pub struct OutgoingQueue<S: StateStore> {
    store: S,
    storage_key: String,
    buckets: BTreeMap<RoutingKey, VecDeque<QueueEntry>>,
    /// Insert positions for requeued entries, so a sequence of emit failures
    /// restores in original order ahead of anything enqueued since. Reset on
    /// every flush.
    restore_cursor: HashMap<RoutingKey, usize>,
}

impl<S: StateStore> OutgoingQueue<S> {
    /// Open the queue, restoring any persisted entries.
    ///
    /// A corrupt persisted record is dropped and the queue starts empty;
    /// losing buffered events beats wedging the client at startup.
    pub fn open(store: S, storage_key: impl Into<String>) -> Self {
        let storage_key = storage_key.into();

        let buckets = match store.get(&storage_key) {
            Ok(Some(raw)) => serde_json::from_slice::<Vec<PersistedBucket>>(&raw)
                .map(|persisted| {
                    persisted
                        .into_iter()
                        .map(|bucket| (bucket.key, VecDeque::from(bucket.entries)))
                        .collect()
                })
                .unwrap_or_default(),
            _ => BTreeMap::new(),
        };

        Self { store, storage_key, buckets, restore_cursor: HashMap::new() }
    }

    /// Send now if connected, buffer otherwise.
    ///
    /// Callers never track connection state themselves; they pass the state
    /// the connection manager reported and act on the outcome.
    pub fn enqueue_or_send(
        &mut self,
        connected: bool,
        event: ServerBound,
        now: Timestamp,
    ) -> SendOutcome {
        if connected {
            return SendOutcome::Sent(event);
        }

        let key = RoutingKey::for_event(&event);
        self.buckets.entry(key).or_default().push_back(QueueEntry { event, timestamp: now });

        SendOutcome::Queued { persist_error: self.persist().err() }
    }

    /// Drain every bucket for replay, FIFO within each bucket.
    ///
    /// The queue is emptied and the empty state persisted; entries the
    /// transport then rejects come back via [`Self::requeue`].
    pub fn take_all(&mut self) -> (Vec<QueueEntry>, Option<StorageError>) {
        self.restore_cursor.clear();

        let mut drained = Vec::new();
        for (_, mut entries) in std::mem::take(&mut self.buckets) {
            drained.extend(entries.drain(..));
        }

        (drained, self.persist().err())
    }

    /// Hand back an entry the transport rejected during a flush.
    ///
    /// Consecutive requeues for the same bucket land in their original
    /// relative order, ahead of anything enqueued after the flush started.
    pub fn requeue(&mut self, entry: QueueEntry) -> Option<StorageError> {
        let key = RoutingKey::for_event(&entry.event);
        let cursor = self.restore_cursor.entry(key.clone()).or_insert(0);

        let bucket = self.buckets.entry(key).or_default();
        let position = (*cursor).min(bucket.len());
        bucket.insert(position, entry);
        *cursor += 1;

        self.persist().err()
    }

    /// Number of buffered entries for a routing key.
    pub fn pending(&self, key: &RoutingKey) -> usize {
        self.buckets.get(key).map_or(0, VecDeque::len)
    }

    /// Snapshot of a bucket's entries, oldest first.
    pub fn pending_entries(&self, key: &RoutingKey) -> Vec<QueueEntry> {
        self.buckets.get(key).map(|entries| entries.iter().cloned().collect()).unwrap_or_default()
    }

    /// Discard a bucket (room explicitly closed).
    pub fn clear(&mut self, key: &RoutingKey) -> Option<StorageError> {
        self.buckets.remove(key);
        self.persist().err()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Total buffered entries across all buckets.
    pub fn total_pending(&self) -> usize {
        self.buckets.values().map(VecDeque::len).sum()
    }

    fn persist(&self) -> Result<(), StorageError> {
        if self.buckets.is_empty() {
            return self.store.delete(&self.storage_key);
        }

        let persisted: Vec<PersistedBucket> = self
            .buckets
            .iter()
            .map(|(key, entries)| PersistedBucket {
                key: key.clone(),
                entries: entries.iter().cloned().collect(),
            })
            .collect();

        self.store.put(&self.storage_key, &serde_json::to_vec(&persisted)?)
    }
}
