//! Bounded, append-only message log for a single topic.
//!
//! Each topic owns one `TopicStore`: a fixed-capacity ring of messages with
//! strictly increasing ids. When the ring is full the oldest message is
//! evicted; a cursor that points before the oldest retained id simply reads
//! everything still retained. Stores are independent, so one lock per store
//! is the whole synchronization story.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::message::Message;

/// Default ring capacity per topic.
pub const DEFAULT_TOPIC_CAPACITY: usize = 1000;

/// Bounded ring log for one topic.
pub struct TopicStore {
    key: String,
    inner: RwLock<Ring>,
}

struct Ring {
    entries: VecDeque<Arc<Message>>,
    capacity: usize,
    next_id: u64,
    last_write: Instant,
}

impl TopicStore {
    /// Create an empty store for `key` holding at most `capacity` messages.
    pub fn new(key: impl Into<String>, capacity: usize) -> Self {
        Self {
            key: key.into(),
            inner: RwLock::new(Ring {
                entries: VecDeque::new(),
                capacity: capacity.max(1),
                next_id: 0,
                last_write: Instant::now(),
            }),
        }
    }

    /// Append a message with the next sequential id, evicting the oldest
    /// entry if the ring is full. Returns the assigned id.
    pub fn save(&self, event_key: &str, value: Bytes) -> u64 {
        let mut ring = self.inner.write();
        let id = ring.next_id;
        ring.next_id += 1;
        ring.last_write = Instant::now();

        let message = Arc::new(Message::new(self.key.clone(), event_key, value).with_id(id));

        if ring.entries.len() == ring.capacity {
            ring.entries.pop_front();
        }
        ring.entries.push_back(message);
        id
    }

    /// Id of the most recently saved message, or `None` if the store is empty.
    pub fn last_id(&self) -> Option<u64> {
        self.inner.read().entries.back().map(|m| m.id)
    }

    /// All retained messages with `id > last_id`, in ascending order.
    ///
    /// A `last_id` at or past the newest id yields nothing; a `last_id`
    /// older than the oldest retained id yields everything retained. The
    /// caller missed evicted messages, which is accepted data loss under the
    /// at-least-once contract, not a fault.
    pub fn since(&self, last_id: u64) -> Vec<Arc<Message>> {
        let ring = self.inner.read();
        let oldest = match ring.entries.front() {
            Some(m) => m.id,
            None => return Vec::new(),
        };
        if last_id < oldest {
            return ring.entries.iter().cloned().collect();
        }
        // Ids are dense within the ring, so the offset is arithmetic.
        let skip = (last_id - oldest).saturating_add(1) as usize;
        ring.entries.iter().skip(skip).cloned().collect()
    }

    /// Snapshot of everything currently retained, in ascending order.
    pub fn all(&self) -> Vec<Arc<Message>> {
        self.inner.read().entries.iter().cloned().collect()
    }

    /// Number of retained messages.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// True when nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Time since the last `save`, for idle-topic sweeps.
    pub fn idle_for(&self) -> Duration {
        self.inner.read().last_write.elapsed()
    }
}
