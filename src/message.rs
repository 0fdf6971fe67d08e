//! Immutable message record delivered through the bus.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A single event flowing through the bus.
///
/// Messages are immutable once created and shared as `Arc<Message>` between
/// the topic log and every reader. `id` is assigned by the topic store when
/// the message is appended; it is strictly increasing within a topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Topic/channel key this message belongs to.
    pub source: String,
    /// Event name.
    pub key: String,
    /// Opaque payload.
    pub value: Bytes,
    /// Position within the topic log. Zero until appended.
    #[serde(default)]
    pub id: u64,
}

impl Message {
    /// Create an unappended message (id not yet assigned).
    pub fn new(source: impl Into<String>, key: impl Into<String>, value: Bytes) -> Self {
        Self {
            source: source.into(),
            key: key.into(),
            value,
            id: 0,
        }
    }

    /// Return a copy with the given log position.
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }
}
