//! Broker boundary.
//!
//! The scaleout bus talks to its backend through the [`Broker`] trait and
//! nothing else: provision a partition, receive a batch of raw frames from
//! it, send encoded frames to it. Concrete wire protocols live behind this
//! seam; the crate ships an in-memory [`mock::MockBroker`] for tests.

pub mod mock;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::Message;

/// Errors crossing the broker boundary.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Backend is busy or rate-limiting; retry after a backoff.
    #[error("broker throttled: {0}")]
    Throttled(String),

    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker receive error: {0}")]
    Receive(String),

    #[error("broker send error: {0}")]
    Send(String),

    #[error("failed to open partition {partition}: {message}")]
    Open { partition: usize, message: String },

    #[error("failed to decode broker frame: {0}")]
    Decode(String),
}

impl BrokerError {
    /// True for transient backend-busy errors that warrant a fixed backoff
    /// before the next receive attempt.
    pub fn is_throttled(&self) -> bool {
        matches!(self, BrokerError::Throttled(_))
    }
}

/// One raw item received from a partition.
#[derive(Clone, Debug)]
pub struct BrokerItem {
    /// Broker-assigned position within the partition.
    pub sequence: u64,
    /// Encoded wire frame.
    pub payload: Bytes,
}

/// Backend transport for the scaleout bus.
///
/// Implementations must be safe to share across the per-partition pump tasks
/// and the send path. `receive` may suspend while waiting for traffic.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Idempotently provision the backend resources for one partition
    /// (create-if-missing semantics).
    async fn open(&self, partition: usize) -> Result<(), BrokerError>;

    /// Receive up to `max_batch` items from a partition, in partition order.
    /// An empty batch is a normal outcome, not an error.
    async fn receive(&self, partition: usize, max_batch: usize)
        -> Result<Vec<BrokerItem>, BrokerError>;

    /// Send encoded frames to a partition. Returns the broker sequence
    /// assigned to the last frame.
    async fn send(&self, partition: usize, frames: Vec<Bytes>) -> Result<u64, BrokerError>;
}

/// Wire frame carried through the broker: a group of messages bound for one
/// partition, encoded as JSON.
#[derive(Debug, Serialize, Deserialize)]
pub struct WireFrame {
    pub messages: Vec<Message>,
}

impl WireFrame {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn encode(&self) -> Result<Bytes, BrokerError> {
        let raw = serde_json::to_vec(self).map_err(|e| BrokerError::Send(e.to_string()))?;
        Ok(Bytes::from(raw))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, BrokerError> {
        serde_json::from_slice(payload).map_err(|e| BrokerError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_round_trip() {
        let frame = WireFrame::new(vec![
            Message::new("room.1", "chat", Bytes::from_static(b"hi")),
            Message::new("room.2", "chat", Bytes::from_static(b"yo")),
        ]);
        let encoded = frame.encode().unwrap();
        let decoded = WireFrame::decode(&encoded).unwrap();
        assert_eq!(decoded.messages, frame.messages);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = WireFrame::decode(b"not json").unwrap_err();
        assert!(matches!(err, BrokerError::Decode(_)));
        assert!(!err.is_throttled());
    }

    #[test]
    fn test_throttled_classification() {
        assert!(BrokerError::Throttled("busy".into()).is_throttled());
        assert!(!BrokerError::Receive("down".into()).is_throttled());
    }
}
