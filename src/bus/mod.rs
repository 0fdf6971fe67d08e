//! Message bus for real-time push delivery.
//!
//! This module contains:
//! - `MessageBus` trait: publish and long-poll retrieval
//! - `MessageHandler` trait: dispatch callback for scaleout traffic
//! - `MessageResult`: outcome of a `get_messages` call
//! - Implementations: `LocalBus` (in-process), `ScaleoutBus` (partitioned)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::broker::BrokerError;
use crate::message::Message;

// Implementation modules
pub mod dispatch;
pub mod local;
pub mod scaleout;

// Re-exports
pub use dispatch::{DispatchQueue, Dispatcher, QueueItem};
pub use local::LocalBus;
pub use scaleout::ScaleoutBus;

// ============================================================================
// Traits
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Bus not initialized: {0}")]
    Initialization(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Receive wait cancelled")]
    Cancelled,

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// Handler invoked by the dispatcher for each message pulled off the broker.
pub trait MessageHandler: Send + Sync {
    /// Process one message received from `partition` at broker position
    /// `sequence`.
    fn handle(
        &self,
        partition: usize,
        sequence: u64,
        message: Message,
    ) -> BoxFuture<'static, Result<()>>;
}

/// Outcome of a `get_messages` call.
#[derive(Debug, Default)]
pub struct MessageResult {
    /// New messages past the caller's cursor, per-topic order preserved.
    pub messages: Vec<Arc<Message>>,
    /// Updated resumption token; pass it to the next call.
    pub cursor: String,
    /// True when the wait expired with nothing to deliver. The caller should
    /// simply poll again with the same cursor.
    pub timed_out: bool,
}

/// Interface for message publication and cursor-based retrieval.
///
/// Implementations:
/// - `LocalBus`: in-process topic logs with long-poll waiting
/// - `ScaleoutBus`: partitioned distribution over a `Broker`
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish one message to `source`. Returns the id assigned by the
    /// topic log.
    async fn send(&self, source: &str, key: &str, value: Bytes) -> Result<u64>;

    /// Wait for messages on `topics` past the positions encoded in `cursor`.
    ///
    /// Returns immediately when any requested topic already has newer
    /// messages; otherwise waits until a send arrives, `timeout` expires
    /// (`timed_out = true`), or `cancel` fires (`Err(BusError::Cancelled)`).
    /// Topics with no cursor entry start from their current tail; a cursor
    /// whose id does not parse, or points past the newest retained id, reads
    /// the full retained backlog.
    async fn get_messages(
        &self,
        topics: &[String],
        cursor: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<MessageResult>;
}
