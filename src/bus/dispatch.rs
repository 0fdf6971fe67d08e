//! Input queue, dispatcher, and backpressure permits.
//!
//! All partition pumps feed one ordered hand-off queue. A single dispatcher
//! task dequeues in FIFO order and invokes the configured handler, which
//! performs the actual local send. Boundedness comes from a bus-wide
//! semaphore: a pump acquires one permit per item before enqueueing, and the
//! permit travels inside the queue item and drops only after the dispatcher
//! has finished with it. With permits exhausted, pumps suspend instead of
//! dropping messages.

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{BusError, MessageHandler, Result};
use crate::message::Message;

/// One message in flight between a pump and the dispatcher.
pub struct QueueItem {
    /// Partition the message was received from.
    pub partition: usize,
    /// Broker-assigned position within the partition.
    pub sequence: u64,
    pub message: Message,
    /// Backpressure permit, released when dispatch of this item completes.
    permit: OwnedSemaphorePermit,
}

/// Producer side of the input queue, shared by all pumps.
#[derive(Clone)]
pub struct DispatchQueue {
    tx: UnboundedSender<QueueItem>,
    permits: Arc<Semaphore>,
}

impl DispatchQueue {
    /// Create a queue bounded to `max_in_flight` outstanding items, plus the
    /// receiver half for the dispatcher.
    pub fn new(max_in_flight: usize) -> (Self, UnboundedReceiver<QueueItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            tx,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        };
        (queue, rx)
    }

    /// Enqueue one message, waiting for a backpressure permit if the bound is
    /// reached. Returns `Err(BusError::Cancelled)` if `cancel` fires while
    /// waiting.
    pub async fn enqueue(
        &self,
        partition: usize,
        sequence: u64,
        message: Message,
        cancel: &CancellationToken,
    ) -> Result<()> {
        // Non-blocking fast path first; fall back to an awaited acquire.
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tokio::select! {
                    acquired = self.permits.clone().acquire_owned() => {
                        acquired.map_err(|_| BusError::Cancelled)?
                    }
                    _ = cancel.cancelled() => return Err(BusError::Cancelled),
                }
            }
        };

        self.tx
            .send(QueueItem {
                partition,
                sequence,
                message,
                permit,
            })
            .map_err(|_| BusError::Cancelled)
    }

    /// Permits currently available, for tests and diagnostics.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Single consumer of the input queue.
pub struct Dispatcher {
    rx: UnboundedReceiver<QueueItem>,
    handler: Arc<dyn MessageHandler>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        rx: UnboundedReceiver<QueueItem>,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) -> Self {
        Self { rx, handler, cancel }
    }

    /// Dequeue and dispatch until the queue closes or shutdown is requested.
    ///
    /// Handler failures are logged and the loop continues; one bad message
    /// must not halt the pipeline.
    pub async fn run(mut self) {
        loop {
            let item = tokio::select! {
                item = self.rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
                _ = self.cancel.cancelled() => break,
            };

            let QueueItem {
                partition,
                sequence,
                message,
                permit,
            } = item;

            if let Err(e) = self.handler.handle(partition, sequence, message).await {
                error!(partition, sequence, error = %e, "Dispatch handler failed");
            }
            drop(permit);
        }
        debug!("Dispatcher stopped");
    }
}
