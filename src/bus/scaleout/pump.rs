//! Per-partition receive pump.
//!
//! One pump task per partition pulls batches from the broker and feeds the
//! shared input queue. The loop is designed to run until shutdown no matter
//! what the backend does: throttling sleeps a fixed interval, any other
//! receive error retries immediately, and an undecodable frame is dropped
//! without stopping the pump.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, WireFrame};
use crate::bus::dispatch::DispatchQueue;

pub(super) struct PartitionPump {
    pub partition: usize,
    pub broker: Arc<dyn Broker>,
    pub queue: DispatchQueue,
    pub batch_size: usize,
    pub throttle_backoff: Duration,
    pub cancel: CancellationToken,
}

impl PartitionPump {
    pub async fn run(self) {
        info!(partition = self.partition, "Partition pump started");
        loop {
            let received = tokio::select! {
                received = self.broker.receive(self.partition, self.batch_size) => received,
                _ = self.cancel.cancelled() => break,
            };

            match received {
                Ok(items) => {
                    // Empty batch is routine; go straight back to receive.
                    for item in items {
                        let frame = match WireFrame::decode(&item.payload) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!(
                                    partition = self.partition,
                                    sequence = item.sequence,
                                    error = %e,
                                    "Dropping undecodable frame"
                                );
                                continue;
                            }
                        };
                        for message in frame.messages {
                            // Suspends while backpressure permits are
                            // exhausted; messages are never dropped.
                            if self
                                .queue
                                .enqueue(self.partition, item.sequence, message, &self.cancel)
                                .await
                                .is_err()
                            {
                                debug!(partition = self.partition, "Partition pump stopped");
                                return;
                            }
                        }
                    }
                }
                Err(e) if e.is_throttled() => {
                    warn!(
                        partition = self.partition,
                        error = %e,
                        delay = ?self.throttle_backoff,
                        "Broker throttled, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.throttle_backoff) => {}
                        _ = self.cancel.cancelled() => break,
                    }
                }
                Err(e) => {
                    error!(
                        partition = self.partition,
                        error = %e,
                        "Receive failed, retrying"
                    );
                }
            }
        }
        debug!(partition = self.partition, "Partition pump stopped");
    }
}
