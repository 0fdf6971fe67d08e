//! In-memory broker for tests.
//!
//! Behaves like a real partitioned backend: per-partition FIFO queues,
//! broker-assigned sequence numbers, and a blocking receive that waits for
//! traffic. Failure injection covers the paths the scaleout bus has to
//! survive: open failures, send failures, and transient receive errors.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{Broker, BrokerError, BrokerItem};

/// In-memory [`Broker`] with failure injection.
pub struct MockBroker {
    partitions: Vec<PartitionState>,
}

struct PartitionState {
    queue: Mutex<VecDeque<BrokerItem>>,
    faults: Mutex<VecDeque<BrokerError>>,
    notify: Notify,
    next_sequence: AtomicU64,
    fail_send: AtomicBool,
    fail_open: Mutex<Option<String>>,
}

impl MockBroker {
    pub fn new(partition_count: usize) -> Self {
        let partitions = (0..partition_count.max(1))
            .map(|_| PartitionState {
                queue: Mutex::new(VecDeque::new()),
                faults: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                next_sequence: AtomicU64::new(0),
                fail_send: AtomicBool::new(false),
                fail_open: Mutex::new(None),
            })
            .collect();
        Self { partitions }
    }

    fn state(&self, partition: usize) -> Result<&PartitionState, BrokerError> {
        self.partitions
            .get(partition)
            .ok_or_else(|| BrokerError::Connection(format!("unknown partition {partition}")))
    }

    /// Queue one error to be returned by the next `receive` on `partition`.
    pub fn inject_receive_error(&self, partition: usize, error: BrokerError) {
        if let Some(state) = self.partitions.get(partition) {
            state.faults.lock().push_back(error);
            state.notify.notify_one();
        }
    }

    /// Make `open` fail for `partition` with the given message.
    pub fn fail_open(&self, partition: usize, message: impl Into<String>) {
        if let Some(state) = self.partitions.get(partition) {
            *state.fail_open.lock() = Some(message.into());
        }
    }

    /// Toggle send failures for `partition`.
    pub fn set_fail_send(&self, partition: usize, fail: bool) {
        if let Some(state) = self.partitions.get(partition) {
            state.fail_send.store(fail, Ordering::SeqCst);
        }
    }

    /// Enqueue an arbitrary payload on `partition`, bypassing frame encoding.
    /// Used to exercise poison-frame handling.
    pub fn push_raw(&self, partition: usize, payload: Bytes) {
        if let Some(state) = self.partitions.get(partition) {
            let sequence = state.next_sequence.fetch_add(1, Ordering::SeqCst);
            state.queue.lock().push_back(BrokerItem { sequence, payload });
            state.notify.notify_one();
        }
    }

    /// Items currently queued on `partition` (not yet received).
    pub fn queued(&self, partition: usize) -> usize {
        self.partitions
            .get(partition)
            .map(|s| s.queue.lock().len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn open(&self, partition: usize) -> Result<(), BrokerError> {
        let state = self.state(partition)?;
        if let Some(message) = state.fail_open.lock().clone() {
            return Err(BrokerError::Open { partition, message });
        }
        Ok(())
    }

    async fn receive(
        &self,
        partition: usize,
        max_batch: usize,
    ) -> Result<Vec<BrokerItem>, BrokerError> {
        let state = self.state(partition)?;
        loop {
            // Arm the waiter before inspecting state so a concurrent push
            // between the check and the await still wakes us.
            let notified = state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(error) = state.faults.lock().pop_front() {
                return Err(error);
            }

            let items: Vec<BrokerItem> = {
                let mut queue = state.queue.lock();
                let take = max_batch.min(queue.len());
                queue.drain(..take).collect()
            };
            if !items.is_empty() {
                return Ok(items);
            }

            notified.await;
        }
    }

    async fn send(&self, partition: usize, frames: Vec<Bytes>) -> Result<u64, BrokerError> {
        let state = self.state(partition)?;
        if state.fail_send.load(Ordering::SeqCst) {
            return Err(BrokerError::Send(format!(
                "injected send failure on partition {partition}"
            )));
        }
        let mut last = 0;
        {
            let mut queue = state.queue.lock();
            for payload in frames {
                last = state.next_sequence.fetch_add(1, Ordering::SeqCst);
                queue.push_back(BrokerItem {
                    sequence: last,
                    payload,
                });
            }
        }
        state.notify.notify_one();
        Ok(last)
    }
}
