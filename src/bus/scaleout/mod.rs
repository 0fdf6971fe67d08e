//! Partitioned scaleout bus.
//!
//! Generalizes the in-process bus across N broker partitions. Outbound
//! messages are routed by a stable hash of their topic and published through
//! the broker; each partition runs a receive pump feeding one shared
//! dispatcher, which replays the traffic into the local bus so subscribers on
//! this node see scaleout messages as ordinary local messages.

mod pump;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use bytes::Bytes;
use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use twox_hash::XxHash64;

use super::dispatch::{DispatchQueue, Dispatcher};
use super::{BusError, MessageBus, MessageHandler, MessageResult, Result};
use crate::broker::{Broker, BrokerError, WireFrame};
use crate::bus::local::LocalBus;
use crate::config::{LocalBusConfig, ScaleoutConfig};
use crate::message::Message;

/// Dispatch handler that replays broker traffic into the local bus.
struct LocalSendHandler {
    local: Arc<LocalBus>,
}

impl MessageHandler for LocalSendHandler {
    fn handle(
        &self,
        _partition: usize,
        _sequence: u64,
        message: Message,
    ) -> BoxFuture<'static, Result<()>> {
        let local = self.local.clone();
        Box::pin(async move {
            local
                .send(&message.source, &message.key, message.value)
                .await?;
            Ok(())
        })
    }
}

/// Partitioned bus over a [`Broker`].
pub struct ScaleoutBus {
    local: Arc<LocalBus>,
    broker: Arc<dyn Broker>,
    config: ScaleoutConfig,
    queue: DispatchQueue,
    opened: AtomicBool,
    init_error: Mutex<Option<String>>,
    shutdown: CancellationToken,
}

impl ScaleoutBus {
    pub fn new(broker: Arc<dyn Broker>, config: ScaleoutConfig) -> Self {
        Self::with_local(
            Arc::new(LocalBus::new(LocalBusConfig::default())),
            broker,
            config,
        )
    }

    pub fn with_local(
        local: Arc<LocalBus>,
        broker: Arc<dyn Broker>,
        config: ScaleoutConfig,
    ) -> Self {
        let (queue, rx) = DispatchQueue::new(config.max_in_flight);
        let shutdown = CancellationToken::new();
        let handler: Arc<dyn MessageHandler> = Arc::new(LocalSendHandler {
            local: local.clone(),
        });
        tokio::spawn(Dispatcher::new(rx, handler, shutdown.clone()).run());

        Self {
            local,
            broker,
            config,
            queue,
            opened: AtomicBool::new(false),
            init_error: Mutex::new(None),
            shutdown,
        }
    }

    /// The local bus subscribers read from.
    pub fn local(&self) -> &Arc<LocalBus> {
        &self.local
    }

    /// Partition a topic routes to. Stable across processes.
    pub fn partition_for(&self, source: &str) -> usize {
        (XxHash64::oneshot(0, source.as_bytes()) % self.config.partition_count as u64) as usize
    }

    /// Provision every partition and start its pump.
    ///
    /// Partitions open concurrently with bounded exponential-backoff retries;
    /// one partition failing does not prevent the others from opening, and
    /// pumps start for every partition that did open. Any failure is recorded
    /// and makes subsequent sends fail until `open` succeeds.
    pub async fn open(&self) -> Result<()> {
        let attempts = (0..self.config.partition_count).map(|partition| async move {
            let result = (|| self.broker.open(partition))
                .retry(open_backoff(self.config.open_retry_max))
                .notify(|err: &BrokerError, dur: Duration| {
                    warn!(partition, error = %err, delay = ?dur, "Partition open failed, retrying");
                })
                .await;
            (partition, result)
        });

        let mut failures = Vec::new();
        for (partition, result) in join_all(attempts).await {
            match result {
                Ok(()) => {
                    info!(partition, "Partition opened");
                    self.spawn_pump(partition);
                }
                Err(e) => {
                    error!(partition, error = %e, "Partition open failed");
                    failures.push(format!("partition {partition}: {e}"));
                }
            }
        }

        if failures.is_empty() {
            *self.init_error.lock() = None;
            self.opened.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            let message = failures.join("; ");
            *self.init_error.lock() = Some(message.clone());
            Err(BusError::Initialization(message))
        }
    }

    fn spawn_pump(&self, partition: usize) {
        let pump = pump::PartitionPump {
            partition,
            broker: self.broker.clone(),
            queue: self.queue.clone(),
            batch_size: self.config.receive_batch_size,
            throttle_backoff: Duration::from_millis(self.config.receive_backoff_ms),
            cancel: self.shutdown.clone(),
        };
        tokio::spawn(pump.run());
    }

    fn ensure_open(&self) -> Result<()> {
        if let Some(message) = self.init_error.lock().clone() {
            return Err(BusError::Initialization(message));
        }
        if !self.opened.load(Ordering::SeqCst) {
            return Err(BusError::Initialization("open() has not completed".into()));
        }
        Ok(())
    }

    /// Publish a batch, routing each message by its topic.
    ///
    /// Messages are grouped per partition into one wire frame each and the
    /// frames are sent in parallel. A failure on one partition never blocks
    /// the others; the first failure is returned after all sends complete.
    pub async fn send_all(&self, messages: Vec<Message>) -> Result<()> {
        self.ensure_open()?;
        if messages.is_empty() {
            return Ok(());
        }

        let mut groups: HashMap<usize, Vec<Message>> = HashMap::new();
        for message in messages {
            groups
                .entry(self.partition_for(&message.source))
                .or_default()
                .push(message);
        }

        let sends = groups.into_iter().map(|(partition, group)| async move {
            let frame = WireFrame::new(group).encode()?;
            self.broker.send(partition, vec![frame]).await?;
            Ok::<(), BusError>(())
        });

        let mut first_failure = None;
        for result in join_all(sends).await {
            if let Err(e) = result {
                error!(error = %e, "Partition send failed");
                first_failure.get_or_insert(e);
            }
        }
        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop pumps and the dispatcher. In-flight items finish dispatching.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for ScaleoutBus {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl MessageBus for ScaleoutBus {
    /// Publishes through the broker; returns the broker sequence assigned to
    /// the frame. The topic-log id is assigned when the message comes back
    /// through the partition pump and dispatcher.
    async fn send(&self, source: &str, key: &str, value: Bytes) -> Result<u64> {
        self.ensure_open()?;
        let partition = self.partition_for(source);
        let frame = WireFrame::new(vec![Message::new(source, key, value)]).encode()?;
        let sequence = self.broker.send(partition, vec![frame]).await?;
        Ok(sequence)
    }

    async fn get_messages(
        &self,
        topics: &[String],
        cursor: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<MessageResult> {
        self.local.get_messages(topics, cursor, timeout, cancel).await
    }
}

fn open_backoff(max_times: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_secs(1))
        .with_max_times(max_times)
        .with_jitter()
}

#[cfg(test)]
mod tests;
