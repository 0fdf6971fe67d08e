//! Bus configuration types.

use serde::Deserialize;

use crate::store::DEFAULT_TOPIC_CAPACITY;

/// Configuration for the in-process bus.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalBusConfig {
    /// Maximum messages retained per topic before eviction.
    pub topic_capacity: usize,
}

impl Default for LocalBusConfig {
    fn default() -> Self {
        Self {
            topic_capacity: DEFAULT_TOPIC_CAPACITY,
        }
    }
}

impl LocalBusConfig {
    pub fn with_topic_capacity(mut self, capacity: usize) -> Self {
        self.topic_capacity = capacity;
        self
    }
}

/// Configuration for the partitioned scaleout bus.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScaleoutConfig {
    /// Number of broker partitions. Routing is `hash(source) % partition_count`.
    pub partition_count: usize,
    /// Total enqueued-but-not-dispatched items allowed across all partitions.
    pub max_in_flight: usize,
    /// Maximum items requested per broker receive call.
    pub receive_batch_size: usize,
    /// Fixed sleep before retrying a throttled receive, in milliseconds.
    pub receive_backoff_ms: u64,
    /// Retry attempts when provisioning a partition during `open`.
    pub open_retry_max: usize,
}

impl Default for ScaleoutConfig {
    fn default() -> Self {
        Self {
            partition_count: 1,
            max_in_flight: 10_000,
            receive_batch_size: 32,
            receive_backoff_ms: 2000,
            open_retry_max: 5,
        }
    }
}

impl ScaleoutConfig {
    pub fn with_partition_count(mut self, count: usize) -> Self {
        self.partition_count = count.max(1);
        self
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max.max(1);
        self
    }

    pub fn with_receive_batch_size(mut self, size: usize) -> Self {
        self.receive_batch_size = size.max(1);
        self
    }

    pub fn with_receive_backoff_ms(mut self, millis: u64) -> Self {
        self.receive_backoff_ms = millis;
        self
    }

    pub fn with_open_retry_max(mut self, attempts: usize) -> Self {
        self.open_retry_max = attempts;
        self
    }
}
