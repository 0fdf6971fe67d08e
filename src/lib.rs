//! Relaybus - real-time push message distribution
//!
//! Ordered, replayable, memory-bounded per-topic message logs with
//! cursor-based resumption, an in-process pub/sub bus with long-poll
//! waiting, and a partitioned scaleout bus fed by an external broker.

pub mod bootstrap;
pub mod broker;
pub mod bus;
pub mod config;
pub mod cursor;
pub mod message;
pub mod store;

pub use broker::{Broker, BrokerError, BrokerItem, WireFrame};
pub use bus::{
    BusError, LocalBus, MessageBus, MessageHandler, MessageResult, Result, ScaleoutBus,
};
pub use config::{LocalBusConfig, ScaleoutConfig};
pub use cursor::{format_cursors, parse_cursors, Cursor};
pub use message::Message;
pub use store::TopicStore;
