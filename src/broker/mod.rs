//! Broker abstraction.
//!
//! # Data Flow
//! ```text
//! Broker::create_consumer(group_id)
//!     → Consumer::subscribe(topics)
//!     → Consumer::poll(timeout)  → Message | BrokerError | nothing
//!     → Consumer::close()
//!
//! Metadata queries:
//!     Consumer::fetch_topics(timeout) → full topic catalog
//! ```
//!
//! # Design Decisions
//! - Subscriptions depend only on these traits, never on transport details
//! - One consumer per subscription; the metadata watcher owns its own
//! - `BrokerError::Fatal` is the only condition that stops a poll loop

pub mod memory;

#[cfg(feature = "kafka")]
pub mod kafka;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{BrokerConfig, BrokerKind};

/// A message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Errors surfaced by broker consumers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    /// Consumer could not be created or could not subscribe.
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// All brokers are unreachable; the poll loop must stop.
    #[error("all brokers down: {0}")]
    Fatal(String),

    /// A consume error the loop can ride out.
    #[error("consume error: {0}")]
    Transient(String),

    /// Topic catalog could not be fetched.
    #[error("metadata fetch failed: {0}")]
    Metadata(String),

    /// The consumer was already closed.
    #[error("consumer closed")]
    Closed,
}

impl BrokerError {
    /// True when the condition stops the subscription that observed it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BrokerError::Fatal(_) | BrokerError::Closed)
    }
}

/// A live consumer handle bound to one consumer group.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Replace the consumer's subscription with `topics`.
    async fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError>;

    /// Wait up to `timeout` for the next message.
    ///
    /// Returns `None` when nothing arrived in time. Must be cancel safe.
    async fn poll(&self, timeout: Duration) -> Option<Result<Message, BrokerError>>;

    /// Fetch the broker's full topic catalog.
    async fn fetch_topics(&self, timeout: Duration) -> Result<Vec<String>, BrokerError>;

    /// Leave the consumer group and release the handle.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// Factory for consumers.
pub trait Broker: Send + Sync {
    fn create_consumer(&self, group_id: &str) -> Result<Box<dyn Consumer>, BrokerError>;
}

/// Build the broker described by the configuration.
pub fn from_config(config: &BrokerConfig) -> Result<Arc<dyn Broker>, BrokerError> {
    match config.kind {
        BrokerKind::Memory => {
            tracing::warn!("Using in-process memory broker; messages are not persisted");
            Ok(Arc::new(memory::MemoryBroker::new()))
        }
        #[cfg(feature = "kafka")]
        BrokerKind::Kafka => Ok(Arc::new(kafka::KafkaBroker::new(config.brokers.clone()))),
        #[cfg(not(feature = "kafka"))]
        BrokerKind::Kafka => Err(BrokerError::Connection(
            "kafka support not compiled in (enable the `kafka` feature)".to_string(),
        )),
    }
}
