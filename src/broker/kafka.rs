//! Kafka consumer backed by librdkafka.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer as _, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message as _;
use rdkafka::util::Timeout;

use super::{Broker, BrokerError, Consumer, Message};

/// Creates rdkafka stream consumers against a bootstrap list.
pub struct KafkaBroker {
    brokers: String,
}

impl KafkaBroker {
    pub fn new(brokers: String) -> Self {
        Self { brokers }
    }
}

impl Broker for KafkaBroker {
    fn create_consumer(&self, group_id: &str) -> Result<Box<dyn Consumer>, BrokerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group_id)
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        Ok(Box::new(KafkaConsumer {
            inner: Arc::new(consumer),
            closed: AtomicBool::new(false),
        }))
    }
}

struct KafkaConsumer {
    inner: Arc<StreamConsumer>,
    closed: AtomicBool,
}

fn classify(error: KafkaError) -> BrokerError {
    match error.rdkafka_error_code() {
        Some(RDKafkaErrorCode::AllBrokersDown) => BrokerError::Fatal(error.to_string()),
        _ => BrokerError::Transient(error.to_string()),
    }
}

#[async_trait]
impl Consumer for KafkaConsumer {
    async fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError> {
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.inner
            .subscribe(&topics)
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }

    async fn poll(&self, timeout: Duration) -> Option<Result<Message, BrokerError>> {
        if self.closed.load(Ordering::Acquire) {
            return Some(Err(BrokerError::Closed));
        }
        match tokio::time::timeout(timeout, self.inner.recv()).await {
            Err(_) => None,
            Ok(Ok(message)) => Some(Ok(Message::new(
                message.topic(),
                message.payload().unwrap_or_default(),
            ))),
            Ok(Err(e)) => Some(Err(classify(e))),
        }
    }

    async fn fetch_topics(&self, timeout: Duration) -> Result<Vec<String>, BrokerError> {
        let consumer = self.inner.clone();
        let metadata = tokio::task::spawn_blocking(move || {
            consumer.fetch_metadata(None, Timeout::After(timeout))
        })
        .await
        .map_err(|e| BrokerError::Metadata(e.to_string()))?
        .map_err(|e| BrokerError::Metadata(e.to_string()))?;

        Ok(metadata
            .topics()
            .iter()
            .map(|t| t.name().to_string())
            .collect())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(BrokerError::Closed);
        }
        // Leaving the group happens when the last handle is dropped.
        self.inner.unsubscribe();
        Ok(())
    }
}
