//! In-process broker.
//!
//! Topics are append-only logs; every consumer group keeps its own offset per
//! topic, starting from the earliest message. Metadata failures and consume
//! errors can be scripted, which makes the broker usable as a test double for
//! the subscription engine as well as for local runs without Kafka.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{Broker, BrokerError, Consumer, Message};

#[derive(Default)]
struct State {
    /// Topic names in creation order.
    topics: Vec<String>,
    logs: HashMap<String, Vec<Vec<u8>>>,
    /// (group, topic) -> next offset.
    offsets: HashMap<(String, String), usize>,
    /// Scripted errors, delivered to the next poll of a consumer in the group.
    pending_errors: HashMap<String, VecDeque<BrokerError>>,
    metadata_failures: usize,
    open_consumers: HashMap<String, usize>,
    created_consumers: HashMap<String, usize>,
}

struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

/// An in-memory broker shared by cheap clones.
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Create a topic if it does not exist yet.
    pub fn create_topic(&self, topic: &str) {
        let mut state = self.shared.state.lock();
        if !state.logs.contains_key(topic) {
            state.topics.push(topic.to_string());
            state.logs.insert(topic.to_string(), Vec::new());
        }
    }

    /// Delete a topic and its log.
    pub fn delete_topic(&self, topic: &str) {
        let mut state = self.shared.state.lock();
        state.topics.retain(|t| t != topic);
        state.logs.remove(topic);
        state.offsets.retain(|(_, t), _| t != topic);
    }

    /// Append a message, creating the topic on first use.
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        {
            let mut state = self.shared.state.lock();
            if !state.logs.contains_key(topic) {
                state.topics.push(topic.to_string());
            }
            state
                .logs
                .entry(topic.to_string())
                .or_default()
                .push(payload.into());
        }
        self.shared.notify.notify_waiters();
    }

    /// Make the next `count` catalog fetches fail.
    pub fn fail_metadata(&self, count: usize) {
        self.shared.state.lock().metadata_failures += count;
    }

    /// Queue an error for the next poll of any consumer in `group`.
    pub fn inject_error(&self, group: &str, error: BrokerError) {
        self.shared
            .state
            .lock()
            .pending_errors
            .entry(group.to_string())
            .or_default()
            .push_back(error);
        self.shared.notify.notify_waiters();
    }

    /// Number of consumers of `group` that are open right now.
    pub fn open_consumers(&self, group: &str) -> usize {
        self.shared
            .state
            .lock()
            .open_consumers
            .get(group)
            .copied()
            .unwrap_or(0)
    }

    /// Number of consumers ever created for `group`.
    pub fn created_consumers(&self, group: &str) -> usize {
        self.shared
            .state
            .lock()
            .created_consumers
            .get(group)
            .copied()
            .unwrap_or(0)
    }

    /// Committed offset of `group` on `topic`.
    pub fn offset(&self, group: &str, topic: &str) -> usize {
        self.shared
            .state
            .lock()
            .offsets
            .get(&(group.to_string(), topic.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn topics(&self) -> Vec<String> {
        self.shared.state.lock().topics.clone()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker for MemoryBroker {
    fn create_consumer(&self, group_id: &str) -> Result<Box<dyn Consumer>, BrokerError> {
        {
            let mut state = self.shared.state.lock();
            *state.open_consumers.entry(group_id.to_string()).or_default() += 1;
            *state
                .created_consumers
                .entry(group_id.to_string())
                .or_default() += 1;
        }
        Ok(Box::new(MemoryConsumer {
            shared: self.shared.clone(),
            group: group_id.to_string(),
            topics: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryConsumer {
    shared: Arc<Shared>,
    group: String,
    topics: Mutex<Vec<String>>,
    /// Round-robin start position across subscribed topics.
    cursor: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryConsumer {
    fn try_take(&self) -> Option<Result<Message, BrokerError>> {
        let topics = self.topics.lock().clone();
        let mut state = self.shared.state.lock();

        if let Some(error) = state
            .pending_errors
            .get_mut(&self.group)
            .and_then(VecDeque::pop_front)
        {
            return Some(Err(error));
        }

        if topics.is_empty() {
            return None;
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        for i in 0..topics.len() {
            let topic = &topics[(start + i) % topics.len()];
            let Some(len) = state.logs.get(topic).map(Vec::len) else {
                continue;
            };
            let key = (self.group.clone(), topic.clone());
            let offset = state.offsets.get(&key).copied().unwrap_or(0);
            if offset < len {
                state.offsets.insert(key, offset + 1);
                let payload = state.logs[topic][offset].clone();
                return Some(Ok(Message::new(topic.clone(), payload)));
            }
        }
        None
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        *self.topics.lock() = topics.to_vec();
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Option<Result<Message, BrokerError>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Some(Err(BrokerError::Closed));
            }
            // Register before checking so a publish in between is not missed.
            let notified = self.shared.notify.notified();
            if let Some(polled) = self.try_take() {
                return Some(polled);
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return None,
            }
        }
    }

    async fn fetch_topics(&self, _timeout: Duration) -> Result<Vec<String>, BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        let mut state = self.shared.state.lock();
        if state.metadata_failures > 0 {
            state.metadata_failures -= 1;
            return Err(BrokerError::Metadata("scripted metadata failure".to_string()));
        }
        Ok(state.topics.clone())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(BrokerError::Closed);
        }
        let mut state = self.shared.state.lock();
        if let Some(open) = state.open_consumers.get_mut(&self.group) {
            *open = open.saturating_sub(1);
        }
        Ok(())
    }
}
