//! Topic catalog watcher.
//!
//! # Responsibilities
//! - Poll the broker's topic catalog on an interval
//! - Detect newly created topics
//! - Broadcast change and error events to registered listeners
//!
//! # Design Decisions
//! - Only additions produce an event; removals are ignored
//! - Broadcasts snapshot the listener list and are delivered by a helper
//!   task, so a slow listener never blocks polling
//! - Each listener has a bounded channel; an event that cannot be delivered
//!   within the send timeout is dropped for that listener only

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerError, Consumer};
use crate::config::{BrokerConfig, OptionsConfig};
use crate::observability::metrics;

/// Event delivered to watcher listeners.
#[derive(Debug, Clone)]
pub enum MetadataEvent {
    /// The catalog gained at least one topic; carries the full catalog.
    TopicsChanged(Vec<String>),
    /// The catalog could not be fetched; known topics are unchanged.
    FetchFailed(BrokerError),
}

/// Handle returned by `add_listener`, used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone)]
pub struct WatcherOptions {
    pub refresh_interval: Duration,
    pub fetch_timeout: Duration,
    pub listener_capacity: usize,
    pub send_timeout: Duration,
}

impl WatcherOptions {
    pub fn from_config(broker: &BrokerConfig, options: &OptionsConfig) -> Self {
        Self {
            refresh_interval: Duration::from_millis(options.metadata_watch_refresh_interval_ms),
            fetch_timeout: broker.fetch_timeout(),
            listener_capacity: options.listener_capacity.max(1),
            send_timeout: Duration::from_millis(options.listener_send_timeout_ms),
        }
    }
}

type Listeners = RwLock<Vec<(ListenerId, mpsc::Sender<MetadataEvent>)>>;
type Broadcast = (Vec<mpsc::Sender<MetadataEvent>>, MetadataEvent);

struct Shared {
    consumer: Box<dyn Consumer>,
    options: WatcherOptions,
    known: Mutex<Vec<String>>,
    listeners: Listeners,
    next_id: AtomicU64,
}

impl Shared {
    /// One poll: fetch, compare, and return the event to broadcast, if any.
    async fn refresh(&self) -> Option<MetadataEvent> {
        match self.consumer.fetch_topics(self.options.fetch_timeout).await {
            Err(e) => {
                metrics::record_metadata_error();
                tracing::warn!(error = %e, "Get topic error");
                Some(MetadataEvent::FetchFailed(e))
            }
            Ok(topics) => {
                metrics::record_metadata_topics(topics.len());
                let mut known = self.known.lock();
                if !has_new_topics(&known, &topics) {
                    return None;
                }
                tracing::info!(topics = ?topics, "Topic changed");
                *known = topics.clone();
                Some(MetadataEvent::TopicsChanged(topics))
            }
        }
    }

    fn snapshot(&self) -> Vec<mpsc::Sender<MetadataEvent>> {
        self.listeners
            .read()
            .iter()
            .map(|(_, tx)| tx.clone())
            .collect()
    }
}

/// True when `fetched` contains a topic missing from `known`.
pub fn has_new_topics(known: &[String], fetched: &[String]) -> bool {
    let known: HashSet<&str> = known.iter().map(String::as_str).collect();
    fetched.iter().any(|topic| !known.contains(topic.as_str()))
}

pub struct MetadataWatcher {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl MetadataWatcher {
    /// Fetch the initial catalog and start the polling loop.
    pub async fn start(
        consumer: Box<dyn Consumer>,
        options: WatcherOptions,
    ) -> Result<Self, BrokerError> {
        let topics = match consumer.fetch_topics(options.fetch_timeout).await {
            Ok(topics) => topics,
            Err(e) => {
                let _ = consumer.close().await;
                return Err(e);
            }
        };
        metrics::record_metadata_topics(topics.len());

        let shared = Arc::new(Shared {
            consumer,
            options,
            known: Mutex::new(topics),
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        });

        let cancel = CancellationToken::new();
        let (outbox, inbox) = mpsc::unbounded_channel();
        tokio::spawn(deliver(inbox, shared.options.send_timeout));
        let ticker = tokio::spawn(poll_loop(shared.clone(), cancel.child_token(), outbox));

        tracing::info!(
            interval_ms = shared.options.refresh_interval.as_millis() as u64,
            "Metadata watcher started"
        );

        Ok(Self {
            shared,
            cancel,
            ticker: Mutex::new(Some(ticker)),
        })
    }

    /// Register a listener. Events broadcast from now on reach it.
    pub fn add_listener(&self) -> (ListenerId, mpsc::Receiver<MetadataEvent>) {
        let (tx, rx) = mpsc::channel(self.shared.options.listener_capacity);
        let id = ListenerId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        self.shared.listeners.write().push((id, tx));
        (id, rx)
    }

    /// Deregister a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.write();
        match listeners.iter().position(|(listener, _)| *listener == id) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.read().len()
    }

    /// Topics known after the last successful change detection.
    pub fn known_topics(&self) -> Vec<String> {
        self.shared.known.lock().clone()
    }

    /// Query the broker's catalog directly.
    pub async fn fetch_topics(&self) -> Result<Vec<String>, BrokerError> {
        self.shared
            .consumer
            .fetch_topics(self.shared.options.fetch_timeout)
            .await
    }

    /// Stop polling and close the metadata consumer. Broadcasts already
    /// queued are still delivered.
    pub async fn disconnect(&self) -> Result<(), BrokerError> {
        self.cancel.cancel();
        let ticker = self.ticker.lock().take();
        if let Some(handle) = ticker {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Metadata watcher loop ended abnormally");
            }
        }
        self.shared.consumer.close().await
    }
}

impl Drop for MetadataWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_loop(
    shared: Arc<Shared>,
    cancel: CancellationToken,
    outbox: mpsc::UnboundedSender<Broadcast>,
) {
    let period = shared.options.refresh_interval;
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Some(event) = shared.refresh().await {
                    // Snapshot now: only current listeners receive this event.
                    if outbox.send((shared.snapshot(), event)).is_err() {
                        break;
                    }
                }
            }
        }
    }
    tracing::debug!("Metadata watcher loop stopped");
}

/// Deliver broadcasts in detection order.
async fn deliver(mut inbox: mpsc::UnboundedReceiver<Broadcast>, send_timeout: Duration) {
    while let Some((targets, event)) = inbox.recv().await {
        for tx in targets {
            match tx.send_timeout(event.clone(), send_timeout).await {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(_)) => {
                    tracing::warn!("Metadata listener not draining, event dropped");
                }
                // Receiver gone; it will be removed by its owner.
                Err(SendTimeoutError::Closed(_)) => {}
            }
        }
    }
}
