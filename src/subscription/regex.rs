//! Pattern subscription.
//!
//! # Responsibilities
//! - Resolve the rule's patterns against the broker's topic catalog
//! - Run one inner `BasicSubscription` on the matched topics
//! - Rebuild the inner subscription when the watcher reports new topics
//!
//! # Design Decisions
//! - The old inner subscription is fully stopped, then the drain delay
//!   elapses, before the new one is created
//! - Watcher fetch failures keep the current inner subscription
//! - An empty match leaves the rule idle until a matching topic appears

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RuleConfig;
use crate::subscription::basic::BasicSubscription;
use crate::subscription::rule::TopicFilter;
use crate::subscription::watcher::{ListenerId, MetadataEvent, MetadataWatcher};
use crate::subscription::{SubscribeError, SubscriptionContext};

struct Shared {
    ctx: Arc<SubscriptionContext>,
    rule: RuleConfig,
    filter: TopicFilter,
    inner: Mutex<Option<BasicSubscription>>,
}

impl Shared {
    /// Replace the inner subscription with one on `topics`.
    async fn resubscribe(&self, topics: Vec<String>) -> Result<(), SubscribeError> {
        let mut inner = self.inner.lock().await;
        if let Some(previous) = inner.take() {
            previous.unsubscribe().await;
            tokio::time::sleep(self.ctx.resubscribe_drain).await;
        }

        if topics.is_empty() {
            tracing::info!(rule = %self.rule.name, "No topic matches, waiting for new topics");
            return Ok(());
        }

        let next = BasicSubscription::with_topics(self.ctx.clone(), self.rule.clone(), topics);
        next.subscribe().await?;
        *inner = Some(next);
        Ok(())
    }
}

struct EventLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    listener: ListenerId,
}

pub struct RegexSubscription {
    shared: Arc<Shared>,
    watcher: Option<Arc<MetadataWatcher>>,
    running: Mutex<Option<EventLoop>>,
}

impl RegexSubscription {
    pub fn new(
        ctx: Arc<SubscriptionContext>,
        rule: RuleConfig,
        watcher: Option<Arc<MetadataWatcher>>,
    ) -> Result<Self, SubscribeError> {
        let filter = TopicFilter::new(&rule).map_err(|source| SubscribeError::Pattern {
            rule: rule.name.clone(),
            source,
        })?;
        Ok(Self {
            shared: Arc::new(Shared {
                ctx,
                rule,
                filter,
                inner: Mutex::new(None),
            }),
            watcher,
            running: Mutex::new(None),
        })
    }

    pub fn set_watcher(&mut self, watcher: Arc<MetadataWatcher>) {
        self.watcher = Some(watcher);
    }

    pub fn rule(&self) -> &RuleConfig {
        &self.shared.rule
    }

    /// Topics the inner subscription consumes, `None` while idle.
    pub async fn current_topics(&self) -> Option<Vec<String>> {
        self.shared
            .inner
            .lock()
            .await
            .as_ref()
            .map(|inner| inner.topics().to_vec())
    }

    /// Subscribe to the currently matching topics and follow catalog changes.
    pub async fn subscribe(&self) -> Result<(), SubscribeError> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            if !current.handle.is_finished() {
                return Ok(());
            }
        }
        let watcher = self
            .watcher
            .clone()
            .ok_or_else(|| SubscribeError::NoWatcher(self.shared.rule.name.clone()))?;

        // Listen first so a topic created during the initial fetch is not missed.
        let (listener, events) = watcher.add_listener();
        let initial = match watcher.fetch_topics().await {
            Ok(topics) => self.shared.filter.filter(&topics),
            Err(e) => {
                watcher.remove_listener(listener);
                return Err(e.into());
            }
        };
        tracing::info!(rule = %self.shared.rule.name, topics = ?initial, "Matched topics");
        if let Err(e) = self.shared.resubscribe(initial).await {
            watcher.remove_listener(listener);
            return Err(e);
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(follow_catalog(
            self.shared.clone(),
            watcher,
            listener,
            events,
            cancel.clone(),
        ));
        *running = Some(EventLoop {
            cancel,
            handle,
            listener,
        });
        Ok(())
    }

    /// Stop following the catalog and stop the inner subscription.
    pub async fn unsubscribe(&self) {
        let current = self.running.lock().await.take();
        if let Some(current) = current {
            current.cancel.cancel();
            if let Err(e) = current.handle.await {
                tracing::warn!(rule = %self.shared.rule.name, error = %e, "Catalog loop ended abnormally");
            }
            if let Some(watcher) = &self.watcher {
                watcher.remove_listener(current.listener);
            }
        }

        let inner = self.shared.inner.lock().await.take();
        if let Some(inner) = inner {
            inner.unsubscribe().await;
        }
    }

    pub async fn is_subscribed(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|current| !current.handle.is_finished())
    }
}

impl Drop for RegexSubscription {
    fn drop(&mut self) {
        if let Some(current) = self.running.get_mut() {
            current.cancel.cancel();
        }
    }
}

async fn follow_catalog(
    shared: Arc<Shared>,
    watcher: Arc<MetadataWatcher>,
    listener: ListenerId,
    mut events: mpsc::Receiver<MetadataEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            None => break,
            Some(MetadataEvent::FetchFailed(e)) => {
                tracing::debug!(rule = %shared.rule.name, error = %e, "Catalog unavailable, keeping topics");
            }
            Some(MetadataEvent::TopicsChanged(topics)) => {
                let matched = shared.filter.filter(&topics);
                tracing::info!(rule = %shared.rule.name, topics = ?matched, "Topic changed, resubscribing");
                if let Err(e) = shared.resubscribe(matched).await {
                    tracing::error!(rule = %shared.rule.name, error = %e, "Resubscribe failed");
                }
            }
        }
    }
    watcher.remove_listener(listener);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;
    use crate::broker::Broker;
    use crate::subscription::watcher::WatcherOptions;
    use crate::task::ExecutorRegistry;
    use std::time::Duration;

    fn context(broker: &MemoryBroker) -> Arc<SubscriptionContext> {
        Arc::new(SubscriptionContext {
            broker: Arc::new(broker.clone()),
            executors: Arc::new(ExecutorRegistry::new()),
            group_id_prefix: "test-".into(),
            poll_timeout: Duration::from_millis(20),
            resubscribe_drain: Duration::from_secs(5),
        })
    }

    async fn watcher(broker: &MemoryBroker) -> Arc<MetadataWatcher> {
        let consumer = broker.create_consumer("watcher").unwrap();
        let options = WatcherOptions {
            refresh_interval: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(1),
            listener_capacity: 4,
            send_timeout: Duration::from_secs(1),
        };
        Arc::new(MetadataWatcher::start(consumer, options).await.unwrap())
    }

    fn rule() -> RuleConfig {
        RuleConfig {
            name: "dyn".into(),
            topics: vec!["/^jobs\\./".into()],
            exclude_topics: vec!["jobs.skip".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_requires_watcher() {
        let broker = MemoryBroker::new();
        let sub = RegexSubscription::new(context(&broker), rule(), None).unwrap();
        assert!(matches!(sub.subscribe().await, Err(SubscribeError::NoWatcher(_))));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let broker = MemoryBroker::new();
        let bad = RuleConfig {
            name: "bad".into(),
            topics: vec!["/([/".into()],
            ..Default::default()
        };
        assert!(matches!(
            RegexSubscription::new(context(&broker), bad, None),
            Err(SubscribeError::Pattern { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_match_applies_exclusions() {
        let broker = MemoryBroker::new();
        for topic in ["jobs.a", "other", "jobs.skip", "jobs.b"] {
            broker.create_topic(topic);
        }
        let watcher = watcher(&broker).await;
        let sub = RegexSubscription::new(context(&broker), rule(), Some(watcher.clone())).unwrap();
        sub.subscribe().await.unwrap();

        assert_eq!(sub.current_topics().await.unwrap(), vec!["jobs.a", "jobs.b"]);
        assert_eq!(watcher.listener_count(), 1);

        sub.unsubscribe().await;
        assert_eq!(watcher.listener_count(), 0);
        assert_eq!(broker.open_consumers("test-dyn"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_match_stays_idle() {
        let broker = MemoryBroker::new();
        broker.create_topic("other");
        let watcher = watcher(&broker).await;
        let sub = RegexSubscription::new(context(&broker), rule(), Some(watcher)).unwrap();
        sub.subscribe().await.unwrap();

        assert!(sub.is_subscribed().await);
        assert!(sub.current_topics().await.is_none());
        assert_eq!(broker.created_consumers("test-dyn"), 0);
        sub.unsubscribe().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_topic_rebuilds_consumer_after_drain() {
        let broker = MemoryBroker::new();
        broker.create_topic("jobs.a");
        let watcher = watcher(&broker).await;
        let sub = RegexSubscription::new(context(&broker), rule(), Some(watcher)).unwrap();
        sub.subscribe().await.unwrap();
        assert_eq!(broker.created_consumers("test-dyn"), 1);

        broker.create_topic("jobs.b");
        // Next catalog poll at 60s, then the 5s drain.
        tokio::time::sleep(Duration::from_secs(62)).await;
        assert_eq!(broker.open_consumers("test-dyn"), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sub.current_topics().await.unwrap(), vec!["jobs.a", "jobs.b"]);
        assert_eq!(broker.created_consumers("test-dyn"), 2);
        assert_eq!(broker.open_consumers("test-dyn"), 1);

        sub.unsubscribe().await;
    }
}
