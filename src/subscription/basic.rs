//! Fixed-topic subscription.
//!
//! # Responsibilities
//! - Create the rule's consumer and subscribe it to a fixed topic list
//! - Run the poll loop: rate limit, resolve executor, execute
//! - Stop the loop on request or when the broker becomes unreachable
//!
//! # Design Decisions
//! - The loop task owns the consumer and closes it on exit
//! - `unsubscribe` returns only after the loop has exited, so no message
//!   of this subscription is executing once it returns
//! - Executor errors are logged and the loop moves to the next message
//! - The rate limiter is awaited before polling, so a stop never discards a
//!   message that was already taken from the broker

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broker::{Consumer, Message};
use crate::config::RuleConfig;
use crate::observability::metrics;
use crate::resilience::RateLimiter;
use crate::subscription::{SubscribeError, SubscriptionContext};

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct BasicSubscription {
    ctx: Arc<SubscriptionContext>,
    rule: Arc<RuleConfig>,
    topics: Vec<String>,
    running: Mutex<Option<RunningLoop>>,
}

impl BasicSubscription {
    /// Subscription to the topics listed by the rule.
    pub fn new(ctx: Arc<SubscriptionContext>, rule: RuleConfig) -> Self {
        let topics = rule.topic_entries();
        Self::with_topics(ctx, rule, topics)
    }

    /// Subscription to an explicit topic list, ignoring the rule's own.
    pub fn with_topics(ctx: Arc<SubscriptionContext>, rule: RuleConfig, topics: Vec<String>) -> Self {
        Self {
            ctx,
            rule: Arc::new(rule),
            topics,
            running: Mutex::new(None),
        }
    }

    pub fn rule(&self) -> &RuleConfig {
        &self.rule
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Start consuming. A no-op while the loop is already running.
    pub async fn subscribe(&self) -> Result<(), SubscribeError> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            if !current.handle.is_finished() {
                return Ok(());
            }
        }
        // Reap a loop that stopped on its own.
        if let Some(stopped) = running.take() {
            let _ = stopped.handle.await;
        }

        let group_id = self.ctx.group_id(&self.rule);
        let consumer = self.ctx.broker.create_consumer(&group_id)?;
        if let Err(e) = consumer.subscribe(&self.topics).await {
            if let Err(close_err) = consumer.close().await {
                tracing::debug!(rule = %self.rule.name, error = %close_err, "Close consumer failed");
            }
            return Err(e.into());
        }

        let cancel = CancellationToken::new();
        let poll_loop = PollLoop {
            ctx: self.ctx.clone(),
            rule: self.rule.clone(),
            consumer,
            limiter: RateLimiter::for_rule(&self.rule),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(poll_loop.run());
        *running = Some(RunningLoop { cancel, handle });

        tracing::info!(
            rule = %self.rule.name,
            group_id = %group_id,
            topics = ?self.topics,
            "Subscribed"
        );
        Ok(())
    }

    /// Stop consuming and wait for the loop to exit. A no-op when idle.
    pub async fn unsubscribe(&self) {
        let Some(current) = self.running.lock().await.take() else {
            return;
        };
        current.cancel.cancel();
        if let Err(e) = current.handle.await {
            tracing::warn!(rule = %self.rule.name, error = %e, "Poll loop ended abnormally");
        }
        tracing::info!(rule = %self.rule.name, "Unsubscribed");
    }

    /// True while the poll loop is running.
    pub async fn is_subscribed(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|current| !current.handle.is_finished())
    }
}

impl Drop for BasicSubscription {
    fn drop(&mut self) {
        if let Some(current) = self.running.get_mut() {
            current.cancel.cancel();
        }
    }
}

struct PollLoop {
    ctx: Arc<SubscriptionContext>,
    rule: Arc<RuleConfig>,
    consumer: Box<dyn Consumer>,
    limiter: Option<RateLimiter>,
    cancel: CancellationToken,
}

impl PollLoop {
    async fn run(self) {
        loop {
            // Wait for capacity before taking a message off the broker; a
            // polled message is always executed.
            if let Some(limiter) = &self.limiter {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    _ = limiter.ready() => {}
                }
            }

            let polled = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                polled = self.consumer.poll(self.ctx.poll_timeout) => polled,
            };

            match polled {
                None => continue,
                Some(Ok(message)) => {
                    if let Some(limiter) = &self.limiter {
                        limiter.acquire().await;
                    }
                    self.dispatch(message).await;
                }
                Some(Err(e)) if e.is_fatal() => {
                    tracing::error!(rule = %self.rule.name, error = %e, "Broker unreachable, subscription stopped");
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(rule = %self.rule.name, error = %e, "Consume error");
                }
            }
        }

        if let Err(e) = self.consumer.close().await {
            tracing::debug!(rule = %self.rule.name, error = %e, "Close consumer failed");
        }
        tracing::debug!(rule = %self.rule.name, "Poll loop stopped");
    }

    async fn dispatch(&self, message: Message) {
        let started = Instant::now();
        let result = match self.ctx.executors.get(&self.rule.task_type) {
            Ok(executor) => executor.execute(&message.payload).await,
            Err(e) => Err(e),
        };
        metrics::record_dispatch(&self.rule.name, result.is_ok(), started);

        if let Err(e) = result {
            tracing::warn!(
                rule = %self.rule.name,
                topic = %message.topic,
                task_type = %self.rule.task_type,
                error = %e,
                "Execute message error"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;
    use crate::broker::BrokerError;
    use crate::task::{Executor, ExecutorRegistry, TaskError};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Records payloads; fails on payloads equal to `fail_on`.
    struct Recorder {
        seen: Arc<parking_lot::Mutex<Vec<String>>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl Executor for Recorder {
        async fn execute(&self, message: &[u8]) -> Result<(), TaskError> {
            let text = String::from_utf8_lossy(message).to_string();
            self.seen.lock().push(text.clone());
            if self.fail_on == Some(text.as_str()) {
                return Err(TaskError::Delivery("scripted".into()));
            }
            Ok(())
        }
    }

    fn context(
        broker: &MemoryBroker,
        fail_on: Option<&'static str>,
    ) -> (Arc<SubscriptionContext>, Arc<parking_lot::Mutex<Vec<String>>>) {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let recorded = seen.clone();
        let mut registry = ExecutorRegistry::new();
        registry.register("job-runner", move || {
            Ok(Arc::new(Recorder {
                seen: recorded.clone(),
                fail_on,
            }) as Arc<dyn Executor>)
        });
        let ctx = SubscriptionContext {
            broker: Arc::new(broker.clone()),
            executors: Arc::new(registry),
            group_id_prefix: "test-".into(),
            poll_timeout: Duration::from_millis(20),
            resubscribe_drain: Duration::from_millis(0),
        };
        (Arc::new(ctx), seen)
    }

    fn rule(topic: &str) -> RuleConfig {
        RuleConfig {
            name: "r".into(),
            topic: topic.into(),
            task_type: "job-runner".into(),
            ..Default::default()
        }
    }

    async fn wait_for(seen: &parking_lot::Mutex<Vec<String>>, count: usize) {
        for _ in 0..200 {
            if seen.lock().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} messages, saw {:?}", seen.lock());
    }

    #[tokio::test]
    async fn test_messages_dispatched_in_order() {
        let broker = MemoryBroker::new();
        for i in 0..5 {
            broker.publish("jobs", format!("m{i}"));
        }
        let (ctx, seen) = context(&broker, None);
        let sub = BasicSubscription::new(ctx, rule("jobs"));
        sub.subscribe().await.unwrap();

        wait_for(&seen, 5).await;
        assert_eq!(*seen.lock(), vec!["m0", "m1", "m2", "m3", "m4"]);
        sub.unsubscribe().await;
        assert_eq!(broker.open_consumers("test-r"), 0);
    }

    #[tokio::test]
    async fn test_executor_error_does_not_stop_loop() {
        let broker = MemoryBroker::new();
        broker.publish("jobs", "bad");
        broker.publish("jobs", "good");
        let (ctx, seen) = context(&broker, Some("bad"));
        let sub = BasicSubscription::new(ctx, rule("jobs"));
        sub.subscribe().await.unwrap();

        wait_for(&seen, 2).await;
        assert!(sub.is_subscribed().await);
        sub.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_fatal_error_stops_loop_and_transient_does_not() {
        let broker = MemoryBroker::new();
        let (ctx, seen) = context(&broker, None);
        let sub = BasicSubscription::new(ctx, rule("jobs"));
        sub.subscribe().await.unwrap();

        broker.inject_error("test-r", BrokerError::Transient("blip".into()));
        broker.publish("jobs", "after-blip");
        wait_for(&seen, 1).await;
        assert!(sub.is_subscribed().await);

        broker.inject_error("test-r", BrokerError::Fatal("gone".into()));
        for _ in 0..200 {
            if !sub.is_subscribed().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!sub.is_subscribed().await);
        assert_eq!(broker.open_consumers("test-r"), 0);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let broker = MemoryBroker::new();
        let (ctx, _seen) = context(&broker, None);
        let sub = BasicSubscription::new(ctx, rule("jobs"));
        sub.subscribe().await.unwrap();
        sub.subscribe().await.unwrap();
        assert_eq!(broker.created_consumers("test-r"), 1);

        sub.unsubscribe().await;
        sub.unsubscribe().await;
        assert!(!sub.is_subscribed().await);
    }

    #[tokio::test]
    async fn test_rate_limit_spaces_dispatches() {
        let broker = MemoryBroker::new();
        for i in 0..3 {
            broker.publish("jobs", format!("m{i}"));
        }
        let (ctx, seen) = context(&broker, None);
        let limited = RuleConfig {
            rate_limit: 1,
            rate_interval_ms: 200,
            ..rule("jobs")
        };
        let sub = BasicSubscription::new(ctx, limited);
        let started = Instant::now();
        sub.subscribe().await.unwrap();

        wait_for(&seen, 3).await;
        assert!(started.elapsed() >= Duration::from_millis(400));
        sub.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_stop_while_rate_limited_loses_no_message() {
        let broker = MemoryBroker::new();
        broker.publish("jobs", "m0");
        broker.publish("jobs", "m1");
        let (ctx, seen) = context(&broker, None);
        let limited = RuleConfig {
            rate_limit: 1,
            rate_interval_ms: 10_000,
            ..rule("jobs")
        };

        let first = BasicSubscription::new(ctx.clone(), limited.clone());
        first.subscribe().await.unwrap();
        wait_for(&seen, 1).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        first.unsubscribe().await;
        assert_eq!(*seen.lock(), vec!["m0"]);
        // m1 stays on the broker while the window is full.
        assert_eq!(broker.offset("test-r", "jobs"), 1);

        let second = BasicSubscription::new(ctx, RuleConfig { rate_limit: 0, ..limited });
        second.subscribe().await.unwrap();
        wait_for(&seen, 2).await;
        assert_eq!(*seen.lock(), vec!["m0", "m1"]);
        second.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_resubscribe_after_unsubscribe_creates_new_consumer() {
        let broker = MemoryBroker::new();
        broker.publish("jobs", "m0");
        let (ctx, seen) = context(&broker, None);
        let sub = BasicSubscription::new(ctx, rule("jobs"));

        sub.subscribe().await.unwrap();
        wait_for(&seen, 1).await;
        sub.unsubscribe().await;
        assert!(!sub.is_subscribed().await);

        broker.publish("jobs", "m1");
        sub.subscribe().await.unwrap();
        assert!(sub.is_subscribed().await);
        wait_for(&seen, 2).await;

        assert_eq!(broker.created_consumers("test-r"), 2);
        assert_eq!(broker.open_consumers("test-r"), 1);
        assert_eq!(*seen.lock(), vec!["m0", "m1"]);
        sub.unsubscribe().await;
    }
}
