//! Subscription lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! Subscriber::subscribe(rule)
//!     → rule.rs (static or dynamic?)
//!     → static:  basic.rs  (one consumer, fixed topics, poll loop)
//!     → dynamic: regex.rs  (matches topics, owns an inner basic subscription)
//!                    ↑
//!                watcher.rs (catalog polling, new-topic events)
//!
//! Poll loop (per basic subscription):
//!     consumer.poll → rate limiter → executor registry → executor
//! ```
//!
//! # Design Decisions
//! - A subscription owns its consumer; the watcher's consumer is shared
//! - Messages of one subscription are executed one at a time, in order
//! - Stopping is cooperative: cancel the loop's token, then await the task
//! - A regex subscription never runs two inner subscriptions at once

pub mod basic;
pub mod regex;
pub mod rule;
pub mod subscriber;
pub mod watcher;

use std::sync::Arc;
use std::time::Duration;

pub use self::basic::BasicSubscription;
pub use self::regex::RegexSubscription;
pub use self::rule::{classify, RuleKind, TopicFilter};
pub use self::subscriber::Subscriber;
pub use self::watcher::{MetadataEvent, MetadataWatcher, WatcherOptions};

use crate::broker::{Broker, BrokerError};
use crate::config::{OptionsConfig, RuleConfig};
use crate::task::ExecutorRegistry;

#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("rule `{0}` uses topic patterns but no metadata watcher is attached")]
    NoWatcher(String),

    #[error("rule `{rule}` has an invalid topic pattern: {source}")]
    Pattern {
        rule: String,
        #[source]
        source: ::regex::Error,
    },
}

/// Dependencies shared by every subscription of a subscriber.
pub struct SubscriptionContext {
    pub broker: Arc<dyn Broker>,
    pub executors: Arc<ExecutorRegistry>,
    pub group_id_prefix: String,
    pub poll_timeout: Duration,
    /// Pause between stopping and rebuilding a regex rule's consumer.
    pub resubscribe_drain: Duration,
}

impl SubscriptionContext {
    pub fn new(
        broker: Arc<dyn Broker>,
        executors: Arc<ExecutorRegistry>,
        options: &OptionsConfig,
    ) -> Self {
        Self {
            broker,
            executors,
            group_id_prefix: options.group_id_prefix.clone(),
            poll_timeout: Duration::from_millis(options.poll_timeout_ms),
            resubscribe_drain: Duration::from_millis(options.resubscribe_drain_ms),
        }
    }

    /// Consumer group of a rule.
    pub fn group_id(&self, rule: &RuleConfig) -> String {
        format!("{}{}", self.group_id_prefix, rule.name)
    }
}

/// A running or idle subscription of either kind.
pub enum Subscription {
    Basic(BasicSubscription),
    Regex(RegexSubscription),
}

impl Subscription {
    pub fn kind(&self) -> RuleKind {
        match self {
            Subscription::Basic(_) => RuleKind::Static,
            Subscription::Regex(_) => RuleKind::Dynamic,
        }
    }

    pub fn rule(&self) -> &RuleConfig {
        match self {
            Subscription::Basic(sub) => sub.rule(),
            Subscription::Regex(sub) => sub.rule(),
        }
    }

    pub async fn subscribe(&self) -> Result<(), SubscribeError> {
        match self {
            Subscription::Basic(sub) => sub.subscribe().await,
            Subscription::Regex(sub) => sub.subscribe().await,
        }
    }

    pub async fn unsubscribe(&self) {
        match self {
            Subscription::Basic(sub) => sub.unsubscribe().await,
            Subscription::Regex(sub) => sub.unsubscribe().await,
        }
    }

    pub async fn is_subscribed(&self) -> bool {
        match self {
            Subscription::Basic(sub) => sub.is_subscribed().await,
            Subscription::Regex(sub) => sub.is_subscribed().await,
        }
    }
}
