//! Rule-level subscription manager.
//!
//! Owns one subscription per rule and the metadata watcher shared by all
//! pattern rules. The watcher is only started when the first pattern rule
//! is subscribed.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Mutex;

use crate::broker::{Broker, BrokerError};
use crate::config::{AppConfig, RuleConfig};
use crate::subscription::rule::{classify, RuleKind};
use crate::subscription::watcher::{MetadataWatcher, WatcherOptions};
use crate::subscription::{
    BasicSubscription, RegexSubscription, SubscribeError, Subscription, SubscriptionContext,
};
use crate::task::ExecutorRegistry;

pub struct Subscriber {
    ctx: Arc<SubscriptionContext>,
    metadata_group_id: String,
    watcher_options: WatcherOptions,
    watcher: Mutex<Option<Arc<MetadataWatcher>>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Subscriber {
    pub fn new(
        ctx: Arc<SubscriptionContext>,
        metadata_group_id: impl Into<String>,
        watcher_options: WatcherOptions,
    ) -> Self {
        Self {
            ctx,
            metadata_group_id: metadata_group_id.into(),
            watcher_options,
            watcher: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(
        config: &AppConfig,
        broker: Arc<dyn Broker>,
        executors: Arc<ExecutorRegistry>,
    ) -> Self {
        let ctx = SubscriptionContext::new(broker, executors, &config.options);
        Self::new(
            Arc::new(ctx),
            config.options.metadata_watch_group_id.clone(),
            WatcherOptions::from_config(&config.broker, &config.options),
        )
    }

    /// Subscribe one rule. The subscription is tracked even when starting
    /// it fails, so `unsubscribe` still tears down whatever did start.
    pub async fn subscribe(&self, rule: RuleConfig) -> Result<(), SubscribeError> {
        let name = rule.name.clone();
        let subscription = match classify(&rule) {
            RuleKind::Static => Subscription::Basic(BasicSubscription::new(self.ctx.clone(), rule)),
            RuleKind::Dynamic => {
                let watcher = self.watcher().await?;
                Subscription::Regex(RegexSubscription::new(self.ctx.clone(), rule, Some(watcher))?)
            }
        };

        let mut subscriptions = self.subscriptions.lock().await;
        subscriptions.push(subscription);
        let result = match subscriptions.last() {
            Some(subscription) => subscription.subscribe().await,
            None => Ok(()),
        };
        if let Err(e) = &result {
            tracing::error!(rule = %name, error = %e, "Subscribe failed");
        }
        result
    }

    /// Stop every subscription, then the metadata watcher.
    pub async fn unsubscribe(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock().await);
        join_all(subscriptions.iter().map(Subscription::unsubscribe)).await;

        let watcher = self.watcher.lock().await.take();
        if let Some(watcher) = watcher {
            if let Err(e) = watcher.disconnect().await {
                tracing::warn!(error = %e, "Metadata watcher disconnect failed");
            }
        }
        tracing::info!(count = subscriptions.len(), "All subscriptions stopped");
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    /// Names of the rules whose subscription is running.
    pub async fn active_rules(&self) -> Vec<String> {
        let subscriptions = self.subscriptions.lock().await;
        let mut active = Vec::new();
        for subscription in subscriptions.iter() {
            if subscription.is_subscribed().await {
                active.push(subscription.rule().name.clone());
            }
        }
        active
    }

    pub async fn has_watcher(&self) -> bool {
        self.watcher.lock().await.is_some()
    }

    /// The shared watcher, started on first call.
    async fn watcher(&self) -> Result<Arc<MetadataWatcher>, BrokerError> {
        let mut slot = self.watcher.lock().await;
        if let Some(watcher) = slot.as_ref() {
            return Ok(watcher.clone());
        }
        let consumer = self.ctx.broker.create_consumer(&self.metadata_group_id)?;
        let watcher = Arc::new(MetadataWatcher::start(consumer, self.watcher_options.clone()).await?);
        *slot = Some(watcher.clone());
        Ok(watcher)
    }
}
