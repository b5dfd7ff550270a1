//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the broker and executor registry from configuration
//! - Subscribe every configured rule, in file order
//!
//! # Design Decisions
//! - Fail fast: the first rule that cannot be subscribed stops startup and
//!   tears down the rules already running

use std::sync::Arc;

use crate::broker::{self, Broker, BrokerError};
use crate::config::AppConfig;
use crate::subscription::{SubscribeError, Subscriber};
use crate::task::ExecutorRegistry;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("broker unavailable: {0}")]
    Broker(#[from] BrokerError),

    #[error("rule `{rule}` could not be subscribed: {source}")]
    Subscribe {
        rule: String,
        #[source]
        source: SubscribeError,
    },
}

/// Start the engine on the broker described by `config`.
pub async fn start(config: &AppConfig) -> Result<Subscriber, StartupError> {
    let broker = broker::from_config(&config.broker)?;
    start_with_broker(config, broker).await
}

/// Start the engine on an existing broker.
pub async fn start_with_broker(
    config: &AppConfig,
    broker: Arc<dyn Broker>,
) -> Result<Subscriber, StartupError> {
    let executors = Arc::new(ExecutorRegistry::from_config(config));
    let subscriber = Subscriber::from_config(config, broker, executors);

    for rule in &config.rules {
        if let Err(source) = subscriber.subscribe(rule.clone()).await {
            subscriber.unsubscribe().await;
            return Err(StartupError::Subscribe {
                rule: rule.name.clone(),
                source,
            });
        }
    }

    tracing::info!(rules = config.rules.len(), "All rules subscribed");
    Ok(subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;
    use crate::config::RuleConfig;

    #[tokio::test]
    async fn test_failed_rule_tears_down_started_ones() {
        let broker = MemoryBroker::new();
        broker.fail_metadata(1);

        let mut config = AppConfig::default();
        config.options.poll_timeout_ms = 20;
        config.rules = vec![
            RuleConfig {
                name: "static".into(),
                topic: "jobs".into(),
                ..Default::default()
            },
            RuleConfig {
                name: "dynamic".into(),
                topics: vec!["/^jobs/".into()],
                ..Default::default()
            },
        ];

        let result = start_with_broker(&config, Arc::new(broker.clone())).await;
        match result {
            Err(StartupError::Subscribe { rule, .. }) => assert_eq!(rule, "dynamic"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("startup should fail"),
        }
        assert_eq!(broker.open_consumers("timburr-static"), 0);
    }
}
