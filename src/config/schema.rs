//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the dispatcher.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Broker connection settings.
    #[serde(alias = "kafka")]
    pub broker: BrokerConfig,

    /// Subscription engine options.
    pub options: OptionsConfig,

    /// Job runner executor settings.
    #[serde(alias = "jobRunner")]
    pub job_runner: JobRunnerConfig,

    /// Purge executor settings.
    pub purge: PurgeConfig,

    /// Consumption rules.
    pub rules: Vec<RuleConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    #[default]
    Kafka,
    Memory,
}

/// Broker connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker implementation.
    pub kind: BrokerKind,

    /// Bootstrap broker list (e.g., "kafka-1:9092,kafka-2:9092").
    #[serde(alias = "brokerList")]
    pub brokers: String,

    /// Timeout for topic catalog queries in milliseconds.
    pub fetch_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::Kafka,
            brokers: "localhost:9092".to_string(),
            fetch_timeout_ms: 5000,
        }
    }
}

impl BrokerConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Subscription engine options.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OptionsConfig {
    /// Prefix prepended to the rule name to form its consumer group.
    #[serde(alias = "groupIDPrefix")]
    pub group_id_prefix: String,

    /// Consumer group used by the metadata watcher.
    #[serde(alias = "metadataWatchGroupID")]
    pub metadata_watch_group_id: String,

    /// Topic catalog refresh interval in milliseconds.
    #[serde(alias = "metadataWatchRefreshInterval")]
    pub metadata_watch_refresh_interval_ms: u64,

    /// Bounded wait of a single broker poll in milliseconds.
    pub poll_timeout_ms: u64,

    /// Delay between stopping and rebuilding a regex rule's consumer.
    pub resubscribe_drain_ms: u64,

    /// Capacity of each metadata listener channel.
    pub listener_capacity: usize,

    /// How long a broadcast waits on a full listener before dropping the event.
    pub listener_send_timeout_ms: u64,

    /// Upper bound on the time spent stopping subscriptions at exit.
    pub shutdown_timeout_ms: u64,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            group_id_prefix: "timburr-".to_string(),
            metadata_watch_group_id: "timburr-metadata-watcher".to_string(),
            metadata_watch_refresh_interval_ms: 60_000,
            poll_timeout_ms: 100,
            resubscribe_drain_ms: 5000,
            listener_capacity: 16,
            listener_send_timeout_ms: 5000,
            shutdown_timeout_ms: 30_000,
        }
    }
}

/// What the job runner does once every attempt has failed.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Return the error to the subscription, which logs and counts it.
    #[default]
    Surface,
    /// Log the failure and report success.
    Swallow,
}

/// Job runner configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JobRunnerConfig {
    /// Endpoint receiving the job as a JSON POST.
    pub endpoint: String,

    /// Top-level fields stripped before forwarding.
    #[serde(alias = "excludeFields")]
    pub exclude_fields: Vec<String>,

    /// HTTP client timeout in seconds.
    pub timeout_secs: u64,

    /// Total attempts, including the first.
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles afterwards.
    pub base_delay_ms: u64,

    /// Upper bound for a single delay.
    pub max_delay_ms: u64,

    pub failure_policy: FailurePolicy,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            exclude_fields: Vec::new(),
            timeout_secs: 180,
            max_attempts: 4,
            base_delay_ms: 1000,
            max_delay_ms: 8000,
            failure_policy: FailurePolicy::Surface,
        }
    }
}

/// Purge executor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PurgeConfig {
    /// Events older than this (milliseconds) are skipped.
    #[serde(alias = "expiry")]
    pub expiry_ms: u64,

    /// HTTP client timeout in seconds.
    pub timeout_secs: u64,

    /// Cloudflare API token.
    #[serde(alias = "cfToken")]
    pub cf_token: Option<String>,

    /// Cloudflare zone purged by "cloudflare" entries.
    #[serde(alias = "cfZoneID")]
    pub cf_zone_id: String,

    /// Cloudflare API base URL.
    pub cf_api_base: String,

    pub entries: Vec<PurgeEntryConfig>,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            expiry_ms: 86_400_000,
            timeout_secs: 2,
            cf_token: None,
            cf_zone_id: String::new(),
            cf_api_base: "https://api.cloudflare.com/client/v4".to_string(),
            entries: Vec::new(),
        }
    }
}

/// Describes how purge requests are generated for one host.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PurgeEntryConfig {
    /// Host of the event URL this entry applies to.
    pub host: String,

    /// HTTP method, or "cloudflare" for the CDN purge API.
    pub method: String,

    /// URL templates with `#url#` and `#variants#` placeholders.
    pub uris: Vec<String>,

    /// Extra request headers; `Host` overrides the request host.
    pub headers: BTreeMap<String, String>,

    /// Recognized variant tokens.
    pub variants: Vec<String>,
}

/// A consumption rule.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RuleConfig {
    /// Rule name, also the consumer group suffix.
    pub name: String,

    /// Single topic, used when `topics` is empty.
    pub topic: String,

    /// Topic list; `/pattern/` entries are regular expressions.
    pub topics: Vec<String>,

    /// Topics never consumed by this rule.
    #[serde(alias = "excludeTopics")]
    pub exclude_topics: Vec<String>,

    /// Executor name ("job-runner", "purge").
    #[serde(alias = "taskType")]
    pub task_type: String,

    /// Messages allowed per interval; 0 disables limiting.
    #[serde(alias = "rateLimit")]
    pub rate_limit: u32,

    /// Rate limit interval in milliseconds; 0 means one second.
    #[serde(alias = "rateInterval")]
    pub rate_interval_ms: u64,
}

impl RuleConfig {
    /// Configured topic entries: `topics` if set, otherwise `[topic]`.
    pub fn topic_entries(&self) -> Vec<String> {
        if self.topics.is_empty() {
            vec![self.topic.clone()]
        } else {
            self.topics.clone()
        }
    }

    /// Rate limiting window, defaulting to one second.
    pub fn rate_interval(&self) -> Duration {
        if self.rate_interval_ms == 0 {
            Duration::from_millis(1000)
        } else {
            Duration::from_millis(self.rate_interval_ms)
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "text" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
