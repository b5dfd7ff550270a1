//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check every rule can be subscribed (name, topics, patterns)
//! - Check executors referenced by rules are configured
//! - Validate value ranges (intervals > 0, attempts > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use crate::config::schema::AppConfig;
use crate::subscription::rule::regex_pattern;
use crate::task::{TaskType, CLOUDFLARE_METHOD};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("rule #{0} has an empty name")]
    EmptyRuleName(usize),

    #[error("rule name `{0}` is used more than once")]
    DuplicateRuleName(String),

    #[error("rule `{0}` has no topic")]
    NoTopic(String),

    #[error("rule `{rule}` has an invalid pattern `{pattern}`: {reason}")]
    InvalidPattern {
        rule: String,
        pattern: String,
        reason: String,
    },

    #[error("options.{0} must be greater than zero")]
    ZeroOption(&'static str),

    #[error("rule `{0}` runs jobs but job_runner.endpoint is empty")]
    MissingJobEndpoint(String),

    #[error("job_runner.max_attempts must be at least 1")]
    NoAttempts,

    #[error("purge entry #{0} has no host")]
    PurgeEntryWithoutHost(usize),

    #[error("purge entry for `{0}` has no uris")]
    PurgeEntryWithoutUris(String),

    #[error("purge entry for `{0}` uses cloudflare but purge.cf_zone_id is empty")]
    MissingZoneId(String),
}

/// Validate the whole configuration, collecting every problem.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let options = &config.options;
    if options.metadata_watch_refresh_interval_ms == 0 {
        errors.push(ValidationError::ZeroOption("metadata_watch_refresh_interval_ms"));
    }
    if options.poll_timeout_ms == 0 {
        errors.push(ValidationError::ZeroOption("poll_timeout_ms"));
    }
    if options.listener_capacity == 0 {
        errors.push(ValidationError::ZeroOption("listener_capacity"));
    }

    let mut seen = HashSet::new();
    for (i, rule) in config.rules.iter().enumerate() {
        if rule.name.is_empty() {
            errors.push(ValidationError::EmptyRuleName(i));
        } else if !seen.insert(rule.name.as_str()) {
            errors.push(ValidationError::DuplicateRuleName(rule.name.clone()));
        }

        let entries = rule.topic_entries();
        if entries.iter().all(|t| t.is_empty()) {
            errors.push(ValidationError::NoTopic(rule.name.clone()));
        }
        for entry in &entries {
            if let Some(pattern) = regex_pattern(entry) {
                if let Err(e) = regex::Regex::new(pattern) {
                    errors.push(ValidationError::InvalidPattern {
                        rule: rule.name.clone(),
                        pattern: entry.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if TaskType::from_name(&rule.task_type) == TaskType::JobRunner
            && config.job_runner.endpoint.is_empty()
        {
            errors.push(ValidationError::MissingJobEndpoint(rule.name.clone()));
        }
    }

    if config.job_runner.max_attempts == 0 {
        errors.push(ValidationError::NoAttempts);
    }

    for (i, entry) in config.purge.entries.iter().enumerate() {
        if entry.host.is_empty() {
            errors.push(ValidationError::PurgeEntryWithoutHost(i));
            continue;
        }
        if entry.uris.is_empty() {
            errors.push(ValidationError::PurgeEntryWithoutUris(entry.host.clone()));
        }
        if entry.method.eq_ignore_ascii_case(CLOUDFLARE_METHOD) && config.purge.cf_zone_id.is_empty()
        {
            errors.push(ValidationError::MissingZoneId(entry.host.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
