//! Task execution subsystem.
//!
//! # Data Flow
//! ```text
//! Subscription poll loop (one message)
//!     → registry.rs (task type name → cached executor)
//!     → job_runner.rs (strip fields, POST with retry/backoff)
//!     → purge.rs (expand templates, dedup, concurrent fan-out)
//!         → cloudflare.rs for "cloudflare" entries
//! ```
//!
//! # Design Decisions
//! - One executor instance per task type for the whole process
//! - Executors never panic on bad input; they return `TaskError`
//! - Retries live in the executor, not in the poll loop

pub mod cloudflare;
pub mod job_runner;
pub mod purge;
pub mod registry;

use async_trait::async_trait;

pub use job_runner::JobRunnerExecutor;
pub use purge::PurgeExecutor;
pub use registry::ExecutorRegistry;

/// Purge entry method that routes through the CDN purge API.
pub const CLOUDFLARE_METHOD: &str = "cloudflare";

/// Built-in task types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    /// Forwards the message to a job runner endpoint.
    JobRunner,
    /// Purges cached copies of the URL in the message.
    Purge,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::JobRunner => "job-runner",
            TaskType::Purge => "purge",
        }
    }

    /// Unrecognized names fall back to the job runner.
    pub fn from_name(name: &str) -> Self {
        match name {
            "purge" => TaskType::Purge,
            _ => TaskType::JobRunner,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by executors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The message body is not what the executor expects; never retried.
    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("malformed url in message: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A single downstream call failed.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// Every attempt failed.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    /// The executor could not be built.
    #[error("executor misconfigured: {0}")]
    Config(String),
}

/// Executes one broker message.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, message: &[u8]) -> Result<(), TaskError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_names() {
        assert_eq!(TaskType::from_name("purge"), TaskType::Purge);
        assert_eq!(TaskType::from_name("job-runner"), TaskType::JobRunner);
        assert_eq!(TaskType::from_name(""), TaskType::JobRunner);
        assert_eq!(TaskType::from_name("Purge"), TaskType::JobRunner);
        assert_eq!(TaskType::Purge.to_string(), "purge");
    }
}
