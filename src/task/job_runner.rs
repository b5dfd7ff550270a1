//! Job runner executor.
//!
//! # Responsibilities
//! - Decode the message as a flat JSON object
//! - Strip configured fields and POST the rest to the job endpoint
//! - Retry failed deliveries with exponential backoff
//!
//! # Design Decisions
//! - Only 2xx responses count as success
//! - What happens after the last failed attempt is `FailurePolicy`

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::{FailurePolicy, JobRunnerConfig};
use crate::observability::metrics;
use crate::resilience::RetryPolicy;
use crate::task::{Executor, TaskError};

pub struct JobRunnerExecutor {
    endpoint: String,
    exclude_fields: Vec<String>,
    client: reqwest::Client,
    retry: RetryPolicy,
    failure_policy: FailurePolicy,
}

impl JobRunnerExecutor {
    pub fn new(config: &JobRunnerConfig) -> Result<Self, TaskError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TaskError::Config(e.to_string()))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            exclude_fields: config.exclude_fields.clone(),
            client,
            retry: RetryPolicy::from_config(config),
            failure_policy: config.failure_policy,
        })
    }

    /// Decode and strip excluded fields.
    fn prepare(&self, message: &[u8]) -> Result<Map<String, Value>, TaskError> {
        let mut fields: Map<String, Value> = serde_json::from_slice(message)?;
        for field in &self.exclude_fields {
            fields.remove(field);
        }
        Ok(fields)
    }

    async fn post(&self, body: &[u8]) -> Result<(), TaskError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| {
                metrics::record_job_attempt("failure");
                TaskError::Delivery(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            metrics::record_job_attempt("success");
            return Ok(());
        }

        metrics::record_job_attempt("failure");
        let text = response.text().await.unwrap_or_default();
        Err(TaskError::Delivery(format!(
            "job runner responded {status}: {text}"
        )))
    }
}

#[async_trait]
impl Executor for JobRunnerExecutor {
    async fn execute(&self, message: &[u8]) -> Result<(), TaskError> {
        let fields = self.prepare(message)?;
        let body = serde_json::to_vec(&fields)?;

        match self.retry.run(|_| self.post(&body)).await {
            Ok(()) => {
                let job = Value::Object(fields);
                tracing::info!(job = %job, "Job executed");
                Ok(())
            }
            Err(exhausted) => {
                let error = TaskError::Exhausted {
                    attempts: exhausted.attempts,
                    last: exhausted.last.to_string(),
                };
                match self.failure_policy {
                    FailurePolicy::Surface => Err(error),
                    FailurePolicy::Swallow => {
                        tracing::warn!(
                            endpoint = %self.endpoint,
                            error = %error,
                            "Job dropped after exhausting retries"
                        );
                        Ok(())
                    }
                }
            }
        }
    }
}
