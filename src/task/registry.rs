//! Executor registry.
//!
//! # Responsibilities
//! - Map task type names to executor constructors
//! - Build each executor on first use and cache it for the process lifetime
//! - Fall back to the job runner for unknown names

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::AppConfig;
use crate::task::{Executor, JobRunnerExecutor, PurgeExecutor, TaskError, TaskType};

/// Builds an executor; called at most once per registered name.
pub type ExecutorFactory = Arc<dyn Fn() -> Result<Arc<dyn Executor>, TaskError> + Send + Sync>;

/// Lazily constructed, shared executors keyed by task type name.
pub struct ExecutorRegistry {
    factories: HashMap<String, ExecutorFactory>,
    cache: DashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    /// An empty registry. Without a `job-runner` factory every unknown
    /// name fails to resolve.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            cache: DashMap::new(),
        }
    }

    /// Registry with the built-in executors bound to `config`.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new();

        let job_runner = config.job_runner.clone();
        registry.register(TaskType::JobRunner.as_str(), move || {
            Ok(Arc::new(JobRunnerExecutor::new(&job_runner)?) as Arc<dyn Executor>)
        });

        let purge = config.purge.clone();
        registry.register(TaskType::Purge.as_str(), move || {
            Ok(Arc::new(PurgeExecutor::new(&purge)?) as Arc<dyn Executor>)
        });

        registry
    }

    /// Add or replace the constructor for `name`.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Result<Arc<dyn Executor>, TaskError> + Send + Sync + 'static,
    {
        self.cache.remove(name);
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Name the registry actually serves for `task_type`.
    pub fn resolve_name<'a>(&self, task_type: &'a str) -> &'a str {
        if self.factories.contains_key(task_type) {
            task_type
        } else {
            TaskType::JobRunner.as_str()
        }
    }

    /// Get the executor for `task_type`, constructing it on first use.
    pub fn get(&self, task_type: &str) -> Result<Arc<dyn Executor>, TaskError> {
        let name = self.resolve_name(task_type);
        if let Some(executor) = self.cache.get(name) {
            return Ok(executor.value().clone());
        }

        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| TaskError::Config(format!("no executor registered for `{name}`")))?;

        // The entry guard holds the shard lock, so concurrent callers never
        // construct the same executor twice.
        let entry = self
            .cache
            .entry(name.to_string())
            .or_try_insert_with(|| {
                tracing::info!(task_type = %name, "Constructing executor");
                factory()
            })?;
        Ok(entry.value().clone())
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Noop;

    #[async_trait]
    impl Executor for Noop {
        async fn execute(&self, _message: &[u8]) -> Result<(), TaskError> {
            Ok(())
        }
    }

    fn counting_registry(built: Arc<AtomicUsize>) -> ExecutorRegistry {
        let mut registry = ExecutorRegistry::new();
        registry.register("job-runner", move || {
            built.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Noop) as Arc<dyn Executor>)
        });
        registry
    }

    #[test]
    fn test_executor_built_once() {
        let built = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(built.clone());

        let a = registry.get("job-runner").unwrap();
        let b = registry.get("job-runner").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_type_falls_back_to_job_runner() {
        let built = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(built.clone());

        let fallback = registry.get("no-such-task").unwrap();
        let job_runner = registry.get("job-runner").unwrap();
        assert!(Arc::ptr_eq(&fallback, &job_runner));
        assert_eq!(registry.resolve_name("no-such-task"), "job-runner");
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_construction_is_not_cached() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let mut registry = ExecutorRegistry::new();
        registry.register("job-runner", move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(TaskError::Config("not yet".into()))
            } else {
                Ok(Arc::new(Noop) as Arc<dyn Executor>)
            }
        });

        assert!(registry.get("job-runner").is_err());
        assert!(registry.get("job-runner").is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_empty_registry_reports_missing_executor() {
        let registry = ExecutorRegistry::new();
        assert!(matches!(registry.get("purge"), Err(TaskError::Config(_))));
    }

    #[test]
    fn test_builtin_registry_from_config() {
        let mut config = AppConfig::default();
        config.job_runner.endpoint = "http://127.0.0.1:1/rpc".into();
        let registry = ExecutorRegistry::from_config(&config);

        let purge = registry.get("purge").unwrap();
        assert!(Arc::ptr_eq(&purge, &registry.get("purge").unwrap()));
        assert!(registry.get("job-runner").is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_first_use_builds_once() {
        let built = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(counting_registry(built.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move { registry.get("job-runner").is_ok() }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }
}
