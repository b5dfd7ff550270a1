//! Job runner executor against a mock job endpoint.

mod common;

use timburr::config::{FailurePolicy, JobRunnerConfig};
use timburr::task::{Executor, JobRunnerExecutor, TaskError};

use common::{start_mock_backend, start_programmable_backend};

fn config(endpoint: String) -> JobRunnerConfig {
    JobRunnerConfig {
        endpoint,
        exclude_fields: vec!["meta".to_string()],
        base_delay_ms: 10,
        max_delay_ms: 80,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_job_forwarded_without_excluded_fields() {
    let backend = start_mock_backend(200, "{}").await;
    let executor = JobRunnerExecutor::new(&config(backend.url("/rpc/RunSingleJob.php"))).unwrap();

    executor
        .execute(br#"{"type":"htmlCacheUpdate","database":"zhwiki","meta":{"id":"1"}}"#)
        .await
        .unwrap();

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].target, "/rpc/RunSingleJob.php");
    assert_eq!(requests[0].header("content-type"), Some("application/json"));
    let body = requests[0].json();
    assert_eq!(body["type"], "htmlCacheUpdate");
    assert_eq!(body["database"], "zhwiki");
    assert!(body.get("meta").is_none());
}

#[tokio::test]
async fn test_gives_up_after_four_attempts() {
    let backend = start_mock_backend(500, "boom").await;
    let executor = JobRunnerExecutor::new(&config(backend.url("/rpc"))).unwrap();

    let result = executor.execute(br#"{"type":"x"}"#).await;
    match result {
        Err(TaskError::Exhausted { attempts, .. }) => assert_eq!(attempts, 4),
        other => panic!("expected exhausted retries, got {other:?}"),
    }
    assert_eq!(backend.count(), 4);
}

#[tokio::test]
async fn test_recovers_when_endpoint_comes_back() {
    let backend = start_programmable_backend(|_, index| {
        if index < 2 {
            (503, "busy".to_string())
        } else {
            (200, "{}".to_string())
        }
    })
    .await;
    let executor = JobRunnerExecutor::new(&config(backend.url("/rpc"))).unwrap();

    executor.execute(br#"{"type":"x"}"#).await.unwrap();
    assert_eq!(backend.count(), 3);
}

#[tokio::test]
async fn test_swallow_policy_reports_success() {
    let backend = start_mock_backend(500, "boom").await;
    let mut config = config(backend.url("/rpc"));
    config.failure_policy = FailurePolicy::Swallow;
    let executor = JobRunnerExecutor::new(&config).unwrap();

    executor.execute(br#"{"type":"x"}"#).await.unwrap();
    assert_eq!(backend.count(), 4);
}

#[tokio::test]
async fn test_malformed_job_never_reaches_endpoint() {
    let backend = start_mock_backend(200, "{}").await;
    let executor = JobRunnerExecutor::new(&config(backend.url("/rpc"))).unwrap();

    assert!(matches!(executor.execute(b"not json").await, Err(TaskError::Decode(_))));
    assert_eq!(backend.count(), 0);
}
