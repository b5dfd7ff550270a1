//! Shutdown coordination.

use std::time::Duration;

use crate::subscription::Subscriber;

/// Stop every subscription, giving up after `deadline`.
///
/// Returns false when the deadline passed first; loops still running at
/// that point are abandoned with the process.
pub async fn shutdown(subscriber: &Subscriber, deadline: Duration) -> bool {
    match tokio::time::timeout(deadline, subscriber.unsubscribe()).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            true
        }
        Err(_) => {
            tracing::warn!(
                deadline_ms = deadline.as_millis() as u64,
                "Shutdown deadline exceeded, exiting anyway"
            );
            false
        }
    }
}
