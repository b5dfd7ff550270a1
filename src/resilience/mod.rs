//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Message handling in a subscription:
//!     → rate_limit.rs (wait for a slot in the rule's window)
//!     → executor
//!         → retries.rs (retry failed deliveries)
//!             → backoff.rs (exponential delay with jitter)
//! ```
//!
//! # Design Decisions
//! - Every outbound HTTP call carries a client timeout
//! - Job deliveries are retried; purge requests are not
//! - Rate limiting blocks the poll loop instead of dropping messages

pub mod backoff;
pub mod rate_limit;
pub mod retries;

pub use rate_limit::RateLimiter;
pub use retries::{Exhausted, RetryPolicy};
