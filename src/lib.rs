//! Broker subscription engine.
//!
//! Consumes broker topics per configured rule and executes each message
//! with the rule's task executor.

pub mod broker;
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod subscription;
pub mod task;

pub use config::schema::AppConfig;
pub use subscription::Subscriber;
