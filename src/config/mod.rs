//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, deserialize, TIMBURR_* env overrides)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → shared via Arc to executors and subscriptions
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; rules never change at runtime
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AppConfig, BrokerConfig, BrokerKind, FailurePolicy, JobRunnerConfig, ObservabilityConfig,
    OptionsConfig, PurgeConfig, PurgeEntryConfig, RuleConfig,
};
