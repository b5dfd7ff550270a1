//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → logging/metrics → broker → executor registry → subscribe rules
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → shutdown requested
//!
//! Shutdown (shutdown.rs):
//!     Unsubscribe every rule → disconnect watcher → exit
//! ```
//!
//! # Design Decisions
//! - Fail fast: any rule that cannot be subscribed aborts startup
//! - Shutdown has a deadline; past it the process exits anyway

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::shutdown;
pub use signals::wait_for_shutdown;
pub use startup::{start, start_with_broker, StartupError};
