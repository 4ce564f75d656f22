//! # Utility Modules
//!
//! Supporting utilities for logging, metrics and timing.
//!
//! ## Components
//! - **Logging**: structured logging configuration
//! - **Metrics**: thread-safe observability counters
//! - **Timeout**: async timeout wrappers and default durations

pub mod logging;
pub mod metrics;
pub mod timeout;

pub use logging::init_logging;
pub use metrics::{Metrics, MetricsSnapshot, Timer};
pub use timeout::with_timeout_error;
