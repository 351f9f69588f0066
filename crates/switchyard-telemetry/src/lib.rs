//! Structured logging for Switchyard.
//!
//! Every adapter logs through [`tracing`]. This crate installs the
//! subscriber: JSON lines in production, pretty output in development.
//!
//! # Example
//!
//! ```rust,ignore
//! use switchyard_telemetry::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::development())?;
//! tracing::info!(adapter = "http", "adapter started");
//! ```

#![doc(html_root_url = "https://docs.rs/switchyard-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod logging;

pub use error::TelemetryError;
pub use logging::{create_env_filter, init_logging, LogConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
