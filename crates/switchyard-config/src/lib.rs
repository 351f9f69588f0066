//! Typed process configuration for Switchyard.
//!
//! Configuration is layered:
//!
//! 1. built-in defaults or a preset ([`SwitchyardConfig::development`],
//!    [`SwitchyardConfig::production`])
//! 2. a TOML or JSON file
//! 3. environment variables
//!
//! Unknown fields are rejected at every level.
//!
//! ```toml
//! [http]
//! addr = "0.0.0.0:8080"
//! request_timeout_ms = 30000
//!
//! [queue]
//! prefetch = 10
//! reconnect_interval_ms = 5000
//!
//! [logging]
//! level = "info"
//! json_format = true
//!
//! [defaults]
//! response_mime_types = ["application/json"]
//! content_container = "api"
//! ```
//!
//! Environment overrides use `SWITCHYARD__SECTION__KEY`:
//!
//! - `SWITCHYARD__HTTP__ADDR=0.0.0.0:9000`
//! - `SWITCHYARD__QUEUE__PREFETCH=50`
//! - `SWITCHYARD__DEFAULTS__RESPONSE_MIME_TYPES=application/json,text/plain`

#![doc(html_root_url = "https://docs.rs/switchyard-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;

pub use config::{
    DefaultsConfig, HttpConfig, LoggingConfig, QueueConfig, SwitchyardConfig, KNOWN_CONTAINERS,
};
pub use error::ConfigError;
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
