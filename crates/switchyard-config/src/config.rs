//! Configuration sections and the root [`SwitchyardConfig`].

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchyard_core::settings::defaults;
use switchyard_core::Settings;
use switchyard_telemetry::LogConfig;

use crate::ConfigError;

/// Container names shipped with Switchyard.
pub const KNOWN_CONTAINERS: &[&str] = &["plain", "api"];

/// Complete process configuration.
///
/// # Example
///
/// ```
/// use switchyard_config::SwitchyardConfig;
///
/// let config = SwitchyardConfig::default();
/// assert_eq!(config.http.addr, "0.0.0.0:8080");
/// assert_eq!(config.queue.prefetch, 10);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct SwitchyardConfig {
    /// HTTP adapter settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Queue adapter settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Server-scope content defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

/// HTTP adapter section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    /// Bind address, e.g. `0.0.0.0:8080`.
    pub addr: String,

    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,

    /// Largest accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            request_timeout_ms: 30_000,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

impl HttpConfig {
    /// The request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Queue adapter section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Unacknowledged deliveries allowed per consumer.
    pub prefetch: u16,

    /// Delay between reconnection attempts in milliseconds.
    pub reconnect_interval_ms: u64,

    /// Content type of published messages.
    pub publish_content_type: String,

    /// Charset of published messages.
    pub publish_encoding: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            prefetch: 10,
            reconnect_interval_ms: 5_000,
            publish_content_type: "application/json".to_string(),
            publish_encoding: "utf-8".to_string(),
        }
    }
}

impl QueueConfig {
    /// The reconnection delay as a [`Duration`].
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

/// Logging section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive.
    pub level: String,

    /// JSON lines instead of pretty output.
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: true,
        }
    }
}

impl LoggingConfig {
    /// Expands this section into a full [`LogConfig`].
    pub fn to_log_config(&self) -> LogConfig {
        let base = if self.json_format {
            LogConfig::production()
        } else {
            LogConfig::development()
        };
        LogConfig {
            level: self.level.clone(),
            ..base
        }
    }
}

/// Server-scope content defaults.
///
/// `response_mime_types = []` forces the default media type regardless of
/// what the client accepts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DefaultsConfig {
    /// Charset of inbound bodies.
    pub request_encoding: String,

    /// Allowed outbound media types. Unset means unrestricted.
    pub response_mime_types: Option<Vec<String>>,

    /// Charset of outbound bodies.
    pub response_encoding: String,

    /// Result container.
    pub content_container: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            request_encoding: defaults::REQUEST_ENCODING.to_string(),
            response_mime_types: None,
            response_encoding: defaults::RESPONSE_ENCODING.to_string(),
            content_container: defaults::CONTENT_CONTAINER.to_string(),
        }
    }
}

impl SwitchyardConfig {
    /// Preset for local development: pretty debug logs, short timeouts.
    #[must_use]
    pub fn development() -> Self {
        Self {
            http: HttpConfig {
                addr: "127.0.0.1:8080".to_string(),
                request_timeout_ms: 5_000,
                ..HttpConfig::default()
            },
            queue: QueueConfig {
                reconnect_interval_ms: 1_000,
                ..QueueConfig::default()
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                json_format: false,
            },
            defaults: DefaultsConfig::default(),
        }
    }

    /// Preset for production: JSON logs at info level.
    #[must_use]
    pub fn production() -> Self {
        Self::default()
    }

    /// Checks cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.addr.is_empty() {
            return Err(ConfigError::invalid_value("http.addr", "must not be empty"));
        }
        if self.http.addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "http.addr",
                format!("'{}' is not a socket address", self.http.addr),
            ));
        }
        if self.http.request_timeout_ms == 0 {
            return Err(ConfigError::invalid_value("http.request_timeout_ms", "must be positive"));
        }
        if self.http.max_body_bytes == 0 {
            return Err(ConfigError::invalid_value("http.max_body_bytes", "must be positive"));
        }
        if self.queue.prefetch == 0 {
            return Err(ConfigError::invalid_value("queue.prefetch", "must be positive"));
        }
        if self.queue.reconnect_interval_ms == 0 {
            return Err(ConfigError::invalid_value(
                "queue.reconnect_interval_ms",
                "must be positive",
            ));
        }
        if !KNOWN_CONTAINERS.contains(&self.defaults.content_container.as_str()) {
            return Err(ConfigError::invalid_value(
                "defaults.content_container",
                format!(
                    "unknown container '{}', expected one of {}",
                    self.defaults.content_container,
                    KNOWN_CONTAINERS.join(", ")
                ),
            ));
        }
        Ok(())
    }

    /// Server-scope [`Settings`] built from the `defaults` section.
    pub fn server_settings(&self) -> Settings {
        let d = &self.defaults;
        let settings = Settings::new()
            .with_request_encoding(d.request_encoding.clone())
            .with_response_encoding(d.response_encoding.clone())
            .with_content_container(d.content_container.clone());
        match &d.response_mime_types {
            Some(types) => settings.with_response_mime_types(types.iter().cloned()),
            None => settings,
        }
    }
}
