//! Layered configuration loading.
//!
//! Layers, later ones winning:
//! 1. built-in defaults (or a preset)
//! 2. a TOML or JSON file
//! 3. environment variables `PREFIX__SECTION__KEY`

use std::env;
use std::fs;
use std::path::Path;

use crate::{ConfigError, SwitchyardConfig};

/// Environment prefix used when none is given.
pub const DEFAULT_ENV_PREFIX: &str = "SWITCHYARD";

/// Builds a [`SwitchyardConfig`] from defaults, files and the environment.
///
/// # Example
///
/// ```no_run
/// use switchyard_config::ConfigLoader;
///
/// # fn main() -> Result<(), switchyard_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_optional_file("switchyard.toml")?
///     .with_env_prefix("SWITCHYARD")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: SwitchyardConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Starts from the built-in defaults with no environment prefix.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: SwitchyardConfig::default(),
            env_prefix: None,
        }
    }

    /// Resets to the development preset.
    ///
    /// ```
    /// use switchyard_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new().with_development().load().unwrap();
    /// assert_eq!(config.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = SwitchyardConfig::development();
        self
    }

    /// Resets to the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = SwitchyardConfig::production();
        self
    }

    /// Loads a file whose extension selects the format (`.toml` or `.json`).
    ///
    /// The file replaces the current configuration; sections it omits take
    /// their defaults.
    pub fn with_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
        let format = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_string();
        self.with_string(&content, &format)
    }

    /// Like [`with_file`](Self::with_file) but a missing file is not an error.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Parses configuration text in the named format (`toml` or `json`).
    ///
    /// ```
    /// use switchyard_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[queue]\nprefetch = 50\n", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    /// assert_eq!(config.queue.prefetch, 50);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };
        Ok(self)
    }

    /// Enables environment overrides with the given prefix.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Enables environment overrides with [`DEFAULT_ENV_PREFIX`].
    #[must_use]
    pub fn with_env(self) -> Self {
        self.with_env_prefix(DEFAULT_ENV_PREFIX)
    }

    /// Loads `.env` into the process environment if present.
    #[must_use]
    pub fn with_dotenv(self) -> Self {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                eprintln!("ignoring unreadable .env file: {e}");
            }
        }
        self
    }

    /// Applies environment overrides and validates.
    pub fn load(mut self) -> Result<SwitchyardConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let vars: Vec<(String, String)> = env::vars().collect();
            self.apply_env_vars(&prefix, vars)?;
        }
        self.config.validate()?;
        Ok(self.config)
    }

    /// Returns the configuration without environment overrides or validation.
    pub fn load_unvalidated(self) -> SwitchyardConfig {
        self.config
    }

    fn apply_env_vars<I>(&mut self, prefix: &str, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let full_prefix = format!("{prefix}__");
        for (key, value) in vars {
            if let Some(rest) = key.strip_prefix(&full_prefix) {
                let parts: Vec<&str> = rest.split("__").collect();
                self.apply_env_var(&key, &parts, &value)?;
            }
        }
        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, parts: &[&str], value: &str) -> Result<(), ConfigError> {
        let c = &mut self.config;
        match parts {
            ["HTTP", "ADDR"] => c.http.addr = value.to_string(),
            ["HTTP", "REQUEST_TIMEOUT_MS"] => c.http.request_timeout_ms = parse_number(key, value)?,
            ["HTTP", "MAX_BODY_BYTES"] => c.http.max_body_bytes = parse_number(key, value)?,

            ["QUEUE", "PREFETCH"] => c.queue.prefetch = parse_number(key, value)?,
            ["QUEUE", "RECONNECT_INTERVAL_MS"] => {
                c.queue.reconnect_interval_ms = parse_number(key, value)?;
            }
            ["QUEUE", "PUBLISH_CONTENT_TYPE"] => c.queue.publish_content_type = value.to_string(),
            ["QUEUE", "PUBLISH_ENCODING"] => c.queue.publish_encoding = value.to_string(),

            ["LOGGING", "LEVEL"] => c.logging.level = value.to_string(),
            ["LOGGING", "JSON_FORMAT"] => {
                c.logging.json_format = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))?;
            }

            ["DEFAULTS", "REQUEST_ENCODING"] => c.defaults.request_encoding = value.to_string(),
            ["DEFAULTS", "RESPONSE_ENCODING"] => c.defaults.response_encoding = value.to_string(),
            ["DEFAULTS", "CONTENT_CONTAINER"] => c.defaults.content_container = value.to_string(),
            ["DEFAULTS", "RESPONSE_MIME_TYPES"] => {
                c.defaults.response_mime_types = Some(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect(),
                );
            }

            _ => {}
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected unsigned integer"))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
