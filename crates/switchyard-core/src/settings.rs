//! Scoped configuration.
//!
//! Each scope (server, adapter, service, endpoint) carries a [`Settings`]
//! value. A key resolves to the most specific scope that sets it, walking
//! endpoint, service, adapter and server in that order, and falls back to the
//! hard defaults in [`defaults`].

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::convert::Converter;
use crate::error::SetupError;
use crate::session::{HeaderSessionManager, SessionManager};

/// Recognized setting keys.
pub mod keys {
    /// Default inbound charset.
    pub const REQUEST_ENCODING: &str = "request.encoding";
    /// Allowed outbound media type(s).
    pub const RESPONSE_MIME_TYPE: &str = "response.mimeType";
    /// Default outbound charset.
    pub const RESPONSE_ENCODING: &str = "response.encoding";
    /// Container selector.
    pub const RESPONSE_CONTENT_CONTAINER: &str = "response.contentContainer";
    /// Session manager selector.
    pub const SESSION_MANAGER: &str = "session.manager";
    /// Per-parameter converters.
    pub const PARAMETER_TYPE: &str = "endpoint.parameter.type";
}

/// Hard defaults used when no scope sets a key.
pub mod defaults {
    /// Inbound charset.
    pub const REQUEST_ENCODING: &str = "utf-8";
    /// Outbound media type.
    pub const RESPONSE_MIME_TYPE: &str = "text/plain";
    /// Outbound charset.
    pub const RESPONSE_ENCODING: &str = "utf-8";
    /// Container.
    pub const CONTENT_CONTAINER: &str = "plain";
}

/// Settings of one scope.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// `request.encoding`
    pub request_encoding: Option<String>,
    /// `response.mimeType`. `Some(vec![])` forces the default type.
    pub response_mime_types: Option<Vec<String>>,
    /// `response.encoding`
    pub response_encoding: Option<String>,
    /// `response.contentContainer`
    pub content_container: Option<String>,
    /// `session.manager`
    pub session_manager: Option<Arc<dyn SessionManager>>,
    /// `endpoint.parameter.type`
    pub parameter_types: IndexMap<String, Converter>,
    extra: IndexMap<String, Value>,
}

impl Settings {
    /// Creates empty settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds settings from a configuration map.
    ///
    /// ```
    /// use serde_json::json;
    /// use switchyard_core::Settings;
    ///
    /// let settings = Settings::from_map([
    ///     ("response.mimeType".to_string(), json!(["application/json"])),
    ///     ("endpoint.parameter.type".to_string(), json!({"n": "integer"})),
    ///     ("team".to_string(), json!("payments")),
    /// ])
    /// .unwrap();
    /// assert_eq!(settings.response_mime_types.as_deref(), Some(&["application/json".to_string()][..]));
    /// assert!(settings.parameter_types.contains_key("n"));
    /// assert_eq!(settings.extra("team"), Some(&json!("payments")));
    /// ```
    pub fn from_map<I>(entries: I) -> Result<Self, SetupError>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut settings = Self::new();
        for (key, value) in entries {
            settings.set(&key, value)?;
        }
        Ok(settings)
    }

    /// Sets one key from a JSON value. Unrecognized keys are kept as extras.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), SetupError> {
        match key {
            keys::REQUEST_ENCODING => self.request_encoding = Some(expect_str(key, &value)?),
            keys::RESPONSE_ENCODING => self.response_encoding = Some(expect_str(key, &value)?),
            keys::RESPONSE_CONTENT_CONTAINER => {
                self.content_container = Some(expect_str(key, &value)?);
            }
            keys::RESPONSE_MIME_TYPE => {
                self.response_mime_types = Some(match value {
                    Value::String(s) => vec![s.to_ascii_lowercase()],
                    Value::Array(items) => items
                        .iter()
                        .map(|item| expect_str(key, item).map(|s| s.to_ascii_lowercase()))
                        .collect::<Result<_, _>>()?,
                    _ => return Err(SetupError::invalid_setting(key, "expected string or list")),
                });
            }
            keys::SESSION_MANAGER => {
                let manager = match &value {
                    Value::String(s) if s == "header" => HeaderSessionManager::default(),
                    Value::Object(map) => match map.get("header").and_then(Value::as_str) {
                        Some(header) => HeaderSessionManager::new(header),
                        None => return Err(SetupError::invalid_setting(key, "expected a header name")),
                    },
                    _ => return Err(SetupError::invalid_setting(key, "unknown session manager")),
                };
                self.session_manager = Some(Arc::new(manager));
            }
            keys::PARAMETER_TYPE => {
                let Value::Object(map) = value else {
                    return Err(SetupError::invalid_setting(key, "expected an object"));
                };
                for (param, kind) in map {
                    let name = expect_str(key, &kind)?;
                    let converter = Converter::named(&name).ok_or_else(|| {
                        SetupError::invalid_setting(key, format!("unknown type '{name}'"))
                    })?;
                    self.parameter_types.insert(param, converter);
                }
            }
            _ => {
                self.extra.insert(key.to_string(), value);
            }
        }
        Ok(())
    }

    /// Sets the default inbound charset.
    #[must_use]
    pub fn with_request_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.request_encoding = Some(encoding.into());
        self
    }

    /// Restricts the outbound media types.
    #[must_use]
    pub fn with_response_mime_types<I, S>(mut self, mime_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.response_mime_types = Some(
            mime_types
                .into_iter()
                .map(|m| m.into().to_ascii_lowercase())
                .collect(),
        );
        self
    }

    /// Sets the default outbound charset.
    #[must_use]
    pub fn with_response_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.response_encoding = Some(encoding.into());
        self
    }

    /// Selects the content container.
    #[must_use]
    pub fn with_content_container(mut self, name: impl Into<String>) -> Self {
        self.content_container = Some(name.into());
        self
    }

    /// Installs a session manager.
    #[must_use]
    pub fn with_session_manager(mut self, manager: Arc<dyn SessionManager>) -> Self {
        self.session_manager = Some(manager);
        self
    }

    /// Declares the type of one parameter.
    #[must_use]
    pub fn with_parameter_type(mut self, param: impl Into<String>, converter: Converter) -> Self {
        self.parameter_types.insert(param.into(), converter);
        self
    }

    /// Returns an unrecognized setting.
    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

fn expect_str(key: &str, value: &Value) -> Result<String, SetupError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| SetupError::invalid_setting(key, "expected a string"))
}
