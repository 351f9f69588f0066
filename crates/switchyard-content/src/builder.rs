//! Outbound content builders and the builder/container registry.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use switchyard_core::content::{ContentBuilder, ContentContainer};
use switchyard_core::{RpcError, RpcResult};

use crate::charset;
use crate::container::{ApiContainer, PlainContainer};

/// Text builder for `text/*` style media types.
///
/// Strings are written as-is; any other value is written as JSON text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextBuilder;

impl ContentBuilder for TextBuilder {
    fn mime_types(&self) -> &[&'static str] {
        &[
            "text/plain",
            "text/html",
            "text/css",
            "application/xhtml+xml",
            "text/javascript",
            "text/markdown",
        ]
    }

    fn build(&self, value: &Value, _mime_type: &str, encoding: &str) -> RpcResult<Bytes> {
        match value {
            Value::String(text) => charset::encode(text, encoding),
            Value::Null => Ok(Bytes::new()),
            other => charset::encode(&other.to_string(), encoding),
        }
    }
}

/// `application/json` builder.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBuilder;

impl ContentBuilder for JsonBuilder {
    fn mime_types(&self) -> &[&'static str] {
        &["application/json"]
    }

    fn build(&self, value: &Value, _mime_type: &str, encoding: &str) -> RpcResult<Bytes> {
        let text = serde_json::to_string(value)
            .map_err(|e| RpcError::internal(format!("json serialization failed: {e}")))?;
        charset::encode(&text, encoding)
    }
}

/// Binary builder. Accepts a string or an array of bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryBuilder;

impl ContentBuilder for BinaryBuilder {
    fn mime_types(&self) -> &[&'static str] {
        &["application/octet-stream", "image/png"]
    }

    fn build(&self, value: &Value, mime_type: &str, _encoding: &str) -> RpcResult<Bytes> {
        match value {
            Value::Null => Ok(Bytes::new()),
            Value::String(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .ok_or_else(|| RpcError::internal(format!("{mime_type} body must be bytes")))
                })
                .collect::<RpcResult<Vec<u8>>>()
                .map(Bytes::from),
            _ => Err(RpcError::internal(format!("{mime_type} body must be bytes"))),
        }
    }
}

/// Builders keyed by media type, plus containers keyed by name.
#[derive(Debug, Clone, Default)]
pub struct BuilderRegistry {
    builders: HashMap<String, Arc<dyn ContentBuilder>>,
    containers: HashMap<&'static str, Arc<dyn ContentContainer>>,
}

impl BuilderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the text, JSON and binary builders and the
    /// `plain` and `api` containers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TextBuilder));
        registry.register(Arc::new(JsonBuilder));
        registry.register(Arc::new(BinaryBuilder));
        registry.register_container(Arc::new(PlainContainer));
        registry.register_container(Arc::new(ApiContainer));
        registry
    }

    /// Registers `builder` for each of its media types.
    pub fn register(&mut self, builder: Arc<dyn ContentBuilder>) {
        for mime_type in builder.mime_types() {
            self.builders
                .insert(mime_type.to_ascii_lowercase(), Arc::clone(&builder));
        }
    }

    /// Registers a container under its name.
    pub fn register_container(&mut self, container: Arc<dyn ContentContainer>) {
        self.containers.insert(container.name(), container);
    }

    /// Returns `true` if some builder produces `mime_type`.
    pub fn supports(&self, mime_type: &str) -> bool {
        self.builders.contains_key(&mime_type.to_ascii_lowercase())
    }

    /// Returns the builder for `mime_type`.
    pub fn builder_for(&self, mime_type: &str) -> RpcResult<&Arc<dyn ContentBuilder>> {
        self.builders
            .get(&mime_type.to_ascii_lowercase())
            .ok_or_else(|| RpcError::internal(format!("no builder for {mime_type}")))
    }

    /// Returns the container registered as `name`.
    pub fn container(&self, name: &str) -> RpcResult<Arc<dyn ContentContainer>> {
        self.containers
            .get(name)
            .cloned()
            .ok_or_else(|| RpcError::internal(format!("unknown content container {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_builder() {
        let b = TextBuilder;
        assert_eq!(b.build(&json!("hi"), "text/plain", "utf-8").unwrap(), "hi");
        assert_eq!(b.build(&json!({"a": 1}), "text/plain", "utf-8").unwrap(), r#"{"a":1}"#);
        assert!(b.build(&Value::Null, "text/plain", "utf-8").unwrap().is_empty());
    }

    #[test]
    fn test_json_builder_quotes_strings() {
        assert_eq!(JsonBuilder.build(&json!("x"), "application/json", "utf-8").unwrap(), r#""x""#);
    }

    #[test]
    fn test_binary_builder() {
        let b = BinaryBuilder;
        assert_eq!(b.build(&json!([1, 2, 255]), "image/png", "").unwrap().as_ref(), &[1, 2, 255]);
        assert!(b.build(&json!([256]), "image/png", "").is_err());
        assert!(b.build(&json!({"a": 1}), "application/octet-stream", "").is_err());
    }

    #[test]
    fn test_registry_lookups() {
        let registry = BuilderRegistry::with_defaults();
        assert!(registry.supports("TEXT/HTML"));
        assert!(!registry.supports("text/csv"));
        assert!(registry.builder_for("application/json").is_ok());
        assert_eq!(registry.container("api").unwrap().name(), "api");
        assert!(registry.container("xml").is_err());
    }
}
