//! Inbound content parsers and their registry.
//!
//! # Example
//!
//! ```
//! use switchyard_content::ParserRegistry;
//! use switchyard_core::RequestContent;
//!
//! let parsers = ParserRegistry::with_defaults();
//! let content = RequestContent::new(r#"{"a": 1}"#, Some("application/json".into()), None);
//! let value = parsers.parse(&content, "utf-8").unwrap();
//! assert_eq!(value["a"], 1);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use switchyard_core::content::ContentParser;
use switchyard_core::{codes, RequestContent, RpcError, RpcResult};

use crate::charset;

/// Splits a `Content-Type` header into its lower-cased essence and charset.
///
/// ```
/// use switchyard_content::split_content_type;
///
/// let (mime, charset) = split_content_type("Application/JSON; charset=UTF-8");
/// assert_eq!(mime, "application/json");
/// assert_eq!(charset.as_deref(), Some("utf-8"));
/// ```
pub fn split_content_type(header: &str) -> (String, Option<String>) {
    match header.trim().parse::<mime::Mime>() {
        Ok(parsed) => (
            parsed.essence_str().to_ascii_lowercase(),
            parsed
                .get_param(mime::CHARSET)
                .map(|c| c.as_str().to_ascii_lowercase()),
        ),
        Err(_) => (
            header
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase(),
            None,
        ),
    }
}

/// `text/plain` parser producing a string.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextParser;

impl ContentParser for TextParser {
    fn mime_types(&self) -> &[&'static str] {
        &["text/plain"]
    }

    fn parse(&self, raw: &[u8], _mime_type: &str, encoding: &str) -> RpcResult<Value> {
        charset::decode(raw, encoding).map(Value::String)
    }
}

/// `application/json` parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl ContentParser for JsonParser {
    fn mime_types(&self) -> &[&'static str] {
        &["application/json"]
    }

    fn parse(&self, raw: &[u8], _mime_type: &str, encoding: &str) -> RpcResult<Value> {
        let text = charset::decode(raw, encoding)?;
        if text.trim().is_empty() {
            return Err(RpcError::bad_body(codes::MISSING_BODY, "request body is empty"));
        }
        serde_json::from_str(&text)
            .map_err(|e| RpcError::bad_body(codes::INVALID_BODY, format!("invalid json body: {e}")))
    }
}

/// `application/x-www-form-urlencoded` parser.
///
/// Produces an object; a repeated key becomes an array of strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormParser;

impl ContentParser for FormParser {
    fn mime_types(&self) -> &[&'static str] {
        &["application/x-www-form-urlencoded"]
    }

    fn parse(&self, raw: &[u8], _mime_type: &str, encoding: &str) -> RpcResult<Value> {
        let text = charset::decode(raw, encoding)?;
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(&text)
            .map_err(|e| RpcError::bad_body(codes::INVALID_BODY, format!("invalid form body: {e}")))?;
        Ok(Value::Object(group_pairs(pairs).into_iter().collect()))
    }
}

/// Groups decoded pairs by key, keeping first-seen order.
pub(crate) fn group_pairs(pairs: Vec<(String, String)>) -> IndexMap<String, Value> {
    let mut grouped: IndexMap<String, Value> = IndexMap::new();
    for (key, value) in pairs {
        match grouped.get_mut(&key) {
            Some(Value::Array(items)) => items.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                grouped.insert(key, Value::String(value));
            }
        }
    }
    grouped
}

/// Parsers keyed by lower-cased media type.
#[derive(Debug, Clone, Default)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn ContentParser>>,
}

impl ParserRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the text, JSON and form parsers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TextParser));
        registry.register(Arc::new(JsonParser));
        registry.register(Arc::new(FormParser));
        registry
    }

    /// Registers `parser` for each of its media types, replacing earlier ones.
    pub fn register(&mut self, parser: Arc<dyn ContentParser>) {
        for mime_type in parser.mime_types() {
            self.parsers
                .insert(mime_type.to_ascii_lowercase(), Arc::clone(&parser));
        }
    }

    /// Returns the parser for `mime_type`.
    pub fn get(&self, mime_type: &str) -> Option<&Arc<dyn ContentParser>> {
        self.parsers.get(&mime_type.to_ascii_lowercase())
    }

    /// Parses request content.
    ///
    /// The content's own charset wins over `default_encoding`. A media type
    /// without a parser fails with an unsupported-media-type error.
    pub fn parse(&self, content: &RequestContent, default_encoding: &str) -> RpcResult<Value> {
        let mime_type = content
            .mime_type
            .as_deref()
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let parser = self
            .get(&mime_type)
            .ok_or_else(|| RpcError::unsupported_media_type(mime_type.clone()))?;
        let encoding = content.encoding.as_deref().unwrap_or(default_encoding);
        parser.parse(&content.raw, &mime_type, encoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchyard_core::ErrorKind;

    fn content(body: &'static str, mime: &str) -> RequestContent {
        RequestContent::new(body, Some(mime.to_string()), None)
    }

    #[test]
    fn test_text() {
        let parsers = ParserRegistry::with_defaults();
        assert_eq!(parsers.parse(&content("hi", "text/plain"), "utf-8").unwrap(), json!("hi"));
    }

    #[test]
    fn test_json_failure_is_bad_body() {
        let parsers = ParserRegistry::with_defaults();
        let err = parsers.parse(&content("{", "application/json"), "utf-8").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(err.code(), codes::INVALID_BODY);
        let err = parsers.parse(&content("", "application/json"), "utf-8").unwrap_err();
        assert_eq!(err.code(), codes::MISSING_BODY);
    }

    #[test]
    fn test_form_groups_repeated_keys() {
        let parsers = ParserRegistry::with_defaults();
        let value = parsers
            .parse(&content("a=1&b=x+y&a=2", "application/x-www-form-urlencoded"), "utf-8")
            .unwrap();
        assert_eq!(value, json!({"a": ["1", "2"], "b": "x y"}));
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let parsers = ParserRegistry::with_defaults();
        assert!(parsers.parse(&content("1", "Application/JSON"), "utf-8").is_ok());
    }

    #[test]
    fn test_unsupported_media_type_names_the_type() {
        let parsers = ParserRegistry::with_defaults();
        let err = parsers.parse(&content("a,b", "text/csv"), "utf-8").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedMediaType);
        assert!(matches!(err, RpcError::UnsupportedMediaType { ref mime_type, .. } if mime_type == "text/csv"));
    }

    #[test]
    fn test_content_charset_wins() {
        let parsers = ParserRegistry::with_defaults();
        let body = RequestContent::new(&b"caf\xe9"[..], Some("text/plain".into()), Some("latin1".into()));
        assert_eq!(parsers.parse(&body, "utf-8").unwrap(), json!("café"));
    }

    #[test]
    fn test_split_content_type_fallback() {
        let (mime, charset) = split_content_type("not a mime");
        assert_eq!(mime, "not a mime");
        assert!(charset.is_none());
    }
}
