//! Transport-neutral inbound request.

use bytes::Bytes;
use http::HeaderMap;
use indexmap::IndexMap;
use serde_json::Value;

/// A parsed inbound unit of work.
///
/// Adapters fill this in from their own wire format before dispatch.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Request headers or message properties.
    pub headers: HeaderMap,
    /// Raw wire parameters (query string, message fields).
    pub params: IndexMap<String, Value>,
    /// Body, if any.
    pub content: Option<RequestContent>,
    /// Client preferences for the response.
    pub accept: Accept,
}

impl Request {
    /// Creates an empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a header value as a string, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns the declared body media type, if any.
    pub fn mime_type(&self) -> Option<&str> {
        self.content.as_ref().and_then(|c| c.mime_type.as_deref())
    }
}

/// Request body.
#[derive(Debug, Clone, Default)]
pub struct RequestContent {
    /// Declared media type, lower-cased and without parameters.
    pub mime_type: Option<String>,
    /// Declared charset.
    pub encoding: Option<String>,
    /// Raw bytes.
    pub raw: Bytes,
    /// Structured value produced by the parser registry.
    pub data: Option<Value>,
}

impl RequestContent {
    /// Creates content from raw bytes and an optional media type.
    pub fn new(raw: impl Into<Bytes>, mime_type: Option<String>, encoding: Option<String>) -> Self {
        Self {
            mime_type,
            encoding,
            raw: raw.into(),
            data: None,
        }
    }
}

/// One quality-ranked entry of an `Accept`-style list.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityItem {
    /// Lower-cased value.
    pub value: String,
    /// Quality in `0.0..=1.0`.
    pub quality: f32,
}

/// Client preferences, each list ordered by descending quality.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Accept {
    /// Acceptable media types.
    pub mime_types: Vec<QualityItem>,
    /// Acceptable charsets.
    pub charsets: Vec<QualityItem>,
}

impl Accept {
    /// Parses a comma-separated header such as
    /// `text/html;q=0.8, application/json`.
    ///
    /// Entries with `q=0` are dropped. Ties keep header order.
    ///
    /// ```
    /// use switchyard_core::request::Accept;
    ///
    /// let items = Accept::parse_list("text/html;q=0.5, application/json");
    /// assert_eq!(items[0].value, "application/json");
    /// assert_eq!(items[1].value, "text/html");
    /// ```
    pub fn parse_list(header: &str) -> Vec<QualityItem> {
        let mut items: Vec<QualityItem> = header
            .split(',')
            .filter_map(|entry| {
                let mut parts = entry.split(';');
                let value = parts.next()?.trim().to_ascii_lowercase();
                if value.is_empty() {
                    return None;
                }
                let quality = parts
                    .filter_map(|p| p.trim().strip_prefix("q="))
                    .find_map(|q| q.trim().parse::<f32>().ok())
                    .unwrap_or(1.0)
                    .clamp(0.0, 1.0);
                (quality > 0.0).then_some(QualityItem { value, quality })
            })
            .collect();
        items.sort_by(|a, b| b.quality.total_cmp(&a.quality));
        items
    }

    /// Returns `true` when the client expressed no media type preference.
    pub fn is_empty(&self) -> bool {
        self.mime_types.is_empty() && self.charsets.is_empty()
    }
}
