//! Response containers.
//!
//! A container decides where the result, the error and the metadata go:
//! into the body value or into header metadata.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use switchyard_core::content::{ContentContainer, Dumped};
use switchyard_core::{ExecutionResult, Fault};

/// Header carrying the error under the plain container.
pub const ERROR_HEADER: &str = "X-SERVER-ERROR";

/// Prefix for metadata headers under the plain container.
pub const META_HEADER_PREFIX: &str = "X-SERVER-";

/// Returns the body value unwrapped; errors and metadata go to headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainContainer;

impl ContentContainer for PlainContainer {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn dump(
        &self,
        result: &ExecutionResult,
        error: Option<&Fault>,
        meta: &IndexMap<String, Value>,
    ) -> Dumped {
        let mut headers = IndexMap::new();
        for (key, value) in meta {
            headers.insert(
                format!("{META_HEADER_PREFIX}{}", key.to_ascii_uppercase()),
                header_text(value),
            );
        }
        if let Some(fault) = error {
            let body = serde_json::json!({
                "code": fault.code,
                "reason": fault.reason,
                "detail": fault.detail,
            });
            headers.insert(ERROR_HEADER.to_string(), body.to_string());
        }
        Dumped {
            value: result.to_value(),
            headers,
        }
    }
}

/// Wraps everything in a `{"value": ..., "error": ...}` object.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiContainer;

impl ContentContainer for ApiContainer {
    fn name(&self) -> &'static str {
        "api"
    }

    fn dump(
        &self,
        result: &ExecutionResult,
        error: Option<&Fault>,
        meta: &IndexMap<String, Value>,
    ) -> Dumped {
        let mut body = Map::new();
        body.insert("value".into(), result.to_value().unwrap_or(Value::Null));
        body.insert(
            "error".into(),
            error.map_or(Value::Null, |fault| {
                serde_json::json!({
                    "code": fault.code,
                    "reason": fault.reason,
                    "detail": fault.detail,
                })
            }),
        );
        for (key, value) in meta {
            body.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Dumped {
            value: Some(Value::Object(body)),
            headers: IndexMap::new(),
        }
    }
}

fn header_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_value_and_meta() {
        let mut meta = IndexMap::new();
        meta.insert("trace".to_string(), json!("abc"));
        let dumped = PlainContainer.dump(&ExecutionResult::single("x"), None, &meta);
        assert_eq!(dumped.value, Some(json!("x")));
        assert_eq!(dumped.headers["X-SERVER-TRACE"], "abc");
        assert!(!dumped.headers.contains_key(ERROR_HEADER));
    }

    #[test]
    fn test_plain_error_header() {
        let fault = Fault::new(0x1002, "unknown parameter extra");
        let dumped = PlainContainer.dump(&ExecutionResult::Empty, Some(&fault), &IndexMap::new());
        assert!(dumped.value.is_none());
        let header: Value = serde_json::from_str(&dumped.headers[ERROR_HEADER]).unwrap();
        assert_eq!(header["reason"], "unknown parameter extra");
        assert_eq!(header["code"], 0x1002);
    }

    #[test]
    fn test_api_shapes() {
        let empty = ApiContainer.dump(&ExecutionResult::Empty, None, &IndexMap::new());
        assert_eq!(empty.value, Some(json!({"value": null, "error": null})));

        let many = ApiContainer.dump(&ExecutionResult::multiple([1, 2]), None, &IndexMap::new());
        assert_eq!(many.value.unwrap()["value"], json!([1, 2]));

        let fault = Fault::new(7, "nope");
        let failed = ApiContainer.dump(&ExecutionResult::Empty, Some(&fault), &IndexMap::new());
        assert_eq!(failed.value.unwrap()["error"]["reason"], "nope");
    }
}
