//! Shaping and serializing the response of one request.

use bytes::Bytes;
use indexmap::IndexMap;
use switchyard_core::{Context, ExecutionResult, RpcError, RpcResult};

use crate::builder::BuilderRegistry;
use crate::negotiate::{negotiate, negotiate_fallback};

/// A fully serialized response body with its headers.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    /// Chosen media type.
    pub mime_type: String,
    /// Chosen charset.
    pub encoding: String,
    /// Serialized body.
    pub body: Bytes,
    /// Response headers: the ones set during the call, then container metadata.
    pub headers: IndexMap<String, String>,
}

impl Rendered {
    /// The `Content-Type` header value.
    pub fn content_type(&self) -> String {
        if self.mime_type.starts_with("text/") || self.mime_type == "application/json" {
            format!("{}; charset={}", self.mime_type, self.encoding)
        } else {
            self.mime_type.clone()
        }
    }
}

/// Renders the response of `ctx`, or `error` in place of its result.
///
/// An error whose own negotiation fails is rendered with the fallback
/// media type, so that the client still learns what went wrong.
pub fn render(ctx: &mut Context, builders: &BuilderRegistry, error: Option<&RpcError>) -> RpcResult<Rendered> {
    let negotiated = match (negotiate(ctx, builders), error) {
        (Ok(negotiated), _) => negotiated,
        (Err(_), Some(_)) => negotiate_fallback(ctx, builders)?,
        (Err(e), None) => return Err(e),
    };

    let fault = error.map(RpcError::public_fault);
    let dumped = match fault {
        Some(ref fault) => negotiated
            .container
            .dump(&ExecutionResult::Empty, Some(fault), &ctx.response.meta),
        None => negotiated
            .container
            .dump(&ctx.response.result, None, &ctx.response.meta),
    };

    let body = match dumped.value {
        Some(value) => builders
            .builder_for(&negotiated.mime_type)?
            .build(&value, &negotiated.mime_type, &negotiated.encoding)?,
        None => Bytes::new(),
    };

    let mut headers = ctx.response.headers.clone();
    headers.extend(dumped.headers);
    Ok(Rendered {
        mime_type: negotiated.mime_type,
        encoding: negotiated.encoding,
        body,
        headers,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Value};
    use switchyard_core::request::Accept;
    use switchyard_core::{Scope, Settings};

    use super::*;
    use crate::container::ERROR_HEADER;

    fn context(settings: Settings) -> Context {
        Context::new(Arc::new(Scope::new("server").with_settings(settings)), Arc::new(Scope::new("http")))
    }

    #[test]
    fn test_json_round_trip() {
        let builders = BuilderRegistry::with_defaults();
        let mut ctx = context(Settings::new());
        ctx.request.accept.mime_types = Accept::parse_list("application/json");
        ctx.response.result = ExecutionResult::single(json!({"a": 1}));

        let rendered = render(&mut ctx, &builders, None).unwrap();
        assert_eq!(rendered.content_type(), "application/json; charset=utf-8");
        let parsed: Value = serde_json::from_slice(&rendered.body).unwrap();
        assert_eq!(parsed, json!({"a": 1}));
    }

    #[test]
    fn test_empty_result_has_empty_body() {
        let builders = BuilderRegistry::with_defaults();
        let mut ctx = context(Settings::new());
        let rendered = render(&mut ctx, &builders, None).unwrap();
        assert!(rendered.body.is_empty());
        assert_eq!(rendered.mime_type, "text/plain");
    }

    #[test]
    fn test_error_falls_back_when_not_acceptable() {
        let builders = BuilderRegistry::with_defaults();
        let mut ctx = context(Settings::new());
        ctx.request.accept.mime_types = Accept::parse_list("text/csv");

        let err = RpcError::not_acceptable();
        let rendered = render(&mut ctx, &builders, Some(&err)).unwrap();
        assert_eq!(rendered.mime_type, "text/plain");
        let header: Value = serde_json::from_str(&rendered.headers[ERROR_HEADER]).unwrap();
        assert_eq!(header["code"], err.code());
    }

    #[test]
    fn test_internal_reason_is_hidden() {
        let builders = BuilderRegistry::with_defaults();
        let mut ctx = context(Settings::new().with_content_container("api"));
        ctx.request.accept.mime_types = Accept::parse_list("application/json");

        let err = RpcError::internal("database password is hunter2");
        let rendered = render(&mut ctx, &builders, Some(&err)).unwrap();
        let body: Value = serde_json::from_slice(&rendered.body).unwrap();
        assert_eq!(body["error"]["reason"], switchyard_core::INTERNAL_REASON);
        assert_eq!(body["value"], Value::Null);
    }

    #[test]
    fn test_response_headers_are_kept() {
        let builders = BuilderRegistry::with_defaults();
        let mut ctx = context(Settings::new());
        ctx.response.set_header("X-Custom", "1");
        ctx.response.meta.insert("node".into(), json!("a"));
        let rendered = render(&mut ctx, &builders, None).unwrap();
        assert_eq!(rendered.headers["X-Custom"], "1");
        assert_eq!(rendered.headers["X-SERVER-NODE"], "a");
    }
}
