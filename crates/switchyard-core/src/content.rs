//! Content parser, builder and container contracts.
//!
//! Implementations and registries live in `switchyard-content`; the traits
//! sit here so the response can cache a negotiated container.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{Fault, RpcResult};
use crate::result::ExecutionResult;

/// Turns inbound bytes into a structured value.
pub trait ContentParser: Send + Sync + fmt::Debug {
    /// Media types this parser handles, lower-cased.
    fn mime_types(&self) -> &[&'static str];

    /// Parses `raw` declared as `mime_type` in charset `encoding`.
    fn parse(&self, raw: &[u8], mime_type: &str, encoding: &str) -> RpcResult<Value>;
}

/// Serializes a container's value to bytes.
pub trait ContentBuilder: Send + Sync + fmt::Debug {
    /// Media types this builder produces, lower-cased.
    fn mime_types(&self) -> &[&'static str];

    /// Returns `true` if `mime_type` is produced by this builder.
    fn supports(&self, mime_type: &str) -> bool {
        self.mime_types().iter().any(|m| *m == mime_type)
    }

    /// Serializes `value` as `mime_type` in charset `encoding`.
    fn build(&self, value: &Value, mime_type: &str, encoding: &str) -> RpcResult<Bytes>;
}

/// The wire-ready shape of a response before serialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dumped {
    /// The value to serialize, `None` for an empty body.
    pub value: Option<Value>,
    /// Header metadata.
    pub headers: IndexMap<String, String>,
}

/// Shapes a logical result and error into a wire value plus metadata.
pub trait ContentContainer: Send + Sync + fmt::Debug {
    /// Selector name used by the `response.contentContainer` setting.
    fn name(&self) -> &'static str;

    /// Shapes the response.
    fn dump(
        &self,
        result: &ExecutionResult,
        error: Option<&Fault>,
        meta: &IndexMap<String, Value>,
    ) -> Dumped;
}

/// The outcome of content negotiation, fixed once per response.
#[derive(Debug, Clone)]
pub struct Negotiated {
    /// Chosen media type.
    pub mime_type: String,
    /// Chosen charset.
    pub encoding: String,
    /// Chosen container.
    pub container: Arc<dyn ContentContainer>,
}
