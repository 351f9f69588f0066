//! Transport-neutral response shell.

use indexmap::IndexMap;
use serde_json::Value;

use crate::content::Negotiated;
use crate::error::{RpcError, RpcResult};
use crate::result::ExecutionResult;

/// The response being built for one request.
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// Extra transport headers set by interceptors or handlers.
    pub headers: IndexMap<String, String>,
    /// Metadata rendered by the container (`X-SERVER-<KEY>` for plain).
    pub meta: IndexMap<String, Value>,
    /// The logical call result.
    pub result: ExecutionResult,
    negotiated: Option<Negotiated>,
}

impl Response {
    /// Creates an empty response shell.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the negotiated content outcome, if resolved.
    pub fn negotiated(&self) -> Option<&Negotiated> {
        self.negotiated.as_ref()
    }

    /// Fixes the negotiated content outcome.
    ///
    /// Fails if an outcome is already set; it is never recomputed.
    pub fn set_negotiated(&mut self, negotiated: Negotiated) -> RpcResult<&Negotiated> {
        if self.negotiated.is_some() {
            return Err(RpcError::internal("content negotiation already resolved"));
        }
        Ok(self.negotiated.insert(negotiated))
    }

    /// Sets a header, replacing any previous value.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }
}
