//! Dispatch results.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::context::Context;
use crate::endpoint::Endpoint;
use crate::error::RpcResult;
use crate::scope::Scope;
use crate::stage::BoxFuture;

/// The endpoint, raw parameters and originating service resolved for one
/// request. Immutable once built.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    endpoint: Arc<Endpoint>,
    params: IndexMap<String, Value>,
    service: Option<Arc<Scope>>,
}

impl DispatchResult {
    /// Creates a result without an originating service.
    pub fn new(endpoint: Arc<Endpoint>, params: IndexMap<String, Value>) -> Self {
        Self {
            endpoint,
            params,
            service: None,
        }
    }

    /// Records the originating service.
    #[must_use]
    pub fn with_service(mut self, service: Arc<Scope>) -> Self {
        self.service = Some(service);
        self
    }

    /// The resolved endpoint.
    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// Raw wire parameters.
    pub fn params(&self) -> &IndexMap<String, Value> {
        &self.params
    }

    /// The originating service.
    pub fn service(&self) -> Option<&Arc<Scope>> {
        self.service.as_ref()
    }
}

/// Resolves a parsed request to a [`DispatchResult`].
///
/// The context is mutable so a dispatcher can leave transport-specific
/// extensions behind (e.g. the matched route).
pub trait Dispatcher: Send + Sync {
    /// Resolves the request held by `ctx`.
    fn dispatch<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, RpcResult<DispatchResult>>;
}
