//! Per-request context.
//!
//! A [`Context`] is created by a transport adapter for each incoming unit of
//! work and is exclusively owned by the task processing it. Interceptors and
//! handlers receive it by `&mut`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::convert::Converter;
use crate::dispatch::DispatchResult;
use crate::endpoint::Endpoint;
use crate::error::{RpcError, RpcResult};
use crate::request::Request;
use crate::response::Response;
use crate::scope::Scope;
use crate::session::{Session, SessionManager};
use crate::settings::{defaults, Settings};
use crate::stage::ExecutionStage;

/// A unique identifier for each request, using UUID v7.
///
/// # Example
///
/// ```
/// use switchyard_core::RequestId;
///
/// let id = RequestId::new();
/// println!("Request ID: {}", id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new time-ordered request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mutable state of one in-flight request.
pub struct Context {
    id: RequestId,
    server: Arc<Scope>,
    adapter: Arc<Scope>,
    /// The parsed request.
    pub request: Request,
    dispatch: Option<DispatchResult>,
    /// Working parameters. Seeded from the dispatch result and coerced by
    /// calling-phase interceptors before binding.
    pub params: IndexMap<String, Value>,
    /// The session, if a manager is configured.
    pub session: Option<Session>,
    /// The response being built.
    pub response: Response,
    /// Open-ended per-request metadata.
    pub metadata: IndexMap<String, Value>,
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Context {
    /// Creates a context for a request arriving through `adapter`.
    pub fn new(server: Arc<Scope>, adapter: Arc<Scope>) -> Self {
        Self {
            id: RequestId::new(),
            server,
            adapter,
            request: Request::new(),
            dispatch: None,
            params: IndexMap::new(),
            session: None,
            response: Response::new(),
            metadata: IndexMap::new(),
            extensions: HashMap::new(),
        }
    }

    /// Returns the request ID.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// The server scope.
    pub fn server(&self) -> &Arc<Scope> {
        &self.server
    }

    /// The adapter scope.
    pub fn adapter(&self) -> &Arc<Scope> {
        &self.adapter
    }

    /// The dispatch result, once resolved.
    pub fn dispatch(&self) -> Option<&DispatchResult> {
        self.dispatch.as_ref()
    }

    /// The resolved endpoint.
    pub fn endpoint(&self) -> Option<&Arc<Endpoint>> {
        self.dispatch.as_ref().map(DispatchResult::endpoint)
    }

    /// The resolving service scope.
    pub fn service(&self) -> Option<&Arc<Scope>> {
        self.dispatch.as_ref().and_then(DispatchResult::service)
    }

    /// Records the dispatch result and seeds the working parameters.
    ///
    /// A dispatch result is set exactly once per request.
    pub fn set_dispatch(&mut self, dispatch: DispatchResult) -> RpcResult<()> {
        if self.dispatch.is_some() {
            return Err(RpcError::internal("dispatch result already set"));
        }
        self.params = dispatch.params().clone();
        self.dispatch = Some(dispatch);
        Ok(())
    }

    /// Stages of every scope in merge order: server, adapter, service, endpoint.
    pub fn stages(&self) -> Vec<&ExecutionStage> {
        let mut stages = vec![self.server.stage(), self.adapter.stage()];
        if let Some(service) = self.service() {
            stages.push(service.stage());
        }
        if let Some(endpoint) = self.endpoint() {
            stages.push(endpoint.stage());
        }
        stages
    }

    /// Resolves a setting from the most specific scope that sets it.
    ///
    /// The walk order is endpoint, service, adapter, server.
    pub fn setting<T>(&self, pick: impl Fn(&Settings) -> Option<T>) -> Option<T> {
        self.endpoint()
            .and_then(|e| pick(e.settings()))
            .or_else(|| self.service().and_then(|s| pick(s.settings())))
            .or_else(|| pick(self.adapter.settings()))
            .or_else(|| pick(self.server.settings()))
    }

    /// Default inbound charset.
    pub fn request_encoding(&self) -> String {
        self.setting(|s| s.request_encoding.clone())
            .unwrap_or_else(|| defaults::REQUEST_ENCODING.to_string())
    }

    /// Configured outbound charset, if any scope sets one.
    pub fn response_encoding(&self) -> Option<String> {
        self.setting(|s| s.response_encoding.clone())
    }

    /// Allowed outbound media types. `None` means unrestricted.
    pub fn response_mime_types(&self) -> Option<Vec<String>> {
        self.setting(|s| s.response_mime_types.clone())
    }

    /// Selected container name.
    pub fn content_container(&self) -> String {
        self.setting(|s| s.content_container.clone())
            .unwrap_or_else(|| defaults::CONTENT_CONTAINER.to_string())
    }

    /// Configured session manager.
    pub fn session_manager(&self) -> Option<Arc<dyn SessionManager>> {
        self.setting(|s| s.session_manager.clone())
    }

    /// Declared converter for a parameter.
    pub fn parameter_type(&self, param: &str) -> Option<Converter> {
        self.setting(|s| s.parameter_types.get(param).cloned())
    }

    /// Stores a typed extension value.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use switchyard_core::{Context, Scope};
    ///
    /// #[derive(Debug, PartialEq)]
    /// struct DeliveryTag(u64);
    ///
    /// let mut ctx = Context::new(Arc::new(Scope::new("server")), Arc::new(Scope::new("queue")));
    /// ctx.insert_extension(DeliveryTag(7));
    /// assert_eq!(ctx.extension::<DeliveryTag>(), Some(&DeliveryTag(7)));
    /// ```
    pub fn insert_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a typed extension value.
    pub fn extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref())
    }

    /// Removes and returns a typed extension value.
    pub fn remove_extension<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast().ok())
            .map(|boxed| *boxed)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("adapter", &self.adapter.name())
            .field("endpoint", &self.endpoint().map(|e| e.name()))
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{handler_fn, Endpoint};
    use crate::result::ExecutionResult;
    use crate::signature::{Args, HandlerShape};

    fn endpoint(settings: Settings) -> Arc<Endpoint> {
        Endpoint::builder(
            "echo",
            HandlerShape::function().param("data"),
            handler_fn(|_args: Args| async { Ok(ExecutionResult::Empty) }),
        )
        .settings(settings)
        .build()
        .unwrap()
    }

    #[test]
    fn test_setting_precedence() {
        let server = Arc::new(Scope::new("server").with_settings(
            Settings::new().with_response_encoding("server").with_request_encoding("latin1"),
        ));
        let adapter = Arc::new(
            Scope::new("http").with_settings(Settings::new().with_response_encoding("adapter")),
        );
        let mut ctx = Context::new(server, adapter);
        assert_eq!(ctx.response_encoding().as_deref(), Some("adapter"));

        let service = Arc::new(
            Scope::new("svc").with_settings(Settings::new().with_response_encoding("service")),
        );
        let ep = endpoint(Settings::new().with_response_encoding("endpoint"));
        ctx.set_dispatch(DispatchResult::new(ep, IndexMap::new()).with_service(service))
            .unwrap();
        assert_eq!(ctx.response_encoding().as_deref(), Some("endpoint"));
        assert_eq!(ctx.request_encoding(), "latin1");
        assert_eq!(ctx.content_container(), "plain");
        assert_eq!(ctx.stages().len(), 4);
    }

    #[test]
    fn test_dispatch_set_once() {
        let mut ctx = Context::new(Arc::new(Scope::new("s")), Arc::new(Scope::new("a")));
        let mut params = IndexMap::new();
        params.insert("data".to_string(), Value::from("x"));
        ctx.set_dispatch(DispatchResult::new(endpoint(Settings::new()), params))
            .unwrap();
        assert_eq!(ctx.params["data"], "x");
        let again = ctx.set_dispatch(DispatchResult::new(endpoint(Settings::new()), IndexMap::new()));
        assert!(again.is_err());
    }

    #[test]
    fn test_extensions() {
        let mut ctx = Context::new(Arc::new(Scope::new("s")), Arc::new(Scope::new("a")));
        ctx.insert_extension(5u32);
        assert_eq!(ctx.extension::<u32>(), Some(&5));
        assert_eq!(ctx.remove_extension::<u32>(), Some(5));
        assert!(ctx.extension::<u32>().is_none());
    }
}
