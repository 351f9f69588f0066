//! Services: named groups of endpoints sharing a scope.

use std::sync::Arc;

use indexmap::IndexMap;
use switchyard_core::{Children, Endpoint, ExecutionStage, Scope, SetupError, Settings};

/// A named group of endpoints.
///
/// The service scope sits between the adapter and endpoint scopes for
/// settings and interceptors. Service-level transport metadata (such as a
/// queue topology) is attached as children.
///
/// ```
/// use switchyard_core::{handler_fn, Args, Endpoint, HandlerShape};
/// use switchyard_server::Service;
///
/// let ping = Endpoint::builder("ping", HandlerShape::function(), handler_fn(|_: Args| async { Ok(()) }))
///     .build()
///     .unwrap();
/// let mut service = Service::new("health");
/// service.add_endpoint(ping).unwrap();
/// assert!(service.endpoint("ping").is_some());
/// ```
#[derive(Debug)]
pub struct Service {
    scope: Arc<Scope>,
    endpoints: IndexMap<String, Arc<Endpoint>>,
    children: Children,
}

impl Service {
    /// Creates an empty service.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_settings(name, Settings::new())
    }

    /// Creates an empty service with scope settings.
    pub fn with_settings(name: impl Into<String>, settings: Settings) -> Self {
        Self {
            scope: Arc::new(Scope::new(name).with_settings(settings)),
            endpoints: IndexMap::new(),
            children: Children::default(),
        }
    }

    /// Service name.
    pub fn name(&self) -> &str {
        self.scope.name()
    }

    /// The service scope.
    pub fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    /// Service-scope interceptors.
    pub fn stage(&self) -> &ExecutionStage {
        self.scope.stage()
    }

    /// Registers an endpoint. Names are unique within a service.
    pub fn add_endpoint(&mut self, endpoint: Arc<Endpoint>) -> Result<Arc<Endpoint>, SetupError> {
        if self.endpoints.contains_key(endpoint.name()) {
            return Err(SetupError::duplicate("endpoint", endpoint.name()));
        }
        self.endpoints
            .insert(endpoint.name().to_string(), Arc::clone(&endpoint));
        Ok(endpoint)
    }

    /// Looks up an endpoint by name.
    pub fn endpoint(&self, name: &str) -> Option<&Arc<Endpoint>> {
        self.endpoints.get(name)
    }

    /// Endpoints in registration order.
    pub fn endpoints(&self) -> impl Iterator<Item = &Arc<Endpoint>> {
        self.endpoints.values()
    }

    /// Attaches service-level transport metadata.
    pub fn attach_child<C>(&self, child: C) -> bool
    where
        C: PartialEq + Send + Sync + 'static,
    {
        self.children.attach(child)
    }

    /// Returns service-level metadata of type `C`.
    pub fn children<C>(&self) -> Vec<C>
    where
        C: Clone + Send + Sync + 'static,
    {
        self.children.get()
    }
}
