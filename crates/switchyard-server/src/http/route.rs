//! Route metadata attached to endpoints.

use http::Method;

/// Which query parameters may carry several values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MultiParams {
    /// Every parameter.
    All,
    /// Only the named parameters.
    Only(Vec<String>),
    /// None; a repeated key is rejected.
    #[default]
    None,
}

impl MultiParams {
    /// Returns `true` if `name` may carry several values.
    pub fn allows(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(names) => names.iter().any(|n| n == name),
            Self::None => false,
        }
    }
}

/// Binds an endpoint to an HTTP path and method set.
///
/// Attach one or more routes to an endpoint with
/// [`Endpoint::attach_child`](switchyard_core::Endpoint::attach_child).
///
/// ```
/// use http::Method;
/// use switchyard_server::http::{MultiParams, Route};
///
/// let route = Route::new("/users/{id}")
///     .methods([Method::GET, Method::HEAD])
///     .allow_multi(MultiParams::Only(vec!["tag".into()]));
/// assert!(route.accepts(&Method::HEAD));
/// assert!(!route.accepts(&Method::POST));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Path pattern, e.g. `/users/{id}`.
    pub path: String,
    /// Accepted methods.
    pub methods: Vec<Method>,
    /// Optional route name.
    pub name: Option<String>,
    /// Parameters allowed to repeat in the query string.
    pub allowed_multi_params: MultiParams,
}

impl Route {
    /// A `GET` and `POST` route for `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            methods: vec![Method::GET, Method::POST],
            name: None,
            allowed_multi_params: MultiParams::None,
        }
    }

    /// Replaces the accepted methods.
    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    /// Names the route.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets which query parameters may repeat.
    pub fn allow_multi(mut self, allowed: MultiParams) -> Self {
        self.allowed_multi_params = allowed;
        self
    }

    /// Returns `true` if the route accepts `method`.
    pub fn accepts(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }
}
