//! Endpoints: handlers with their signature, settings and stage.
//!
//! # Example
//!
//! ```
//! use switchyard_core::{handler_fn, Args, Endpoint, ExecutionResult, HandlerShape};
//!
//! let echo = Endpoint::builder(
//!     "echo",
//!     HandlerShape::function().param("data"),
//!     handler_fn(|args: Args| async move {
//!         Ok(ExecutionResult::single(args.get("data").cloned().unwrap_or_default()))
//!     }),
//! )
//! .document("Returns its input")
//! .build()
//! .unwrap();
//!
//! assert_eq!(echo.signature().params(), ["data"]);
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use uuid::Uuid;

use crate::children::Children;
use crate::context::Context;
use crate::convert::Converter;
use crate::error::{RpcResult, SetupError};
use crate::result::ExecutionResult;
use crate::settings::Settings;
use crate::signature::{inspect, Args, HandlerShape, Signature};
use crate::stage::{BoxFuture, ExecutionStage};

/// The callable behind an endpoint.
pub trait Handler: Send + Sync + 'static {
    /// Invokes the handler with bound arguments.
    fn call<'a>(&'a self, ctx: &'a mut Context, args: Args) -> BoxFuture<'a, RpcResult<ExecutionResult>>;
}

/// Handler backed by an async closure over [`Args`].
pub struct FnHandler<F> {
    func: F,
}

/// Wraps an async closure as a [`Handler`].
pub fn handler_fn<F, Fut, R>(func: F) -> FnHandler<F>
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<R>> + Send + 'static,
    R: Into<ExecutionResult>,
{
    FnHandler { func }
}

impl<F, Fut, R> Handler for FnHandler<F>
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<R>> + Send + 'static,
    R: Into<ExecutionResult>,
{
    fn call<'a>(&'a self, _ctx: &'a mut Context, args: Args) -> BoxFuture<'a, RpcResult<ExecutionResult>> {
        let fut = (self.func)(args);
        Box::pin(async move { fut.await.map(Into::into) })
    }
}

/// Handler backed by a closure that also sees the [`Context`].
///
/// The closure runs synchronously with the context borrowed and returns a
/// future that owns whatever it took from it, such as an extension.
pub struct ContextFnHandler<F> {
    func: F,
}

/// Wraps a context-aware closure as a [`Handler`].
///
/// ```
/// use switchyard_core::{context_handler_fn, Args, Context};
///
/// let handler = context_handler_fn(|ctx: &mut Context, _args: Args| {
///     let id = ctx.id();
///     async move { Ok(serde_json::json!(id.to_string())) }
/// });
/// # let _ = handler;
/// ```
pub fn context_handler_fn<F, Fut, R>(func: F) -> ContextFnHandler<F>
where
    F: Fn(&mut Context, Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<R>> + Send + 'static,
    R: Into<ExecutionResult>,
{
    ContextFnHandler { func }
}

impl<F, Fut, R> Handler for ContextFnHandler<F>
where
    F: Fn(&mut Context, Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<R>> + Send + 'static,
    R: Into<ExecutionResult>,
{
    fn call<'a>(&'a self, ctx: &'a mut Context, args: Args) -> BoxFuture<'a, RpcResult<ExecutionResult>> {
        let fut = (self.func)(ctx, args);
        Box::pin(async move { fut.await.map(Into::into) })
    }
}

/// A registered handler.
pub struct Endpoint {
    id: Uuid,
    name: String,
    document: Option<String>,
    signature: Signature,
    handler: Arc<dyn Handler>,
    settings: Settings,
    stage: ExecutionStage,
    children: Children,
}

impl Endpoint {
    /// Starts building an endpoint.
    pub fn builder(name: impl Into<String>, shape: HandlerShape, handler: impl Handler) -> EndpointBuilder {
        EndpointBuilder {
            name: name.into(),
            shape,
            handler: Arc::new(handler),
            document: None,
            settings: Settings::new(),
        }
    }

    /// Unique id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Endpoint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Documentation string.
    pub fn document(&self) -> Option<&str> {
        self.document.as_deref()
    }

    /// Normalized signature.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// The handler.
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    /// Endpoint-scope settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Endpoint-scope interceptors.
    pub fn stage(&self) -> &ExecutionStage {
        &self.stage
    }

    /// Attaches adapter metadata. Returns `false` if already present.
    pub fn attach_child<C>(&self, child: C) -> bool
    where
        C: PartialEq + Send + Sync + 'static,
    {
        self.children.attach(child)
    }

    /// Returns adapter metadata of type `C`.
    pub fn children<C>(&self) -> Vec<C>
    where
        C: Clone + Send + Sync + 'static,
    {
        self.children.get()
    }

    /// Returns `true` if metadata of type `C` is attached.
    pub fn has_children<C: Send + Sync + 'static>(&self) -> bool {
        self.children.contains::<C>()
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Endpoint`].
pub struct EndpointBuilder {
    name: String,
    shape: HandlerShape,
    handler: Arc<dyn Handler>,
    document: Option<String>,
    settings: Settings,
}

impl EndpointBuilder {
    /// Sets the documentation string.
    #[must_use]
    pub fn document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }

    /// Replaces the endpoint settings.
    #[must_use]
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Declares the type of one parameter.
    #[must_use]
    pub fn parameter_type(mut self, param: impl Into<String>, converter: Converter) -> Self {
        self.settings.parameter_types.insert(param.into(), converter);
        self
    }

    /// Inspects the handler shape and builds the endpoint.
    ///
    /// Malformed signatures fail here, never at call time.
    pub fn build(self) -> Result<Arc<Endpoint>, SetupError> {
        let signature = inspect(&self.name, &self.shape)?;
        if let Some(unknown) = self
            .settings
            .parameter_types
            .keys()
            .find(|p| !signature.declares(p))
        {
            if signature.open().is_none() {
                return Err(SetupError::malformed(
                    &self.name,
                    format!("type declared for unknown parameter '{unknown}'"),
                ));
            }
        }
        Ok(Arc::new(Endpoint {
            id: Uuid::now_v7(),
            name: self.name,
            document: self.document,
            signature,
            handler: self.handler,
            settings: self.settings,
            stage: ExecutionStage::new(),
            children: Children::default(),
        }))
    }
}
