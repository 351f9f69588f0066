//! Running the merged phases against one request.

use switchyard_core::signature::bind;
use switchyard_core::stage::{Next, Terminal};
use switchyard_core::{BoxFuture, Context, ExecutionResult, RpcError, RpcResult};

use crate::merge::StageCache;

/// The terminal link of the calling chain: binds the working parameters to
/// the endpoint signature and calls the handler.
struct EndpointCall;

impl Terminal for EndpointCall {
    fn invoke<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, RpcResult<ExecutionResult>> {
        Box::pin(async move {
            let endpoint = ctx
                .endpoint()
                .cloned()
                .ok_or_else(|| RpcError::internal("no endpoint resolved for call"))?;
            let args = bind(endpoint.signature(), ctx.params.clone())?;
            endpoint.handler().call(ctx, args).await
        })
    }
}

/// Executes the five phases for a request.
///
/// The pipeline owns the memoized merge of scope stages; one instance is
/// shared by all adapters of a server.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use switchyard_core::{handler_fn, Args, Context, DispatchResult, Endpoint, HandlerShape, Scope};
/// use switchyard_pipeline::Pipeline;
///
/// # tokio_test::block_on(async {
/// let echo = Endpoint::builder(
///     "echo",
///     HandlerShape::function().param("data"),
///     handler_fn(|args: Args| async move { Ok(args.get("data").cloned().unwrap_or_default()) }),
/// )
/// .build()
/// .unwrap();
///
/// let mut ctx = Context::new(Arc::new(Scope::new("server")), Arc::new(Scope::new("local")));
/// let mut params = indexmap::IndexMap::new();
/// params.insert("data".to_string(), "x".into());
/// ctx.set_dispatch(DispatchResult::new(echo, params)).unwrap();
///
/// Pipeline::new().invoke(&mut ctx).await.unwrap();
/// assert_eq!(ctx.response.result.to_value(), Some("x".into()));
/// # });
/// ```
#[derive(Debug, Default)]
pub struct Pipeline {
    cache: StageCache,
}

impl Pipeline {
    /// Creates a pipeline with an empty merge cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The merge cache.
    pub fn cache(&self) -> &StageCache {
        &self.cache
    }

    /// Runs pre-request, calling and post-request.
    ///
    /// The logical result is stored on `ctx.response.result`. A pre-request
    /// interceptor that yields a result skips the calling phase; post-request
    /// still runs.
    pub async fn invoke(&self, ctx: &mut Context) -> RpcResult<()> {
        let merged = self.cache.merged(ctx);

        let mut short_circuit = None;
        for pre in merged.pre_requests() {
            if let Some(result) = pre.before(ctx).await? {
                tracing::debug!(interceptor = pre.name(), "pre-request produced the result");
                short_circuit = Some(result);
                break;
            }
        }

        ctx.response.result = match short_circuit {
            Some(result) => result,
            None => {
                let terminal = EndpointCall;
                Next::build(merged.callers(), &terminal)
                    .run(&mut *ctx)
                    .await?
            }
        };

        for post in merged.post_requests() {
            post.after(ctx).await?;
        }
        Ok(())
    }

    /// Runs the on-error phase and returns whether the error was handled.
    ///
    /// A failing error handler is logged and leaves the flag unchanged.
    pub async fn handle_error(&self, ctx: &mut Context, error: &RpcError) -> bool {
        let merged = self.cache.merged(ctx);
        let mut handled = false;
        for handler in merged.error_handlers() {
            match handler.handle(ctx, error, handled).await {
                Ok(flag) => handled = flag,
                Err(e) => tracing::error!(
                    interceptor = handler.name(),
                    error = ?e,
                    "error handler failed"
                ),
            }
        }
        handled
    }

    /// Runs every finalizer. Failures are logged, never returned.
    pub async fn finalize(&self, ctx: &mut Context) {
        let merged = self.cache.merged(ctx);
        for finalizer in merged.finalizers() {
            if let Err(e) = finalizer.finalize(ctx).await {
                tracing::error!(interceptor = finalizer.name(), error = ?e, "finalizer failed");
            }
        }
    }
}
