//! The per-unit processing sequence shared by every adapter.
//!
//! An adapter implements [`Transport`] for its wire format and hands each
//! incoming unit to [`process`], which runs:
//!
//! ```text
//! parse request → parse content → dispatch → load session
//!   → pre-request / calling / post-request → store session → render
//!   → (on-error, if anything failed) → finalize
//! ```

use std::sync::Arc;
use std::time::Duration;

use switchyard_content::{render, Rendered};
use switchyard_core::ambient::{with_call, CallInfo};
use switchyard_core::{Context, Dispatcher, ErrorKind, RpcError, RpcResult, Scope};

use crate::adapter::Runtime;

/// Hooks an adapter provides around the shared sequence.
pub trait Transport: Dispatcher {
    /// One raw incoming unit: an HTTP request, a queue delivery.
    type Unit: Send;

    /// What goes back over the wire.
    type Reply: Send;

    /// Fills `ctx.request` from the raw unit.
    fn parse_request(&self, unit: Self::Unit, ctx: &mut Context) -> RpcResult<()>;

    /// Turns a successfully rendered response into a reply.
    fn build_response(&self, ctx: &mut Context, rendered: Rendered) -> Self::Reply;

    /// Maps an unhandled error to a terminal signal.
    ///
    /// `rendered` is the error body, or `None` when even that could not be
    /// built and a bare reply is due.
    fn error_reply(&self, ctx: &mut Context, error: &RpcError, rendered: Option<Rendered>) -> Self::Reply;
}

/// Processes one unit end to end and returns the transport reply.
///
/// The call identity is installed in the ambient slot for the duration. With
/// a `timeout`, an expired unit fails with a request-timeout error; error
/// handling and finalizers still run.
pub async fn process<T: Transport>(
    runtime: &Runtime,
    adapter: &Arc<Scope>,
    transport: &T,
    unit: T::Unit,
    timeout: Option<Duration>,
) -> T::Reply {
    let mut ctx = Context::new(Arc::clone(runtime.scope()), Arc::clone(adapter));
    let info = CallInfo {
        request_id: ctx.id(),
        adapter: adapter.name().to_string(),
    };

    with_call(info, async move {
        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, execute(runtime, transport, &mut ctx, unit))
                .await
                .unwrap_or_else(|_| Err(RpcError::request_timeout())),
            None => execute(runtime, transport, &mut ctx, unit).await,
        };

        let reply = match outcome {
            Ok(rendered) => transport.build_response(&mut ctx, rendered),
            Err(error) => recover(runtime, transport, &mut ctx, error).await,
        };
        runtime.pipeline().finalize(&mut ctx).await;
        reply
    })
    .await
}

async fn execute<T: Transport>(
    runtime: &Runtime,
    transport: &T,
    ctx: &mut Context,
    unit: T::Unit,
) -> RpcResult<Rendered> {
    transport.parse_request(unit, ctx)?;

    let encoding = ctx.request_encoding();
    if let Some(content) = ctx.request.content.as_mut() {
        if content.mime_type.is_some() {
            content.data = Some(runtime.parsers().parse(content, &encoding)?);
        }
    }

    let dispatch = transport.dispatch(ctx).await?;
    ctx.set_dispatch(dispatch)?;

    if let Some(manager) = ctx.session_manager() {
        ctx.session = manager.load(&ctx.request).await?;
    }

    runtime.pipeline().invoke(ctx).await?;
    store_session(ctx).await?;
    render(ctx, runtime.builders(), None)
}

async fn store_session(ctx: &mut Context) -> RpcResult<()> {
    if let (Some(manager), Some(session)) = (ctx.session_manager(), ctx.session.as_ref()) {
        manager.store(session, &mut ctx.response).await?;
    }
    Ok(())
}

async fn recover<T: Transport>(
    runtime: &Runtime,
    transport: &T,
    ctx: &mut Context,
    error: RpcError,
) -> T::Reply {
    log_failure(ctx, &error);

    let mut error = error;
    if runtime.pipeline().handle_error(ctx, &error).await {
        let rendered = match store_session(ctx).await {
            Ok(()) => render(ctx, runtime.builders(), None),
            Err(e) => Err(e),
        };
        match rendered {
            Ok(rendered) => return transport.build_response(ctx, rendered),
            Err(e) => {
                log_failure(ctx, &e);
                error = e;
            }
        }
    }

    let rendered = match store_session(ctx).await {
        Ok(()) => match render(ctx, runtime.builders(), Some(&error)) {
            Ok(rendered) => Some(rendered),
            Err(e) => {
                tracing::error!(request_id = %ctx.id(), error = %e, "cannot build error response");
                None
            }
        },
        Err(e) => {
            tracing::error!(request_id = %ctx.id(), error = %e, "cannot store session on error path");
            None
        }
    };
    transport.error_reply(ctx, &error, rendered)
}

fn log_failure(ctx: &Context, error: &RpcError) {
    let endpoint = ctx.endpoint().map(|e| e.name().to_string()).unwrap_or_default();
    if !error.is_recognized() || error.kind() == ErrorKind::Internal {
        tracing::error!(
            request_id = %ctx.id(),
            adapter = ctx.adapter().name(),
            %endpoint,
            error = ?error,
            "request failed"
        );
    } else {
        tracing::debug!(
            request_id = %ctx.id(),
            adapter = ctx.adapter().name(),
            %endpoint,
            kind = %error.kind(),
            code = error.code(),
            reason = error.reason(),
            "request rejected"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use indexmap::IndexMap;
    use switchyard_content::{BuilderRegistry, ParserRegistry};
    use switchyard_core::stage::{FnErrorHandler, FnFinalizer};
    use switchyard_core::{
        handler_fn, Args, BoxFuture, DispatchResult, Endpoint, ExecutionResult, HandlerShape, RequestContent,
    };

    use super::*;

    #[derive(Debug, PartialEq)]
    enum Reply {
        Built(String),
        Failed(ErrorKind, Option<String>),
    }

    /// Hands every unit to one endpoint.
    struct Loopback {
        endpoint: Arc<Endpoint>,
    }

    /// Optional body as `(mime type, raw)`.
    type Unit = Option<(&'static str, &'static str)>;

    impl Dispatcher for Loopback {
        fn dispatch<'a>(&'a self, _ctx: &'a mut Context) -> BoxFuture<'a, RpcResult<DispatchResult>> {
            let dispatch = DispatchResult::new(Arc::clone(&self.endpoint), IndexMap::new());
            Box::pin(std::future::ready(Ok(dispatch)))
        }
    }

    impl Transport for Loopback {
        type Unit = Unit;
        type Reply = Reply;

        fn parse_request(&self, unit: Unit, ctx: &mut Context) -> RpcResult<()> {
            if let Some((mime_type, raw)) = unit {
                ctx.request.content = Some(RequestContent::new(Bytes::from(raw), Some(mime_type.to_string()), None));
            }
            Ok(())
        }

        fn build_response(&self, _ctx: &mut Context, rendered: Rendered) -> Reply {
            Reply::Built(String::from_utf8_lossy(&rendered.body).into_owned())
        }

        fn error_reply(&self, _ctx: &mut Context, error: &RpcError, rendered: Option<Rendered>) -> Reply {
            Reply::Failed(error.kind(), rendered.map(|r| String::from_utf8_lossy(&r.body).into_owned()))
        }
    }

    fn runtime(builders: BuilderRegistry) -> Runtime {
        Runtime::new(Arc::new(Scope::new("server")), ParserRegistry::with_defaults(), builders)
    }

    fn endpoint(fails: bool) -> Arc<Endpoint> {
        Endpoint::builder(
            "job",
            HandlerShape::function(),
            handler_fn(move |_: Args| async move {
                if fails {
                    Err(RpcError::internal("job failed"))
                } else {
                    Ok(ExecutionResult::single("done"))
                }
            }),
        )
        .build()
        .unwrap()
    }

    fn count_finalized(endpoint: &Endpoint) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        endpoint
            .stage()
            .add_finalizer(
                FnFinalizer::new("count", move |_ctx: &mut Context| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
                0,
            )
            .unwrap();
        count
    }

    async fn run(runtime: &Runtime, transport: &Loopback, unit: Unit, timeout: Option<Duration>) -> Reply {
        let adapter = Arc::new(Scope::new("loopback"));
        process(runtime, &adapter, transport, unit, timeout).await
    }

    #[tokio::test]
    async fn test_success_goes_through_build_response() {
        let runtime = runtime(BuilderRegistry::with_defaults());
        let transport = Loopback { endpoint: endpoint(false) };
        let finalized = count_finalized(&transport.endpoint);

        assert_eq!(run(&runtime, &transport, None, None).await, Reply::Built("done".to_string()));
        assert_eq!(finalized.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_still_runs_error_handlers_and_finalizers() {
        let runtime = runtime(BuilderRegistry::with_defaults());
        let slow = Endpoint::builder(
            "slow",
            HandlerShape::function(),
            handler_fn(|_: Args| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }),
        )
        .build()
        .unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&seen);
        slow.stage()
            .add_error_handler(
                FnErrorHandler::new("observe", move |_ctx: &mut Context, error: &RpcError, handled: bool| {
                    assert_eq!(error.kind(), ErrorKind::RequestTimeout);
                    observed.fetch_add(1, Ordering::SeqCst);
                    Ok(handled)
                }),
                0,
            )
            .unwrap();
        let finalized = count_finalized(&slow);
        let transport = Loopback { endpoint: slow };

        let reply = run(&runtime, &transport, None, Some(Duration::from_secs(1))).await;
        assert!(matches!(reply, Reply::Failed(ErrorKind::RequestTimeout, Some(_))), "{reply:?}");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(finalized.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handled_error_renders_normal_reply() {
        let runtime = runtime(BuilderRegistry::with_defaults());
        let failing = endpoint(true);
        failing
            .stage()
            .add_error_handler(
                FnErrorHandler::new("fallback", |ctx: &mut Context, _e: &RpcError, _h: bool| {
                    ctx.response.result = ExecutionResult::single("fallback");
                    Ok(true)
                }),
                0,
            )
            .unwrap();
        let transport = Loopback { endpoint: failing };

        assert_eq!(run(&runtime, &transport, None, None).await, Reply::Built("fallback".to_string()));
    }

    #[tokio::test]
    async fn test_unhandled_error_renders_error_body() {
        let runtime = runtime(BuilderRegistry::with_defaults());
        let transport = Loopback { endpoint: endpoint(true) };
        let finalized = count_finalized(&transport.endpoint);

        let reply = run(&runtime, &transport, None, None).await;
        assert!(matches!(reply, Reply::Failed(ErrorKind::Internal, Some(_))), "{reply:?}");
        assert_eq!(finalized.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unbuildable_error_degrades_to_bare_reply() {
        let runtime = runtime(BuilderRegistry::new());
        let transport = Loopback { endpoint: endpoint(false) };
        let finalized = count_finalized(&transport.endpoint);

        let reply = run(&runtime, &transport, None, None).await;
        assert!(matches!(reply, Reply::Failed(_, None)), "{reply:?}");
        assert_eq!(finalized.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_body_type_is_unsupported() {
        let runtime = runtime(BuilderRegistry::with_defaults());
        let transport = Loopback { endpoint: endpoint(false) };

        let reply = run(&runtime, &transport, Some(("application/x-unknown", "??")), None).await;
        assert!(matches!(reply, Reply::Failed(ErrorKind::UnsupportedMediaType, Some(_))), "{reply:?}");

        let reply = run(&runtime, &transport, Some(("application/json", "{}")), None).await;
        assert_eq!(reply, Reply::Built("done".to_string()));
    }
}
