//! End-to-end pipeline integration tests.
//!
//! These tests register interceptors on all four scopes and verify that the
//! merged phases run in the right order:
//!
//! 1. Pre-request - may short-circuit
//! 2. Calling - chain of responsibility around the handler
//! 3. Post-request - after a successful call
//! 4. On-error - with the "handled" flag
//! 5. Finalize - always

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use switchyard_core::stage::{
    Caller, FnErrorHandler, FnFinalizer, FnPostRequest, FnPreRequest, Next,
};
use switchyard_core::{
    handler_fn, Args, BoxFuture, Context, DispatchResult, Endpoint, ExecutionResult, HandlerShape,
    Phase, RpcError, RpcResult, Scope, SetupError,
};
use switchyard_pipeline::{MergedStage, Pipeline};

type Trace = Arc<Mutex<Vec<String>>>;

/// A caller that records entering and leaving.
struct Recording {
    name: &'static str,
    trace: Trace,
}

impl Caller for Recording {
    fn name(&self) -> &'static str {
        self.name
    }

    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, RpcResult<ExecutionResult>> {
        Box::pin(async move {
            self.trace.lock().push(format!("{}:in", self.name));
            let result = next.run(ctx).await;
            self.trace.lock().push(format!("{}:out", self.name));
            result
        })
    }
}

struct Scopes {
    server: Arc<Scope>,
    adapter: Arc<Scope>,
    service: Arc<Scope>,
}

fn scopes() -> Scopes {
    Scopes {
        server: Arc::new(Scope::new("server")),
        adapter: Arc::new(Scope::new("http")),
        service: Arc::new(Scope::new("users")),
    }
}

fn endpoint(trace: &Trace, fail: bool) -> Arc<Endpoint> {
    let trace = Arc::clone(trace);
    Endpoint::builder(
        "get_user",
        HandlerShape::function().param("id"),
        handler_fn(move |args: Args| {
            let trace = Arc::clone(&trace);
            async move {
                trace.lock().push("handler".to_string());
                if fail {
                    return Err(RpcError::not_found("no such user"));
                }
                Ok(json!({ "id": args.get("id").cloned().unwrap_or(Value::Null) }))
            }
        }),
    )
    .build()
    .unwrap()
}

fn context(scopes: &Scopes, endpoint: Arc<Endpoint>) -> Context {
    let mut ctx = Context::new(Arc::clone(&scopes.server), Arc::clone(&scopes.adapter));
    let mut params = IndexMap::new();
    params.insert("id".to_string(), json!(7));
    ctx.set_dispatch(DispatchResult::new(endpoint, params).with_service(Arc::clone(&scopes.service)))
        .unwrap();
    ctx
}

/// Drives a context the way an adapter does.
async fn drive(pipeline: &Pipeline, ctx: &mut Context) -> Result<(), RpcError> {
    let outcome = match pipeline.invoke(ctx).await {
        Ok(()) => Ok(()),
        Err(e) => {
            if pipeline.handle_error(ctx, &e).await {
                Ok(())
            } else {
                Err(e)
            }
        }
    };
    pipeline.finalize(ctx).await;
    outcome
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_equal_weights_keep_insertion_order() {
    let trace: Trace = Arc::default();
    let stage = switchyard_core::ExecutionStage::new();
    for (name, weight) in [("h1", 10), ("h2", 10), ("h3", 5)] {
        stage
            .add_caller(Recording { name, trace: Arc::clone(&trace) }, weight)
            .unwrap();
    }
    let merged = MergedStage::merge([&stage]);
    assert_eq!(merged.names(Phase::Calling), ["h1", "h2", "h3"]);
}

#[tokio::test]
async fn test_calling_chain_spans_all_scopes() {
    let trace: Trace = Arc::default();
    let s = scopes();
    let ep = endpoint(&trace, false);

    let add = |scope: &switchyard_core::ExecutionStage, name: &'static str, weight: i32| {
        scope
            .add_caller(Recording { name, trace: Arc::clone(&trace) }, weight)
            .unwrap();
    };
    add(ep.stage(), "endpoint", 100);
    add(s.server.stage(), "server", 1);
    add(s.service.stage(), "service", 1);
    add(s.adapter.stage(), "adapter", 50);

    let mut ctx = context(&s, ep);
    drive(&Pipeline::new(), &mut ctx).await.unwrap();

    assert_eq!(
        *trace.lock(),
        [
            "endpoint:in",
            "adapter:in",
            "server:in",
            "service:in",
            "handler",
            "service:out",
            "server:out",
            "adapter:out",
            "endpoint:out",
        ]
    );
    assert_eq!(ctx.response.result, ExecutionResult::single(json!({"id": 7})));
}

// ============================================================================
// Phase sequencing
// ============================================================================

#[tokio::test]
async fn test_phases_run_in_order_on_success() {
    let trace: Trace = Arc::default();
    let s = scopes();
    let ep = endpoint(&trace, false);

    let t = Arc::clone(&trace);
    s.server
        .stage()
        .add_pre_request(
            FnPreRequest::new("pre", move |_ctx: &mut Context| {
                t.lock().push("pre".into());
                Ok(None)
            }),
            0,
        )
        .unwrap();
    let t = Arc::clone(&trace);
    s.adapter
        .stage()
        .add_post_request(
            FnPostRequest::new("post", move |_ctx: &mut Context| {
                t.lock().push("post".into());
                Ok(())
            }),
            0,
        )
        .unwrap();
    let t = Arc::clone(&trace);
    s.service
        .stage()
        .add_error_handler(
            FnErrorHandler::new("on_error", move |_ctx: &mut Context, _e: &RpcError, h: bool| {
                t.lock().push("error".into());
                Ok(h)
            }),
            0,
        )
        .unwrap();
    let t = Arc::clone(&trace);
    ep.stage()
        .add_finalizer(
            FnFinalizer::new("finalize", move |_ctx: &mut Context| {
                t.lock().push("finalize".into());
                Ok(())
            }),
            0,
        )
        .unwrap();

    let mut ctx = context(&s, ep);
    drive(&Pipeline::new(), &mut ctx).await.unwrap();
    assert_eq!(*trace.lock(), ["pre", "handler", "post", "finalize"]);
}

#[tokio::test]
async fn test_unhandled_error_propagates_after_finalize() {
    let trace: Trace = Arc::default();
    let s = scopes();
    let ep = endpoint(&trace, true);

    let t = Arc::clone(&trace);
    s.server
        .stage()
        .add_post_request(
            FnPostRequest::new("post", move |_ctx: &mut Context| {
                t.lock().push("post".into());
                Ok(())
            }),
            0,
        )
        .unwrap();
    let t = Arc::clone(&trace);
    s.server
        .stage()
        .add_finalizer(
            FnFinalizer::new("finalize", move |_ctx: &mut Context| {
                t.lock().push("finalize".into());
                Ok(())
            }),
            0,
        )
        .unwrap();

    let mut ctx = context(&s, ep);
    let err = drive(&Pipeline::new(), &mut ctx).await.unwrap_err();
    assert_eq!(err.kind(), switchyard_core::ErrorKind::NotFound);
    assert_eq!(*trace.lock(), ["handler", "finalize"]);
}

#[tokio::test]
async fn test_error_handled_by_later_scope() {
    let trace: Trace = Arc::default();
    let s = scopes();
    let ep = endpoint(&trace, true);
    ep.stage()
        .add_error_handler(
            FnErrorHandler::new("fallback", |ctx: &mut Context, e: &RpcError, _h: bool| {
                ctx.response.result = ExecutionResult::single(format!("fallback: {}", e.reason()));
                Ok(true)
            }),
            0,
        )
        .unwrap();

    let mut ctx = context(&s, ep);
    drive(&Pipeline::new(), &mut ctx).await.unwrap();
    assert_eq!(ctx.response.result, ExecutionResult::single("fallback: no such user"));
}

// ============================================================================
// Registration after freeze
// ============================================================================

#[tokio::test]
async fn test_frozen_scope_rejects_new_interceptors() {
    let s = scopes();
    s.server.stage().freeze();
    let err = s
        .server
        .stage()
        .add_finalizer(FnFinalizer::new("late", |_ctx: &mut Context| Ok(())), 0)
        .unwrap_err();
    assert!(matches!(err, SetupError::StageFrozen));
}
