//! The execution stage: weighted interceptors partitioned into phases.
//!
//! Every scope (server, adapter, service, endpoint) owns an
//! [`ExecutionStage`]. For each request the stages of all scopes are merged
//! into one flat list per [`Phase`], ordered by weight descending with ties
//! kept in insertion order.
//!
//! # Phases
//!
//! 1. **Pre-request** - may short-circuit the call by producing a result
//! 2. **Calling** - chain of responsibility around the endpoint handler
//! 3. **Post-request** - runs after a successful call
//! 4. **On-error** - sees the error and a "handled" flag
//! 5. **Finalize** - always runs; failures are only logged
//!
//! # Example
//!
//! ```
//! use switchyard_core::stage::{BoxFuture, Caller, ExecutionStage, Next};
//! use switchyard_core::{Context, ExecutionResult, RpcResult};
//!
//! struct Timing;
//!
//! impl Caller for Timing {
//!     fn name(&self) -> &'static str {
//!         "timing"
//!     }
//!
//!     fn call<'a>(
//!         &'a self,
//!         ctx: &'a mut Context,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, RpcResult<ExecutionResult>> {
//!         Box::pin(async move {
//!             let started = std::time::Instant::now();
//!             let result = next.run(&mut *ctx).await;
//!             ctx.metadata.insert("elapsed_us".into(), (started.elapsed().as_micros() as u64).into());
//!             result
//!         })
//!     }
//! }
//!
//! let stage = ExecutionStage::new();
//! stage.add_caller(Timing, 100).unwrap();
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::context::Context;
use crate::error::{RpcError, RpcResult, SetupError};
use crate::result::ExecutionResult;

/// A boxed future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The five ordered points of the request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Before the call; may short-circuit.
    PreRequest,
    /// Around the endpoint handler.
    Calling,
    /// After a successful call.
    PostRequest,
    /// After a failure.
    OnError,
    /// Always, last.
    Finalize,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 5] = [
        Phase::PreRequest,
        Phase::Calling,
        Phase::PostRequest,
        Phase::OnError,
        Phase::Finalize,
    ];

    /// Position in [`Phase::ALL`].
    pub const fn index(self) -> usize {
        match self {
            Self::PreRequest => 0,
            Self::Calling => 1,
            Self::PostRequest => 2,
            Self::OnError => 3,
            Self::Finalize => 4,
        }
    }

    /// Human readable name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::PreRequest => "pre-request",
            Self::Calling => "calling",
            Self::PostRequest => "post-request",
            Self::OnError => "on-error",
            Self::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runs before the call. Returning `Some` skips the calling phase.
pub trait PreRequest: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Inspects the request.
    fn before<'a>(&'a self, ctx: &'a mut Context)
        -> BoxFuture<'a, RpcResult<Option<ExecutionResult>>>;
}

/// One link of the calling chain.
pub trait Caller: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Processes the call, usually by invoking `next`.
    fn call<'a>(
        &'a self,
        ctx: &'a mut Context,
        next: Next<'a>,
    ) -> BoxFuture<'a, RpcResult<ExecutionResult>>;
}

/// Runs after a successful call.
pub trait PostRequest: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Inspects the result stored on `ctx.response`.
    fn after<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, RpcResult<()>>;
}

/// Sees a pipeline error.
pub trait ErrorHandler: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Returns the updated "handled" flag.
    fn handle<'a>(
        &'a self,
        ctx: &'a mut Context,
        error: &'a RpcError,
        handled: bool,
    ) -> BoxFuture<'a, RpcResult<bool>>;
}

/// Runs once the response is built or the request failed.
pub trait Finalizer: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Releases per-request resources.
    fn finalize<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, RpcResult<()>>;
}

/// The end of the calling chain.
pub trait Terminal: Send + Sync {
    /// Invokes the endpoint.
    fn invoke<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, RpcResult<ExecutionResult>>;
}

/// The remainder of the calling chain.
pub struct Next<'a> {
    inner: NextInner<'a>,
}

enum NextInner<'a> {
    Chain {
        caller: &'a dyn Caller,
        next: Box<Next<'a>>,
    },
    Terminal(&'a dyn Terminal),
}

impl<'a> Next<'a> {
    /// Builds a chain that runs `callers` in order and ends in `terminal`.
    pub fn build<I>(callers: I, terminal: &'a dyn Terminal) -> Self
    where
        I: IntoIterator<Item = &'a dyn Caller>,
        I::IntoIter: DoubleEndedIterator,
    {
        callers.into_iter().rev().fold(
            Self {
                inner: NextInner::Terminal(terminal),
            },
            |next, caller| Self {
                inner: NextInner::Chain {
                    caller,
                    next: Box::new(next),
                },
            },
        )
    }

    /// Runs the rest of the chain.
    pub fn run<'b>(self, ctx: &'b mut Context) -> BoxFuture<'b, RpcResult<ExecutionResult>>
    where
        'a: 'b,
    {
        match self.inner {
            NextInner::Chain { caller, next } => caller.call(ctx, *next),
            NextInner::Terminal(terminal) => terminal.invoke(ctx),
        }
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            NextInner::Chain { caller, .. } => write!(f, "Next({})", caller.name()),
            NextInner::Terminal(_) => f.write_str("Next(terminal)"),
        }
    }
}

/// An interceptor tagged with its phase.
#[derive(Clone)]
pub enum Interceptor {
    /// Pre-request interceptor.
    PreRequest(Arc<dyn PreRequest>),
    /// Calling-chain link.
    Caller(Arc<dyn Caller>),
    /// Post-request interceptor.
    PostRequest(Arc<dyn PostRequest>),
    /// Error handler.
    OnError(Arc<dyn ErrorHandler>),
    /// Finalizer.
    Finalize(Arc<dyn Finalizer>),
}

impl Interceptor {
    /// The phase this interceptor belongs to.
    pub fn phase(&self) -> Phase {
        match self {
            Self::PreRequest(_) => Phase::PreRequest,
            Self::Caller(_) => Phase::Calling,
            Self::PostRequest(_) => Phase::PostRequest,
            Self::OnError(_) => Phase::OnError,
            Self::Finalize(_) => Phase::Finalize,
        }
    }

    /// The interceptor's name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PreRequest(h) => h.name(),
            Self::Caller(h) => h.name(),
            Self::PostRequest(h) => h.name(),
            Self::OnError(h) => h.name(),
            Self::Finalize(h) => h.name(),
        }
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.phase(), self.name())
    }
}

/// An interceptor with its weight.
#[derive(Debug, Clone)]
pub struct Weighted {
    /// The interceptor.
    pub interceptor: Interceptor,
    /// Higher runs earlier.
    pub weight: i32,
}

/// Per-scope collection of weighted interceptors.
///
/// Registration fails with [`SetupError::StageFrozen`] once the stage is
/// frozen at server start. Every successful registration bumps the
/// generation counter so merged views can detect staleness.
pub struct ExecutionStage {
    lists: RwLock<[Vec<Weighted>; 5]>,
    frozen: AtomicBool,
    generation: AtomicU64,
}

impl ExecutionStage {
    /// Creates an empty stage.
    pub fn new() -> Self {
        Self {
            lists: RwLock::new(Default::default()),
            frozen: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    /// Adds an interceptor to its phase.
    pub fn add_handler(&self, interceptor: Interceptor, weight: i32) -> Result<(), SetupError> {
        if self.is_frozen() {
            return Err(SetupError::StageFrozen);
        }
        let phase = interceptor.phase();
        self.lists.write()[phase.index()].push(Weighted {
            interceptor,
            weight,
        });
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Adds a pre-request interceptor.
    pub fn add_pre_request(&self, handler: impl PreRequest, weight: i32) -> Result<(), SetupError> {
        self.add_handler(Interceptor::PreRequest(Arc::new(handler)), weight)
    }

    /// Adds a calling-chain link.
    pub fn add_caller(&self, handler: impl Caller, weight: i32) -> Result<(), SetupError> {
        self.add_handler(Interceptor::Caller(Arc::new(handler)), weight)
    }

    /// Adds a post-request interceptor.
    pub fn add_post_request(&self, handler: impl PostRequest, weight: i32) -> Result<(), SetupError> {
        self.add_handler(Interceptor::PostRequest(Arc::new(handler)), weight)
    }

    /// Adds an error handler.
    pub fn add_error_handler(&self, handler: impl ErrorHandler, weight: i32) -> Result<(), SetupError> {
        self.add_handler(Interceptor::OnError(Arc::new(handler)), weight)
    }

    /// Adds a finalizer.
    pub fn add_finalizer(&self, handler: impl Finalizer, weight: i32) -> Result<(), SetupError> {
        self.add_handler(Interceptor::Finalize(Arc::new(handler)), weight)
    }

    /// Returns the handlers of `phase` in insertion order.
    pub fn handlers(&self, phase: Phase) -> Vec<Weighted> {
        self.lists.read()[phase.index()].clone()
    }

    /// Number of handlers in `phase`.
    pub fn len(&self, phase: Phase) -> usize {
        self.lists.read()[phase.index()].len()
    }

    /// Returns `true` if no phase has handlers.
    pub fn is_empty(&self) -> bool {
        self.lists.read().iter().all(Vec::is_empty)
    }

    /// Rejects any further registration.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once frozen.
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    /// Monotonic registration counter.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl Default for ExecutionStage {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lists = self.lists.read();
        let mut s = f.debug_struct("ExecutionStage");
        for phase in Phase::ALL {
            s.field(phase.name(), &lists[phase.index()].len());
        }
        s.field("frozen", &self.is_frozen()).finish()
    }
}

/// Pre-request interceptor backed by a synchronous closure.
pub struct FnPreRequest<F> {
    name: &'static str,
    func: F,
}

impl<F> FnPreRequest<F> {
    /// Wraps `func`.
    pub const fn new(name: &'static str, func: F) -> Self {
        Self { name, func }
    }
}

impl<F> PreRequest for FnPreRequest<F>
where
    F: Fn(&mut Context) -> RpcResult<Option<ExecutionResult>> + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn before<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, RpcResult<Option<ExecutionResult>>> {
        let outcome = (self.func)(ctx);
        Box::pin(std::future::ready(outcome))
    }
}

/// Post-request interceptor backed by a synchronous closure.
pub struct FnPostRequest<F> {
    name: &'static str,
    func: F,
}

impl<F> FnPostRequest<F> {
    /// Wraps `func`.
    pub const fn new(name: &'static str, func: F) -> Self {
        Self { name, func }
    }
}

impl<F> PostRequest for FnPostRequest<F>
where
    F: Fn(&mut Context) -> RpcResult<()> + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn after<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, RpcResult<()>> {
        let outcome = (self.func)(ctx);
        Box::pin(std::future::ready(outcome))
    }
}

/// Error handler backed by a synchronous closure.
pub struct FnErrorHandler<F> {
    name: &'static str,
    func: F,
}

impl<F> FnErrorHandler<F> {
    /// Wraps `func`.
    pub const fn new(name: &'static str, func: F) -> Self {
        Self { name, func }
    }
}

impl<F> ErrorHandler for FnErrorHandler<F>
where
    F: Fn(&mut Context, &RpcError, bool) -> RpcResult<bool> + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut Context,
        error: &'a RpcError,
        handled: bool,
    ) -> BoxFuture<'a, RpcResult<bool>> {
        let outcome = (self.func)(ctx, error, handled);
        Box::pin(std::future::ready(outcome))
    }
}

/// Finalizer backed by a synchronous closure.
pub struct FnFinalizer<F> {
    name: &'static str,
    func: F,
}

impl<F> FnFinalizer<F> {
    /// Wraps `func`.
    pub const fn new(name: &'static str, func: F) -> Self {
        Self { name, func }
    }
}

impl<F> Finalizer for FnFinalizer<F>
where
    F: Fn(&mut Context) -> RpcResult<()> + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn finalize<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, RpcResult<()>> {
        let outcome = (self.func)(ctx);
        Box::pin(std::future::ready(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_pre(name: &'static str) -> FnPreRequest<impl Fn(&mut Context) -> RpcResult<Option<ExecutionResult>>> {
        FnPreRequest::new(name, |_ctx: &mut Context| Ok(None))
    }

    #[test]
    fn test_add_routes_by_phase() {
        let stage = ExecutionStage::new();
        stage.add_pre_request(noop_pre("a"), 1).unwrap();
        stage
            .add_finalizer(FnFinalizer::new("f", |_ctx: &mut Context| Ok(())), 0)
            .unwrap();
        assert_eq!(stage.len(Phase::PreRequest), 1);
        assert_eq!(stage.len(Phase::Finalize), 1);
        assert_eq!(stage.len(Phase::Calling), 0);
        assert_eq!(stage.generation(), 2);
    }

    #[test]
    fn test_handlers_keep_insertion_order() {
        let stage = ExecutionStage::new();
        stage.add_pre_request(noop_pre("h1"), 10).unwrap();
        stage.add_pre_request(noop_pre("h2"), 10).unwrap();
        stage.add_pre_request(noop_pre("h3"), 5).unwrap();
        let names: Vec<_> = stage
            .handlers(Phase::PreRequest)
            .iter()
            .map(|w| w.interceptor.name())
            .collect();
        assert_eq!(names, ["h1", "h2", "h3"]);
    }

    #[test]
    fn test_frozen_stage_rejects_registration() {
        let stage = ExecutionStage::new();
        assert!(stage.is_empty());
        stage.freeze();
        let err = stage.add_pre_request(noop_pre("late"), 1).unwrap_err();
        assert!(matches!(err, SetupError::StageFrozen));
        assert_eq!(stage.generation(), 0);
    }

    #[test]
    fn test_phase_order() {
        let indices: Vec<_> = Phase::ALL.iter().map(|p| p.index()).collect();
        assert_eq!(indices, [0, 1, 2, 3, 4]);
        assert_eq!(Phase::OnError.to_string(), "on-error");
    }
}
