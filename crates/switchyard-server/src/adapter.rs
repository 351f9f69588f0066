//! Adapter lifecycle and the runtime adapters share.
//!
//! Every adapter moves strictly `Detached → Attached → Started → Stopped`.
//! [`Lifecycle`] enforces the order; an adapter embeds one and calls
//! [`Lifecycle::transition`] at the top of each lifecycle method.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use switchyard_content::{BuilderRegistry, ParserRegistry};
use switchyard_core::{Scope, SetupError};
use switchyard_pipeline::Pipeline;

use crate::service::Service;

/// Lifecycle state of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Not bound to a server.
    Detached,
    /// Bound to a server, not accepting units.
    Attached,
    /// Accepting units.
    Started,
    /// Released; terminal.
    Stopped,
}

impl AdapterState {
    /// Lower-case state name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Detached => "detached",
            Self::Attached => "attached",
            Self::Started => "started",
            Self::Stopped => "stopped",
        }
    }

    const fn next(self) -> Option<Self> {
        match self {
            Self::Detached => Some(Self::Attached),
            Self::Attached => Some(Self::Started),
            Self::Started => Some(Self::Stopped),
            Self::Stopped => None,
        }
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state machine of one adapter.
///
/// ```
/// use switchyard_server::{AdapterState, Lifecycle};
///
/// let lifecycle = Lifecycle::new("http");
/// lifecycle.transition(AdapterState::Attached).unwrap();
/// assert!(lifecycle.transition(AdapterState::Stopped).is_err());
/// ```
#[derive(Debug)]
pub struct Lifecycle {
    adapter: String,
    state: Mutex<AdapterState>,
    starting: tokio::sync::Mutex<()>,
}

impl Lifecycle {
    /// A detached lifecycle for the named adapter.
    pub fn new(adapter: impl Into<String>) -> Self {
        Self {
            adapter: adapter.into(),
            state: Mutex::new(AdapterState::Detached),
            starting: tokio::sync::Mutex::new(()),
        }
    }

    /// Current state.
    pub fn state(&self) -> AdapterState {
        *self.state.lock()
    }

    /// Fails unless `to` is the immediate successor of the current state.
    ///
    /// Adapters call this before fallible setup work and
    /// [`transition`](Self::transition) once it succeeded.
    pub fn check(&self, to: AdapterState) -> Result<(), SetupError> {
        self.validate(*self.state.lock(), to)
    }

    /// Serializes `start()`: waits for any other start in progress, then
    /// checks that `Started` is the next state.
    ///
    /// Hold the guard until the final [`transition`](Self::transition) so a
    /// concurrent start sees the outcome and fails instead of starting twice.
    pub async fn begin_start(&self) -> Result<tokio::sync::MutexGuard<'_, ()>, SetupError> {
        let guard = self.starting.lock().await;
        self.check(AdapterState::Started)?;
        Ok(guard)
    }

    /// Moves to `to`, which must be the immediate successor of the current
    /// state.
    pub fn transition(&self, to: AdapterState) -> Result<(), SetupError> {
        let mut state = self.state.lock();
        self.validate(*state, to)?;
        tracing::debug!(adapter = %self.adapter, from = %*state, to = %to, "adapter state change");
        *state = to;
        Ok(())
    }

    fn validate(&self, from: AdapterState, to: AdapterState) -> Result<(), SetupError> {
        if from.next() == Some(to) {
            return Ok(());
        }
        if from == AdapterState::Attached && to == AdapterState::Attached {
            return Err(SetupError::AlreadyAttached(self.adapter.clone()));
        }
        Err(SetupError::InvalidTransition {
            adapter: self.adapter.clone(),
            from: from.as_str(),
            to: to.as_str(),
        })
    }
}

/// What a server hands to each attached adapter.
///
/// Holds the server scope, the registered services, the content registries
/// and the pipeline. Services can still be added until the server starts.
pub struct Runtime {
    scope: Arc<Scope>,
    services: RwLock<Vec<Arc<Service>>>,
    parsers: ParserRegistry,
    builders: BuilderRegistry,
    pipeline: Pipeline,
}

impl Runtime {
    pub(crate) fn new(scope: Arc<Scope>, parsers: ParserRegistry, builders: BuilderRegistry) -> Self {
        Self {
            scope,
            services: RwLock::new(Vec::new()),
            parsers,
            builders,
            pipeline: Pipeline::new(),
        }
    }

    /// The server scope.
    pub fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    /// Snapshot of the registered services.
    pub fn services(&self) -> Vec<Arc<Service>> {
        self.services.read().clone()
    }

    pub(crate) fn add_service(&self, service: Arc<Service>) -> Result<(), SetupError> {
        let mut services = self.services.write();
        if services.iter().any(|s| s.name() == service.name()) {
            return Err(SetupError::duplicate("service", service.name()));
        }
        services.push(service);
        Ok(())
    }

    /// Inbound content parsers.
    pub fn parsers(&self) -> &ParserRegistry {
        &self.parsers
    }

    /// Outbound builders and containers.
    pub fn builders(&self) -> &BuilderRegistry {
        &self.builders
    }

    /// The shared phase executor.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("scope", &self.scope.name())
            .field("services", &self.services.read().len())
            .finish_non_exhaustive()
    }
}

/// A transport binding of the dispatch core.
///
/// Lifecycle methods take `&self`; implementations keep their mutable state
/// behind locks and guard every method with a [`Lifecycle`].
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Unique adapter name.
    fn name(&self) -> &str;

    /// The adapter scope.
    fn scope(&self) -> &Arc<Scope>;

    /// Current lifecycle state.
    fn state(&self) -> AdapterState;

    /// Binds the adapter to a server. Fails if already attached.
    fn attach(&self, runtime: Arc<Runtime>) -> Result<(), SetupError>;

    /// Starts accepting units. Fails unless attached.
    async fn start(&self) -> Result<(), SetupError>;

    /// Stops accepting units and releases transport resources. Fails
    /// unless started.
    async fn stop(&self) -> Result<(), SetupError>;
}
