//! The server: services, adapters and their startup order.
//!
//! A [`Server`] owns the server scope and the [`Runtime`] shared with its
//! adapters. Services and adapters are registered before [`Server::start`];
//! starting freezes every execution stage so the merged view of each
//! endpoint stays valid for the life of the process.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use switchyard_config::HttpConfig;
//! use switchyard_server::http::HttpAdapter;
//! use switchyard_server::{Server, ShutdownSignal};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder().name("orders").build()?;
//!     server.add_adapter(Arc::new(HttpAdapter::new(HttpConfig::default())))?;
//!     server.run(ShutdownSignal::with_os_signals()).await?;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use switchyard_config::SwitchyardConfig;
use switchyard_content::{BuilderRegistry, ParserRegistry};
use switchyard_core::{Scope, SetupError, Settings};
use switchyard_pipeline::builtin::{CALL_LOG_WEIGHT, CONVERSION_WEIGHT};
use switchyard_pipeline::{CallLog, ParameterConversion};

use crate::adapter::{Adapter, AdapterState, Runtime};
use crate::ping;
use crate::service::Service;
use crate::shutdown::ShutdownSignal;

/// Default server name.
pub const DEFAULT_SERVER_NAME: &str = "switchyard";

/// Builder for [`Server`].
#[derive(Debug)]
pub struct ServerBuilder {
    name: String,
    settings: Settings,
    parsers: ParserRegistry,
    builders: BuilderRegistry,
    ping: bool,
}

impl ServerBuilder {
    /// Creates a builder with the default registries and the ping service.
    pub fn new() -> Self {
        Self {
            name: DEFAULT_SERVER_NAME.to_string(),
            settings: Settings::new(),
            parsers: ParserRegistry::with_defaults(),
            builders: BuilderRegistry::with_defaults(),
            ping: true,
        }
    }

    /// Sets the server name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replaces the server-scope settings.
    #[must_use]
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Takes the server-scope settings from the `defaults` section.
    #[must_use]
    pub fn config(self, config: &SwitchyardConfig) -> Self {
        self.settings(config.server_settings())
    }

    /// Replaces the inbound parsers.
    #[must_use]
    pub fn parsers(mut self, parsers: ParserRegistry) -> Self {
        self.parsers = parsers;
        self
    }

    /// Replaces the outbound builders and containers.
    #[must_use]
    pub fn builders(mut self, builders: BuilderRegistry) -> Self {
        self.builders = builders;
        self
    }

    /// Leaves out the `/_ping` service.
    #[must_use]
    pub fn without_ping(mut self) -> Self {
        self.ping = false;
        self
    }

    /// Builds the server and installs the built-in interceptors.
    pub fn build(self) -> Result<Server, SetupError> {
        let scope = Arc::new(Scope::new(self.name).with_settings(self.settings));
        scope.stage().add_caller(CallLog, CALL_LOG_WEIGHT)?;
        scope.stage().add_caller(ParameterConversion, CONVERSION_WEIGHT)?;

        let server = Server {
            runtime: Arc::new(Runtime::new(scope, self.parsers, self.builders)),
            adapters: RwLock::new(Vec::new()),
            started: AtomicBool::new(false),
        };
        if self.ping {
            server.add_service(ping::service()?)?;
        }
        Ok(server)
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A dispatch server with its services and adapters.
pub struct Server {
    runtime: Arc<Runtime>,
    adapters: RwLock<Vec<Arc<dyn Adapter>>>,
    started: AtomicBool,
}

impl Server {
    /// Starts building a server.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// The server scope.
    pub fn scope(&self) -> &Arc<Scope> {
        self.runtime.scope()
    }

    /// The runtime shared with adapters.
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Registers a service. Names must be unique.
    pub fn add_service(&self, service: Service) -> Result<Arc<Service>, SetupError> {
        if self.is_started() {
            return Err(SetupError::StageFrozen);
        }
        let service = Arc::new(service);
        self.runtime.add_service(Arc::clone(&service))?;
        tracing::debug!(service = %service.name(), "service registered");
        Ok(service)
    }

    /// Registers and attaches an adapter. Names must be unique.
    pub fn add_adapter(&self, adapter: Arc<dyn Adapter>) -> Result<(), SetupError> {
        if self.is_started() {
            return Err(SetupError::StageFrozen);
        }
        let mut adapters = self.adapters.write();
        if adapters.iter().any(|a| a.name() == adapter.name()) {
            return Err(SetupError::duplicate("adapter", adapter.name()));
        }
        adapter.attach(Arc::clone(&self.runtime))?;
        tracing::debug!(adapter = %adapter.name(), "adapter attached");
        adapters.push(adapter);
        Ok(())
    }

    /// Looks up an adapter by name.
    pub fn adapter(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.read().iter().find(|a| a.name() == name).cloned()
    }

    /// Returns `true` once [`start`](Self::start) ran.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Freezes every stage and starts the adapters in registration order.
    ///
    /// If an adapter fails to start, the ones already started are stopped
    /// in reverse order and the error is returned.
    pub async fn start(&self) -> Result<(), SetupError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SetupError::StageFrozen);
        }
        let adapters = self.adapters.read().clone();
        self.freeze(&adapters);

        for (index, adapter) in adapters.iter().enumerate() {
            if let Err(e) = adapter.start().await {
                tracing::error!(adapter = %adapter.name(), error = %e, "adapter failed to start");
                for started in adapters[..index].iter().rev() {
                    if let Err(stop_err) = started.stop().await {
                        tracing::warn!(adapter = %started.name(), error = %stop_err, "adapter failed to stop");
                    }
                }
                return Err(e);
            }
        }
        tracing::info!(
            server = %self.scope().name(),
            adapters = adapters.len(),
            services = self.runtime.services().len(),
            "server started"
        );
        Ok(())
    }

    /// Stops every started adapter in reverse registration order.
    ///
    /// All adapters are stopped even if one fails; the first error is
    /// returned.
    pub async fn stop(&self) -> Result<(), SetupError> {
        let adapters = self.adapters.read().clone();
        let mut first_error = None;
        for adapter in adapters.iter().rev() {
            if adapter.state() != AdapterState::Started {
                continue;
            }
            if let Err(e) = adapter.stop().await {
                tracing::warn!(adapter = %adapter.name(), error = %e, "adapter failed to stop");
                first_error.get_or_insert(e);
            }
        }
        tracing::info!(server = %self.scope().name(), "server stopped");
        first_error.map_or(Ok(()), Err)
    }

    /// Starts, waits for `shutdown`, then stops.
    pub async fn run(&self, shutdown: ShutdownSignal) -> Result<(), SetupError> {
        self.start().await?;
        shutdown.recv().await;
        self.stop().await
    }

    fn freeze(&self, adapters: &[Arc<dyn Adapter>]) {
        self.scope().stage().freeze();
        for adapter in adapters {
            adapter.scope().stage().freeze();
        }
        for service in self.runtime.services() {
            service.stage().freeze();
            for endpoint in service.endpoints() {
                endpoint.stage().freeze();
            }
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("runtime", &self.runtime)
            .field("adapters", &self.adapters.read().iter().map(|a| a.name().to_string()).collect::<Vec<_>>())
            .field("started", &self.is_started())
            .finish()
    }
}
