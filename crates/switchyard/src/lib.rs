//! # Switchyard
//!
//! **Transport-agnostic request dispatch**
//!
//! Switchyard resolves an incoming unit of work (an HTTP request or a queue
//! delivery) to a registered endpoint, binds its parameters onto the
//! endpoint signature, runs it through a weighted interceptor chain and
//! renders the result through content negotiation. The same endpoint can be
//! served by several transports at once.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use switchyard::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().with_dotenv().with_env().load()?;
//!     init_logging(&config.logging.to_log_config())?;
//!
//!     let echo = Endpoint::builder(
//!         "echo",
//!         HandlerShape::function().param("data"),
//!         handler_fn(|args: Args| async move {
//!             Ok(ExecutionResult::single(args.get("data").cloned().unwrap_or_default()))
//!         }),
//!     )
//!     .build()?;
//!     echo.attach_child(Route::new("/echo"));
//!
//!     let mut service = Service::new("demo");
//!     service.add_endpoint(echo)?;
//!
//!     let server = Server::builder().config(&config).build()?;
//!     server.add_service(service)?;
//!     server.add_adapter(Arc::new(HttpAdapter::new(config.http.clone())))?;
//!     server.run(ShutdownSignal::with_os_signals()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! transport unit → parse → dispatch → pre-request → calling chain → handler
//!                                                                      ↓
//! signal/reply ← render ← post-request / on-error ← finalize ←─────────┘
//! ```
//!
//! Interceptors come from four scopes (server, adapter, service, endpoint)
//! and are ordered by weight within each phase.

#![doc(html_root_url = "https://docs.rs/switchyard/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub use switchyard_config as config;
pub use switchyard_content as content;
pub use switchyard_core as core;
pub use switchyard_pipeline as pipeline;
pub use switchyard_server as server;
pub use switchyard_telemetry as telemetry;

/// Prelude module for convenient imports.
///
/// ```
/// use switchyard::prelude::*;
///
/// let stage = ExecutionStage::new();
/// assert!(stage.is_empty());
/// ```
pub mod prelude {
    pub use switchyard_config::{ConfigLoader, HttpConfig, QueueConfig, SwitchyardConfig};
    pub use switchyard_core::{
        context_handler_fn, handler_fn, Args, Context, Converter, Endpoint, ErrorKind, ExecutionResult,
        ExecutionStage, HandlerShape, RpcError, RpcResult, SetupError, Settings,
    };
    pub use switchyard_server::http::{HttpAdapter, MultiParams, Route};
    pub use switchyard_server::queue::{
        AnonymousSubscription, ExchangeKind, MemoryBroker, Publisher, QueueAdapter, Subscription, Topology,
    };
    pub use switchyard_server::{Adapter, AdapterState, Server, Service, ShutdownSignal};
    pub use switchyard_telemetry::{init_logging, LogConfig};
}
