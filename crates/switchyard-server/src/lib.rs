//! # Switchyard Server
//!
//! Servers, adapters and the transports of Switchyard.
//!
//! A [`Server`] holds [`Service`]s (named groups of endpoints) and attaches
//! [`Adapter`]s that feed transport units through the shared dispatch core:
//!
//! - [`http`] - HTTP/1.1 over hyper, routed by [`http::Route`] metadata
//! - [`queue`] - message-queue consumers with ack-after-success, topology
//!   declaration and reconnect, behind the [`queue::Broker`] seam
//! - [`files`] - a service serving a local directory over HTTP
//!
//! Every adapter follows the same [`Lifecycle`] and translates errors with
//! one static table ([`http_status`], [`queue_signal`]).
//!
//! ## Example
//!
//! ```
//! use http::Method;
//! use switchyard_core::{handler_fn, Args, Endpoint, ExecutionResult, HandlerShape};
//! use switchyard_server::http::Route;
//! use switchyard_server::{Server, Service};
//!
//! let echo = Endpoint::builder(
//!     "echo",
//!     HandlerShape::function().param("data"),
//!     handler_fn(|args: Args| async move {
//!         Ok(ExecutionResult::single(args.get("data").cloned().unwrap_or_default()))
//!     }),
//! )
//! .build()
//! .unwrap();
//! echo.attach_child(Route::new("/echo").methods([Method::GET]));
//!
//! let mut service = Service::new("demo");
//! service.add_endpoint(echo).unwrap();
//!
//! let server = Server::builder().build().unwrap();
//! server.add_service(service).unwrap();
//! ```

#![doc(html_root_url = "https://docs.rs/switchyard-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod adapter;
pub mod files;
pub mod http;
mod mapping;
mod ping;
pub mod queue;
mod server;
mod service;
pub mod shutdown;
mod transport;

pub use adapter::{Adapter, AdapterState, Lifecycle, Runtime};
pub use mapping::{http_status, queue_signal, QueueSignal};
pub use ping::{PING_PATH, PING_SERVICE};
pub use server::{Server, ServerBuilder, DEFAULT_SERVER_NAME};
pub use service::Service;
pub use shutdown::ShutdownSignal;
pub use transport::{process, Transport};
