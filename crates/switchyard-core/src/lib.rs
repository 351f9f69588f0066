//! # Switchyard Core
//!
//! Transport-agnostic dispatch types for Switchyard.
//!
//! This crate provides the foundational types shared by every other crate:
//!
//! - [`RpcError`], [`SetupError`], [`TransportError`] - the error taxonomy
//! - [`signature`] - handler introspection and parameter binding
//! - [`Endpoint`] - a handler plus signature, settings, stage and children
//! - [`ExecutionStage`] - weighted interceptors in five phases
//! - [`Context`] - per-request state, with a task-local [`ambient`] slot
//! - [`Settings`] - scoped configuration with endpoint-first resolution
//! - [`content`] - parser, builder and container contracts

#![doc(html_root_url = "https://docs.rs/switchyard-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod ambient;
mod children;
pub mod content;
mod context;
pub mod convert;
mod dispatch;
mod endpoint;
mod error;
pub mod request;
mod response;
mod result;
mod scope;
pub mod session;
pub mod settings;
pub mod signature;
pub mod stage;

pub use children::Children;
pub use context::{Context, RequestId};
pub use convert::Converter;
pub use dispatch::{DispatchResult, Dispatcher};
pub use endpoint::{
    context_handler_fn, handler_fn, ContextFnHandler, Endpoint, EndpointBuilder, FnHandler, Handler,
};
pub use error::{
    codes, ErrorBody, ErrorEnvelope, ErrorKind, Fault, RpcError, RpcResult, SetupError,
    TransportError, INTERNAL_REASON,
};
pub use request::{Accept, QualityItem, Request, RequestContent};
pub use response::Response;
pub use result::ExecutionResult;
pub use scope::Scope;
pub use settings::Settings;
pub use signature::{Args, HandlerKind, HandlerShape, Signature};
pub use stage::{BoxFuture, ExecutionStage, Interceptor, Next, Phase};
