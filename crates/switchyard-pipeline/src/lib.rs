//! # Switchyard Pipeline
//!
//! Executes the five-phase interceptor chain of Switchyard.
//!
//! Every scope (server, adapter, service, endpoint) owns an
//! [`ExecutionStage`](switchyard_core::ExecutionStage). For each request the
//! stages are merged into one ordered view and run as:
//!
//! ```text
//! pre-request ──(result?)──────────────┐
//!      │                                │
//!      ▼                                ▼
//! calling: caller → caller → … → endpoint handler
//!      │
//!      ▼
//! post-request ──► (on-error, if anything failed) ──► finalize
//! ```
//!
//! Within a phase, interceptors run by weight, highest first. Equal weights
//! keep scope order (server first) and then registration order.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use switchyard_core::stage::FnPreRequest;
//! use switchyard_core::{Context, ExecutionStage, Phase};
//! use switchyard_pipeline::MergedStage;
//!
//! let stage = ExecutionStage::new();
//! for (name, weight) in [("h1", 10), ("h2", 10), ("h3", 5)] {
//!     stage.add_pre_request(FnPreRequest::new(name, |_ctx: &mut Context| Ok(None)), weight).unwrap();
//! }
//! let merged = MergedStage::merge([&stage]);
//! assert_eq!(merged.names(Phase::PreRequest), ["h1", "h2", "h3"]);
//! ```

#![doc(html_root_url = "https://docs.rs/switchyard-pipeline/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod builtin;
mod executor;
mod merge;

pub use builtin::{CallLog, ParameterConversion};
pub use executor::Pipeline;
pub use merge::{MergedStage, StageCache};
