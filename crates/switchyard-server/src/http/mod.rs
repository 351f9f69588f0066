//! HTTP transport: routes, the adapter and repeated-parameter selection.

mod adapter;
mod route;
mod selection;

pub use adapter::{HttpAdapter, REQUEST_ID_HEADER};
pub use route::{MultiParams, Route};
pub use selection::{ValueSelection, SELECTION_WEIGHT};
