//! # Switchyard Content
//!
//! Content handling for Switchyard: the inbound parser registry, the
//! outbound builder and container registry, and the negotiation that picks
//! a media type, charset and container for each response.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use serde_json::json;
//! use switchyard_content::{render, BuilderRegistry};
//! use switchyard_core::request::Accept;
//! use switchyard_core::{Context, ExecutionResult, Scope};
//!
//! let builders = BuilderRegistry::with_defaults();
//! let mut ctx = Context::new(Arc::new(Scope::new("server")), Arc::new(Scope::new("http")));
//! ctx.request.accept.mime_types = Accept::parse_list("application/json");
//! ctx.response.result = ExecutionResult::single(json!({"a": 1}));
//!
//! let rendered = render(&mut ctx, &builders, None).unwrap();
//! assert_eq!(rendered.body, r#"{"a":1}"#);
//! ```

#![doc(html_root_url = "https://docs.rs/switchyard-content/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod builder;
pub mod charset;
mod container;
mod negotiate;
mod parser;
mod render;

pub use builder::{BinaryBuilder, BuilderRegistry, JsonBuilder, TextBuilder};
pub use container::{ApiContainer, PlainContainer, ERROR_HEADER, META_HEADER_PREFIX};
pub use negotiate::{negotiate, negotiate_fallback, select_encoding, select_mime_type};
pub use parser::{split_content_type, FormParser, JsonParser, ParserRegistry, TextParser};
pub use render::{render, Rendered};

/// Groups `key=value` pairs, turning repeated keys into arrays.
///
/// ```
/// use serde_json::json;
///
/// let grouped = switchyard_content::group_query("a=1&a=2&b=3").unwrap();
/// assert_eq!(grouped["a"], json!(["1", "2"]));
/// assert_eq!(grouped["b"], json!("3"));
/// ```
pub fn group_query(
    query: &str,
) -> switchyard_core::RpcResult<indexmap::IndexMap<String, serde_json::Value>> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query)
        .map_err(|e| switchyard_core::RpcError::bad_request(format!("invalid query string: {e}")))?;
    Ok(parser::group_pairs(pairs))
}
