//! Outbound content negotiation.
//!
//! The outcome (media type, charset, container) is chosen once per response
//! and cached on it. Negotiating again returns the cached outcome.

use switchyard_core::content::Negotiated;
use switchyard_core::request::QualityItem;
use switchyard_core::settings::defaults;
use switchyard_core::{Context, RpcError, RpcResult};

use crate::builder::BuilderRegistry;

/// Chooses the outbound media type.
///
/// `allowed` is the effective allowed set: `None` is unrestricted and an
/// empty list ignores the client and forces the default type.
///
/// ```
/// use switchyard_content::{select_mime_type, BuilderRegistry};
/// use switchyard_core::request::Accept;
///
/// let builders = BuilderRegistry::with_defaults();
/// let accept = Accept::parse_list("text/csv, application/json;q=0.5");
/// let chosen = select_mime_type(&accept, None, &builders).unwrap();
/// assert_eq!(chosen, "application/json");
/// ```
pub fn select_mime_type(
    accept: &[QualityItem],
    allowed: Option<&[String]>,
    builders: &BuilderRegistry,
) -> RpcResult<String> {
    let default = defaults::RESPONSE_MIME_TYPE;
    let is_allowed = |mime: &str| allowed.map_or(true, |list| list.iter().any(|a| a == mime));
    let fallback = || match allowed {
        Some(list) if !list.is_empty() && !is_allowed(default) => list[0].clone(),
        _ => default.to_string(),
    };

    if matches!(allowed, Some(list) if list.is_empty()) || accept.is_empty() {
        return Ok(fallback());
    }

    for item in accept {
        let wanted = item.value.as_str();
        if wanted == "*/*" || wanted == "*" {
            return Ok(fallback());
        }
        if let Some(prefix) = wanted.strip_suffix("/*") {
            let family = |mime: &str| mime.split('/').next() == Some(prefix);
            if family(default) && is_allowed(default) {
                return Ok(default.to_string());
            }
            if let Some(found) = allowed
                .into_iter()
                .flatten()
                .find(|m| family(m.as_str()) && builders.supports(m))
            {
                return Ok(found.clone());
            }
            continue;
        }
        if is_allowed(wanted) && builders.supports(wanted) {
            return Ok(wanted.to_string());
        }
    }
    Err(RpcError::not_acceptable())
}

/// Chooses the outbound charset.
///
/// The client's first concrete charset wins, then the configured one, then
/// UTF-8.
pub fn select_encoding(accept: &[QualityItem], configured: Option<&str>) -> String {
    accept
        .iter()
        .map(|item| item.value.as_str())
        .find(|value| *value != "*")
        .or(configured)
        .unwrap_or(defaults::RESPONSE_ENCODING)
        .to_string()
}

/// Resolves and caches the negotiation outcome for `ctx`.
///
/// Idempotent: a cached outcome is returned unchanged.
pub fn negotiate(ctx: &mut Context, builders: &BuilderRegistry) -> RpcResult<Negotiated> {
    if let Some(done) = ctx.response.negotiated() {
        return Ok(done.clone());
    }
    let allowed = ctx.response_mime_types();
    let mime_type = select_mime_type(&ctx.request.accept.mime_types, allowed.as_deref(), builders)?;
    let encoding = select_encoding(&ctx.request.accept.charsets, ctx.response_encoding().as_deref());
    let container = builders.container(&ctx.content_container())?;
    tracing::trace!(%mime_type, %encoding, container = container.name(), "content negotiated");
    ctx.response
        .set_negotiated(Negotiated {
            mime_type,
            encoding,
            container,
        })
        .cloned()
}

/// Caches the fallback outcome, ignoring client preferences.
///
/// Used when rendering an error whose own negotiation failed.
pub fn negotiate_fallback(ctx: &mut Context, builders: &BuilderRegistry) -> RpcResult<Negotiated> {
    if let Some(done) = ctx.response.negotiated() {
        return Ok(done.clone());
    }
    let allowed = ctx.response_mime_types();
    let mime_type = select_mime_type(&[], allowed.as_deref(), builders)?;
    let encoding = ctx
        .response_encoding()
        .unwrap_or_else(|| defaults::RESPONSE_ENCODING.to_string());
    let container = builders.container(&ctx.content_container())?;
    ctx.response
        .set_negotiated(Negotiated {
            mime_type,
            encoding,
            container,
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use switchyard_core::request::Accept;
    use switchyard_core::{ErrorKind, Scope, Settings};

    fn accept(header: &str) -> Vec<QualityItem> {
        Accept::parse_list(header)
    }

    fn allowed(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_no_preference_uses_default() {
        let b = BuilderRegistry::with_defaults();
        assert_eq!(select_mime_type(&[], None, &b).unwrap(), "text/plain");
        let only_json = allowed(&["application/json"]);
        assert_eq!(select_mime_type(&[], Some(only_json.as_slice()), &b).unwrap(), "application/json");
    }

    #[test]
    fn test_wildcard() {
        let b = BuilderRegistry::with_defaults();
        assert_eq!(select_mime_type(&accept("*/*"), None, &b).unwrap(), "text/plain");
        let only_json = allowed(&["application/json"]);
        assert_eq!(
            select_mime_type(&accept("*/*"), Some(only_json.as_slice()), &b).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_family_wildcard() {
        let b = BuilderRegistry::with_defaults();
        let list = allowed(&["application/json", "text/plain"]);
        assert_eq!(select_mime_type(&accept("text/*"), Some(list.as_slice()), &b).unwrap(), "text/plain");
        let json_only = allowed(&["application/json"]);
        assert_eq!(
            select_mime_type(&accept("application/*"), Some(json_only.as_slice()), &b).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_concrete_requires_allowed_and_builder() {
        let b = BuilderRegistry::with_defaults();
        let list = allowed(&["text/plain"]);
        let err = select_mime_type(&accept("application/json"), Some(list.as_slice()), &b).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotAcceptable);
        let err = select_mime_type(&accept("text/csv"), None, &b).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotAcceptable);
        assert_eq!(
            select_mime_type(&accept("text/csv, text/html;q=0.4"), None, &b).unwrap(),
            "text/html"
        );
    }

    #[test]
    fn test_empty_allowed_forces_default() {
        let b = BuilderRegistry::with_defaults();
        let empty: Vec<String> = Vec::new();
        assert_eq!(
            select_mime_type(&accept("application/json"), Some(empty.as_slice()), &b).unwrap(),
            "text/plain"
        );
    }

    #[test]
    fn test_encoding_precedence() {
        assert_eq!(select_encoding(&accept("latin1"), Some("ascii")), "latin1");
        assert_eq!(select_encoding(&accept("*"), Some("ascii")), "ascii");
        assert_eq!(select_encoding(&[], None), "utf-8");
    }

    #[test]
    fn test_negotiate_is_idempotent() {
        let b = BuilderRegistry::with_defaults();
        let mut ctx = Context::new(
            Arc::new(Scope::new("server")),
            Arc::new(Scope::new("http").with_settings(Settings::new().with_content_container("api"))),
        );
        ctx.request.accept.mime_types = accept("application/json");
        let first = negotiate(&mut ctx, &b).unwrap();
        assert_eq!(first.mime_type, "application/json");
        assert_eq!(first.container.name(), "api");

        ctx.request.accept.mime_types = accept("text/html");
        let second = negotiate(&mut ctx, &b).unwrap();
        assert_eq!(second.mime_type, "application/json");
        assert!(Arc::ptr_eq(&first.container, &second.container));
    }

    #[test]
    fn test_unknown_container_is_internal() {
        let b = BuilderRegistry::with_defaults();
        let mut ctx = Context::new(
            Arc::new(Scope::new("server").with_settings(Settings::new().with_content_container("xml"))),
            Arc::new(Scope::new("http")),
        );
        let err = negotiate(&mut ctx, &b).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(ctx.response.negotiated().is_none());
    }
}
