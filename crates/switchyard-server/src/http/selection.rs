//! Selection of repeated query and form parameters.

use serde_json::Value;
use switchyard_core::stage::{Caller, Next};
use switchyard_core::{codes, BoxFuture, Context, ExecutionResult, RpcError, RpcResult};

use super::route::MultiParams;

/// Weight of [`ValueSelection`] in the calling phase. It runs before
/// parameter conversion.
pub const SELECTION_WEIGHT: i32 = 20_000;

/// Query or form keys that appeared more than once in the request.
#[derive(Debug, Clone, Default)]
pub(crate) struct RepeatedParams(pub(crate) Vec<String>);

/// Applies the matched route's multi-value rule to the parameters.
///
/// Installed on the HTTP adapter stage. A parameter the route allows to
/// repeat always arrives as a list, even when sent once. Any other key
/// repeated in the query or a form body is unwrapped when it carries a
/// single value and rejected otherwise. Lists sent inside a JSON body are
/// left alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueSelection;

impl ValueSelection {
    fn select(ctx: &mut Context) -> RpcResult<()> {
        let repeated = ctx
            .remove_extension::<RepeatedParams>()
            .map(|RepeatedParams(keys)| keys)
            .unwrap_or_default();
        let allowed = ctx.extension::<MultiParams>().cloned().unwrap_or_default();

        for (name, value) in ctx.params.iter_mut() {
            if allowed.allows(name) {
                if !value.is_array() {
                    *value = Value::Array(vec![value.take()]);
                }
                continue;
            }
            if !repeated.contains(name) {
                continue;
            }
            let Value::Array(values) = value else {
                continue;
            };
            if values.len() > 1 {
                return Err(RpcError::bad_parameter(
                    name.clone(),
                    codes::INVALID_PARAMETER_COMBINATION,
                    format!("parameter {name} cannot have multiple values"),
                ));
            }
            let single = values.pop().unwrap_or(Value::Null);
            *value = single;
        }
        Ok(())
    }
}

impl Caller for ValueSelection {
    fn name(&self) -> &'static str {
        "value_selection"
    }

    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, RpcResult<ExecutionResult>> {
        Box::pin(async move {
            Self::select(ctx)?;
            next.run(ctx).await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use switchyard_core::{ErrorKind, Scope};

    use super::*;

    fn context(params: Value, repeated: &[&str], allowed: MultiParams) -> Context {
        let mut ctx = Context::new(Arc::new(Scope::new("server")), Arc::new(Scope::new("http")));
        if let Value::Object(map) = params {
            ctx.params = map.into_iter().collect();
        }
        ctx.insert_extension(RepeatedParams(repeated.iter().map(|s| s.to_string()).collect()));
        ctx.insert_extension(allowed);
        ctx
    }

    #[test]
    fn test_rejects_repeated_parameter() {
        let mut ctx = context(json!({"tag": ["a", "b"]}), &["tag"], MultiParams::None);
        let err = ValueSelection::select(&mut ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(err.code(), codes::INVALID_PARAMETER_COMBINATION);
        assert_eq!(err.parameter(), Some("tag"));
    }

    #[test]
    fn test_allowed_parameter_keeps_list() {
        let mut ctx = context(json!({"tag": ["a", "b"]}), &["tag"], MultiParams::Only(vec!["tag".into()]));
        ValueSelection::select(&mut ctx).unwrap();
        assert_eq!(ctx.params["tag"], json!(["a", "b"]));
    }

    #[test]
    fn test_single_element_unwrapped() {
        let mut ctx = context(json!({"tag": ["a"]}), &["tag"], MultiParams::None);
        ValueSelection::select(&mut ctx).unwrap();
        assert_eq!(ctx.params["tag"], json!("a"));
    }

    #[test]
    fn test_allowed_parameter_sent_once_is_a_list() {
        let mut ctx = context(json!({"tag": "a", "id": "1"}), &[], MultiParams::Only(vec!["tag".into()]));
        ValueSelection::select(&mut ctx).unwrap();
        assert_eq!(ctx.params["tag"], json!(["a"]));
        assert_eq!(ctx.params["id"], json!("1"));

        let mut ctx = context(json!({"tag": "a", "id": "1"}), &[], MultiParams::All);
        ValueSelection::select(&mut ctx).unwrap();
        assert_eq!(ctx.params["tag"], json!(["a"]));
        assert_eq!(ctx.params["id"], json!(["1"]));
    }

    #[test]
    fn test_repeated_form_key_rejected() {
        // form bodies record their repeated keys next to the query's
        let mut ctx = context(json!({"tag": ["a", "b"], "q": "x"}), &["q", "tag"], MultiParams::None);
        let err = ValueSelection::select(&mut ctx).unwrap_err();
        assert_eq!(err.parameter(), Some("tag"));
    }

    #[test]
    fn test_body_lists_untouched() {
        let mut ctx = context(json!({"ids": [1, 2]}), &[], MultiParams::None);
        ValueSelection::select(&mut ctx).unwrap();
        assert_eq!(ctx.params["ids"], json!([1, 2]));
    }
}
