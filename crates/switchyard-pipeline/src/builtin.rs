//! Interceptors installed by the server itself.

use std::time::Instant;

use switchyard_core::stage::{Caller, Next};
use switchyard_core::{BoxFuture, Context, ExecutionResult, RpcError, RpcResult};

/// Weight of [`ParameterConversion`] in the calling phase.
pub const CONVERSION_WEIGHT: i32 = 1000;

/// Weight of [`CallLog`] in the calling phase. It wraps everything else.
pub const CALL_LOG_WEIGHT: i32 = i32::MAX;

/// Coerces working parameters with their declared converters.
///
/// Only parameters with a declared type are touched. A conversion failure
/// names the parameter.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterConversion;

impl ParameterConversion {
    fn convert(ctx: &mut Context) -> RpcResult<()> {
        let names: Vec<String> = ctx.params.keys().cloned().collect();
        for name in names {
            let Some(converter) = ctx.parameter_type(&name) else {
                continue;
            };
            if let Some(raw) = ctx.params.get_mut(&name) {
                *raw = converter
                    .convert(raw)
                    .map_err(|cause| RpcError::invalid_parameter_type(name.clone(), cause))?;
            }
        }
        Ok(())
    }
}

impl Caller for ParameterConversion {
    fn name(&self) -> &'static str {
        "parameter_conversion"
    }

    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, RpcResult<ExecutionResult>> {
        Box::pin(async move {
            Self::convert(ctx)?;
            next.run(ctx).await
        })
    }
}

/// Logs every endpoint call with its outcome and duration.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallLog;

impl Caller for CallLog {
    fn name(&self) -> &'static str {
        "call_log"
    }

    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, RpcResult<ExecutionResult>> {
        Box::pin(async move {
            let started = Instant::now();
            let endpoint = ctx.endpoint().map(|e| e.name().to_string()).unwrap_or_default();
            let request_id = ctx.id();
            let result = next.run(&mut *ctx).await;
            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
            match &result {
                Ok(_) => tracing::debug!(%request_id, %endpoint, duration_ms, "endpoint call completed"),
                Err(e) if e.is_recognized() => tracing::debug!(
                    %request_id,
                    %endpoint,
                    duration_ms,
                    kind = %e.kind(),
                    reason = e.reason(),
                    "endpoint call rejected"
                ),
                Err(e) => tracing::error!(%request_id, %endpoint, duration_ms, error = ?e, "endpoint call failed"),
            }
            result
        })
    }
}
