//! Error types for Switchyard.
//!
//! Three families of errors exist:
//!
//! - [`RpcError`] - request errors raised while a unit of work is processed.
//!   Every variant carries a stable numeric code, a human reason and an
//!   optional detail value, and maps onto an [`ErrorKind`] that transport
//!   adapters translate into a wire signal.
//! - [`SetupError`] - configuration errors raised while services, endpoints
//!   and adapters are registered or started. These are fatal.
//! - [`TransportError`] - connection and I/O failures that stay inside an
//!   adapter's own lifecycle.
//!
//! Any failure that is not one of the known request kinds is wrapped in
//! [`RpcError::Unrecognized`]. Its client-facing form is always the generic
//! internal error; the wrapped error is only meant for logs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Result type alias using [`RpcError`].
pub type RpcResult<T> = Result<T, RpcError>;

/// Stable error codes carried by [`RpcError`].
pub mod codes {
    /// No specific code.
    pub const UNDEFINED: u32 = 0x0;

    /// A parameter could not be converted to its declared type.
    pub const INVALID_PARAMETER_TYPE: u32 = 0x000_1001;
    /// A parameter is not declared by the endpoint.
    pub const UNKNOWN_PARAMETER: u32 = 0x000_1002;
    /// A required parameter is absent.
    pub const MISSING_PARAMETER: u32 = 0x000_1003;
    /// A parameter was given more values than the endpoint accepts.
    pub const INVALID_PARAMETER_COMBINATION: u32 = 0x000_1004;
    /// The request carries no body but one is required.
    pub const MISSING_BODY: u32 = 0x000_1010;
    /// The request body cannot be decoded.
    pub const INVALID_BODY: u32 = 0x000_1011;

    /// The provided credential is invalid.
    pub const INVALID_CREDENTIAL: u32 = 0x000_2001;
    /// Access is blocked.
    pub const ACCESS_BLOCKED: u32 = 0x000_2002;

    /// No endpoint matches the request.
    pub const ENDPOINT_NOT_FOUND: u32 = 0x000_4001;
    /// The endpoint exists but not for the requested method.
    pub const METHOD_NOT_ALLOWED: u32 = 0x000_5001;
    /// None of the acceptable media types can be produced.
    pub const NO_SUPPORTED_MIME_TYPE: u32 = 0x000_6001;
    /// The inbound media type has no registered parser.
    pub const UNSUPPORTED_MEDIA_TYPE: u32 = 0x001_5001;
}

/// Reason returned to clients for any internal or unrecognized failure.
pub const INTERNAL_REASON: &str = "internal server error";

/// Kinds of request errors, used for transport signal mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input: bad parameters, bad body.
    BadRequest,
    /// Missing or invalid credentials.
    Unauthorized,
    /// Authenticated but not permitted.
    Forbidden,
    /// No endpoint resolves the request.
    NotFound,
    /// Endpoint resolved but not for this method.
    MethodNotAllowed,
    /// No acceptable response media type.
    NotAcceptable,
    /// The request took too long.
    RequestTimeout,
    /// A body length is required.
    LengthRequired,
    /// The body exceeds the configured limit.
    PayloadTooLarge,
    /// The inbound media type cannot be parsed.
    UnsupportedMediaType,
    /// Internal or unrecognized failure.
    Internal,
}

impl ErrorKind {
    /// Returns the snake_case name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::MethodNotAllowed => "method_not_allowed",
            Self::NotAcceptable => "not_acceptable",
            Self::RequestTimeout => "request_timeout",
            Self::LengthRequired => "length_required",
            Self::PayloadTooLarge => "payload_too_large",
            Self::UnsupportedMediaType => "unsupported_media_type",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The code, reason and detail carried by every request error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    /// Stable numeric code, see [`codes`].
    pub code: u32,
    /// Human readable reason.
    pub reason: String,
    /// Optional structured detail.
    pub detail: Option<Value>,
}

impl Fault {
    /// Creates a fault without detail.
    pub fn new(code: u32, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            detail: None,
        }
    }

    fn internal() -> Self {
        Self::new(codes::UNDEFINED, INTERNAL_REASON)
    }
}

/// Request error raised anywhere in the dispatch pipeline.
///
/// # Example
///
/// ```
/// use switchyard_core::{ErrorKind, RpcError};
///
/// let err = RpcError::unknown_parameter("extra");
/// assert_eq!(err.kind(), ErrorKind::BadRequest);
/// assert_eq!(err.reason(), "unknown parameter extra");
/// assert_eq!(err.parameter(), Some("extra"));
/// ```
#[derive(Debug, Error)]
pub enum RpcError {
    /// Generic malformed input.
    #[error("bad request: {}", .0.reason)]
    BadRequest(Fault),

    /// A specific parameter is unknown, missing or invalid.
    #[error("{}", .fault.reason)]
    BadParameter {
        /// The offending parameter name.
        parameter: String,
        /// Code, reason and detail.
        fault: Fault,
    },

    /// The request body is missing or cannot be decoded.
    #[error("bad request body: {}", .0.reason)]
    BadBody(Fault),

    /// Missing or invalid credentials.
    #[error("unauthorized: {}", .0.reason)]
    Unauthorized(Fault),

    /// Access denied.
    #[error("forbidden: {}", .0.reason)]
    Forbidden(Fault),

    /// No endpoint matches.
    #[error("not found: {}", .0.reason)]
    NotFound(Fault),

    /// Method not allowed for the matched endpoint.
    #[error("method not allowed: {}", .0.reason)]
    MethodNotAllowed(Fault),

    /// No acceptable response media type.
    #[error("not acceptable: {}", .0.reason)]
    NotAcceptable(Fault),

    /// The request timed out.
    #[error("request timeout: {}", .0.reason)]
    RequestTimeout(Fault),

    /// A body length is required.
    #[error("length required: {}", .0.reason)]
    LengthRequired(Fault),

    /// The body is too large.
    #[error("payload too large: {}", .0.reason)]
    PayloadTooLarge(Fault),

    /// No parser for the inbound media type.
    #[error("unsupported media type {mime_type}")]
    UnsupportedMediaType {
        /// The offending media type.
        mime_type: String,
        /// Code, reason and detail.
        fault: Fault,
    },

    /// Known internal failure with a code of its own.
    #[error("internal server error: {}", .0.reason)]
    Internal(Fault),

    /// Any failure outside the known kinds.
    #[error("unrecognized error: {0:#}")]
    Unrecognized(#[from] anyhow::Error),
}

impl RpcError {
    /// Creates a generic bad request error.
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::BadRequest(Fault::new(codes::UNDEFINED, reason))
    }

    /// Creates a bad parameter error with an explicit code.
    pub fn bad_parameter(parameter: impl Into<String>, code: u32, reason: impl Into<String>) -> Self {
        Self::BadParameter {
            parameter: parameter.into(),
            fault: Fault::new(code, reason),
        }
    }

    /// The parameter is not declared by the endpoint.
    pub fn unknown_parameter(parameter: impl Into<String>) -> Self {
        let parameter = parameter.into();
        let reason = format!("unknown parameter {parameter}");
        Self::bad_parameter(parameter, codes::UNKNOWN_PARAMETER, reason)
    }

    /// A required parameter is absent.
    pub fn missing_parameter(parameter: impl Into<String>) -> Self {
        let parameter = parameter.into();
        let reason = format!("missing required parameter {parameter}");
        Self::bad_parameter(parameter, codes::MISSING_PARAMETER, reason)
    }

    /// A parameter value cannot be converted to its declared type.
    pub fn invalid_parameter_type(parameter: impl Into<String>, cause: impl Into<String>) -> Self {
        let parameter = parameter.into();
        let reason = format!("invalid value for parameter {parameter}");
        Self::BadParameter {
            fault: Fault {
                code: codes::INVALID_PARAMETER_TYPE,
                reason,
                detail: Some(Value::String(cause.into())),
            },
            parameter,
        }
    }

    /// Creates a bad body error.
    pub fn bad_body(code: u32, reason: impl Into<String>) -> Self {
        Self::BadBody(Fault::new(code, reason))
    }

    /// Creates an unauthorized error.
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized(Fault::new(codes::INVALID_CREDENTIAL, reason))
    }

    /// Creates a forbidden error.
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden(Fault::new(codes::ACCESS_BLOCKED, reason))
    }

    /// No endpoint matches the request.
    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::NotFound(Fault::new(codes::ENDPOINT_NOT_FOUND, reason))
    }

    /// The endpoint does not accept the requested method.
    pub fn method_not_allowed(method: impl std::fmt::Display) -> Self {
        Self::MethodNotAllowed(Fault::new(
            codes::METHOD_NOT_ALLOWED,
            format!("method {method} is not allowed"),
        ))
    }

    /// No acceptable response media type.
    pub fn not_acceptable() -> Self {
        Self::NotAcceptable(Fault::new(
            codes::NO_SUPPORTED_MIME_TYPE,
            "no supported mime type found",
        ))
    }

    /// The request timed out.
    pub fn request_timeout() -> Self {
        Self::RequestTimeout(Fault::new(codes::UNDEFINED, "request timed out"))
    }

    /// A body length is required.
    pub fn length_required() -> Self {
        Self::LengthRequired(Fault::new(codes::UNDEFINED, "content length required"))
    }

    /// The body exceeds `limit` bytes.
    pub fn payload_too_large(limit: usize) -> Self {
        Self::PayloadTooLarge(Fault::new(
            codes::UNDEFINED,
            format!("request body exceeds {limit} bytes"),
        ))
    }

    /// No parser is registered for `mime_type`.
    pub fn unsupported_media_type(mime_type: impl Into<String>) -> Self {
        let mime_type = mime_type.into();
        let reason = format!("unsupported media type {mime_type}");
        Self::UnsupportedMediaType {
            mime_type,
            fault: Fault::new(codes::UNSUPPORTED_MEDIA_TYPE, reason),
        }
    }

    /// Creates a known internal error. The reason is kept for logs only.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(Fault::new(codes::UNDEFINED, reason))
    }

    /// Attaches a detail value.
    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        if let Some(fault) = self.fault_mut() {
            fault.detail = Some(detail);
        }
        self
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest(_) | Self::BadParameter { .. } | Self::BadBody(_) => {
                ErrorKind::BadRequest
            }
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::MethodNotAllowed(_) => ErrorKind::MethodNotAllowed,
            Self::NotAcceptable(_) => ErrorKind::NotAcceptable,
            Self::RequestTimeout(_) => ErrorKind::RequestTimeout,
            Self::LengthRequired(_) => ErrorKind::LengthRequired,
            Self::PayloadTooLarge(_) => ErrorKind::PayloadTooLarge,
            Self::UnsupportedMediaType { .. } => ErrorKind::UnsupportedMediaType,
            Self::Internal(_) | Self::Unrecognized(_) => ErrorKind::Internal,
        }
    }

    /// Returns `false` for errors outside the known kinds.
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }

    /// Returns the offending parameter, if any.
    pub fn parameter(&self) -> Option<&str> {
        match self {
            Self::BadParameter { parameter, .. } => Some(parameter),
            _ => None,
        }
    }

    /// Returns the stable error code.
    pub fn code(&self) -> u32 {
        self.fault().map_or(codes::UNDEFINED, |f| f.code)
    }

    /// Returns the human reason.
    pub fn reason(&self) -> &str {
        self.fault().map_or(INTERNAL_REASON, |f| f.reason.as_str())
    }

    /// Returns the detail value, if any.
    pub fn detail(&self) -> Option<&Value> {
        self.fault().and_then(|f| f.detail.as_ref())
    }

    /// Returns the fault shown to clients.
    ///
    /// Internal errors never expose their own reason or detail.
    pub fn public_fault(&self) -> Fault {
        match self {
            Self::Internal(fault) => Fault::new(fault.code, INTERNAL_REASON),
            Self::Unrecognized(_) => Fault::internal(),
            _ => self.fault().cloned().unwrap_or_else(Fault::internal),
        }
    }

    /// Converts this error into its serializable client-facing form.
    pub fn to_envelope(&self) -> ErrorEnvelope {
        let fault = self.public_fault();
        ErrorEnvelope {
            error: ErrorBody {
                code: fault.code,
                reason: fault.reason,
                detail: fault.detail,
                kind: self.kind(),
            },
        }
    }

    fn fault(&self) -> Option<&Fault> {
        match self {
            Self::BadRequest(f)
            | Self::BadBody(f)
            | Self::Unauthorized(f)
            | Self::Forbidden(f)
            | Self::NotFound(f)
            | Self::MethodNotAllowed(f)
            | Self::NotAcceptable(f)
            | Self::RequestTimeout(f)
            | Self::LengthRequired(f)
            | Self::PayloadTooLarge(f)
            | Self::Internal(f) => Some(f),
            Self::BadParameter { fault, .. } | Self::UnsupportedMediaType { fault, .. } => Some(fault),
            Self::Unrecognized(_) => None,
        }
    }

    fn fault_mut(&mut self) -> Option<&mut Fault> {
        match self {
            Self::BadRequest(f)
            | Self::BadBody(f)
            | Self::Unauthorized(f)
            | Self::Forbidden(f)
            | Self::NotFound(f)
            | Self::MethodNotAllowed(f)
            | Self::NotAcceptable(f)
            | Self::RequestTimeout(f)
            | Self::LengthRequired(f)
            | Self::PayloadTooLarge(f)
            | Self::Internal(f) => Some(f),
            Self::BadParameter { fault, .. } | Self::UnsupportedMediaType { fault, .. } => Some(fault),
            Self::Unrecognized(_) => None,
        }
    }
}

/// Serializable error envelope.
///
/// ```json
/// { "error": { "code": 4098, "reason": "unknown parameter extra", "detail": null, "kind": "bad_request" } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The error body.
    pub error: ErrorBody,
}

/// Body of an [`ErrorEnvelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable error code.
    pub code: u32,
    /// Human reason.
    pub reason: String,
    /// Optional detail.
    pub detail: Option<Value>,
    /// Error kind.
    pub kind: ErrorKind,
}

/// Configuration error raised at registration or startup time.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The handler's parameter list cannot be bound.
    #[error("malformed signature for handler '{handler}': {reason}")]
    MalformedSignature {
        /// Handler name.
        handler: String,
        /// What is wrong.
        reason: String,
    },

    /// Two registrations share one identity.
    #[error("duplicate {kind} '{name}'")]
    Duplicate {
        /// What kind of item collided.
        kind: &'static str,
        /// The colliding name.
        name: String,
    },

    /// The adapter is already bound to a server.
    #[error("adapter '{0}' is already attached")]
    AlreadyAttached(String),

    /// Lifecycle transition out of order.
    #[error("adapter '{adapter}' cannot move from {from} to {to}")]
    InvalidTransition {
        /// Adapter name.
        adapter: String,
        /// Current state.
        from: &'static str,
        /// Requested state.
        to: &'static str,
    },

    /// An interceptor was registered after the server started.
    #[error("execution stage is frozen")]
    StageFrozen,

    /// Queue topology declaration conflict.
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// A setting has the wrong shape.
    #[error("invalid setting '{key}': {reason}")]
    InvalidSetting {
        /// Setting key.
        key: String,
        /// What is wrong.
        reason: String,
    },

    /// The transport failed while starting.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SetupError {
    /// Creates a malformed signature error.
    pub fn malformed(handler: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedSignature {
            handler: handler.into(),
            reason: reason.into(),
        }
    }

    /// Creates a duplicate identity error.
    pub fn duplicate(kind: &'static str, name: impl Into<String>) -> Self {
        Self::Duplicate {
            kind,
            name: name.into(),
        }
    }

    /// Creates an invalid setting error.
    pub fn invalid_setting(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Connection-level failure inside an adapter.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection is gone.
    #[error("connection closed")]
    ConnectionClosed,

    /// The adapter has not been started.
    #[error("adapter is not started")]
    NotStarted,

    /// Socket or file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The broker rejected an operation.
    #[error("broker error: {0}")]
    Broker(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_errors_name_the_key() {
        let unknown = RpcError::unknown_parameter("extra");
        assert_eq!(unknown.code(), codes::UNKNOWN_PARAMETER);
        assert_eq!(unknown.reason(), "unknown parameter extra");
        assert_eq!(unknown.to_string(), "unknown parameter extra");

        let missing = RpcError::missing_parameter("data");
        assert_eq!(missing.code(), codes::MISSING_PARAMETER);
        assert_eq!(missing.parameter(), Some("data"));
        assert_eq!(missing.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(RpcError::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(RpcError::method_not_allowed("PUT").kind(), ErrorKind::MethodNotAllowed);
        assert_eq!(RpcError::not_acceptable().kind(), ErrorKind::NotAcceptable);
        assert_eq!(
            RpcError::unsupported_media_type("text/csv").kind(),
            ErrorKind::UnsupportedMediaType
        );
        assert_eq!(RpcError::bad_body(codes::INVALID_BODY, "x").kind(), ErrorKind::BadRequest);
        assert_eq!(RpcError::payload_too_large(10).kind(), ErrorKind::PayloadTooLarge);
    }

    #[test]
    fn test_unrecognized_hides_details() {
        let err = RpcError::from(anyhow::anyhow!("database password is hunter2"));
        assert!(!err.is_recognized());
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.reason(), INTERNAL_REASON);

        let envelope = err.to_envelope();
        assert_eq!(envelope.error.reason, INTERNAL_REASON);
        assert!(envelope.error.detail.is_none());
        assert!(err.to_string().contains("hunter2"));
    }

    #[test]
    fn test_internal_reason_is_not_public() {
        let err = RpcError::internal("pool exhausted");
        assert_eq!(err.reason(), "pool exhausted");
        assert_eq!(err.public_fault().reason, INTERNAL_REASON);
    }

    #[test]
    fn test_with_detail() {
        let err = RpcError::bad_request("nope").with_detail(serde_json::json!({"field": "a"}));
        assert_eq!(err.detail(), Some(&serde_json::json!({"field": "a"})));
    }

    #[test]
    fn test_envelope_serialization() {
        let envelope = RpcError::unknown_parameter("extra").to_envelope();
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["error"]["code"], codes::UNKNOWN_PARAMETER);
        assert_eq!(json["error"]["kind"], "bad_request");
        assert_eq!(json["error"]["reason"], "unknown parameter extra");
    }

    #[test]
    fn test_setup_error_display() {
        let err = SetupError::duplicate("endpoint", "echo");
        assert_eq!(err.to_string(), "duplicate endpoint 'echo'");
        assert_eq!(SetupError::StageFrozen.to_string(), "execution stage is frozen");
    }
}
