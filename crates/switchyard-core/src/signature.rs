//! Handler signature introspection and parameter binding.
//!
//! Handlers are registered together with a [`HandlerShape`]: the kind of
//! callable plus its raw parameter list as declared. [`inspect`] normalizes
//! a shape into a [`Signature`] once, at registration time. [`bind`] then
//! matches the raw wire parameters of each request against that signature.
//!
//! # Example
//!
//! ```
//! use indexmap::IndexMap;
//! use serde_json::json;
//! use switchyard_core::signature::{bind, inspect, HandlerShape};
//!
//! let shape = HandlerShape::method()
//!     .receiver("self")
//!     .param("name")
//!     .param("greeting")
//!     .defaults([json!("hello")]);
//! let signature = inspect("greet", &shape).unwrap();
//! assert_eq!(signature.params(), ["name", "greeting"]);
//!
//! let mut raw = IndexMap::new();
//! raw.insert("name".to_string(), json!("ada"));
//! let args = bind(&signature, raw).unwrap();
//! assert_eq!(args.get("greeting"), Some(&json!("hello")));
//! ```

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{RpcError, RpcResult, SetupError};

/// The closed set of callable shapes a handler can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// A free function.
    Function,
    /// A method bound to a receiver.
    BoundMethod,
    /// A type whose constructor is the handler.
    Factory,
    /// An object exposing a single call operation.
    Callable,
}

/// One parameter as declared by the handler.
#[derive(Debug, Clone, PartialEq)]
pub enum RawParam {
    /// The implicit receiver. Always stripped.
    Receiver(String),
    /// A plain named parameter.
    Named(String),
    /// A destructured positional group such as `(a, b)`.
    Destructured(Vec<String>),
    /// A variable-length positional catch-all.
    VarPositional(String),
    /// An open-ended named-parameter catch-all.
    VarNamed(String),
}

/// The declared shape of a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerShape {
    kind: HandlerKind,
    params: Vec<RawParam>,
    defaults: Vec<Value>,
}

impl HandlerShape {
    /// Creates an empty shape of the given kind.
    pub fn new(kind: HandlerKind) -> Self {
        Self {
            kind,
            params: Vec::new(),
            defaults: Vec::new(),
        }
    }

    /// Shape of a free function.
    pub fn function() -> Self {
        Self::new(HandlerKind::Function)
    }

    /// Shape of a bound method.
    pub fn method() -> Self {
        Self::new(HandlerKind::BoundMethod)
    }

    /// Shape of a factory.
    pub fn factory() -> Self {
        Self::new(HandlerKind::Factory)
    }

    /// Shape of a callable object.
    pub fn callable() -> Self {
        Self::new(HandlerKind::Callable)
    }

    /// Returns the handler kind.
    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    /// Appends the receiver parameter.
    #[must_use]
    pub fn receiver(mut self, name: impl Into<String>) -> Self {
        self.params.push(RawParam::Receiver(name.into()));
        self
    }

    /// Appends a named parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(RawParam::Named(name.into()));
        self
    }

    /// Appends several named parameters.
    #[must_use]
    pub fn params<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params
            .extend(names.into_iter().map(|n| RawParam::Named(n.into())));
        self
    }

    /// Appends a destructured positional group.
    #[must_use]
    pub fn destructured<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params.push(RawParam::Destructured(
            names.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Appends a variable-length positional catch-all.
    #[must_use]
    pub fn var_positional(mut self, name: impl Into<String>) -> Self {
        self.params.push(RawParam::VarPositional(name.into()));
        self
    }

    /// Appends the named-parameter catch-all.
    #[must_use]
    pub fn var_named(mut self, name: impl Into<String>) -> Self {
        self.params.push(RawParam::VarNamed(name.into()));
        self
    }

    /// Sets the default values for the trailing named parameters.
    #[must_use]
    pub fn defaults<I>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        self.defaults = values.into_iter().collect();
        self
    }
}

/// Normalized parameter contract of a handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signature {
    params: Vec<String>,
    open: Option<String>,
    defaults: IndexMap<String, Value>,
}

impl Signature {
    /// Declared parameter names in order.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Name of the named-parameter catch-all, if declared.
    pub fn open(&self) -> Option<&str> {
        self.open.as_deref()
    }

    /// Default values by parameter name.
    pub fn defaults(&self) -> &IndexMap<String, Value> {
        &self.defaults
    }

    /// Returns `true` if `name` is a declared parameter.
    pub fn declares(&self, name: &str) -> bool {
        self.params.iter().any(|p| p == name)
    }
}

/// Derives the [`Signature`] of a handler.
///
/// Fails when a parameter is destructured, when a positional catch-all is
/// declared, when the receiver is not first, when names repeat, or when there
/// are more defaults than parameters.
pub fn inspect(handler: &str, shape: &HandlerShape) -> Result<Signature, SetupError> {
    let mut params: Vec<String> = Vec::new();
    let mut open = None;

    for (index, param) in shape.params.iter().enumerate() {
        if open.is_some() {
            return Err(SetupError::malformed(
                handler,
                "the named catch-all must be the last parameter",
            ));
        }
        match param {
            RawParam::Receiver(_) if index == 0 => {}
            RawParam::Receiver(name) => {
                return Err(SetupError::malformed(
                    handler,
                    format!("receiver '{name}' must be the first parameter"),
                ));
            }
            RawParam::Named(name) => {
                if params.contains(name) {
                    return Err(SetupError::malformed(
                        handler,
                        format!("parameter '{name}' is declared twice"),
                    ));
                }
                params.push(name.clone());
            }
            RawParam::Destructured(names) => {
                return Err(SetupError::malformed(
                    handler,
                    format!("destructured parameter ({}) is not supported", names.join(", ")),
                ));
            }
            RawParam::VarPositional(name) => {
                return Err(SetupError::malformed(
                    handler,
                    format!("variable positional parameter '{name}' is not supported"),
                ));
            }
            RawParam::VarNamed(name) => open = Some(name.clone()),
        }
    }

    if shape.defaults.len() > params.len() {
        return Err(SetupError::malformed(
            handler,
            format!(
                "{} defaults given for {} parameters",
                shape.defaults.len(),
                params.len()
            ),
        ));
    }

    let first_default = params.len() - shape.defaults.len();
    let defaults = params[first_default..]
        .iter()
        .cloned()
        .zip(shape.defaults.iter().cloned())
        .collect();

    Ok(Signature {
        params,
        open,
        defaults,
    })
}

/// Arguments bound onto a handler's signature.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    values: IndexMap<String, Value>,
    extra: IndexMap<String, Value>,
}

impl Args {
    /// Returns the value bound to `name`, declared or extra.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).or_else(|| self.extra.get(name))
    }

    /// Deserializes the value bound to `name`.
    pub fn value<T: DeserializeOwned>(&self, name: &str) -> RpcResult<T> {
        let value = self
            .get(name)
            .cloned()
            .ok_or_else(|| RpcError::missing_parameter(name))?;
        serde_json::from_value(value).map_err(|e| RpcError::invalid_parameter_type(name, e.to_string()))
    }

    /// Declared parameters in signature order.
    pub fn declared(&self) -> &IndexMap<String, Value> {
        &self.values
    }

    /// Values collected by the named catch-all.
    pub fn extra(&self) -> &IndexMap<String, Value> {
        &self.extra
    }

    /// Number of bound values.
    pub fn len(&self) -> usize {
        self.values.len() + self.extra.len()
    }

    /// Returns `true` when nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Binds raw parameters onto a signature.
///
/// Every raw key must be declared unless the signature has a named
/// catch-all, and every declared parameter must be present or defaulted.
pub fn bind(signature: &Signature, mut raw: IndexMap<String, Value>) -> RpcResult<Args> {
    if signature.open.is_none() {
        if let Some(unknown) = raw.keys().find(|key| !signature.declares(key)) {
            return Err(RpcError::unknown_parameter(unknown.clone()));
        }
    }

    let mut values = IndexMap::with_capacity(signature.params.len());
    for name in &signature.params {
        let value = match raw.shift_remove(name) {
            Some(value) => value,
            None => signature
                .defaults
                .get(name)
                .cloned()
                .ok_or_else(|| RpcError::missing_parameter(name.clone()))?,
        };
        values.insert(name.clone(), value);
    }

    Ok(Args { values, extra: raw })
}
