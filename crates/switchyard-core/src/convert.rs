//! Per-parameter type conversion.
//!
//! Raw wire values (mostly strings from query strings and form bodies) are
//! coerced into declared parameter types before binding.

use std::fmt;
use std::sync::Arc;

use serde_json::{Number, Value};

/// Custom conversion function.
pub type ConvertFn = dyn Fn(&Value) -> Result<Value, String> + Send + Sync;

/// A declared parameter type.
#[derive(Clone)]
pub enum Converter {
    /// Any scalar rendered as a string.
    String,
    /// Signed 64-bit integer.
    Integer,
    /// 64-bit float.
    Float,
    /// `true`/`false`, `1`/`0`, `yes`/`no`, `on`/`off`.
    Boolean,
    /// A string holding a JSON document.
    Json,
    /// User supplied conversion.
    Custom(Arc<ConvertFn>),
}

impl Converter {
    /// Wraps a conversion function.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Looks up a built-in converter by name.
    pub fn named(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "string" | "str" => Some(Self::String),
            "integer" | "int" => Some(Self::Integer),
            "float" | "number" => Some(Self::Float),
            "boolean" | "bool" => Some(Self::Boolean),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Converts one value. Arrays are converted element-wise.
    pub fn convert(&self, value: &Value) -> Result<Value, String> {
        if let (Value::Array(items), false) = (value, matches!(self, Self::Json | Self::Custom(_))) {
            return items
                .iter()
                .map(|item| self.convert(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array);
        }
        match self {
            Self::String => Ok(match value {
                Value::String(_) => value.clone(),
                Value::Null => Value::String(String::new()),
                other => Value::String(other.to_string()),
            }),
            Self::Integer => match value {
                Value::Number(n) if n.is_i64() => Ok(value.clone()),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|e| format!("'{s}' is not an integer: {e}")),
                other => Err(format!("{other} is not an integer")),
            },
            Self::Float => match value {
                Value::Number(_) => Ok(value.clone()),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| format!("'{s}' is not a number")),
                other => Err(format!("{other} is not a number")),
            },
            Self::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::String(s) => parse_bool(s)
                    .map(Value::Bool)
                    .ok_or_else(|| format!("'{s}' is not a boolean")),
                other => Err(format!("{other} is not a boolean")),
            },
            Self::Json => match value {
                Value::String(s) => serde_json::from_str(s).map_err(|e| e.to_string()),
                other => Ok(other.clone()),
            },
            Self::Custom(f) => f(value),
        }
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("String"),
            Self::Integer => f.write_str("Integer"),
            Self::Float => f.write_str("Float"),
            Self::Boolean => f.write_str("Boolean"),
            Self::Json => f.write_str("Json"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
