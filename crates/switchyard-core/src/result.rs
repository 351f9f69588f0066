//! The logical result of one endpoint call.

use serde_json::Value;

/// What a handler produced.
///
/// Containers rely on the single/empty/multiple distinction so that an
/// empty result is never rendered as a spurious element.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ExecutionResult {
    /// The handler returned nothing.
    #[default]
    Empty,
    /// The handler returned exactly one value.
    Single(Value),
    /// The handler returned an aggregate of values.
    Multiple(Vec<Value>),
}

impl ExecutionResult {
    /// Wraps one value.
    pub fn single(value: impl Into<Value>) -> Self {
        Self::Single(value.into())
    }

    /// Wraps an iterator of values as a multi-value result.
    pub fn multiple<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Multiple(values.into_iter().map(Into::into).collect())
    }

    /// Returns `true` for [`ExecutionResult::Empty`].
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns `true` unless the result is an aggregate.
    pub fn is_single(&self) -> bool {
        !matches!(self, Self::Multiple(_))
    }

    /// Collapses the result into one optional value.
    ///
    /// Empty becomes `None`, single becomes the value itself and multiple
    /// becomes a JSON array.
    pub fn to_value(&self) -> Option<Value> {
        match self {
            Self::Empty => None,
            Self::Single(value) => Some(value.clone()),
            Self::Multiple(values) => Some(Value::Array(values.clone())),
        }
    }
}

impl From<Value> for ExecutionResult {
    fn from(value: Value) -> Self {
        Self::Single(value)
    }
}

impl From<()> for ExecutionResult {
    fn from((): ()) -> Self {
        Self::Empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shapes() {
        assert!(ExecutionResult::Empty.is_empty());
        assert!(ExecutionResult::Empty.is_single());
        assert!(ExecutionResult::single("x").is_single());
        assert!(!ExecutionResult::multiple([1, 2]).is_single());
    }

    #[test]
    fn test_to_value() {
        assert_eq!(ExecutionResult::Empty.to_value(), None);
        assert_eq!(ExecutionResult::single(json!({"a": 1})).to_value(), Some(json!({"a": 1})));
        assert_eq!(ExecutionResult::multiple(["a", "b"]).to_value(), Some(json!(["a", "b"])));
        assert_eq!(ExecutionResult::multiple(Vec::<Value>::new()).to_value(), Some(json!([])));
    }
}
