//! Procedure output surface — a plain value or a stream of values.

use futures::Stream;
use serde_json::Value;
use std::fmt;
use std::pin::Pin;

use crate::error::ProcedureError;

/// The streaming half of a procedure result. Consume with
/// `StreamExt::next()`.
pub type ValueStream = Pin<Box<dyn Stream<Item = Result<Value, ProcedureError>> + Send>>;

/// What a procedure handler produces: a single value or a stream.
pub enum ProcedureOutput {
    /// A single JSON value.
    Value(Value),
    /// A stream of JSON values; the tracker re-wraps this so every item
    /// is produced under the tracked context.
    Stream(ValueStream),
}

impl ProcedureOutput {
    /// Wrap a plain value.
    #[must_use]
    pub fn value(v: Value) -> Self {
        Self::Value(v)
    }

    /// Wrap a stream.
    #[must_use]
    pub fn stream(s: ValueStream) -> Self {
        Self::Stream(s)
    }

    /// Whether this output is a stream.
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Unwrap the plain value, failing for streams.
    pub fn into_value(self) -> Result<Value, ProcedureError> {
        match self {
            Self::Value(v) => Ok(v),
            Self::Stream(_) => Err(ProcedureError::Handler(
                "expected a value result, got a stream".into(),
            )),
        }
    }

    /// Unwrap the stream, failing for plain values.
    pub fn into_stream(self) -> Result<ValueStream, ProcedureError> {
        match self {
            Self::Stream(s) => Ok(s),
            Self::Value(_) => Err(ProcedureError::Handler(
                "expected a stream result, got a value".into(),
            )),
        }
    }
}

impl fmt::Debug for ProcedureOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Stream(_) => f.debug_struct("Stream").finish_non_exhaustive(),
        }
    }
}

impl From<Value> for ProcedureOutput {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn into_value_rejects_streams() {
        let s: ValueStream = Box::pin(futures::stream::empty());
        assert!(ProcedureOutput::stream(s).into_value().is_err());
        assert_eq!(
            ProcedureOutput::value(json!(1)).into_value().unwrap(),
            json!(1)
        );
    }
}
