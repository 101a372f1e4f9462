//! Input validation for procedure args.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Validates (and possibly normalizes) the first argument of a call.
///
/// [`Validator::typed`] round-trips through a serde type, so a
/// procedure declares its input shape with a plain `Deserialize`
/// struct; failures surface as
/// [`ProcedureError::Validation`](spindle_types::ProcedureError).
#[derive(Clone)]
pub struct Validator {
    check: Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>,
}

impl Validator {
    /// Build a validator from a closure returning the validated value.
    pub fn new<F>(check: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            check: Arc::new(check),
        }
    }

    /// Build a validator that deserializes into `T` and re-serializes
    /// the result, normalizing defaults and rejecting unknown shapes.
    #[must_use]
    pub fn typed<T: DeserializeOwned + Serialize>() -> Self {
        Self::new(|value| {
            let typed: T = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
            serde_json::to_value(typed).map_err(|e| e.to_string())
        })
    }

    /// Run the validation.
    ///
    /// # Errors
    ///
    /// A human-readable description of the failure.
    pub fn validate(&self, value: &Value) -> Result<Value, String> {
        (self.check)(value)
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize)]
    struct GreetArgs {
        name: String,
        #[serde(default)]
        shout: bool,
    }

    #[test]
    fn typed_validator_normalizes_defaults() {
        let v = Validator::typed::<GreetArgs>();
        let out = v.validate(&json!({"name": "World"})).unwrap();
        assert_eq!(out, json!({"name": "World", "shout": false}));
    }

    #[test]
    fn typed_validator_rejects_bad_shapes() {
        let v = Validator::typed::<GreetArgs>();
        assert!(v.validate(&json!({"name": 42})).is_err());
    }
}
