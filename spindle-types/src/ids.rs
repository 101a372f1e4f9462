//! Typed ID wrappers for requests, traces, nodes, executions, and tool calls.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed ID wrappers prevent mixing up request ids, node ids, etc.
/// These are just strings underneath — no format requirement. `fresh()`
/// mints a v4 UUID for callers that need a new unique id.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Create a typed ID from anything that converts to String.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Mint a fresh unique id.
            #[must_use]
            pub fn fresh() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Borrow the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

typed_id!(RequestId, "Unique identifier for one logical request.");
typed_id!(TraceId, "Unique identifier correlating everything in one trace.");
typed_id!(Pid, "Unique identifier for a node in the procedure graph.");
typed_id!(
    ExecutionId,
    "Grouping key for a user-visible execution; equals the boundary node's pid."
);
typed_id!(
    ToolUseId,
    "Correlates a tool invocation with its confirmation and result across async boundaries."
);
