//! Registry of tools available to an engine.

use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

use spindle_types::ToolSpec;

/// Holds tools as `Arc<ToolSpec>` keyed by name.
///
/// The executor uses this to look up and run tools requested by the
/// model.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<ToolSpec>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Overwrites any existing tool with the same
    /// name.
    pub fn register(&mut self, spec: ToolSpec) {
        self.tools.insert(spec.name.clone(), Arc::new(spec));
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<ToolSpec>> {
        self.tools.get(name).cloned()
    }

    /// Definitions handed to the model adapter:
    /// `{name, description, parameters}` per tool.
    pub fn definitions(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|spec| {
                json!({
                    "name": spec.name,
                    "description": spec.description,
                    "parameters": spec.parameters,
                })
            })
            .collect()
    }

    /// Iterate over all registered tools.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ToolSpec>> {
        self.tools.values()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_get() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.register(ToolSpec::server("echo", "Echoes input back"));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn register_overwrites_same_name() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolSpec::server("echo", "first"));
        registry.register(ToolSpec::server("echo", "second"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("echo").unwrap().description, "second");
    }

    #[test]
    fn definitions_expose_schema() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolSpec::server("echo", "Echoes input back"));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0]["name"], "echo");
        assert_eq!(defs[0]["parameters"]["type"], "object");
    }
}
