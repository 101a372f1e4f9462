//! Accumulating metric maps keyed by dotted paths.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A mapping from metric key (dotted path, e.g. `usage.input_tokens`)
/// to an accumulated number.
///
/// Merging is additive: propagating a child node's metrics into its
/// parent sums values key by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metrics(HashMap<String, f64>);

impl Metrics {
    /// Create an empty metric map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a metric value.
    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    /// Overwrite a metric value.
    pub fn set(&mut self, key: impl Into<String>, value: f64) {
        self.0.insert(key.into(), value);
    }

    /// Add a delta to a metric, starting from zero if absent.
    pub fn add(&mut self, key: impl Into<String>, delta: f64) {
        *self.0.entry(key.into()).or_insert(0.0) += delta;
    }

    /// Additively merge another metric map into this one.
    pub fn merge_from(&mut self, other: &Metrics) {
        for (key, value) in &other.0 {
            *self.0.entry(key.clone()).or_insert(0.0) += value;
        }
    }

    /// Iterate over `(key, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of keys present.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no metrics have been recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<String, f64>> for Metrics {
    fn from(map: HashMap<String, f64>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, f64)> for Metrics {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
