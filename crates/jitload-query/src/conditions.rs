//! Runtime condition sets with a canonical serialization.
//!
//! Conditions appear in two roles: forwarded to the query executor as
//! filters, and folded into aggregate cache keys. The cache-key role is
//! why [`ConditionSet::canonical_key`] is order-independent — two callers
//! writing the same conditions in a different order must hit the same
//! memo entry.

use jitload_core::Value;
use serde::Serialize;

/// A set of column filters.
///
/// Each entry is a column paired with its allowed values: one value means
/// equality, several mean an `IN` list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConditionSet {
    entries: Vec<(String, Vec<Value>)>,
}

impl ConditionSet {
    /// Create an empty condition set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition.
    #[must_use]
    pub fn where_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.push((column.into(), vec![value.into()]));
        self
    }

    /// Add an `IN` condition.
    #[must_use]
    pub fn where_in(mut self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.entries.push((column.into(), values));
        self
    }

    /// Append all entries of another set.
    #[must_use]
    pub fn merge(mut self, other: &ConditionSet) -> Self {
        self.entries.extend(other.entries.iter().cloned());
        self
    }

    /// Whether the set has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[(String, Vec<Value>)] {
        &self.entries
    }

    /// Order-independent canonical form, for use in cache keys.
    ///
    /// Entries are sorted by column, values within an entry by their key
    /// representation.
    #[must_use]
    pub fn canonical_key(&self) -> String {
        let mut sorted: Vec<(String, Vec<Value>)> = self.entries.clone();
        for (_, values) in &mut sorted {
            values.sort_by_key(|v| v.key_repr().unwrap_or_default());
        }
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        serde_json::to_string(&sorted).unwrap_or_else(|_| String::from("<unserializable>"))
    }
}
