//! Grouped fetch requests for association targets.

use crate::conditions::ConditionSet;
use jitload_core::{AssociationInfo, Error, Result, Schema, Value};
use serde::Serialize;

/// A request to fetch the target rows of an association for a set of
/// owner keys.
///
/// This is the whole of what the loader asks the executor for: rows of
/// `entity` whose `key_column` is among `keys`, further filtered by
/// `conditions`. Partitioning the result back onto owners happens on the
/// jitload side.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedQuery {
    /// Name of the association being fetched. Executors that keep richer
    /// scope metadata (including parameterized parts jitload cannot
    /// evaluate) can look it up by this name.
    pub association: &'static str,

    /// Target entity to materialize rows as.
    pub entity: &'static str,

    /// Backing table of the target entity.
    pub table: &'static str,

    /// Target-side key column matched against the owner keys.
    pub key_column: &'static str,

    /// Distinct owner key values (never NULL).
    pub keys: Vec<Value>,

    /// Filters: the association's static scope, STI discriminator,
    /// polymorphic inverse type, and any caller-supplied extras.
    pub conditions: ConditionSet,
}

impl RelatedQuery {
    /// Build a grouped fetch for `association` against `target_entity`.
    ///
    /// `owner_types` carries the owner-side entity names for a polymorphic
    /// inverse (has-many "as"); it is ignored when the association has no
    /// inverse type column. Keys are deduplicated by their canonical
    /// representation and NULLs dropped.
    pub fn build(
        schema: &Schema,
        association: &AssociationInfo,
        target_entity: &'static str,
        owner_types: &[&str],
        keys: Vec<Value>,
    ) -> Result<RelatedQuery> {
        let table = schema
            .table_of(target_entity)
            .ok_or_else(|| Error::unknown_entity(target_entity))?;

        let mut conditions = ConditionSet::new();
        if let Some(scope) = &association.scope {
            for (column, value) in scope.conditions() {
                conditions = conditions.where_eq(*column, value.clone());
            }
        }
        if let Some((column, subtype)) = schema.sti_condition(target_entity) {
            conditions = conditions.where_eq(column, subtype);
        }
        if let Some(column) = association.inverse_type_column {
            let types: Vec<Value> = owner_types
                .iter()
                .map(|name| Value::Text((*name).to_string()))
                .collect();
            conditions = conditions.where_in(column, types);
        }

        Ok(RelatedQuery {
            association: association.name,
            entity: target_entity,
            table,
            key_column: association.target_key,
            keys: dedup_keys(keys),
            conditions,
        })
    }

    /// Append caller-supplied conditions (scoped-relation preloads).
    #[must_use]
    pub fn with_conditions(mut self, extra: &ConditionSet) -> Self {
        self.conditions = self.conditions.merge(extra);
        self
    }
}

/// Deduplicate key values by canonical representation, dropping NULLs.
///
/// Owner and target key columns may disagree on type; comparing canonical
/// representations bridges the mismatch once per loader invocation rather
/// than surfacing it as an error.
#[must_use]
pub fn dedup_keys(keys: Vec<Value>) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    keys.into_iter()
        .filter(|key| match key.key_repr() {
            Some(repr) => seen.insert(repr),
            None => false,
        })
        .collect()
}
