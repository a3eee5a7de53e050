//! Entity metadata and the schema registry.
//!
//! jitload does not own schema reflection: entity descriptors are built by
//! the host ORM (or by tests) and registered once into a [`Schema`]. The
//! registry answers the questions the loader needs at run time: which
//! associations an entity declares (including those inherited through a
//! single-table-inheritance chain), which entity a discriminator value
//! resolves to, and how an STI subtype must be scoped.

use crate::association::AssociationInfo;
use crate::row::Row;
use std::collections::HashMap;

/// Metadata about one entity type.
#[derive(Debug, Clone)]
pub struct EntityInfo {
    /// Entity type name, e.g. `"Contact"`. Also the value stored in
    /// discriminator columns for this type.
    pub name: &'static str,

    /// Backing table name.
    pub table: &'static str,

    /// Primary key column.
    pub primary_key: &'static str,

    /// Discriminator column for single-table inheritance, if the table
    /// carries one (e.g. `"type"`).
    pub inheritance_column: Option<&'static str>,

    /// STI parent entity name, if this entity is a subtype.
    pub parent: Option<&'static str>,

    /// Whether this entity is an abstract root that never materializes.
    pub abstract_base: bool,

    /// Associations declared directly on this entity.
    pub associations: Vec<AssociationInfo>,
}

impl EntityInfo {
    /// Create a new entity descriptor with the conventional `id` key.
    #[must_use]
    pub fn new(name: &'static str, table: &'static str) -> Self {
        Self {
            name,
            table,
            primary_key: "id",
            inheritance_column: None,
            parent: None,
            abstract_base: false,
            associations: Vec::new(),
        }
    }

    /// Set the primary key column.
    #[must_use]
    pub fn primary_key(mut self, column: &'static str) -> Self {
        self.primary_key = column;
        self
    }

    /// Set the discriminator column.
    #[must_use]
    pub fn inheritance_column(mut self, column: &'static str) -> Self {
        self.inheritance_column = Some(column);
        self
    }

    /// Set the STI parent entity.
    #[must_use]
    pub fn parent(mut self, entity: &'static str) -> Self {
        self.parent = Some(entity);
        self
    }

    /// Mark this entity as an abstract root.
    #[must_use]
    pub fn abstract_base(mut self) -> Self {
        self.abstract_base = true;
        self
    }

    /// Declare an association on this entity.
    #[must_use]
    pub fn association(mut self, info: AssociationInfo) -> Self {
        self.associations.push(info);
        self
    }

    /// Find an association declared directly on this entity.
    #[must_use]
    pub fn own_association(&self, name: &str) -> Option<&AssociationInfo> {
        self.associations.iter().find(|a| a.name == name)
    }
}

/// Registry of entity descriptors.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    entities: HashMap<&'static str, EntityInfo>,
}

impl Schema {
    /// Create an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity descriptor.
    #[must_use]
    pub fn entity(mut self, info: EntityInfo) -> Self {
        self.entities.insert(info.name, info);
        self
    }

    /// Look up an entity by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&EntityInfo> {
        self.entities.get(name)
    }

    /// Find an association on an entity, searching the STI parent chain.
    ///
    /// Subtypes inherit the associations of their ancestors, so a batch of
    /// `Company` records can preload an association declared on `Contact`.
    #[must_use]
    pub fn association(&self, entity: &str, name: &str) -> Option<&AssociationInfo> {
        let mut current = self.get(entity)?;
        loop {
            if let Some(info) = current.own_association(name) {
                return Some(info);
            }
            current = current.parent.and_then(|p| self.get(p))?;
        }
    }

    /// Whether `entity` (or any of its STI ancestors) declares `name`.
    #[must_use]
    pub fn declares(&self, entity: &str, name: &str) -> bool {
        self.association(entity, name).is_some()
    }

    /// The topmost non-abstract ancestor of an entity.
    ///
    /// This is the name stored in polymorphic type columns for any record
    /// of the entity's STI family.
    #[must_use]
    pub fn base_of<'a>(&'a self, entity: &'a str) -> &'a str {
        let mut current = entity;
        while let Some(info) = self.get(current) {
            let Some(parent) = info.parent else { break };
            let Some(parent_info) = self.get(parent) else { break };
            if parent_info.abstract_base {
                break;
            }
            current = parent;
        }
        current
    }

    /// The discriminator column for an entity, searching the parent chain.
    #[must_use]
    pub fn inheritance_column_of(&self, entity: &str) -> Option<&'static str> {
        let mut current = self.get(entity)?;
        loop {
            if let Some(column) = current.inheritance_column {
                return Some(column);
            }
            current = current.parent.and_then(|p| self.get(p))?;
        }
    }

    /// The discriminator condition scoping an STI subtype, if one applies.
    ///
    /// A subtype whose parent is a concrete entity shares its table with
    /// sibling subtypes; queries against it must pin the discriminator so
    /// sibling rows are excluded. Entities whose parent is absent or an
    /// abstract root need no condition.
    #[must_use]
    pub fn sti_condition(&self, entity: &str) -> Option<(&'static str, &'static str)> {
        let info = self.get(entity)?;
        let parent = info.parent?;
        let parent_info = self.get(parent)?;
        if parent_info.abstract_base {
            return None;
        }
        let column = self.inheritance_column_of(entity)?;
        Some((column, info.name))
    }

    /// Resolve the concrete entity for a fetched row.
    ///
    /// When the queried entity's table carries a discriminator column and
    /// the row names a registered entity in it, the row materializes as
    /// that subtype. Anything else (no column, NULL, unregistered name)
    /// falls back to the queried entity.
    #[must_use]
    pub fn resolve_entity(&self, queried: &'static str, row: &Row) -> &'static str {
        let Some(column) = self.inheritance_column_of(queried) else {
            return queried;
        };
        let Some(discriminator) = row.get_by_name(column).and_then(|v| v.as_str()) else {
            return queried;
        };
        match self.entities.get_key_value(discriminator) {
            Some((&name, _)) => name,
            None => queried,
        }
    }

    /// The table backing an entity.
    #[must_use]
    pub fn table_of(&self, entity: &str) -> Option<&'static str> {
        self.get(entity).map(|info| info.table)
    }

    /// The primary key column of an entity.
    #[must_use]
    pub fn primary_key_of(&self, entity: &str) -> Option<&'static str> {
        self.get(entity).map(|info| info.primary_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::AssociationInfo;
    use crate::value::Value;

    fn sti_schema() -> Schema {
        Schema::new()
            .entity(
                EntityInfo::new("Contact", "contacts")
                    .inheritance_column("type")
                    .association(AssociationInfo::to_many("addresses", "Address", "contact_id")),
            )
            .entity(EntityInfo::new("Company", "contacts").parent("Contact"))
            .entity(EntityInfo::new("Employee", "contacts").parent("Contact"))
            .entity(EntityInfo::new("Address", "addresses"))
    }

    #[test]
    fn test_association_lookup_follows_parent_chain() {
        let schema = sti_schema();
        assert!(schema.declares("Company", "addresses"));
        assert!(schema.declares("Contact", "addresses"));
        assert!(!schema.declares("Address", "addresses"));
    }

    #[test]
    fn test_base_of_walks_to_concrete_root() {
        let schema = sti_schema();
        assert_eq!(schema.base_of("Company"), "Contact");
        assert_eq!(schema.base_of("Contact"), "Contact");
        assert_eq!(schema.base_of("Address"), "Address");
    }

    #[test]
    fn test_base_of_stops_below_abstract_root() {
        let schema = Schema::new()
            .entity(EntityInfo::new("ApplicationRecord", "").abstract_base())
            .entity(EntityInfo::new("Contact", "contacts").parent("ApplicationRecord"))
            .entity(EntityInfo::new("Company", "contacts").parent("Contact"));
        assert_eq!(schema.base_of("Company"), "Contact");
    }

    #[test]
    fn test_sti_condition_only_for_concrete_subtypes() {
        let schema = sti_schema();
        assert_eq!(schema.sti_condition("Company"), Some(("type", "Company")));
        assert_eq!(schema.sti_condition("Contact"), None);
        assert_eq!(schema.sti_condition("Address"), None);
    }

    #[test]
    fn test_resolve_entity_from_discriminator() {
        let schema = sti_schema();
        let row = Row::from_pairs(vec![
            ("id", Value::BigInt(1)),
            ("type", Value::Text("Company".into())),
        ]);
        assert_eq!(schema.resolve_entity("Contact", &row), "Company");
    }

    #[test]
    fn test_resolve_entity_unknown_discriminator_falls_back() {
        let schema = sti_schema();
        let row = Row::from_pairs(vec![
            ("id", Value::BigInt(1)),
            ("type", Value::Text("Alien".into())),
        ]);
        assert_eq!(schema.resolve_entity("Contact", &row), "Contact");
    }

    #[test]
    fn test_resolve_entity_null_discriminator_falls_back() {
        let schema = sti_schema();
        let row = Row::from_pairs(vec![("id", Value::BigInt(1)), ("type", Value::Null)]);
        assert_eq!(schema.resolve_entity("Contact", &row), "Contact");
    }
}
