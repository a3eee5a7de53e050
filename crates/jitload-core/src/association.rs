//! Association metadata.
//!
//! Associations are declared as data on each [`crate::EntityInfo`] and read
//! by the loader and aggregate layers. The descriptors are external schema
//! metadata as far as the batching core is concerned: jitload only reads
//! them, it never derives or mutates them.

use crate::value::Value;

/// The cardinality of an association.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AssociationKind {
    /// To-one: a `Contact` has one `EmailAddress`, an `Address` belongs to
    /// one `Contact`.
    #[default]
    ToOne,
    /// To-many: a `Contact` has many `Addresses`.
    ToMany,
}

/// Where an association's target rows come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A fixed target entity, known from the schema.
    Entity(&'static str),
    /// A polymorphic to-one target: the owner row names the target entity
    /// in a discriminator column of its own.
    Polymorphic {
        /// Owner column holding the target entity name.
        type_column: &'static str,
    },
}

/// A static filter scope attached to an association.
///
/// A scope is a set of fixed column conditions applied to every fetch of
/// the association. A *parameterized* scope needs a runtime argument the
/// loader cannot supply, which makes the association unbatchable: access
/// degrades to a per-record fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    conditions: Vec<(&'static str, Value)>,
    parameterized: bool,
}

impl Scope {
    /// Create an empty static scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parameterized scope marker.
    ///
    /// The loader never evaluates a parameterized scope; the marker exists
    /// so access can skip batching for it.
    #[must_use]
    pub fn parameterized() -> Self {
        Self {
            conditions: Vec::new(),
            parameterized: true,
        }
    }

    /// Add a fixed equality condition.
    #[must_use]
    pub fn where_eq(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.conditions.push((column, value.into()));
        self
    }

    /// The fixed conditions of this scope.
    #[must_use]
    pub fn conditions(&self) -> &[(&'static str, Value)] {
        &self.conditions
    }

    /// Whether this scope requires a runtime argument.
    #[must_use]
    pub const fn is_parameterized(&self) -> bool {
        self.parameterized
    }
}

/// Metadata about one association declared on an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationInfo {
    /// Name of the association.
    pub name: &'static str,

    /// Cardinality.
    pub kind: AssociationKind,

    /// Target entity (fixed or polymorphic).
    pub target: Target,

    /// Column on the owner whose value joins the association
    /// (the foreign key for a to-one, the primary key for a to-many).
    pub owner_key: &'static str,

    /// Column on the target rows matched against `owner_key`.
    pub target_key: &'static str,

    /// Static filter scope, if any.
    pub scope: Option<Scope>,

    /// For a polymorphic inverse (has-many "as"): the target-side type
    /// column constrained to the owner's entity name.
    pub inverse_type_column: Option<&'static str>,

    /// For a through-association: the intermediate association on the
    /// owner that this association traverses.
    pub through: Option<&'static str>,

    /// For a through-association: the association on the intermediate
    /// entity that yields the final targets. Defaults to this
    /// association's own name.
    pub source: Option<&'static str>,

    /// Alias introduced by a custom join scope; used as the resolved table
    /// reference when grouping aggregates.
    pub table_alias: Option<&'static str>,
}

impl AssociationInfo {
    /// Create a new association with required fields.
    #[must_use]
    pub fn new(name: &'static str, kind: AssociationKind, target: Target) -> Self {
        Self {
            name,
            kind,
            target,
            owner_key: "id",
            target_key: "id",
            scope: None,
            inverse_type_column: None,
            through: None,
            source: None,
            table_alias: None,
        }
    }

    /// Shorthand for a to-many association keyed by the owner's `id`.
    #[must_use]
    pub fn to_many(name: &'static str, target_entity: &'static str, target_key: &'static str) -> Self {
        Self::new(name, AssociationKind::ToMany, Target::Entity(target_entity)).target_key(target_key)
    }

    /// Shorthand for a to-one association joining `owner_key` to the
    /// target's `id`.
    #[must_use]
    pub fn to_one(name: &'static str, target_entity: &'static str, owner_key: &'static str) -> Self {
        Self::new(name, AssociationKind::ToOne, Target::Entity(target_entity)).owner_key(owner_key)
    }

    /// Shorthand for a polymorphic to-one association: the owner names the
    /// target entity in `type_column` and holds its key in `owner_key`.
    #[must_use]
    pub fn polymorphic_to_one(
        name: &'static str,
        owner_key: &'static str,
        type_column: &'static str,
    ) -> Self {
        Self::new(name, AssociationKind::ToOne, Target::Polymorphic { type_column })
            .owner_key(owner_key)
    }

    /// Set the owner-side join column.
    #[must_use]
    pub fn owner_key(mut self, column: &'static str) -> Self {
        self.owner_key = column;
        self
    }

    /// Set the target-side join column.
    #[must_use]
    pub fn target_key(mut self, column: &'static str) -> Self {
        self.target_key = column;
        self
    }

    /// Attach a static filter scope.
    #[must_use]
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Constrain the target-side type column to the owner's entity name
    /// (polymorphic has-many).
    #[must_use]
    pub fn inverse_type_column(mut self, column: &'static str) -> Self {
        self.inverse_type_column = Some(column);
        self
    }

    /// Traverse `through` on the owner before reaching the targets.
    #[must_use]
    pub fn through(mut self, association: &'static str) -> Self {
        self.through = Some(association);
        self
    }

    /// Name the association on the intermediate entity (through only).
    #[must_use]
    pub fn source(mut self, association: &'static str) -> Self {
        self.source = Some(association);
        self
    }

    /// Use a custom table reference when grouping aggregates.
    #[must_use]
    pub fn table_alias(mut self, alias: &'static str) -> Self {
        self.table_alias = Some(alias);
        self
    }

    /// Whether this association is a to-many.
    #[must_use]
    pub const fn is_collection(&self) -> bool {
        matches!(self.kind, AssociationKind::ToMany)
    }

    /// Whether the target entity is resolved per-record at runtime.
    #[must_use]
    pub const fn is_polymorphic(&self) -> bool {
        matches!(self.target, Target::Polymorphic { .. })
    }

    /// Whether the static scope requires a runtime argument, making the
    /// association unbatchable.
    #[must_use]
    pub fn is_parameterized(&self) -> bool {
        self.scope.as_ref().is_some_and(Scope::is_parameterized)
    }

    /// The fixed target entity name, if the target is not polymorphic.
    #[must_use]
    pub const fn fixed_target(&self) -> Option<&'static str> {
        match self.target {
            Target::Entity(name) => Some(name),
            Target::Polymorphic { .. } => None,
        }
    }

    /// The association on the intermediate entity that a through chain
    /// terminates in.
    #[must_use]
    pub fn source_name(&self) -> &'static str {
        self.source.unwrap_or(self.name)
    }
}
