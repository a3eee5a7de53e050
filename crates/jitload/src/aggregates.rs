//! The aggregate-value cache.
//!
//! An [`AggregateSpec`] is the registration API for grouped aggregates: it
//! declares "count of `phone_numbers`" or "max street length of
//! `addresses`" once, and every fetch through it is memoized per record.
//! For a record that belongs to a batch group, one grouped query computes
//! the aggregate for every sibling at once and fills all of their memos.

use crate::events::NPlusOneEvent;
use crate::preloader::Preloader;
use asupersync::{Cx, Outcome};
use jitload_core::{Error, Record, Value};
use jitload_query::{
    AggregateFn, AggregateQuery, ConditionSet, Fetcher, dedup_keys, slices,
};
use std::collections::HashMap;

/// A declared grouped aggregate over an association.
#[derive(Debug, Clone)]
pub struct AggregateSpec {
    association: &'static str,
    name: &'static str,
    function: AggregateFn,
    field: &'static str,
    default: Value,
    max_batch_size: Option<usize>,
    table_alias: Option<&'static str>,
}

impl AggregateSpec {
    /// Declare an aggregate: `function(field)` over `association`, cached
    /// under `{association}_{name}`.
    ///
    /// The default for absent owners is `0`; override with
    /// [`AggregateSpec::default_value`].
    #[must_use]
    pub fn new(
        association: &'static str,
        name: &'static str,
        function: AggregateFn,
        field: &'static str,
    ) -> Self {
        Self {
            association,
            name,
            function,
            field,
            default: Value::BigInt(0),
            max_batch_size: None,
            table_alias: None,
        }
    }

    /// Value returned (and memoized) for owners with no matching rows.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = value.into();
        self
    }

    /// Bound the owner keys per query slice, overriding the configured
    /// process-wide bound.
    #[must_use]
    pub fn max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = Some(max);
        self
    }

    /// Group by this table reference instead of the association's table.
    #[must_use]
    pub fn table_alias(mut self, alias: &'static str) -> Self {
        self.table_alias = Some(alias);
        self
    }

    /// The association this aggregate runs over.
    #[must_use]
    pub fn association(&self) -> &'static str {
        self.association
    }

    /// The aggregate function.
    #[must_use]
    pub fn function(&self) -> AggregateFn {
        self.function
    }

    /// Cache key: method identity plus the canonical condition form, so
    /// condition order never splits the memo.
    #[must_use]
    pub fn cache_key(&self, conditions: &ConditionSet) -> String {
        format!(
            "{}_{}|{}",
            self.association,
            self.name,
            conditions.canonical_key()
        )
    }

    /// Fetch (or recall) this aggregate for one record.
    pub async fn fetch<F: Fetcher>(
        &self,
        cx: &Cx,
        record: &Record,
        conditions: &ConditionSet,
        preloader: &Preloader<'_, F>,
    ) -> Outcome<Value, Error> {
        preloader.aggregate(cx, record, self, conditions).await
    }
}

impl<'a, F: Fetcher> Preloader<'a, F> {
    /// Compute a grouped aggregate for `record`, memoizing the result on
    /// every member of its batch group.
    ///
    /// Without a group the aggregate runs as a single-owner query — no
    /// batching is possible, and tracked records report the miss.
    pub async fn aggregate(
        &self,
        cx: &Cx,
        record: &Record,
        spec: &AggregateSpec,
        conditions: &ConditionSet,
    ) -> Outcome<Value, Error> {
        let key = spec.cache_key(conditions);
        if let Some(value) = record.aggregate_cached(&key) {
            return Outcome::Ok(value);
        }

        let Some(assoc) = self.schema.association(record.entity(), spec.association) else {
            return Outcome::Err(Error::unknown_association(record.entity(), spec.association));
        };

        // Follow the through-chain to its base: the grouping key lives on
        // the first non-through association's table.
        let mut base = assoc;
        while let Some(through) = base.through {
            match self.schema.association(record.entity(), through) {
                Some(next) => base = next,
                None => {
                    return Outcome::Err(Error::unknown_association(record.entity(), through));
                }
            }
        }
        let Some(final_target) = assoc.fixed_target() else {
            return Outcome::Err(Error::Custom(format!(
                "aggregate '{}' requires a fixed-target association",
                spec.name
            )));
        };
        let Some(base_target) = base.fixed_target() else {
            return Outcome::Err(Error::Custom(format!(
                "aggregate '{}' traverses a polymorphic intermediate",
                spec.name
            )));
        };
        let Some(base_table) = self.schema.table_of(base_target) else {
            return Outcome::Err(Error::unknown_entity(base_target));
        };
        let table_reference = spec
            .table_alias
            .or(assoc.table_alias)
            .unwrap_or(base_table);

        // An STI subtype target shares its table with sibling subtypes;
        // pin the discriminator so their rows stay out of the groups. A
        // polymorphic association is additionally pinned to the calling
        // owner's own type.
        let mut query_conditions = conditions.clone();
        if let Some((column, subtype)) = self.schema.sti_condition(final_target) {
            query_conditions = query_conditions.where_eq(column, subtype);
        }
        if let Some(column) = assoc.inverse_type_column {
            query_conditions = query_conditions.where_eq(column, record.entity());
        }

        let members = record
            .batch_group()
            .map_or_else(|| vec![record.clone()], |group| group.members());
        let keys = dedup_keys(
            members
                .iter()
                .map(|m| m.get(base.owner_key).unwrap_or(Value::Null))
                .collect(),
        );

        let max = spec.max_batch_size.or(self.config.max_batch_size_value());
        let mut data: HashMap<String, Value> = HashMap::new();
        for slice in slices(&keys, max) {
            let query = AggregateQuery {
                owner: record.entity(),
                association: spec.association,
                entity: final_target,
                table_reference,
                function: spec.function,
                field: spec.field,
                group_column: base.target_key,
                keys: slice,
                conditions: query_conditions.clone(),
                through: assoc.through,
            };
            match self.fetcher.fetch_aggregate(cx, &query).await {
                Outcome::Ok(pairs) => {
                    for (group_key, value) in pairs {
                        if let Some(repr) = group_key.key_repr() {
                            data.insert(repr, value);
                        }
                    }
                }
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        for member in &members {
            let value = member
                .get(base.owner_key)
                .and_then(|v| v.key_repr())
                .and_then(|repr| data.get(&repr).cloned())
                .unwrap_or_else(|| spec.default.clone());
            member.cache_aggregate(key.clone(), value);
        }

        if record.batch_group().is_none() && record.is_tracked() {
            self.events.publish(&NPlusOneEvent {
                entity: record.entity(),
                key: record.key(),
                association: format!("{}.{}", spec.association, spec.function.name()),
            });
        }

        Outcome::Ok(
            record
                .aggregate_cached(&key)
                .unwrap_or_else(|| spec.default.clone()),
        )
    }
}
