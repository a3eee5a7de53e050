//! Association access interception.
//!
//! The host ORM routes association accessors through [`Preloader::load_one`]
//! and [`Preloader::load_many`] instead of fetching per record. On the
//! first touch of an unloaded association the access is rewritten into a
//! grouped fetch for the whole batch; when that is impossible (no group,
//! stale membership, parameterized scope) the access degrades to a
//! single-record fetch and the N+1 event fires for tracked records.

use crate::events::NPlusOneEvent;
use crate::preloader::{Preloader, slot_records};
use asupersync::{Cx, Outcome};
use jitload_core::{Error, Record};
use jitload_query::{ConditionSet, Fetcher, RelatedQuery};
use jitload_core::Value;
use std::collections::HashMap;

impl<'a, F: Fetcher> Preloader<'a, F> {
    /// Access a to-many association on one record.
    ///
    /// Batched when possible; always returns with the slot loaded.
    pub async fn load_many(
        &self,
        cx: &Cx,
        record: &Record,
        association: &str,
    ) -> Outcome<Vec<Record>, Error> {
        match self.access(cx, record, association).await {
            Outcome::Ok(()) => Outcome::Ok(record.loaded_many(association).unwrap_or_default()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Access a to-one association on one record.
    pub async fn load_one(
        &self,
        cx: &Cx,
        record: &Record,
        association: &str,
    ) -> Outcome<Option<Record>, Error> {
        match self.access(cx, record, association).await {
            Outcome::Ok(()) => Outcome::Ok(record.loaded_one(association).flatten()),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// The interception algorithm shared by both cardinalities.
    async fn access(&self, cx: &Cx, record: &Record, association: &str) -> Outcome<(), Error> {
        let Some(assoc) = self.schema.association(record.entity(), association) else {
            return Outcome::Err(Error::unknown_association(record.entity(), association));
        };
        let name = assoc.name;

        let was_loaded = record.slot_loaded(name);
        if !was_loaded && record.is_persisted() && !assoc.is_parameterized() {
            if let Some(group) = record.batch_group() {
                match self.jit_preload(cx, &group, name).await {
                    Outcome::Ok(()) => {}
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
            }
        }

        // If the jit path ran, the slot is a cache hit from here on.
        let jit_loaded = record.slot_loaded(name);
        if !jit_loaded {
            // Degraded path: resolve this one record by itself. The engine
            // is the same; the batch is of size one.
            match self.preload_over(cx, vec![record.clone()], name, true).await {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        if record.is_persisted() && !was_loaded {
            for related in slot_records(record, name) {
                related.set_tracked(true);
            }
            // A load that bypassed the jit path on a tracked record is a
            // missed batching opportunity.
            if !jit_loaded && record.is_tracked() {
                self.events.publish(&NPlusOneEvent {
                    entity: record.entity(),
                    key: record.key(),
                    association: name.to_string(),
                });
            }
        }
        Outcome::Ok(())
    }

    /// Batch-load a custom-scoped variant of an association for the whole
    /// group, memoized per record under `name`.
    ///
    /// The association slot itself is left untouched: a previously loaded
    /// value keeps its contents, and an unloaded slot stays unloaded.
    pub async fn preload_scoped_relation(
        &self,
        cx: &Cx,
        record: &Record,
        name: &str,
        base_association: &str,
        conditions: &ConditionSet,
    ) -> Outcome<Vec<Record>, Error> {
        if let Some(cached) = record.scoped_cached(name) {
            return Outcome::Ok(cached);
        }
        let Some(assoc) = self.schema.association(record.entity(), base_association) else {
            return Outcome::Err(Error::unknown_association(record.entity(), base_association));
        };
        let Some(target) = assoc.fixed_target() else {
            return Outcome::Err(Error::Custom(format!(
                "scoped relation '{name}' requires a fixed-target association"
            )));
        };

        let members = record
            .batch_group()
            .map_or_else(|| vec![record.clone()], |group| group.members());
        let owners: Vec<Record> = members
            .into_iter()
            .filter(|r| self.schema.declares(r.entity(), base_association))
            .collect();

        let owner_types = self.owner_base_types(&owners);
        let keys: Vec<Value> = owners
            .iter()
            .map(|o| o.get(assoc.owner_key).unwrap_or(Value::Null))
            .collect();
        let query = match RelatedQuery::build(self.schema, assoc, target, &owner_types, keys) {
            Ok(query) => query.with_conditions(conditions),
            Err(e) => return Outcome::Err(e),
        };

        let rows = if query.keys.is_empty() {
            Vec::new()
        } else {
            match self.fetcher.fetch_related(cx, &query).await {
                Outcome::Ok(rows) => rows,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        };
        let targets = match self.materialize(target, rows) {
            Ok(targets) => targets,
            Err(e) => return Outcome::Err(e),
        };

        let mut by_key: HashMap<String, Vec<Record>> = HashMap::new();
        for related in &targets {
            if let Some(repr) = related.get(assoc.target_key).and_then(|v| v.key_repr()) {
                by_key.entry(repr).or_default().push(related.clone());
            }
        }
        for owner in &owners {
            let matches = owner
                .get(assoc.owner_key)
                .and_then(|v| v.key_repr())
                .and_then(|repr| by_key.get(&repr).cloned())
                .unwrap_or_default();
            owner.cache_scoped(name.to_string(), matches);
        }

        Outcome::Ok(record.scoped_cached(name).unwrap_or_default())
    }
}
