//! The just-in-time preloader.
//!
//! The preloader owns the batching decision end to end: it registers the
//! records of a multi-record fetch as a [`BatchGroup`], and on the first
//! unloaded association access it rewrites the single-record fetch into
//! one grouped query that resolves the association for every sibling.
//!
//! It borrows its collaborators — schema metadata, the query executor,
//! configuration, and the event bus — rather than owning them, so one
//! preloader is cheap to construct per unit of work.

use crate::config::Config;
use crate::events::EventBus;
use asupersync::{Cx, Outcome};
use jitload_core::{
    AssociationInfo, AssociationKind, BatchGroup, Error, QueryErrorKind, Record, Result, Row,
    Schema, Target,
};
use jitload_core::Value;
use jitload_query::{Fetcher, RelatedQuery};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;

/// Per-fetch batching marker.
///
/// `JitPreload` forces batching for the fetch regardless of the global
/// default; `Default` defers to the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Explicit opt-in: always attach the fetched records.
    JitPreload,
    /// Attach only when the process-wide default says so.
    Default,
}

/// Coordinates batch groups, grouped fetches, and aggregate caching.
pub struct Preloader<'a, F: Fetcher> {
    pub(crate) schema: &'a Schema,
    pub(crate) fetcher: &'a F,
    pub(crate) config: &'a Config,
    pub(crate) events: &'a EventBus,
}

impl<'a, F: Fetcher> Preloader<'a, F> {
    /// Create a preloader over the given collaborators.
    #[must_use]
    pub fn new(schema: &'a Schema, fetcher: &'a F, config: &'a Config, events: &'a EventBus) -> Self {
        Self {
            schema,
            fetcher,
            config,
            events,
        }
    }

    /// The schema this preloader resolves metadata against.
    #[must_use]
    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    /// Materialize fetched rows as records of `queried`.
    ///
    /// When the queried entity's table carries a discriminator column,
    /// each row resolves to its concrete STI subtype.
    pub fn materialize(&self, queried: &'static str, rows: Vec<Row>) -> Result<Vec<Record>> {
        let info = self
            .schema
            .get(queried)
            .ok_or_else(|| Error::unknown_entity(queried))?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let entity = self.schema.resolve_entity(queried, &row);
                let primary_key = self
                    .schema
                    .primary_key_of(entity)
                    .unwrap_or(info.primary_key);
                Record::new(entity, primary_key, row)
            })
            .collect())
    }

    /// Register the result of a multi-record fetch.
    ///
    /// Every persisted record becomes N+1-trackable. A batch group is
    /// attached when the fetch opted in explicitly or batching is the
    /// process-wide default; the group handle is returned for callers that
    /// want to preload eagerly.
    pub fn register_fetch(&self, records: &[Record], mode: FetchMode) -> Option<BatchGroup> {
        for record in records {
            if record.is_persisted() {
                record.set_tracked(true);
            }
        }
        if mode == FetchMode::JitPreload || self.config.is_enabled() {
            BatchGroup::attach(records)
        } else {
            None
        }
    }

    /// Resolve `association` for every member of `group` with one grouped
    /// fetch, marking the slot loaded on each member — including those
    /// with zero matches.
    ///
    /// Members whose entity does not declare the association are silently
    /// skipped (heterogeneous batches occur under inheritance), as are
    /// members whose slot is already loaded. A parameterized scope skips
    /// batching entirely; the access layer degrades to a per-record fetch.
    pub async fn jit_preload(
        &self,
        cx: &Cx,
        group: &BatchGroup,
        association: &str,
    ) -> Outcome<(), Error> {
        self.preload_over(cx, group.members(), association, false).await
    }

    /// Resolve `association` across an explicit set of records.
    ///
    /// This is the shared engine behind the jit path (all group members),
    /// the through-chain hops, and the degraded per-record path. `single`
    /// marks the latter: a parameterized scope is only ever resolved
    /// there, and a NULL polymorphic discriminator is only resolved to
    /// loaded-empty there — under the jit path such owners stay unloaded
    /// so their own access still reports the miss.
    pub(crate) fn preload_over<'s>(
        &'s self,
        cx: &'s Cx,
        records: Vec<Record>,
        association: &'s str,
        single: bool,
    ) -> Pin<Box<dyn Future<Output = Outcome<(), Error>> + Send + 's>> {
        Box::pin(async move {
            let owners: Vec<Record> = records
                .into_iter()
                .filter(|r| self.schema.declares(r.entity(), association))
                .filter(|r| !r.slot_loaded(association))
                .collect();
            let Some(first) = owners.first() else {
                return Outcome::Ok(());
            };
            let Some(assoc) = self.schema.association(first.entity(), association) else {
                return Outcome::Ok(());
            };
            if assoc.is_parameterized() && !single {
                return Outcome::Ok(());
            }

            let targets = if let Some(through) = assoc.through {
                match self.preload_through(cx, &owners, assoc, through, single).await {
                    Outcome::Ok(targets) => targets,
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
            } else {
                let result = match assoc.target {
                    Target::Polymorphic { type_column } => {
                        self.preload_polymorphic(cx, &owners, assoc, type_column, single)
                            .await
                    }
                    Target::Entity(target) => self.preload_fixed(cx, &owners, assoc, target).await,
                };
                match result {
                    Outcome::Ok(targets) => targets,
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
            };

            // Freshly loaded targets travel together from here on, so that
            // touching an association on one of them batches across its
            // siblings too. Records that already belong to a group keep it.
            let batching = self.config.is_enabled()
                || owners.iter().any(|o| o.batch_group().is_some());
            if batching
                && !targets.is_empty()
                && targets.iter().all(|t| t.batch_group().is_none())
            {
                let _ = BatchGroup::attach(&targets);
            }
            Outcome::Ok(())
        })
    }

    /// One grouped fetch against a fixed target entity.
    async fn preload_fixed(
        &self,
        cx: &Cx,
        owners: &[Record],
        assoc: &AssociationInfo,
        target: &'static str,
    ) -> Outcome<Vec<Record>, Error> {
        let owner_types = self.owner_base_types(owners);
        let keys: Vec<Value> = owners
            .iter()
            .map(|o| o.get(assoc.owner_key).unwrap_or(Value::Null))
            .collect();
        let query = match RelatedQuery::build(self.schema, assoc, target, &owner_types, keys) {
            Ok(query) => query,
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
        for record in &targets {
            if let Some(repr) = record.get(assoc.target_key).and_then(|v| v.key_repr()) {
                by_key.entry(repr).or_default().push(record.clone());
            }
        }
        for owner in owners {
            let matches = owner
                .get(assoc.owner_key)
                .and_then(|v| v.key_repr())
                .and_then(|repr| by_key.get(&repr).cloned())
                .unwrap_or_default();
            assign(owner, assoc, matches);
        }
        Outcome::Ok(targets)
    }

    /// Polymorphic to-one: partition owners by the entity their
    /// discriminator column names, one grouped fetch per distinct entity.
    ///
    /// A NULL discriminator, or one naming an unregistered entity, is
    /// never an error: in the per-record path the slot loads empty; in
    /// the jit path the owner is left for its own access to resolve.
    async fn preload_polymorphic(
        &self,
        cx: &Cx,
        owners: &[Record],
        assoc: &AssociationInfo,
        type_column: &'static str,
        single: bool,
    ) -> Outcome<Vec<Record>, Error> {
        let mut by_entity: BTreeMap<&'static str, Vec<Record>> = BTreeMap::new();
        for owner in owners {
            let resolved = owner
                .get(type_column)
                .and_then(|v| v.as_str().map(str::to_string))
                .and_then(|name| self.schema.get(&name))
                .map(|info| info.name);
            match resolved {
                Some(entity) => by_entity.entry(entity).or_default().push(owner.clone()),
                None if single => assign(owner, assoc, Vec::new()),
                None => {}
            }
        }

        let mut all = Vec::new();
        for (entity, subset) in by_entity {
            match self.preload_fixed(cx, &subset, assoc, entity).await {
                Outcome::Ok(targets) => all.extend(targets),
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }
        Outcome::Ok(all)
    }

    /// Through-association: batch-load the intermediate hop, then the
    /// source association across all intermediates, then flatten back onto
    /// the original owners. Two grouped queries regardless of owner count.
    async fn preload_through(
        &self,
        cx: &Cx,
        owners: &[Record],
        assoc: &AssociationInfo,
        through: &'static str,
        single: bool,
    ) -> Outcome<Vec<Record>, Error> {
        match self.preload_over(cx, owners.to_vec(), through, single).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        let mut intermediates: Vec<Record> = Vec::new();
        let per_owner: Vec<(Record, Vec<Record>)> = owners
            .iter()
            .map(|owner| {
                let mids = slot_records(owner, through);
                for mid in &mids {
                    if !intermediates.iter().any(|seen| seen.same_record(mid)) {
                        intermediates.push(mid.clone());
                    }
                }
                (owner.clone(), mids)
            })
            .collect();

        let source = assoc.source_name();
        match self.preload_over(cx, intermediates, source, false).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        let mut all: Vec<Record> = Vec::new();
        for (owner, mids) in per_owner {
            let mut targets = Vec::new();
            for mid in mids {
                targets.extend(slot_records(&mid, source));
            }
            for target in &targets {
                if !all.iter().any(|seen| seen.same_record(target)) {
                    all.push(target.clone());
                }
            }
            assign(&owner, assoc, targets);
        }
        Outcome::Ok(all)
    }

    /// Refetch a record's row by primary key and reset its batch state.
    ///
    /// Clears the memoized aggregates and scoped relations, resets every
    /// association slot to unloaded, and detaches the record from its
    /// batch group. Sibling records are unaffected.
    pub async fn reload(&self, cx: &Cx, record: &Record) -> Outcome<(), Error> {
        match self.fetcher.fetch_by_key(cx, record.entity(), &record.key()).await {
            Outcome::Ok(Some(row)) => {
                record.set_row(row);
                record.clear_batch_state();
                Outcome::Ok(())
            }
            Outcome::Ok(None) => Outcome::Err(Error::query(
                QueryErrorKind::NotFound,
                format!("{} with key {} no longer exists", record.entity(), record.key()),
            )),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    /// Distinct owner-side base entity names, for polymorphic inverse
    /// type conditions.
    pub(crate) fn owner_base_types(&self, owners: &[Record]) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = Vec::new();
        for owner in owners {
            let base = self.schema.base_of(owner.entity());
            let base = self.schema.get(base).map_or(owner.entity(), |info| info.name);
            if !types.contains(&base) {
                types.push(base);
            }
        }
        types
    }
}

/// Write a partition of fetched records into an owner's slot, marking it
/// loaded.
pub(crate) fn assign(owner: &Record, assoc: &AssociationInfo, matches: Vec<Record>) {
    match assoc.kind {
        AssociationKind::ToMany => owner.resolve_many(assoc.name, matches),
        AssociationKind::ToOne => owner.resolve_one(assoc.name, matches.into_iter().next()),
    }
}

/// The records currently held in a slot, regardless of cardinality.
pub(crate) fn slot_records(record: &Record, association: &str) -> Vec<Record> {
    if let Some(items) = record.loaded_many(association) {
        return items;
    }
    record
        .loaded_one(association)
        .flatten()
        .into_iter()
        .collect()
}
