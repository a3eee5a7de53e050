//! Shared fixtures for the integration suites: a contacts-domain schema
//! and an in-memory fetcher that counts every query it executes.

#![allow(dead_code)]

use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};
use jitload::{
    AggregateFn, AggregateQuery, AssociationInfo, AssociationKind, EntityInfo, Error, EventBus,
    FetchMode, Fetcher, NPlusOneEvent, Preloader, Record, RelatedQuery, Row, Schema, Scope,
    Target, Value,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// The test schema, mirroring a small address-book domain:
///
/// - `ContactBook` has many `contacts` (STI base `Contact` with subtypes
///   `Company` and `Employee`), plus `companies` scoped to the subtype,
///   and `email_addresses` through `contacts`.
/// - `Contact` has many `addresses` and `phone_numbers`, one
///   `email_address`, a polymorphic `contact_owner`, and a parameterized
///   `addresses_near` that can never batch.
/// - `ContactOwner` has many polymorphic `contacts` (the inverse side).
pub fn contacts_schema() -> Schema {
    Schema::new()
        .entity(
            EntityInfo::new("ContactBook", "contact_books")
                .association(AssociationInfo::to_many("contacts", "Contact", "contact_book_id"))
                .association(AssociationInfo::to_many("companies", "Company", "contact_book_id"))
                .association(
                    AssociationInfo::to_many("email_addresses", "EmailAddress", "contact_id")
                        .through("contacts")
                        .source("email_address"),
                ),
        )
        .entity(
            EntityInfo::new("Contact", "contacts")
                .inheritance_column("type")
                .association(AssociationInfo::to_many("addresses", "Address", "contact_id"))
                .association(AssociationInfo::to_many(
                    "phone_numbers",
                    "PhoneNumber",
                    "contact_id",
                ))
                .association(
                    AssociationInfo::new(
                        "email_address",
                        AssociationKind::ToOne,
                        Target::Entity("EmailAddress"),
                    )
                    .target_key("contact_id"),
                )
                .association(AssociationInfo::polymorphic_to_one(
                    "contact_owner",
                    "contact_owner_id",
                    "contact_owner_type",
                ))
                .association(
                    AssociationInfo::to_many("addresses_near", "Address", "contact_id")
                        .scope(Scope::parameterized()),
                ),
        )
        .entity(EntityInfo::new("Company", "contacts").parent("Contact"))
        .entity(EntityInfo::new("Employee", "contacts").parent("Contact"))
        .entity(
            EntityInfo::new("Address", "addresses")
                .association(AssociationInfo::to_one("contact", "Contact", "contact_id"))
                .association(AssociationInfo::to_one("country", "Country", "country_id")),
        )
        .entity(
            EntityInfo::new("EmailAddress", "email_addresses")
                .association(AssociationInfo::to_one("contact", "Contact", "contact_id")),
        )
        .entity(EntityInfo::new("PhoneNumber", "phone_numbers"))
        .entity(
            EntityInfo::new("Country", "countries")
                .association(AssociationInfo::to_many("addresses", "Address", "country_id")),
        )
        .entity(
            EntityInfo::new("ContactOwner", "contact_owners").association(
                AssociationInfo::to_many("contacts", "Contact", "contact_owner_id")
                    .inverse_type_column("contact_owner_type"),
            ),
        )
}

/// An in-memory [`Fetcher`] over plain row tables, counting queries.
pub struct MemoryFetcher {
    schema: Schema,
    tables: Mutex<HashMap<&'static str, Vec<Row>>>,
    related_queries: AtomicUsize,
    aggregate_queries: AtomicUsize,
    key_queries: AtomicUsize,
}

impl MemoryFetcher {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            tables: Mutex::new(HashMap::new()),
            related_queries: AtomicUsize::new(0),
            aggregate_queries: AtomicUsize::new(0),
            key_queries: AtomicUsize::new(0),
        }
    }

    pub fn insert(&self, table: &'static str, row: Row) {
        self.tables.lock().unwrap().entry(table).or_default().push(row);
    }

    pub fn table_rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn related_queries(&self) -> usize {
        self.related_queries.load(Ordering::Relaxed)
    }

    pub fn aggregate_queries(&self) -> usize {
        self.aggregate_queries.load(Ordering::Relaxed)
    }

    pub fn key_queries(&self) -> usize {
        self.key_queries.load(Ordering::Relaxed)
    }

    fn related_sync(&self, query: &RelatedQuery) -> Vec<Row> {
        self.related_queries.fetch_add(1, Ordering::Relaxed);
        self.table_rows(query.table)
            .into_iter()
            .filter(|row| {
                value_in(
                    row.get_by_name(query.key_column).unwrap_or(&Value::Null),
                    &query.keys,
                ) && row_matches(row, query)
            })
            .collect()
    }

    fn aggregate_sync(&self, query: &AggregateQuery) -> Vec<(Value, Value)> {
        self.aggregate_queries.fetch_add(1, Ordering::Relaxed);

        // (group key, field row) pairs surviving the filters
        let mut grouped: Vec<(Value, Row)> = Vec::new();
        if let Some(through) = query.through {
            // Join the base (through) table to the final target the way a
            // real executor would.
            let base = self
                .schema
                .association(query.owner, through)
                .expect("through association");
            let base_table = self
                .schema
                .table_of(base.fixed_target().expect("fixed through target"))
                .expect("through table");
            let assoc = self
                .schema
                .association(query.owner, query.association)
                .expect("aggregated association");
            let source = self
                .schema
                .association(base.fixed_target().unwrap(), assoc.source_name())
                .expect("source association");
            let final_table = self.schema.table_of(query.entity).expect("target table");

            for base_row in self.table_rows(base_table) {
                let group_key = base_row
                    .get_by_name(query.group_column)
                    .cloned()
                    .unwrap_or(Value::Null);
                if !value_in(&group_key, &query.keys) {
                    continue;
                }
                let join_key = base_row.get_by_name(source.owner_key).cloned();
                for final_row in self.table_rows(final_table) {
                    let matches_join = match (&join_key, final_row.get_by_name(source.target_key)) {
                        (Some(left), Some(right)) => left.key_repr() == right.key_repr(),
                        _ => false,
                    };
                    if matches_join && conditions_match(&final_row, query.conditions.entries()) {
                        grouped.push((group_key.clone(), final_row));
                    }
                }
            }
        } else {
            let table = self.schema.table_of(query.entity).expect("target table");
            for row in self.table_rows(table) {
                let group_key = row
                    .get_by_name(query.group_column)
                    .cloned()
                    .unwrap_or(Value::Null);
                if value_in(&group_key, &query.keys)
                    && conditions_match(&row, query.conditions.entries())
                {
                    grouped.push((group_key, row));
                }
            }
        }

        let mut order: Vec<String> = Vec::new();
        let mut by_group: HashMap<String, (Value, Vec<Row>)> = HashMap::new();
        for (key, row) in grouped {
            let Some(repr) = key.key_repr() else { continue };
            if !by_group.contains_key(&repr) {
                order.push(repr.clone());
            }
            by_group.entry(repr).or_insert_with(|| (key, Vec::new())).1.push(row);
        }

        order
            .into_iter()
            .filter_map(|repr| by_group.remove(&repr))
            .map(|(key, rows)| (key, evaluate(query.function, query.field, &rows)))
            .collect()
    }

    fn by_key_sync(&self, entity: &'static str, key: &Value) -> Option<Row> {
        self.key_queries.fetch_add(1, Ordering::Relaxed);
        let table = self.schema.table_of(entity)?;
        let pk = self.schema.primary_key_of(entity)?;
        self.table_rows(table).into_iter().find(|row| {
            row.get_by_name(pk).and_then(Value::key_repr) == key.key_repr()
        })
    }
}

fn value_in(value: &Value, allowed: &[Value]) -> bool {
    allowed.iter().any(|candidate| match (value.key_repr(), candidate.key_repr()) {
        (Some(left), Some(right)) => left == right,
        (None, None) => true,
        _ => false,
    })
}

fn conditions_match(row: &Row, entries: &[(String, Vec<Value>)]) -> bool {
    entries.iter().all(|(column, allowed)| {
        value_in(row.get_by_name(column).unwrap_or(&Value::Null), allowed)
    })
}

fn row_matches(row: &Row, query: &RelatedQuery) -> bool {
    conditions_match(row, query.conditions.entries())
}

fn evaluate(function: AggregateFn, field: &str, rows: &[Row]) -> Value {
    let field_values: Vec<Value> = rows
        .iter()
        .filter_map(|row| row.get_by_name(field))
        .filter(|v| !v.is_null())
        .cloned()
        .collect();
    match function {
        AggregateFn::Count => {
            if field == "*" {
                Value::BigInt(rows.len() as i64)
            } else {
                Value::BigInt(field_values.len() as i64)
            }
        }
        AggregateFn::Sum => {
            Value::BigInt(field_values.iter().filter_map(Value::as_i64).sum())
        }
        AggregateFn::Avg => {
            let sum: f64 = field_values.iter().filter_map(Value::as_f64).sum();
            if field_values.is_empty() {
                Value::Null
            } else {
                Value::Double(sum / field_values.len() as f64)
            }
        }
        AggregateFn::Min => field_values
            .into_iter()
            .min_by(|a, b| {
                a.as_f64()
                    .unwrap_or(f64::MAX)
                    .total_cmp(&b.as_f64().unwrap_or(f64::MAX))
            })
            .unwrap_or(Value::Null),
        AggregateFn::Max => field_values
            .into_iter()
            .max_by(|a, b| {
                a.as_f64()
                    .unwrap_or(f64::MIN)
                    .total_cmp(&b.as_f64().unwrap_or(f64::MIN))
            })
            .unwrap_or(Value::Null),
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch_related(
        &self,
        _cx: &Cx,
        query: &RelatedQuery,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let result = self.related_sync(query);
        async move { Outcome::Ok(result) }
    }

    fn fetch_aggregate(
        &self,
        _cx: &Cx,
        query: &AggregateQuery,
    ) -> impl Future<Output = Outcome<Vec<(Value, Value)>, Error>> + Send {
        let result = self.aggregate_sync(query);
        async move { Outcome::Ok(result) }
    }

    fn fetch_by_key(
        &self,
        _cx: &Cx,
        entity: &'static str,
        key: &Value,
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        let result = self.by_key_sync(entity, key);
        async move { Outcome::Ok(result) }
    }
}

/// Run a future to completion on a fresh single-threaded runtime.
pub fn run<T>(future: impl Future<Output = T>) -> T {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(future)
}

pub fn test_cx() -> Cx {
    Cx::for_testing()
}

/// Unwrap an [`Outcome`], panicking on anything but `Ok`.
pub fn ok<T, E: std::fmt::Debug>(outcome: Outcome<T, E>) -> T {
    match outcome {
        Outcome::Ok(value) => value,
        Outcome::Err(e) => panic!("unexpected error outcome: {e:?}"),
        Outcome::Cancelled(_) => panic!("unexpected cancellation"),
        Outcome::Panicked(_) => panic!("unexpected panic outcome"),
    }
}

/// Collect published N+1 events into a shared vec.
pub fn collect_events(events: &EventBus) -> Arc<Mutex<Vec<NPlusOneEvent>>> {
    let sink = Arc::new(Mutex::new(Vec::new()));
    let handle = Arc::clone(&sink);
    events.subscribe(move |event| handle.lock().unwrap().push(event.clone()));
    sink
}

/// Materialize and register all rows of `entity`'s table as one tracked,
/// batched fetch. Returns the records.
pub fn load_batch<F: Fetcher>(
    preloader: &Preloader<'_, F>,
    fetcher: &MemoryFetcher,
    entity: &'static str,
) -> Vec<Record> {
    let table = preloader
        .schema()
        .table_of(entity)
        .expect("entity registered");
    let records = preloader
        .materialize(entity, fetcher.table_rows(table))
        .expect("materialize rows");
    preloader.register_fetch(&records, FetchMode::JitPreload);
    records
}

/// Shorthand for a contacts-table row.
pub fn contact_row(id: i64, name: &str) -> Row {
    Row::from_pairs(vec![
        ("id", Value::BigInt(id)),
        ("type", Value::Null),
        ("name", Value::Text(name.to_string())),
        ("contact_book_id", Value::Null),
        ("contact_owner_id", Value::Null),
        ("contact_owner_type", Value::Null),
    ])
}

/// Shorthand for an addresses-table row.
pub fn address_row(id: i64, contact_id: i64, street: &str, length: i64) -> Row {
    Row::from_pairs(vec![
        ("id", Value::BigInt(id)),
        ("contact_id", Value::BigInt(contact_id)),
        ("country_id", Value::BigInt(1)),
        ("street", Value::Text(street.to_string())),
        ("street_length", Value::BigInt(length)),
    ])
}
