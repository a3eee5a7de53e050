//! Record handles and association slots.
//!
//! A [`Record`] is a cheaply-cloneable shared handle to one materialized
//! entity instance. All clones observe the same association slots, batch
//! membership, and memoized aggregates; identity is the handle itself.
//!
//! The batch-group reference deliberately points "up" with a strong handle
//! while the group points "down" with weak ones. A record therefore keeps
//! its group alive for sibling lookup, but cloning or serializing a single
//! record can never retain the other members. Serialization skips the
//! group reference entirely by contract.

use crate::batch::BatchGroup;
use crate::row::Row;
use crate::value::Value;
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

/// Per-association loaded/unloaded state on a record.
///
/// A slot that is absent from the record is unloaded. A present slot may
/// still be unloaded: a to-many slot holds manually appended, unsaved
/// records before its first fetch, and those survive a later batched load.
#[derive(Debug, Clone)]
pub enum Slot {
    /// To-one slot.
    One {
        /// Whether the association has been resolved.
        loaded: bool,
        /// The related record, if any.
        item: Option<Record>,
    },
    /// To-many slot.
    Many {
        /// Whether the association has been resolved.
        loaded: bool,
        /// The related records (including unsaved in-memory additions).
        items: Vec<Record>,
    },
}

impl Slot {
    /// Whether the association has been resolved.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        match self {
            Slot::One { loaded, .. } | Slot::Many { loaded, .. } => *loaded,
        }
    }
}

pub(crate) struct RecordInner {
    entity: &'static str,
    primary_key: &'static str,
    row: RwLock<Row>,
    slots: Mutex<HashMap<&'static str, Slot>>,
    group: Mutex<Option<BatchGroup>>,
    aggregates: Mutex<HashMap<String, Value>>,
    scoped: Mutex<HashMap<String, Vec<Record>>>,
    tracking: AtomicBool,
}

/// A shared handle to one materialized entity instance.
#[derive(Clone)]
pub struct Record {
    inner: Arc<RecordInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A poisoned lock only means another holder panicked mid-update; the
    // maps inside stay structurally valid.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Record {
    /// Materialize a record for `entity` from a fetched row.
    #[must_use]
    pub fn new(entity: &'static str, primary_key: &'static str, row: Row) -> Self {
        Self {
            inner: Arc::new(RecordInner {
                entity,
                primary_key,
                row: RwLock::new(row),
                slots: Mutex::new(HashMap::new()),
                group: Mutex::new(None),
                aggregates: Mutex::new(HashMap::new()),
                scoped: Mutex::new(HashMap::new()),
                tracking: AtomicBool::new(false),
            }),
        }
    }

    /// The record's entity type name.
    #[must_use]
    pub fn entity(&self) -> &'static str {
        self.inner.entity
    }

    /// The record's primary key column.
    #[must_use]
    pub fn primary_key_column(&self) -> &'static str {
        self.inner.primary_key
    }

    /// The record's primary key value (`Null` when not persisted).
    #[must_use]
    pub fn key(&self) -> Value {
        self.get(self.inner.primary_key).unwrap_or(Value::Null)
    }

    /// Whether the record has a persisted identity.
    ///
    /// Only persisted records participate in batching and N+1 tracking.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        !self.key().is_null()
    }

    /// Get a column value by name.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<Value> {
        let row = self.inner.row.read().unwrap_or_else(PoisonError::into_inner);
        row.get_by_name(column).cloned()
    }

    /// A clone of the record's current row.
    #[must_use]
    pub fn row(&self) -> Row {
        self.inner
            .row
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the record's row (reload).
    pub fn set_row(&self, row: Row) {
        *self
            .inner
            .row
            .write()
            .unwrap_or_else(PoisonError::into_inner) = row;
    }

    /// Identity comparison: same handle, or same entity with equal
    /// persisted keys.
    #[must_use]
    pub fn same_record(&self, other: &Record) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        if self.entity() != other.entity() {
            return false;
        }
        match (self.key().key_repr(), other.key().key_repr()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Association slots
    // ------------------------------------------------------------------

    /// Snapshot of an association slot (`None` = never touched).
    #[must_use]
    pub fn slot(&self, name: &str) -> Option<Slot> {
        lock(&self.inner.slots).get(name).cloned()
    }

    /// Whether an association slot is loaded.
    #[must_use]
    pub fn slot_loaded(&self, name: &str) -> bool {
        lock(&self.inner.slots)
            .get(name)
            .is_some_and(Slot::is_loaded)
    }

    /// The loaded to-many contents, or `None` when unloaded.
    #[must_use]
    pub fn loaded_many(&self, name: &str) -> Option<Vec<Record>> {
        match lock(&self.inner.slots).get(name) {
            Some(Slot::Many { loaded: true, items }) => Some(items.clone()),
            _ => None,
        }
    }

    /// The loaded to-one contents, or `None` when unloaded.
    ///
    /// `Some(None)` means "loaded, no related record".
    #[must_use]
    pub fn loaded_one(&self, name: &str) -> Option<Option<Record>> {
        match lock(&self.inner.slots).get(name) {
            Some(Slot::One { loaded: true, item }) => Some(item.clone()),
            _ => None,
        }
    }

    /// Append an unsaved record to a to-many association without loading it.
    ///
    /// In-memory additions are preserved by a later batched load: only
    /// net-new persisted targets are appended next to them.
    pub fn push_to_many(&self, name: &'static str, record: Record) {
        let mut slots = lock(&self.inner.slots);
        let slot = slots.entry(name).or_insert(Slot::Many {
            loaded: false,
            items: Vec::new(),
        });
        match slot {
            Slot::Many { items, .. } => items.push(record),
            Slot::One { .. } => {
                *slot = Slot::Many {
                    loaded: false,
                    items: vec![record],
                };
            }
        }
    }

    /// Resolve a to-many slot with fetched records.
    ///
    /// Fetched records already present in the slot (same handle or same
    /// persisted identity) are skipped so hand-modified in-memory state is
    /// preserved rather than overwritten. The slot is marked loaded even
    /// when `fetched` is empty.
    pub fn resolve_many(&self, name: &'static str, fetched: Vec<Record>) {
        let mut slots = lock(&self.inner.slots);
        let slot = slots.entry(name).or_insert(Slot::Many {
            loaded: false,
            items: Vec::new(),
        });
        if let Slot::One { .. } = slot {
            *slot = Slot::Many {
                loaded: false,
                items: Vec::new(),
            };
        }
        if let Slot::Many { loaded, items } = slot {
            for record in fetched {
                if !items.iter().any(|existing| existing.same_record(&record)) {
                    items.push(record);
                }
            }
            *loaded = true;
        }
    }

    /// Resolve a to-one slot with the fetched record, if any.
    ///
    /// An item already set (for instance assigned in memory) wins over the
    /// fetched one. The slot is marked loaded either way — this is what
    /// prevents the next touch from re-querying.
    pub fn resolve_one(&self, name: &'static str, fetched: Option<Record>) {
        let mut slots = lock(&self.inner.slots);
        let slot = slots.entry(name).or_insert(Slot::One {
            loaded: false,
            item: None,
        });
        if let Slot::Many { .. } = slot {
            *slot = Slot::One {
                loaded: false,
                item: None,
            };
        }
        if let Slot::One { loaded, item } = slot {
            if item.is_none() {
                *item = fetched;
            }
            *loaded = true;
        }
    }

    // ------------------------------------------------------------------
    // Batch membership
    // ------------------------------------------------------------------

    /// The batch group this record currently belongs to.
    #[must_use]
    pub fn batch_group(&self) -> Option<BatchGroup> {
        lock(&self.inner.group).clone()
    }

    pub(crate) fn set_batch_group(&self, group: Option<BatchGroup>) {
        *lock(&self.inner.group) = group;
    }

    /// Whether N+1 accesses on this record should be reported.
    #[must_use]
    pub fn is_tracked(&self) -> bool {
        self.inner.tracking.load(Ordering::Acquire)
    }

    /// Mark this record as a product of a tracked multi-record fetch.
    pub fn set_tracked(&self, value: bool) {
        self.inner.tracking.store(value, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Memoized aggregates and scoped relations
    // ------------------------------------------------------------------

    /// Look up a memoized aggregate value.
    #[must_use]
    pub fn aggregate_cached(&self, key: &str) -> Option<Value> {
        lock(&self.inner.aggregates).get(key).cloned()
    }

    /// Memoize an aggregate value under its canonical key.
    pub fn cache_aggregate(&self, key: String, value: Value) {
        lock(&self.inner.aggregates).insert(key, value);
    }

    /// Look up a memoized scoped relation.
    #[must_use]
    pub fn scoped_cached(&self, name: &str) -> Option<Vec<Record>> {
        lock(&self.inner.scoped).get(name).cloned()
    }

    /// Memoize a scoped relation result.
    pub fn cache_scoped(&self, name: String, records: Vec<Record>) {
        lock(&self.inner.scoped).insert(name, records);
    }

    /// Clear all batch-derived state: memoized aggregates, scoped-relation
    /// memoizations, association slots, and batch membership.
    ///
    /// Sibling records are unaffected. This is the reload contract.
    pub fn clear_batch_state(&self) {
        lock(&self.inner.aggregates).clear();
        lock(&self.inner.scoped).clear();
        lock(&self.inner.slots).clear();
        let group = lock(&self.inner.group).take();
        if let Some(group) = group {
            group.remove_member(self);
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<RecordInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<RecordInner>) -> Option<Record> {
        weak.upgrade().map(|inner| Record { inner })
    }

    pub(crate) fn ptr_eq_inner(&self, weak: &Weak<RecordInner>) -> bool {
        weak.upgrade()
            .is_some_and(|inner| Arc::ptr_eq(&self.inner, &inner))
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("entity", &self.entity())
            .field("key", &self.key())
            .field("grouped", &self.batch_group().is_some())
            .field("tracked", &self.is_tracked())
            .finish()
    }
}

struct Columns(Row);

impl Serialize for Columns {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in self.0.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Serializes the entity name and column values only.
///
/// Slots, memoized aggregates, and the batch-group reference are excluded
/// by contract: an external serialization of one record must never retain
/// its siblings.
impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Record", 2)?;
        state.serialize_field("entity", self.entity())?;
        state.serialize_field("values", &Columns(self.row()))?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(id: i64) -> Record {
        Record::new(
            "Contact",
            "id",
            Row::from_pairs(vec![
                ("id", Value::BigInt(id)),
                ("name", Value::Text(format!("Contact {id}"))),
            ]),
        )
    }

    fn address(id: i64, contact_id: i64) -> Record {
        Record::new(
            "Address",
            "id",
            Row::from_pairs(vec![
                ("id", Value::BigInt(id)),
                ("contact_id", Value::BigInt(contact_id)),
            ]),
        )
    }

    #[test]
    fn test_persisted_requires_non_null_key() {
        assert!(contact(1).is_persisted());
        let unsaved = Record::new("Contact", "id", Row::from_pairs(vec![("id", Value::Null)]));
        assert!(!unsaved.is_persisted());
    }

    #[test]
    fn test_clone_shares_state() {
        let record = contact(1);
        let other = record.clone();
        record.resolve_many("addresses", vec![address(1, 1)]);
        assert!(other.slot_loaded("addresses"));
    }

    #[test]
    fn test_same_record_by_handle_and_identity() {
        let a = contact(1);
        assert!(a.same_record(&a.clone()));
        assert!(a.same_record(&contact(1)));
        assert!(!a.same_record(&contact(2)));
        assert!(!a.same_record(&address(1, 1)));
    }

    #[test]
    fn test_same_record_unsaved_never_matches_by_identity() {
        let a = Record::new("Contact", "id", Row::from_pairs(vec![("id", Value::Null)]));
        let b = Record::new("Contact", "id", Row::from_pairs(vec![("id", Value::Null)]));
        assert!(!a.same_record(&b));
        assert!(a.same_record(&a.clone()));
    }

    #[test]
    fn test_resolve_many_marks_loaded_even_when_empty() {
        let record = contact(1);
        assert!(!record.slot_loaded("addresses"));
        record.resolve_many("addresses", vec![]);
        assert!(record.slot_loaded("addresses"));
        assert_eq!(record.loaded_many("addresses").unwrap().len(), 0);
    }

    #[test]
    fn test_resolve_many_preserves_in_memory_additions() {
        let record = contact(1);
        let unsaved = Record::new(
            "Address",
            "id",
            Row::from_pairs(vec![("id", Value::Null), ("contact_id", Value::BigInt(1))]),
        );
        record.push_to_many("addresses", unsaved.clone());

        record.resolve_many("addresses", vec![address(10, 1)]);
        let items = record.loaded_many("addresses").unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].same_record(&unsaved));
    }

    #[test]
    fn test_resolve_many_skips_duplicate_identities() {
        let record = contact(1);
        record.push_to_many("addresses", address(10, 1));
        record.resolve_many("addresses", vec![address(10, 1), address(11, 1)]);
        assert_eq!(record.loaded_many("addresses").unwrap().len(), 2);
    }

    #[test]
    fn test_resolve_one_keeps_existing_item() {
        let record = contact(1);
        record.resolve_one("email_address", Some(address(1, 1)));
        // A second resolution cannot displace the first item.
        record.resolve_one("email_address", Some(address(2, 1)));
        let item = record.loaded_one("email_address").unwrap().unwrap();
        assert_eq!(item.key(), Value::BigInt(1));
    }

    #[test]
    fn test_resolve_one_loaded_empty() {
        let record = contact(1);
        record.resolve_one("email_address", None);
        assert!(matches!(record.loaded_one("email_address"), Some(None)));
    }

    #[test]
    fn test_clear_batch_state_resets_everything() {
        let record = contact(1);
        record.resolve_many("addresses", vec![address(1, 1)]);
        record.cache_aggregate("addresses_count|{}".into(), Value::BigInt(1));
        record.cache_scoped("usa_addresses".into(), vec![]);

        record.clear_batch_state();
        assert!(!record.slot_loaded("addresses"));
        assert!(record.aggregate_cached("addresses_count|{}").is_none());
        assert!(record.scoped_cached("usa_addresses").is_none());
        assert!(record.batch_group().is_none());
    }

    #[test]
    fn test_serialize_excludes_batch_state() {
        let record = contact(1);
        record.resolve_many("addresses", vec![address(1, 1)]);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["entity"], "Contact");
        assert_eq!(json["values"]["id"], serde_json::json!({"BigInt": 1}));
        assert!(json.get("group").is_none());
        assert!(json.get("slots").is_none());
    }
}
