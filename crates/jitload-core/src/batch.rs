//! Batch groups: the sibling sets that travel together.
//!
//! Records materialized by one multi-record fetch are attached to a single
//! [`BatchGroup`]. The first unloaded association access on any member is
//! rewritten into one grouped fetch for the whole set.
//!
//! Ownership runs one way: members hold the group strongly, the group
//! holds members weakly. Dropping the last member frees the group, and no
//! clone or serialization of a single member can retain its siblings.

use crate::record::{Record, RecordInner};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

struct GroupInner {
    members: Mutex<Vec<Weak<RecordInner>>>,
}

/// A set of sibling records produced by one fetch.
#[derive(Clone)]
pub struct BatchGroup {
    inner: Arc<GroupInner>,
}

fn lock(inner: &GroupInner) -> MutexGuard<'_, Vec<Weak<RecordInner>>> {
    inner.members.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BatchGroup {
    /// Attach a set of records as one batch group.
    ///
    /// The member list is a defensive copy: mutating the caller's sequence
    /// afterward does not affect the group. Records without a persisted
    /// identity are excluded from tracking. Returns `None` when nothing
    /// qualifies.
    ///
    /// A record belongs to at most one group at a time; attaching a record
    /// that is already grouped re-homes it.
    #[must_use]
    pub fn attach(records: &[Record]) -> Option<BatchGroup> {
        let persisted: Vec<&Record> = records.iter().filter(|r| r.is_persisted()).collect();
        if persisted.is_empty() {
            return None;
        }

        let group = BatchGroup {
            inner: Arc::new(GroupInner {
                members: Mutex::new(Vec::with_capacity(persisted.len())),
            }),
        };

        for record in persisted {
            if let Some(previous) = record.batch_group() {
                previous.remove_member(record);
            }
            record.set_batch_group(Some(group.clone()));
            lock(&group.inner).push(record.downgrade());
        }

        tracing::debug!(
            target: "jitload::batch",
            size = group.len(),
            "attached batch group"
        );
        Some(group)
    }

    /// Detach a record from its current group, if any.
    pub fn detach(record: &Record) {
        if let Some(group) = record.batch_group() {
            group.remove_member(record);
            record.set_batch_group(None);
        }
    }

    /// The live members of this group, in attachment order.
    ///
    /// Dead weak references (members that were dropped everywhere else)
    /// are pruned as a side effect.
    #[must_use]
    pub fn members(&self) -> Vec<Record> {
        let mut members = lock(&self.inner);
        members.retain(|weak| weak.strong_count() > 0);
        members.iter().filter_map(Record::upgrade).collect()
    }

    /// Number of live members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members().len()
    }

    /// Whether the group has no live members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members().is_empty()
    }

    /// Whether `record` is a member of this group.
    #[must_use]
    pub fn contains(&self, record: &Record) -> bool {
        lock(&self.inner)
            .iter()
            .any(|weak| record.ptr_eq_inner(weak))
    }

    /// Whether two handles refer to the same group.
    #[must_use]
    pub fn ptr_eq(&self, other: &BatchGroup) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn remove_member(&self, record: &Record) {
        lock(&self.inner).retain(|weak| !record.ptr_eq_inner(weak));
    }
}

impl std::fmt::Debug for BatchGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchGroup")
            .field("members", &self.len())
            .finish()
    }
}
