//! Just-in-time batched association loading.
//!
//! jitload addresses the N+1 query problem at run time: records
//! materialized by one fetch are registered as a batch group, and the
//! first access to a not-yet-loaded association on any member is rewritten
//! into a single grouped query that resolves the association for every
//! sibling. Subsequent touches on the other members are cache hits.
//!
//! # Role In The Architecture
//!
//! - **Batch groups**: sibling sets with weak membership
//!   ([`jitload_core::batch`]).
//! - **JIT preloader**: the grouped fetch, polymorphic/STI partitioning,
//!   and through-chain hops ([`Preloader`]).
//! - **Access interception**: [`Preloader::load_one`] /
//!   [`Preloader::load_many`] wrap the host ORM's accessors; unbatchable
//!   accesses degrade gracefully and report through the event bus.
//! - **Aggregate cache**: [`AggregateSpec`] computes grouped aggregates
//!   for a whole batch in one query and memoizes per owner.
//!
//! The database, SQL construction, and schema reflection stay outside:
//! the host implements [`Fetcher`] and registers [`EntityInfo`]
//! descriptors.
//!
//! # Example
//!
//! ```ignore
//! let preloader = Preloader::new(&schema, &fetcher, &config, &events);
//!
//! // A multi-record fetch opts into batching
//! let contacts = preloader.materialize("Contact", rows)?;
//! preloader.register_fetch(&contacts, FetchMode::JitPreload);
//!
//! // First touch issues ONE grouped query for all contacts
//! let addresses = preloader.load_many(&cx, &contacts[0], "addresses").await?;
//!
//! // Sibling touches are cache hits
//! let more = preloader.load_many(&cx, &contacts[1], "addresses").await?;
//! ```

pub mod access;
pub mod aggregates;
pub mod config;
pub mod events;
pub mod preloader;

pub use aggregates::AggregateSpec;
pub use config::{Config, Enabled};
pub use events::{EventBus, NPlusOneEvent};
pub use preloader::{FetchMode, Preloader};

pub use jitload_core::{
    AssociationInfo, AssociationKind, BatchGroup, ColumnInfo, EntityInfo, Error, Record, Result,
    Row, Schema, Scope, Slot, Target, Value,
};
pub use jitload_query::{
    AggregateFn, AggregateQuery, ConditionSet, Fetcher, RelatedQuery, dedup_keys, slices,
};
