//! Query boundary for jitload.
//!
//! This crate defines the narrow interface between the batching core and
//! the host ORM's query-building/execution layer:
//!
//! - [`Fetcher`]: the trait the host implements
//! - [`RelatedQuery`] / [`AggregateQuery`]: the typed requests it receives
//! - [`ConditionSet`]: filters with a canonical, order-independent form
//! - owner-key helpers: [`dedup_keys`] and [`slices`]

pub mod aggregate;
pub mod conditions;
pub mod fetcher;
pub mod related;

pub use aggregate::{AggregateFn, AggregateQuery, slices};
pub use conditions::ConditionSet;
pub use fetcher::Fetcher;
pub use related::{RelatedQuery, dedup_keys};
