//! The fetcher boundary.
//!
//! jitload never builds SQL. The host ORM's query layer implements
//! [`Fetcher`], turning the typed requests from this crate into whatever
//! its engine executes. jitload only decides *when* a query runs and *how
//! many* owners it covers.
//!
//! Calls are all-or-nothing: a fetch either yields the full result or an
//! error, and errors propagate to the caller unchanged. Cancellation and
//! timeout semantics are inherited from the executor through `Cx`.

use crate::aggregate::AggregateQuery;
use crate::related::RelatedQuery;
use asupersync::{Cx, Outcome};
use jitload_core::{Error, Row, Value};
use std::future::Future;

/// Executes the two query shapes jitload needs.
pub trait Fetcher: Send + Sync {
    /// Fetch the target rows for a grouped (or single-owner) association
    /// query.
    fn fetch_related(
        &self,
        cx: &Cx,
        query: &RelatedQuery,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Compute one grouped aggregate, returning `(group key, scalar)`
    /// pairs.
    fn fetch_aggregate(
        &self,
        cx: &Cx,
        query: &AggregateQuery,
    ) -> impl Future<Output = Outcome<Vec<(Value, Value)>, Error>> + Send;

    /// Fetch a single row of `entity`'s table by primary key (reload).
    fn fetch_by_key(
        &self,
        cx: &Cx,
        entity: &'static str,
        key: &Value,
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send;
}
