//! Grouped aggregate requests.

use crate::conditions::ConditionSet;
use jitload_core::Value;
use serde::Serialize;

/// A grouped aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AggregateFn {
    /// Row count
    Count,
    /// Sum of a field
    Sum,
    /// Average of a field
    Avg,
    /// Minimum of a field
    Min,
    /// Maximum of a field
    Max,
}

impl AggregateFn {
    /// The SQL function name.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            AggregateFn::Count => "COUNT",
            AggregateFn::Sum => "SUM",
            AggregateFn::Avg => "AVG",
            AggregateFn::Min => "MIN",
            AggregateFn::Max => "MAX",
        }
    }

    /// A lowercase name for cache keys and event labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            AggregateFn::Count => "count",
            AggregateFn::Sum => "sum",
            AggregateFn::Avg => "avg",
            AggregateFn::Min => "min",
            AggregateFn::Max => "max",
        }
    }
}

/// A request to compute one grouped aggregate over an association for a
/// slice of owner keys.
///
/// The executor is expected to evaluate
/// `function(field) ... GROUP BY table_reference.group_column` over the
/// target entity (joining `through` when present) restricted to
/// `group_column IN keys` and `conditions`, and return
/// `(group key, scalar)` pairs.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateQuery {
    /// Owner entity the aggregate was declared on.
    pub owner: &'static str,

    /// Name of the aggregated association on the owner.
    pub association: &'static str,

    /// Target entity of the terminal association.
    pub entity: &'static str,

    /// Resolved table reference: a custom alias when the association's
    /// scope introduces one, otherwise the grouping table itself.
    pub table_reference: &'static str,

    /// The aggregate function.
    pub function: AggregateFn,

    /// The aggregated field (`"*"` for bare counts).
    pub field: &'static str,

    /// Foreign key column the results are grouped by.
    pub group_column: &'static str,

    /// Owner key values for this slice.
    pub keys: Vec<Value>,

    /// Filters: caller conditions plus STI / polymorphic type conditions.
    pub conditions: ConditionSet,

    /// Intermediate association joined between owner and target, if any.
    pub through: Option<&'static str>,
}

/// Split owner keys into slices of at most `max` keys.
///
/// `None` means unbounded: one slice with everything. No keys means no
/// slices, and therefore no queries.
#[must_use]
pub fn slices(keys: &[Value], max: Option<usize>) -> Vec<Vec<Value>> {
    if keys.is_empty() {
        return Vec::new();
    }
    match max {
        Some(max) if max > 0 => keys.chunks(max).map(<[Value]>::to_vec).collect(),
        _ => vec![keys.to_vec()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_fn_sql_names() {
        assert_eq!(AggregateFn::Count.as_sql(), "COUNT");
        assert_eq!(AggregateFn::Max.name(), "max");
    }

    #[test]
    fn test_slices_unbounded() {
        let keys = vec![Value::BigInt(1), Value::BigInt(2), Value::BigInt(3)];
        assert_eq!(slices(&keys, None), vec![keys.clone()]);
    }

    #[test]
    fn test_slices_bounded() {
        let keys: Vec<Value> = (1..=5).map(Value::BigInt).collect();
        let chunks = slices(&keys, Some(2));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 2);
        assert_eq!(chunks[2].len(), 1);
    }

    #[test]
    fn test_slices_empty_means_no_queries() {
        assert!(slices(&[], Some(2)).is_empty());
        assert!(slices(&[], None).is_empty());
    }
}
