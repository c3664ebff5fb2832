//! In-memory store adapter.
//!
//! Evaluates the accumulated state against a shared vector of JSON rows.
//! Used by the CLI and throughout the tests; it implements every part of the
//! condition tree, including relation quantifiers over nested objects and
//! arrays.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::adapter::{AdapterState, StoreAdapter};
use super::coerce::parse_date;
use super::types::{
    FieldCondition, FilterValue, MatchMode, Negation, OperatorMap, Projection, ProjectionTree,
    RelationFilter, SortDirection, SortSpec, WhereClause,
};
use crate::error::AdapterResult;

/// Adapter over rows held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAdapter {
    rows: Arc<Vec<Value>>,
    state: AdapterState,
}

impl InMemoryAdapter {
    pub fn new(rows: Vec<Value>) -> Self {
        Self::from_shared(Arc::new(rows))
    }

    /// Share one row set between many adapters (one per request).
    pub fn from_shared(rows: Arc<Vec<Value>>) -> Self {
        Self {
            rows,
            state: AdapterState::default(),
        }
    }

    /// Adapter scoped by a base condition that compiled filters cannot
    /// replace.
    pub fn with_base(rows: Vec<Value>, base: WhereClause) -> Self {
        Self {
            rows: Arc::new(rows),
            state: AdapterState::with_condition(base),
        }
    }

    pub fn state(&self) -> &AdapterState {
        &self.state
    }

    /// Matching rows in order, with skip/take applied.
    fn window(&self) -> Vec<&Value> {
        let mut matched: Vec<&Value> = self
            .rows
            .iter()
            .filter(|row| matches_clause(row, &self.state.condition))
            .collect();

        sort_rows(&mut matched, &self.state.sort);

        let skip = usize::try_from(self.state.skip.unwrap_or(0)).unwrap_or(usize::MAX);
        let take = self
            .state
            .take
            .map_or(usize::MAX, |t| usize::try_from(t).unwrap_or(usize::MAX));

        matched.into_iter().skip(skip).take(take).collect()
    }
}

#[async_trait]
impl StoreAdapter for InMemoryAdapter {
    fn and_where(mut self, condition: WhereClause) -> Self {
        self.state.and_where(condition);
        self
    }

    fn order_by(mut self, sort: SortSpec) -> Self {
        self.state.sort = sort;
        self
    }

    fn select(mut self, projection: ProjectionTree) -> Self {
        self.state.projection = Some(projection);
        self
    }

    fn skip(mut self, n: u64) -> Self {
        self.state.skip = Some(n);
        self
    }

    fn limit(mut self, n: u64) -> Self {
        self.state.take = Some(n);
        self
    }

    async fn count(&self) -> AdapterResult<u64> {
        Ok(self.window().len() as u64)
    }

    async fn find_many(&self) -> AdapterResult<Vec<Value>> {
        let rows = self.window();
        Ok(match &self.state.projection {
            Some(tree) => rows.into_iter().map(|row| project(row, tree)).collect(),
            None => rows.into_iter().cloned().collect(),
        })
    }
}

// ---- conditions ----

fn matches_clause(row: &Value, clause: &WhereClause) -> bool {
    clause
        .fields
        .iter()
        .all(|(name, condition)| matches_field(row.get(name), condition))
        && clause.and.iter().all(|c| matches_clause(row, c))
        && (clause.or.is_empty() || clause.or.iter().any(|c| matches_clause(row, c)))
}

fn matches_field(value: Option<&Value>, condition: &FieldCondition) -> bool {
    match condition {
        FieldCondition::Equals(expected) => value_equals(value, expected),
        FieldCondition::Operators(ops) => matches_operators(value, ops),
        FieldCondition::Relation(relation) => matches_relation(value, relation),
    }
}

fn matches_operators(value: Option<&Value>, ops: &OperatorMap) -> bool {
    let insensitive = ops.mode == Some(MatchMode::Insensitive);
    let ordered = |expected: &Option<FilterValue>, accept: fn(Ordering) -> bool| {
        expected
            .as_ref()
            .is_none_or(|e| compare_value(value, e).is_some_and(accept))
    };

    ops.equals.as_ref().is_none_or(|e| value_equals(value, e))
        && ordered(&ops.gt, Ordering::is_gt)
        && ordered(&ops.gte, Ordering::is_ge)
        && ordered(&ops.lt, Ordering::is_lt)
        && ordered(&ops.lte, Ordering::is_le)
        && ops
            .in_list
            .as_ref()
            .is_none_or(|list| list.iter().any(|e| value_equals(value, e)))
        && text_match(value, ops.contains.as_deref(), insensitive, |h, n| h.contains(n))
        && text_match(value, ops.starts_with.as_deref(), insensitive, |h, n| {
            h.starts_with(n)
        })
        && text_match(value, ops.ends_with.as_deref(), insensitive, |h, n| h.ends_with(n))
        && ops.not.as_ref().is_none_or(|negation| match negation {
            Negation::Value(e) => !value_equals(value, e),
            Negation::Operators(inner) => !matches_operators(value, inner),
        })
}

fn text_match(
    value: Option<&Value>,
    needle: Option<&str>,
    insensitive: bool,
    test: fn(&str, &str) -> bool,
) -> bool {
    let Some(needle) = needle else {
        return true;
    };
    let Some(haystack) = value.and_then(Value::as_str) else {
        return false;
    };
    if insensitive {
        test(&haystack.to_lowercase(), &needle.to_lowercase())
    } else {
        test(haystack, needle)
    }
}

fn matches_relation(value: Option<&Value>, relation: &RelationFilter) -> bool {
    let related: &[Value] = match value {
        Some(Value::Array(items)) => items,
        Some(other @ Value::Object(_)) => std::slice::from_ref(other),
        _ => &[],
    };

    relation.is.as_ref().is_none_or(|clause| {
        matches!(value, Some(Value::Object(_))) && related.iter().any(|r| matches_clause(r, clause))
    }) && relation
        .some
        .as_ref()
        .is_none_or(|clause| related.iter().any(|r| matches_clause(r, clause)))
        && relation
            .every
            .as_ref()
            .is_none_or(|clause| related.iter().all(|r| matches_clause(r, clause)))
        && relation
            .none
            .as_ref()
            .is_none_or(|clause| !related.iter().any(|r| matches_clause(r, clause)))
}

fn value_equals(value: Option<&Value>, expected: &FilterValue) -> bool {
    match (value, expected) {
        (None | Some(Value::Null), FilterValue::Null) => true,
        (Some(Value::Bool(a)), FilterValue::Boolean(b)) => a == b,
        (Some(Value::String(a)), FilterValue::String(b)) => a == b,
        (Some(Value::Array(items)), FilterValue::List(list)) => {
            items.len() == list.len()
                && items
                    .iter()
                    .zip(list)
                    .all(|(item, e)| value_equals(Some(item), e))
        }
        _ => compare_value(value, expected) == Some(Ordering::Equal),
    }
}

/// Order a stored value against a filter value. `None` when the two are
/// not comparable.
fn compare_value(value: Option<&Value>, expected: &FilterValue) -> Option<Ordering> {
    match (value?, expected) {
        (Value::Number(n), FilterValue::Integer(_) | FilterValue::Float(_)) => {
            n.as_f64()?.partial_cmp(&expected.as_f64()?)
        }
        (Value::String(s), FilterValue::Date(d)) => Some(parse_date(s)?.cmp(d)),
        (Value::String(s), FilterValue::String(e)) => Some(s.as_str().cmp(e.as_str())),
        (Value::Bool(b), FilterValue::Boolean(e)) => Some(b.cmp(e)),
        _ => None,
    }
}

// ---- ordering ----

fn sort_rows(rows: &mut [&Value], sort: &SortSpec) {
    if sort.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for key in sort.keys() {
            let ordering = compare_json(lookup(a, &key.field), lookup(b, &key.field));
            let ordering = match key.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Resolve a dotted path through nested objects.
fn lookup<'v>(row: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(row, |current, segment| current.get(segment))
}

/// Total order over JSON values: missing/null, then booleans, numbers,
/// strings. Other shapes compare equal.
fn compare_json(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

// ---- projection ----

fn project(row: &Value, tree: &ProjectionTree) -> Value {
    let Value::Object(fields) = row else {
        return row.clone();
    };

    if !tree.is_inclusive() {
        let mut out = fields.clone();
        for name in tree.excluded() {
            out.remove(name);
        }
        return Value::Object(out);
    }

    let mut out = Map::new();
    for (name, projection) in tree.entries() {
        let Some(value) = fields.get(name) else {
            continue;
        };
        match projection {
            Projection::Flag(true) => {
                out.insert(name.clone(), value.clone());
            }
            Projection::Flag(false) => {}
            Projection::Nested { select } => {
                let nested = match value {
                    Value::Array(items) => {
                        Value::Array(items.iter().map(|item| project(item, select)).collect())
                    }
                    other => project(other, select),
                };
                out.insert(name.clone(), nested);
            }
        }
    }
    Value::Object(out)
}
