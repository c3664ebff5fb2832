//! Relational store adapter using SeaQuery.
//!
//! Renders accumulated adapter state into PostgreSQL:
//! - field conditions as column predicates on the entity table
//! - relation conditions as correlated `EXISTS` / `NOT EXISTS` subqueries
//! - case-insensitive string matches as `ILIKE` with escaped wildcards
//! - nested projections on mapped relations as `json_build_object` subselects
//!
//! Rows come back through `row_to_json`, so callers see the same JSON shape
//! the in-memory adapter produces.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sea_query::extension::postgres::PgBinOper;
use sea_query::{
    Alias, Asterisk, Cond, Condition, Expr, ExprTrait, Func, Order, PostgresQueryBuilder, Query,
    SelectStatement, SimpleExpr,
};
use serde_json::Value;
use sqlx::PgPool;

use super::adapter::{AdapterState, StoreAdapter};
use super::types::{
    FieldCondition, FilterValue, MatchMode, Negation, OperatorMap, Projection, ProjectionTree,
    RelationFilter, SortDirection, SortSpec, WhereClause,
};
use crate::error::AdapterResult;

/// How a relation field joins to its parent table.
///
/// The related row matches when `related.foreign_key = parent.local_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub table: String,
    pub local_key: String,
    pub foreign_key: String,
    /// To-many relations project as a JSON array, to-one as an object.
    pub many: bool,
}

impl Relation {
    /// To-one relation, e.g. `product.category_id = category.id`.
    pub fn one(
        table: impl Into<String>,
        local_key: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            local_key: local_key.into(),
            foreign_key: foreign_key.into(),
            many: false,
        }
    }

    /// To-many relation, e.g. `product.id = offering.product_id`.
    pub fn many(
        table: impl Into<String>,
        local_key: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            many: true,
            ..Self::one(table, local_key, foreign_key)
        }
    }
}

/// Renders adapter state into SQL for one entity table.
///
/// Relation fields are resolved through a flat map keyed by field name, at
/// any nesting depth.
#[derive(Debug, Clone)]
pub struct SqlQueryBuilder {
    table: String,
    relations: HashMap<String, Relation>,
}

impl SqlQueryBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            relations: HashMap::new(),
        }
    }

    /// Map a relation field to its table and join keys.
    pub fn with_relation(mut self, field: impl Into<String>, relation: Relation) -> Self {
        self.relations.insert(field.into(), relation);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Build the main SELECT for the accumulated state.
    pub fn build_select(&self, state: &AdapterState) -> String {
        let mut query = Query::select();

        self.add_select_fields(&mut query, state.projection.as_ref());
        query.from(Alias::new(&self.table));
        if !state.condition.is_empty() {
            query.cond_where(self.condition(&self.table, &state.condition, 0));
        }
        self.add_sorts(&mut query, &state.sort);
        add_window(&mut query, state);

        query.to_string(PostgresQueryBuilder)
    }

    /// Build a COUNT for the accumulated state.
    ///
    /// Skip/take are part of the state, so a count built from paginated
    /// state counts only the current window.
    pub fn build_count(&self, state: &AdapterState) -> String {
        let condition = (!state.condition.is_empty())
            .then(|| self.condition(&self.table, &state.condition, 0));
        let mut query = Query::select();
        query.expr(Expr::col(Asterisk).count());

        if state.skip.is_none() && state.take.is_none() {
            query.from(Alias::new(&self.table));
            if let Some(condition) = condition {
                query.cond_where(condition);
            }
        } else {
            let mut inner = Query::select();
            inner.expr(Expr::val(1));
            inner.from(Alias::new(&self.table));
            if let Some(condition) = condition {
                inner.cond_where(condition);
            }
            add_window(&mut inner, state);
            query.from_subquery(inner, Alias::new("matched"));
        }

        query.to_string(PostgresQueryBuilder)
    }

    // ---- conditions ----

    fn condition(&self, alias: &str, clause: &WhereClause, depth: usize) -> Condition {
        let mut cond = Cond::all();
        for (name, field) in &clause.fields {
            cond = cond.add(self.field_condition(alias, name, field, depth));
        }
        for nested in &clause.and {
            cond = cond.add(self.condition(alias, nested, depth));
        }
        if !clause.or.is_empty() {
            let mut any = Cond::any();
            for nested in &clause.or {
                any = any.add(self.condition(alias, nested, depth));
            }
            cond = cond.add(any);
        }
        cond
    }

    fn field_condition(
        &self,
        alias: &str,
        name: &str,
        condition: &FieldCondition,
        depth: usize,
    ) -> Condition {
        match condition {
            FieldCondition::Equals(value) => Cond::all().add(equals(column(alias, name), value)),
            FieldCondition::Operators(ops) => operators(alias, name, ops),
            FieldCondition::Relation(filter) => self.relation_condition(alias, name, filter, depth),
        }
    }

    fn relation_condition(
        &self,
        parent: &str,
        name: &str,
        filter: &RelationFilter,
        depth: usize,
    ) -> Condition {
        let Some(relation) = self.relations.get(name) else {
            tracing::error!(
                relation = name,
                "relation has no table mapping; restricting results"
            );
            // FALSE restricts rather than widens results.
            return Cond::all().add(Expr::cust("FALSE"));
        };

        let exists = |clause: &WhereClause, negate_inner: bool| {
            Expr::exists(self.related(parent, name, relation, clause, depth, negate_inner))
        };

        let mut cond = Cond::all();
        if let Some(clause) = &filter.is {
            cond = cond.add(exists(clause, false));
        }
        if let Some(clause) = &filter.some {
            cond = cond.add(exists(clause, false));
        }
        if let Some(clause) = &filter.every {
            cond = cond.add(Cond::all().not().add(exists(clause, true)));
        }
        if let Some(clause) = &filter.none {
            cond = cond.add(Cond::all().not().add(exists(clause, false)));
        }
        cond
    }

    /// Correlated subquery over a related table.
    fn related(
        &self,
        parent: &str,
        name: &str,
        relation: &Relation,
        clause: &WhereClause,
        depth: usize,
        negate_inner: bool,
    ) -> SelectStatement {
        let alias = format!("{name}_{depth}");
        let mut sub = Query::select();
        sub.expr(Expr::val(1));
        sub.from_as(Alias::new(&relation.table), Alias::new(&alias));
        sub.and_where(
            Expr::col((Alias::new(&alias), Alias::new(&relation.foreign_key)))
                .equals((Alias::new(parent), Alias::new(&relation.local_key))),
        );

        if !clause.is_empty() {
            let inner = self.condition(&alias, clause, depth + 1);
            if negate_inner {
                // NULL inner results count as failing, not as unknown.
                let guarded = Func::coalesce([SimpleExpr::from(inner), Expr::val(false).into()]);
                sub.cond_where(Cond::all().not().add(SimpleExpr::from(guarded)));
            } else {
                sub.cond_where(inner);
            }
        }
        sub
    }

    // ---- select list ----

    fn add_select_fields(&self, query: &mut SelectStatement, projection: Option<&ProjectionTree>) {
        let Some(tree) = projection.filter(|t| t.is_inclusive()) else {
            query.column((Alias::new(&self.table), Asterisk));
            return;
        };

        let mut selected = 0;
        for (name, projection) in tree.entries() {
            match projection {
                Projection::Flag(true) => {
                    query.column((Alias::new(&self.table), Alias::new(name)));
                    selected += 1;
                }
                Projection::Flag(false) => {}
                Projection::Nested { select } => {
                    if let Some(expr) = self.nested_projection(name, select) {
                        query.expr_as(Expr::cust(expr), Alias::new(name));
                        selected += 1;
                    }
                }
            }
        }

        if selected == 0 {
            tracing::warn!(
                table = %self.table,
                "projection selected no renderable fields; returning whole rows"
            );
            query.column((Alias::new(&self.table), Asterisk));
        }
    }

    /// JSON subselect for a nested projection on a mapped relation. Only
    /// `true` leaves directly under the relation are rendered.
    fn nested_projection(&self, name: &str, select: &ProjectionTree) -> Option<String> {
        let Some(relation) = self.relations.get(name) else {
            tracing::warn!(relation = name, "nested projection on unmapped relation; skipping");
            return None;
        };

        let identifiers = [
            self.table.as_str(),
            name,
            relation.table.as_str(),
            relation.local_key.as_str(),
            relation.foreign_key.as_str(),
        ];
        if !identifiers.iter().all(|id| is_safe_identifier(id)) {
            tracing::warn!(relation = name, "unsafe identifier in nested projection; skipping");
            return None;
        }

        let columns: Vec<&str> = select
            .entries()
            .filter(|(_, p)| matches!(p, Projection::Flag(true)))
            .map(|(field, _)| field.as_str())
            .filter(|field| is_safe_identifier(field))
            .collect();
        if columns.is_empty() {
            return None;
        }

        let alias = format!("{name}_sel");
        let pairs = columns
            .iter()
            .map(|c| format!("'{c}', \"{alias}\".\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let object = format!("json_build_object({pairs})");
        let from = format!(
            "FROM \"{table}\" AS \"{alias}\" WHERE \"{alias}\".\"{fk}\" = \"{parent}\".\"{lk}\"",
            table = relation.table,
            fk = relation.foreign_key,
            parent = self.table,
            lk = relation.local_key,
        );

        Some(if relation.many {
            format!("(SELECT COALESCE(json_agg({object}), '[]'::json) {from})")
        } else {
            format!("(SELECT {object} {from} LIMIT 1)")
        })
    }

    // ---- ordering ----

    fn add_sorts(&self, query: &mut SelectStatement, sort: &SortSpec) {
        for key in sort.keys() {
            if key.field.contains('.') {
                tracing::warn!(
                    field = %key.field,
                    "sorting through relations is not supported; ignoring sort key"
                );
                continue;
            }
            let order = match key.direction {
                SortDirection::Asc => Order::Asc,
                SortDirection::Desc => Order::Desc,
            };
            query.order_by((Alias::new(&self.table), Alias::new(&key.field)), order);
        }
    }
}

fn add_window(query: &mut SelectStatement, state: &AdapterState) {
    // PostgreSQL rejects LIMIT/OFFSET values above i64::MAX.
    if let Some(take) = state.take {
        query.limit(take.min(i64::MAX as u64));
    }
    if let Some(skip) = state.skip {
        query.offset(skip.min(i64::MAX as u64));
    }
}

fn column(alias: &str, name: &str) -> Expr {
    Expr::col((Alias::new(alias), Alias::new(name)))
}

fn sql_value(value: &FilterValue) -> Option<sea_query::Value> {
    match value {
        FilterValue::Boolean(b) => Some((*b).into()),
        FilterValue::Integer(i) => Some((*i).into()),
        FilterValue::Float(f) => Some((*f).into()),
        FilterValue::Date(d) => Some(d.to_rfc3339().into()),
        FilterValue::String(s) => Some(s.clone().into()),
        FilterValue::Null | FilterValue::List(_) => None,
    }
}

fn sql_values(values: &[FilterValue]) -> Vec<sea_query::Value> {
    values.iter().filter_map(sql_value).collect()
}

fn equals(col: Expr, value: &FilterValue) -> SimpleExpr {
    match value {
        FilterValue::Null => col.is_null(),
        FilterValue::List(items) => in_list(col, items),
        other => match sql_value(other) {
            Some(v) => col.eq(v),
            None => Expr::cust("FALSE"),
        },
    }
}

fn in_list(col: Expr, items: &[FilterValue]) -> SimpleExpr {
    let values = sql_values(items);
    if values.is_empty() {
        // IN () matches nothing.
        return Expr::cust("FALSE");
    }
    col.is_in(values)
}

fn compare(
    alias: &str,
    name: &str,
    value: &FilterValue,
    op: fn(Expr, sea_query::Value) -> SimpleExpr,
) -> SimpleExpr {
    match sql_value(value) {
        Some(v) => op(column(alias, name), v),
        None => Expr::cust("FALSE"),
    }
}

fn operators(alias: &str, name: &str, ops: &OperatorMap) -> Condition {
    let insensitive = ops.mode == Some(MatchMode::Insensitive);
    let mut cond = Cond::all();

    if let Some(value) = &ops.equals {
        cond = cond.add(equals(column(alias, name), value));
    }
    if let Some(value) = &ops.gt {
        cond = cond.add(compare(alias, name, value, |c, v| c.gt(v)));
    }
    if let Some(value) = &ops.gte {
        cond = cond.add(compare(alias, name, value, |c, v| c.gte(v)));
    }
    if let Some(value) = &ops.lt {
        cond = cond.add(compare(alias, name, value, |c, v| c.lt(v)));
    }
    if let Some(value) = &ops.lte {
        cond = cond.add(compare(alias, name, value, |c, v| c.lte(v)));
    }
    if let Some(items) = &ops.in_list {
        cond = cond.add(in_list(column(alias, name), items));
    }

    let patterns = [
        ops.contains.as_deref().map(|s| format!("%{}%", escape_like_wildcards(s))),
        ops.starts_with.as_deref().map(|s| format!("{}%", escape_like_wildcards(s))),
        ops.ends_with.as_deref().map(|s| format!("%{}", escape_like_wildcards(s))),
    ];
    for pattern in patterns.into_iter().flatten() {
        let col = column(alias, name);
        cond = cond.add(if insensitive {
            col.binary(PgBinOper::ILike, pattern)
        } else {
            col.like(pattern)
        });
    }

    match &ops.not {
        Some(Negation::Value(value)) => {
            cond = cond.add(Cond::all().not().add(equals(column(alias, name), value)));
        }
        Some(Negation::Operators(inner)) if !inner.is_empty() => {
            cond = cond.add(operators(alias, name, inner).not());
        }
        _ => {}
    }

    cond
}

/// Escape SQL LIKE wildcard characters (`%`, `_`, `\`) in a value.
fn escape_like_wildcards(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Identifiers spliced into raw SQL must be plain names.
fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
}

/// Adapter executing against PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgAdapter {
    pool: PgPool,
    builder: Arc<SqlQueryBuilder>,
    state: AdapterState,
}

impl PgAdapter {
    pub fn new(pool: PgPool, builder: SqlQueryBuilder) -> Self {
        Self {
            pool,
            builder: Arc::new(builder),
            state: AdapterState::default(),
        }
    }

    /// Adapter scoped by a base condition.
    pub fn with_base(pool: PgPool, builder: SqlQueryBuilder, base: WhereClause) -> Self {
        Self {
            state: AdapterState::with_condition(base),
            ..Self::new(pool, builder)
        }
    }

    pub fn state(&self) -> &AdapterState {
        &self.state
    }
}

#[async_trait]
impl StoreAdapter for PgAdapter {
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
        let sql = self.builder.build_count(&self.state);
        tracing::debug!(table = %self.builder.table, sql = %sql, "count query");

        let total: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "count query failed"))?;

        Ok(u64::try_from(total).unwrap_or(0))
    }

    async fn find_many(&self) -> AdapterResult<Vec<Value>> {
        let sql = self.builder.build_select(&self.state);
        tracing::debug!(table = %self.builder.table, sql = %sql, "select query");

        let mut rows: Vec<Value> =
            sqlx::query_scalar(&format!("SELECT row_to_json(t) FROM ({sql}) t"))
                .fetch_all(&self.pool)
                .await
                .inspect_err(|e| tracing::warn!(error = %e, "select query failed"))?;

        // Exclusion-only projections select whole rows; drop excluded keys here.
        if let Some(tree) = self.state.projection.as_ref().filter(|t| !t.is_inclusive()) {
            for row in &mut rows {
                if let Value::Object(fields) = row {
                    for name in tree.excluded() {
                        fields.remove(name);
                    }
                }
            }
        }

        Ok(rows)
    }
}
