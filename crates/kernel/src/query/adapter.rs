//! Store adapter contract.
//!
//! The compiler never talks to a store directly. It accumulates conditions,
//! ordering, projection and paging on an adapter value, then asks that value
//! to `count` or `find_many`. Each builder method consumes and returns the
//! adapter, so a `clone()` is a structural snapshot that later calls cannot
//! reach.

use async_trait::async_trait;
use serde_json::Value;

use super::types::{ProjectionTree, SortSpec, WhereClause};
use crate::error::AdapterResult;

/// Everything an adapter has accumulated for one compilation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdapterState {
    pub condition: WhereClause,
    pub sort: SortSpec,
    pub projection: Option<ProjectionTree>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
}

impl AdapterState {
    /// State scoped by a base condition (e.g. a parent foreign key).
    pub fn with_condition(condition: WhereClause) -> Self {
        Self {
            condition,
            ..Default::default()
        }
    }

    /// AND a condition onto the accumulated one. Empty clauses are ignored.
    pub fn and_where(&mut self, condition: WhereClause) {
        if !condition.is_empty() {
            self.condition.and_merge(condition);
        }
    }
}

/// Capability set every backing store implements.
#[async_trait]
pub trait StoreAdapter: Clone + Send + Sync {
    /// Merge a condition onto the adapter's current (base) condition.
    fn and_where(self, condition: WhereClause) -> Self;

    /// Apply a search disjunction. Stores with a native full-text path may
    /// override this; the default treats it as another condition.
    fn search(self, condition: WhereClause) -> Self {
        self.and_where(condition)
    }

    fn order_by(self, sort: SortSpec) -> Self;

    fn select(self, projection: ProjectionTree) -> Self;

    fn skip(self, n: u64) -> Self;

    fn limit(self, n: u64) -> Self;

    /// Count rows matching the accumulated state.
    async fn count(&self) -> AdapterResult<u64>;

    /// Fetch rows matching the accumulated state.
    async fn find_many(&self) -> AdapterResult<Vec<Value>>;
}
