//! Query-feature compiler.
//!
//! This module provides:
//! - ParameterBag: raw request parameters (JSON or URL query string)
//! - FilterCompiler / compile_search / parse_sort / parse_projection /
//!   Pagination: the individual compile steps
//! - QueryCompiler: drives a full pass over a StoreAdapter
//! - InMemoryAdapter, PgAdapter: StoreAdapter implementations
//! - Types: WhereClause, SortSpec, ProjectionTree, ListResponse, etc.

mod adapter;
mod coerce;
mod compiler;
mod context;
mod filter;
mod memory;
mod pagination;
mod params;
mod projection;
mod search;
mod sort;
mod sql;
pub mod types;

pub use adapter::{AdapterState, StoreAdapter};
pub use coerce::{CoercionPolicy, FieldType, parse_date};
pub use compiler::QueryCompiler;
pub use context::{Diagnostic, DiagnosticKind, Diagnostics, RequestContext};
pub use filter::{AllowedFields, DEFAULT_MAX_DEPTH, FilterCompiler};
pub use memory::InMemoryAdapter;
pub use pagination::{DEFAULT_LIMIT, Pagination};
pub use params::{ParameterBag, RESERVED_KEYS};
pub use projection::parse_projection;
pub use search::{InvalidSearchField, SearchField, compile_search};
pub use sort::{parse_sort, parse_sort_checked};
pub use sql::{PgAdapter, Relation, SqlQueryBuilder};
pub use types::{
    FieldCondition, FilterValue, ListResponse, MatchMode, Negation, Operator, OperatorMap,
    PageMeta, Projection, ProjectionTree, Quantifier, RelationFilter, SortDirection, SortKey,
    SortSpec, WhereClause,
};
