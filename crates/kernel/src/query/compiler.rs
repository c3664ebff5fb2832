//! Query compiler: drives one compilation pass over a store adapter.
//!
//! Steps run in caller order (filter → search → sort → project), then
//! `paginate` captures the pre-pagination state for the count call before
//! applying skip/take, and `execute` runs both store round-trips.

use super::adapter::StoreAdapter;
use super::context::{Diagnostics, RequestContext};
use super::filter::{AllowedFields, FilterCompiler};
use super::pagination::Pagination;
use super::params::ParameterBag;
use super::projection::parse_projection;
use super::search::{SearchField, compile_search};
use super::sort::{parse_sort, parse_sort_checked};
use super::types::{ListResponse, SortSpec};
use crate::config::CompilerConfig;
use crate::error::AdapterResult;

/// One compilation pass. Owns its adapter; nothing is shared with other
/// passes.
pub struct QueryCompiler<'a, A: StoreAdapter> {
    adapter: A,
    bag: &'a ParameterBag,
    config: &'a CompilerConfig,
    allowed: Option<&'a AllowedFields>,
    diagnostics: Diagnostics,
    count_snapshot: Option<A>,
    pagination: Option<Pagination>,
}

impl<'a, A: StoreAdapter> QueryCompiler<'a, A> {
    /// Wrap an adapter (already bound to the entity's base conditions).
    pub fn new(
        adapter: A,
        bag: &'a ParameterBag,
        config: &'a CompilerConfig,
        ctx: &RequestContext,
    ) -> Self {
        Self {
            adapter,
            bag,
            config,
            allowed: None,
            diagnostics: Diagnostics::new(ctx),
            count_snapshot: None,
            pagination: None,
        }
    }

    /// Compile filter parameters against `allowed` and merge them onto the
    /// adapter's base condition.
    pub fn filter(mut self, allowed: &'a AllowedFields) -> Self {
        self.allowed = Some(allowed);
        let clause = FilterCompiler::new(allowed, &self.config.coercion)
            .with_max_depth(self.config.max_filter_depth)
            .compile(self.bag, &mut self.diagnostics);

        if !clause.is_empty() {
            tracing::debug!(
                request_id = %self.diagnostics.request_id(),
                fields = clause.fields.len(),
                "applying filter"
            );
            self.adapter = self.adapter.and_where(clause);
        }
        self
    }

    /// Apply `search=` over the given fields. No term, no change.
    pub fn search(mut self, fields: &[SearchField]) -> Self {
        let term = self.bag.get_text("search");
        if let Some(condition) = compile_search(term.as_deref(), fields) {
            self.adapter = self.adapter.search(condition);
        }
        self
    }

    /// Apply `sort=` with the configured default ordering.
    pub fn sort(self) -> Self {
        let default = self.config.default_sort.clone();
        self.sort_with(&default)
    }

    /// Apply `sort=` with an explicit default ordering.
    pub fn sort_with(mut self, default: &SortSpec) -> Self {
        let raw = self.bag.get_text("sort");
        let spec = match self.allowed {
            Some(allowed) if self.config.validate_sort => {
                parse_sort_checked(raw.as_deref(), default, allowed, &mut self.diagnostics)
            }
            _ => parse_sort(raw.as_deref(), default),
        };
        self.adapter = self.adapter.order_by(spec);
        self
    }

    /// Apply `fields=`. Absent means whole rows.
    pub fn project(mut self) -> Self {
        let raw = self.bag.get_text("fields");
        if let Some(tree) = parse_projection(raw.as_deref(), &self.config.id_field) {
            self.adapter = self.adapter.select(tree);
        }
        self
    }

    /// Structural copy of the adapter as it stands.
    pub fn snapshot(&self) -> A {
        self.adapter.clone()
    }

    /// Snapshot the state for counting, then apply skip/take.
    pub fn paginate(mut self) -> Self {
        let pagination = Pagination::from_params(
            self.bag,
            self.config.default_limit,
            self.config.max_limit,
            &mut self.diagnostics,
        );
        self.count_snapshot = Some(self.adapter.clone());
        self.adapter = pagination.apply(self.adapter);
        self.pagination = Some(pagination);
        self
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Run count and fetch, returning the list response.
    pub async fn execute(self) -> AdapterResult<ListResponse> {
        let (response, _) = self.execute_with_diagnostics().await?;
        Ok(response)
    }

    /// Run count and fetch, also returning everything that was dropped.
    ///
    /// Paginates first if `paginate` was not called. Store errors propagate
    /// unchanged.
    pub async fn execute_with_diagnostics(self) -> AdapterResult<(ListResponse, Diagnostics)> {
        let compiler = if self.pagination.is_some() {
            self
        } else {
            self.paginate()
        };

        let QueryCompiler {
            adapter,
            count_snapshot,
            pagination,
            diagnostics,
            ..
        } = compiler;
        let pagination = pagination.unwrap_or_default();
        let counter = count_snapshot.unwrap_or_else(|| adapter.clone());

        let total = counter.count().await?;
        let data = adapter.find_many().await?;
        let meta = pagination.finalize(total);

        tracing::debug!(
            request_id = %diagnostics.request_id(),
            total,
            returned = data.len(),
            page = meta.page,
            dropped = diagnostics.len(),
            "query executed"
        );

        Ok((ListResponse::new(data, meta), diagnostics))
    }
}
