//! Paginator: `page` / `limit` → skip/take, then paging metadata.

use super::adapter::StoreAdapter;
use super::context::{DiagnosticKind, Diagnostics};
use super::params::ParameterBag;
use super::types::PageMeta;

/// Default page size when `limit` is absent or unusable.
pub const DEFAULT_LIMIT: u64 = 100;

/// Largest skip handed to a store (`i64::MAX`).
const MAX_SKIP: u64 = i64::MAX as u64;

/// Resolved page/limit pair for one compilation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    page: u64,
    limit: u64,
}

impl Pagination {
    /// Build from already-validated values. Zero is raised to one.
    pub fn new(page: u64, limit: u64) -> Self {
        Self {
            page: page.max(1),
            limit: limit.max(1),
        }
    }

    /// Read `page` and `limit` from the bag.
    ///
    /// Absent values take the defaults. Non-numeric or sub-1 values also take
    /// the defaults and leave a diagnostic. With `max_limit` set, larger
    /// limits are capped.
    pub fn from_params(
        bag: &ParameterBag,
        default_limit: u64,
        max_limit: Option<u64>,
        diagnostics: &mut Diagnostics,
    ) -> Self {
        let page = read_positive(bag, "page", 1, diagnostics);
        let mut limit = read_positive(bag, "limit", default_limit.max(1), diagnostics);

        if let Some(max) = max_limit
            && limit > max
        {
            tracing::warn!(
                request_id = %diagnostics.request_id(),
                requested = limit,
                capped = max,
                "limit exceeds maximum, capping"
            );
            limit = max.max(1);
        }

        Self { page, limit }
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Rows to skip: `(page - 1) * limit`, capped at the largest offset
    /// PostgreSQL accepts.
    pub fn skip(&self) -> u64 {
        (self.page - 1).saturating_mul(self.limit).min(MAX_SKIP)
    }

    /// Rows to take.
    pub fn take(&self) -> u64 {
        self.limit
    }

    /// Apply skip/take to an adapter.
    pub fn apply<A: StoreAdapter>(&self, adapter: A) -> A {
        adapter.skip(self.skip()).limit(self.take())
    }

    /// Paging metadata once the total is known.
    pub fn finalize(&self, total: u64) -> PageMeta {
        PageMeta::new(total, self.page, self.limit)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, DEFAULT_LIMIT)
    }
}

fn read_positive(bag: &ParameterBag, key: &str, default: u64, diagnostics: &mut Diagnostics) -> u64 {
    let Some(raw) = bag.get_text(key) else {
        return default;
    };
    match raw.trim().parse::<i64>() {
        Ok(n) if n >= 1 => n as u64,
        Ok(n) => {
            diagnostics.push(
                DiagnosticKind::InvalidPagination,
                key,
                format!("{n} is below 1, using {default}"),
            );
            default
        }
        Err(_) => {
            diagnostics.push(
                DiagnosticKind::InvalidPagination,
                key,
                format!("'{raw}' is not a number, using {default}"),
            );
            default
        }
    }
}
