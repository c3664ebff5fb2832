//! Per-request context and compile diagnostics.
//!
//! Everything the compiler drops (unknown fields, unknown operators, bad
//! values) is recorded here and logged with the request's correlation id.
//! The id travels explicitly with the context; nothing is read from global
//! state.

use serde::Serialize;
use uuid::Uuid;

/// Context for one compilation pass.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id attached to every diagnostic.
    pub request_id: Uuid,
    /// Entity being listed, for log context only.
    pub entity: Option<String>,
}

impl RequestContext {
    /// Create a context with a fresh request id.
    pub fn new() -> Self {
        Self {
            request_id: Uuid::now_v7(),
            entity: None,
        }
    }

    /// Create a context for an existing request id (e.g. from a header).
    pub fn with_request_id(request_id: Uuid) -> Self {
        Self {
            request_id,
            entity: None,
        }
    }

    /// Tag the context with the entity being listed.
    pub fn for_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Kind of fragment that was dropped during compilation.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Parameter key not in the allowed field set.
    UnknownField,
    /// Operator key not recognized.
    UnknownOperator,
    /// Value has the wrong shape for its operator.
    InvalidValue,
    /// `page` or `limit` could not be used.
    InvalidPagination,
    /// Nested filter exceeded the configured depth.
    DepthExceeded,
}

/// A dropped fragment.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Parameter key (or dotted path) the fragment came from.
    pub key: String,
    pub detail: String,
}

/// Diagnostic sink for one compilation pass.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    request_id: Uuid,
    entity: Option<String>,
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new(ctx: &RequestContext) -> Self {
        Self {
            request_id: ctx.request_id,
            entity: ctx.entity.clone(),
            entries: Vec::new(),
        }
    }

    /// Record and log a dropped fragment.
    pub fn push(&mut self, kind: DiagnosticKind, key: impl Into<String>, detail: impl Into<String>) {
        let diagnostic = Diagnostic {
            kind,
            key: key.into(),
            detail: detail.into(),
        };
        let entity = self.entity.as_deref().unwrap_or("-");

        match kind {
            DiagnosticKind::UnknownField | DiagnosticKind::DepthExceeded => {
                tracing::warn!(
                    request_id = %self.request_id,
                    entity,
                    key = %diagnostic.key,
                    kind = ?kind,
                    "dropping query parameter: {}",
                    diagnostic.detail
                );
            }
            _ => {
                tracing::debug!(
                    request_id = %self.request_id,
                    entity,
                    key = %diagnostic.key,
                    kind = ?kind,
                    "dropping query parameter: {}",
                    diagnostic.detail
                );
            }
        }

        self.entries.push(diagnostic);
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether any entry of the given kind was recorded.
    pub fn contains(&self, kind: DiagnosticKind) -> bool {
        self.entries.iter().any(|d| d.kind == kind)
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.entries
    }
}
