//! Configuration loaded from environment variables.

use std::env;

use anyhow::{Context, Result};

use crate::query::{CoercionPolicy, DEFAULT_LIMIT, DEFAULT_MAX_DEPTH, SortDirection, SortSpec};

/// Defaults applied by every compilation pass.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Page size when `limit` is absent or unusable (default: 100).
    pub default_limit: u64,

    /// Cap on requested page size. None disables the cap (default).
    pub max_limit: Option<u64>,

    /// Identifier field forced into projections (default: "id").
    pub id_field: String,

    /// Ordering when `sort` is absent (default: createdAt desc).
    pub default_sort: SortSpec,

    /// Value coercion rules (declared date fields, field type registry).
    pub coercion: CoercionPolicy,

    /// Maximum operator/quantifier nesting depth (default: 4).
    pub max_filter_depth: usize,

    /// Drop sort keys outside the allowed field set (default: false).
    pub validate_sort: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: None,
            id_field: "id".to_string(),
            default_sort: SortSpec::single("createdAt", SortDirection::Desc),
            coercion: CoercionPolicy::default(),
            max_filter_depth: DEFAULT_MAX_DEPTH,
            validate_sort: false,
        }
    }
}

impl CompilerConfig {
    /// Load compiler defaults from `SIFT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let default_limit = match env::var("SIFT_DEFAULT_LIMIT") {
            Ok(raw) => raw
                .parse()
                .context("SIFT_DEFAULT_LIMIT must be a valid u64")?,
            Err(_) => defaults.default_limit,
        };
        if default_limit == 0 {
            anyhow::bail!("SIFT_DEFAULT_LIMIT must be at least 1");
        }

        let max_limit = env::var("SIFT_MAX_LIMIT")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<u64>())
            .transpose()
            .context("SIFT_MAX_LIMIT must be a valid u64")?;

        let id_field = env::var("SIFT_ID_FIELD").unwrap_or(defaults.id_field);

        let default_sort = match env::var("SIFT_DEFAULT_SORT") {
            Ok(raw) => match raw.parse::<SortSpec>() {
                Ok(spec) if !spec.is_empty() => spec,
                _ => anyhow::bail!("SIFT_DEFAULT_SORT must name at least one field"),
            },
            Err(_) => defaults.default_sort,
        };

        let date_fields: Vec<String> = env::var("SIFT_DATE_FIELDS")
            .map(|s| {
                s.split(',')
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let max_filter_depth = env::var("SIFT_MAX_FILTER_DEPTH")
            .unwrap_or_else(|_| DEFAULT_MAX_DEPTH.to_string())
            .parse()
            .context("SIFT_MAX_FILTER_DEPTH must be a valid usize")?;

        let validate_sort = env::var("SIFT_VALIDATE_SORT")
            .map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            default_limit,
            max_limit,
            id_field,
            default_sort,
            coercion: CoercionPolicy::new().with_date_fields(date_fields),
            max_filter_depth,
            validate_sort,
        })
    }
}

/// Binary configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Compiler defaults.
    pub compiler: CompilerConfig,

    /// PostgreSQL connection URL. When None, only in-memory rows can be queried.
    pub database_url: Option<String>,

    /// Maximum database connections in pool (default: 5).
    pub database_max_connections: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let compiler = CompilerConfig::from_env().context("invalid compiler configuration")?;

        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        Ok(Self {
            compiler,
            database_url,
            database_max_connections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SortKey;

    #[test]
    fn compiler_defaults() {
        let config = CompilerConfig::default();
        assert_eq!(config.default_limit, 100);
        assert_eq!(config.max_limit, None);
        assert_eq!(config.id_field, "id");
        assert_eq!(config.default_sort.keys(), &[SortKey::desc("createdAt")]);
        assert_eq!(config.max_filter_depth, 4);
        assert!(!config.validate_sort);
    }
}
