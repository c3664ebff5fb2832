//! Free-text search compiler.
//!
//! Turns `search=term` into an `OR` of case-insensitive substring matches
//! over caller-declared fields. Field descriptors may walk relations:
//! `category.name` (to-one) or `offerings.some.title` (to-many).

use std::str::FromStr;

use thiserror::Error;

use super::types::{
    FieldCondition, MatchMode, OperatorMap, Quantifier, RelationFilter, WhereClause,
};

/// A searchable field, possibly behind one or more relations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchField {
    /// A column on the entity itself.
    Scalar(String),
    /// A field reached through a relation.
    Related {
        relation: String,
        quantifier: Option<Quantifier>,
        field: Box<SearchField>,
    },
}

impl SearchField {
    pub fn scalar(name: impl Into<String>) -> Self {
        Self::Scalar(name.into())
    }

    /// Field behind a to-one relation.
    pub fn related(relation: impl Into<String>, field: SearchField) -> Self {
        Self::Related {
            relation: relation.into(),
            quantifier: None,
            field: Box::new(field),
        }
    }

    /// Field behind a to-many relation.
    pub fn many(relation: impl Into<String>, quantifier: Quantifier, field: SearchField) -> Self {
        Self::Related {
            relation: relation.into(),
            quantifier: Some(quantifier),
            field: Box::new(field),
        }
    }

    /// Parse a dotted descriptor. Returns `None` for empty segments.
    pub fn parse(path: &str) -> Option<Self> {
        let segments: Vec<&str> = path.split('.').map(str::trim).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return None;
        }
        parse_segments(&segments)
    }

    /// Substring condition for this field.
    pub fn condition(&self, term: &str) -> WhereClause {
        match self {
            SearchField::Scalar(name) => WhereClause::field(
                name.as_str(),
                FieldCondition::Operators(OperatorMap {
                    contains: Some(term.to_string()),
                    mode: Some(MatchMode::Insensitive),
                    ..Default::default()
                }),
            ),
            SearchField::Related {
                relation,
                quantifier,
                field,
            } => {
                let inner = field.condition(term);
                let filter = match quantifier {
                    Some(q) => RelationFilter::quantified(*q, inner),
                    None => RelationFilter::is(inner),
                };
                WhereClause::field(relation.as_str(), FieldCondition::Relation(filter))
            }
        }
    }
}

fn parse_segments(segments: &[&str]) -> Option<SearchField> {
    match segments {
        [] => None,
        [leaf] => Some(SearchField::scalar(*leaf)),
        [relation, quantifier, rest @ ..] if !rest.is_empty() => {
            match Quantifier::parse(quantifier) {
                Some(q) => Some(SearchField::many(*relation, q, parse_segments(rest)?)),
                None => Some(SearchField::related(
                    *relation,
                    parse_segments(&segments[1..])?,
                )),
            }
        }
        [relation, rest @ ..] => Some(SearchField::related(*relation, parse_segments(rest)?)),
    }
}

/// Error for descriptors that cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid search field descriptor '{0}'")]
pub struct InvalidSearchField(pub String);

impl FromStr for SearchField {
    type Err = InvalidSearchField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| InvalidSearchField(s.to_string()))
    }
}

/// Build the search disjunction. `None` when there is no usable term or
/// no declared fields.
pub fn compile_search(term: Option<&str>, fields: &[SearchField]) -> Option<WhereClause> {
    let term = term.map(str::trim).filter(|t| !t.is_empty())?;
    if fields.is_empty() {
        return None;
    }
    Some(WhereClause::any_of(
        fields.iter().map(|field| field.condition(term)).collect(),
    ))
}
