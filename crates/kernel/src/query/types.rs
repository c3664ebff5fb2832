//! Query compiler types.
//!
//! Provides the structured output of a compilation pass:
//! - WhereClause / FieldCondition: filter condition tree
//! - SortSpec: ordered sort keys
//! - ProjectionTree: nested field inclusion/exclusion
//! - ListResponse: the `{ data, meta }` envelope handed back to callers

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// A coerced filter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// JSON null.
    Null,
    /// Boolean value.
    Boolean(bool),
    /// Integer value.
    Integer(i64),
    /// Float value.
    Float(f64),
    /// Calendar date or timestamp (UTC).
    Date(DateTime<Utc>),
    /// String value, passed through unchanged.
    String(String),
    /// List of values (for `in`).
    List(Vec<FilterValue>),
}

impl FilterValue {
    /// Borrow the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FilterValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to f64 for numeric comparison.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FilterValue::Integer(i) => Some(*i as f64),
            FilterValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Convert to text, used by the string-match operators.
    pub fn as_text(&self) -> Option<String> {
        match self {
            FilterValue::String(s) => Some(s.clone()),
            FilterValue::Integer(i) => Some(i.to_string()),
            FilterValue::Float(f) => Some(f.to_string()),
            FilterValue::Boolean(b) => Some(b.to_string()),
            FilterValue::Date(d) => Some(d.to_rfc3339()),
            FilterValue::Null | FilterValue::List(_) => None,
        }
    }

    /// Short type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            FilterValue::Null => "null",
            FilterValue::Boolean(_) => "boolean",
            FilterValue::Integer(_) => "integer",
            FilterValue::Float(_) => "float",
            FilterValue::Date(_) => "date",
            FilterValue::String(_) => "string",
            FilterValue::List(_) => "list",
        }
    }
}

/// Comparison and string-match operators accepted in an operator map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Contains,
    StartsWith,
    EndsWith,
    Equals,
    Not,
}

impl Operator {
    /// Parse an operator key as it appears in the parameter bag.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            "in" => Some(Self::In),
            "contains" => Some(Self::Contains),
            "startsWith" => Some(Self::StartsWith),
            "endsWith" => Some(Self::EndsWith),
            "equals" => Some(Self::Equals),
            "not" => Some(Self::Not),
            _ => None,
        }
    }

    /// Wire name of the operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
            Self::Contains => "contains",
            Self::StartsWith => "startsWith",
            Self::EndsWith => "endsWith",
            Self::Equals => "equals",
            Self::Not => "not",
        }
    }

    /// Whether this is a substring-style match (always case-insensitive).
    pub fn is_string_match(&self) -> bool {
        matches!(self, Self::Contains | Self::StartsWith | Self::EndsWith)
    }
}

/// String comparison mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Default,
    Insensitive,
}

/// Negated condition: either a plain value or a nested operator map.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Negation {
    Value(FilterValue),
    Operators(Box<OperatorMap>),
}

/// Operator map for a single field.
///
/// Serializes with only the operators that are set, e.g.
/// `{"gte": 10, "lte": 20.5}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorMap {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equals: Option<FilterValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gt: Option<FilterValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gte: Option<FilterValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lt: Option<FilterValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lte: Option<FilterValue>,
    #[serde(rename = "in", skip_serializing_if = "Option::is_none")]
    pub in_list: Option<Vec<FilterValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starts_with: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_with: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not: Option<Negation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<MatchMode>,
}

impl OperatorMap {
    /// True when no operator is set. `mode` alone does not count.
    pub fn is_empty(&self) -> bool {
        self.equals.is_none()
            && self.gt.is_none()
            && self.gte.is_none()
            && self.lt.is_none()
            && self.lte.is_none()
            && self.in_list.is_none()
            && self.contains.is_none()
            && self.starts_with.is_none()
            && self.ends_with.is_none()
            && self.not.is_none()
    }

    /// Whether both maps set the same operator (or disagree on `mode`), so
    /// merging would drop a constraint.
    pub fn overlaps(&self, other: &OperatorMap) -> bool {
        macro_rules! both {
            ($($field:ident),*) => {
                false $(|| (self.$field.is_some() && other.$field.is_some()))*
            };
        }
        both!(equals, gt, gte, lt, lte, in_list, contains, starts_with, ends_with, not)
            || matches!((self.mode, other.mode), (Some(a), Some(b)) if a != b)
    }

    /// Merge another operator map into this one. Operators set on `other` win;
    /// check `overlaps` first to keep both.
    pub fn merge(&mut self, other: OperatorMap) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() {
                    self.$field = other.$field;
                })*
            };
        }
        take!(
            equals,
            gt,
            gte,
            lt,
            lte,
            in_list,
            contains,
            starts_with,
            ends_with,
            not,
            mode
        );
    }
}

/// Relation quantifier scoping a nested condition to a related collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantifier {
    Some,
    Every,
    None,
}

impl Quantifier {
    /// Parse a quantifier key.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "some" => Some(Self::Some),
            "every" => Some(Self::Every),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    /// Wire name of the quantifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Some => "some",
            Self::Every => "every",
            Self::None => "none",
        }
    }
}

/// Condition on a related record or collection.
///
/// `is` scopes a to-one relation (produced by dotted keys like
/// `category.name`); the quantifiers scope to-many relations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RelationFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is: Option<WhereClause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub some: Option<WhereClause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub every: Option<WhereClause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub none: Option<WhereClause>,
}

impl RelationFilter {
    /// Build a filter holding a single quantified clause.
    pub fn quantified(quantifier: Quantifier, clause: WhereClause) -> Self {
        let mut filter = Self::default();
        filter.set(quantifier, clause);
        filter
    }

    /// Build a to-one filter.
    pub fn is(clause: WhereClause) -> Self {
        Self {
            is: Some(clause),
            ..Default::default()
        }
    }

    /// Set (or merge into) the clause under a quantifier.
    pub fn set(&mut self, quantifier: Quantifier, clause: WhereClause) {
        let slot = match quantifier {
            Quantifier::Some => &mut self.some,
            Quantifier::Every => &mut self.every,
            Quantifier::None => &mut self.none,
        };
        merge_slot(slot, clause);
    }

    /// Clause under a quantifier, if set.
    pub fn get(&self, quantifier: Quantifier) -> Option<&WhereClause> {
        match quantifier {
            Quantifier::Some => self.some.as_ref(),
            Quantifier::Every => self.every.as_ref(),
            Quantifier::None => self.none.as_ref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.is.is_none() && self.some.is_none() && self.every.is_none() && self.none.is_none()
    }

    /// Merge another relation filter into this one, clause by clause.
    pub fn merge(&mut self, other: RelationFilter) {
        let RelationFilter {
            is,
            some,
            every,
            none,
        } = other;
        if let Some(clause) = is {
            merge_slot(&mut self.is, clause);
        }
        for (quantifier, clause) in [
            (Quantifier::Some, some),
            (Quantifier::Every, every),
            (Quantifier::None, none),
        ] {
            if let Some(clause) = clause {
                self.set(quantifier, clause);
            }
        }
    }
}

fn merge_slot(slot: &mut Option<WhereClause>, clause: WhereClause) {
    match slot {
        Some(existing) => existing.and_merge(clause),
        None => *slot = Some(clause),
    }
}

/// Condition attached to a single field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldCondition {
    /// Plain equality.
    Equals(FilterValue),
    /// Operator map (`gt`, `contains`, ...).
    Operators(OperatorMap),
    /// Relation condition (`is`, `some`, `every`, `none`).
    Relation(RelationFilter),
}

impl FieldCondition {
    /// Combine two conditions on the same field.
    ///
    /// Returns the combined condition, or `Err(other)` when the two cannot
    /// be expressed as one condition and must be AND-ed instead.
    pub fn combine(self, other: FieldCondition) -> Result<FieldCondition, FieldCondition> {
        match (self, other) {
            (FieldCondition::Operators(mut a), FieldCondition::Operators(b)) => {
                if a.overlaps(&b) {
                    return Err(FieldCondition::Operators(b));
                }
                a.merge(b);
                Ok(FieldCondition::Operators(a))
            }
            (FieldCondition::Equals(value), FieldCondition::Operators(mut ops))
            | (FieldCondition::Operators(mut ops), FieldCondition::Equals(value))
                if ops.equals.is_none() =>
            {
                ops.equals = Some(value);
                Ok(FieldCondition::Operators(ops))
            }
            (FieldCondition::Relation(mut a), FieldCondition::Relation(b)) => {
                a.merge(b);
                Ok(FieldCondition::Relation(a))
            }
            (_, other) => Err(other),
        }
    }
}

/// Filter condition tree.
///
/// Serializes Prisma-style: field conditions at the top level, plus `AND` /
/// `OR` lists when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WhereClause {
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldCondition>,
    #[serde(rename = "AND", skip_serializing_if = "Vec::is_empty")]
    pub and: Vec<WhereClause>,
    #[serde(rename = "OR", skip_serializing_if = "Vec::is_empty")]
    pub or: Vec<WhereClause>,
}

impl WhereClause {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clause with a single field condition.
    pub fn field(name: impl Into<String>, condition: FieldCondition) -> Self {
        let mut clause = Self::default();
        clause.fields.insert(name.into(), condition);
        clause
    }

    /// Disjunction of clauses.
    pub fn any_of(clauses: Vec<WhereClause>) -> Self {
        Self {
            or: clauses,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.and.is_empty() && self.or.is_empty()
    }

    /// Insert a field condition, combining with an existing condition on the
    /// same field where possible.
    pub fn insert(&mut self, name: impl Into<String>, condition: FieldCondition) {
        let name = name.into();
        match self.fields.remove(&name) {
            None => {
                self.fields.insert(name, condition);
            }
            Some(existing) => match existing.clone().combine(condition) {
                Ok(combined) => {
                    self.fields.insert(name, combined);
                }
                Err(other) => {
                    self.fields.insert(name.clone(), existing);
                    self.and.push(WhereClause::field(name, other));
                }
            },
        }
    }

    /// Merge `other` onto this clause without replacing anything already set.
    ///
    /// Fields this clause already constrains are AND-ed rather than
    /// overwritten, so base conditions (e.g. a foreign-key scope) survive.
    pub fn and_merge(&mut self, other: WhereClause) {
        for (name, condition) in other.fields {
            if self.fields.contains_key(&name) {
                self.and.push(WhereClause::field(name, condition));
            } else {
                self.fields.insert(name, condition);
            }
        }
        self.and.extend(other.and);
        if !other.or.is_empty() {
            if self.or.is_empty() {
                self.or = other.or;
            } else {
                self.and.push(WhereClause::any_of(other.or));
            }
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One sort key. Serializes as `{"field": "asc"}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

impl Serialize for SortKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.field, &self.direction)?;
        map.end()
    }
}

/// Ordered list of sort keys, primary first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SortSpec {
    keys: Vec<SortKey>,
}

impl SortSpec {
    pub fn new(keys: Vec<SortKey>) -> Self {
        Self { keys }
    }

    /// A single-key ordering.
    pub fn single(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            keys: vec![SortKey {
                field: field.into(),
                direction,
            }],
        }
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn push(&mut self, key: SortKey) {
        self.keys.push(key);
    }
}

impl FromStr for SortSpec {
    type Err = Infallible;

    /// Parse `"-createdAt,name"` style input. Empty segments are ignored.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let keys = raw
            .split(',')
            .filter_map(|segment| {
                let segment = segment.trim();
                let (field, direction) = match segment.strip_prefix('-') {
                    Some(rest) => (rest.trim(), SortDirection::Desc),
                    None => (segment, SortDirection::Asc),
                };
                (!field.is_empty()).then(|| SortKey {
                    field: field.to_string(),
                    direction,
                })
            })
            .collect();
        Ok(Self { keys })
    }
}

/// Projection of a single field: a flag, or a nested selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Projection {
    Flag(bool),
    Nested { select: ProjectionTree },
}

/// Nested inclusion/exclusion tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ProjectionTree {
    entries: BTreeMap<String, Projection>,
    /// Identifier added by default rather than requested.
    #[serde(skip)]
    implied: Option<String>,
}

impl ProjectionTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Projection> {
        self.entries.get(field)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &Projection)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Set a leaf flag at the top level.
    pub fn set(&mut self, field: impl Into<String>, include: bool) {
        self.entries.insert(field.into(), Projection::Flag(include));
    }

    /// Include `field` because nothing else was selected. It is serialized
    /// like any other entry but does not make the tree a selection.
    pub fn include_by_default(&mut self, field: impl Into<String>) {
        let field = field.into();
        self.entries.insert(field.clone(), Projection::Flag(true));
        self.implied = Some(field);
    }

    /// Set a flag at a dotted path, creating nested selections as needed.
    /// A later path that turns a leaf into a branch (or back) wins.
    pub fn insert_path(&mut self, segments: &[&str], include: bool) {
        match segments {
            [] => {}
            [leaf] => self.set(*leaf, include),
            [head, rest @ ..] => {
                let entry = self
                    .entries
                    .entry((*head).to_string())
                    .or_insert_with(|| Projection::Nested {
                        select: ProjectionTree::default(),
                    });
                if let Projection::Flag(_) = entry {
                    *entry = Projection::Nested {
                        select: ProjectionTree::default(),
                    };
                }
                if let Projection::Nested { select } = entry {
                    select.insert_path(rest, include);
                }
            }
        }
    }

    /// Whether any top-level field is explicitly `true`.
    pub fn has_included_leaf(&self) -> bool {
        self.entries
            .values()
            .any(|p| matches!(p, Projection::Flag(true)))
    }

    /// Whether the tree selects fields (any requested `true` leaf or nested
    /// selection), as opposed to only excluding them. A default identifier
    /// alone does not count.
    pub fn is_inclusive(&self) -> bool {
        self.entries.iter().any(|(name, p)| {
            self.implied.as_deref() != Some(name.as_str()) && !matches!(p, Projection::Flag(false))
        })
    }

    /// Fields explicitly excluded at this level.
    pub fn excluded(&self) -> impl Iterator<Item = &String> {
        self.entries
            .iter()
            .filter(|(_, p)| matches!(p, Projection::Flag(false)))
            .map(|(name, _)| name)
    }
}

/// Pagination metadata for the list response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl PageMeta {
    /// Compute paging metadata once the total is known.
    pub fn new(total: u64, page: u64, limit: u64) -> Self {
        let total_pages = if limit > 0 { total.div_ceil(limit) } else { 1 };

        Self {
            total,
            page,
            limit,
            total_pages,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
        }
    }
}

/// External list response: `{ data: [...], meta: {...} }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListResponse {
    pub data: Vec<serde_json::Value>,
    pub meta: PageMeta,
}

impl ListResponse {
    pub fn new(data: Vec<serde_json::Value>, meta: PageMeta) -> Self {
        Self { data, meta }
    }
}
