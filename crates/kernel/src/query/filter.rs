//! Filter compiler.
//!
//! Walks the non-reserved keys of a [`ParameterBag`] and builds a
//! [`WhereClause`]. Keys outside the caller's [`AllowedFields`] are dropped
//! with a diagnostic; nothing here is fatal.
//!
//! Accepted shapes per key:
//! - `name=value`: coerced equality
//! - `price[gte]=10` (nested object or literal bracket key): operator map
//! - `category.name=x`: to-one relation condition
//! - `offerings[some][title][contains]=pad`: quantified relation condition

use std::collections::HashSet;

use serde_json::{Map, Value};

use super::coerce::CoercionPolicy;
use super::context::{DiagnosticKind, Diagnostics};
use super::params::ParameterBag;
use super::types::{
    FieldCondition, FilterValue, MatchMode, Negation, Operator, OperatorMap, Quantifier,
    RelationFilter, WhereClause,
};

/// Default maximum nesting depth for operator/quantifier objects.
pub const DEFAULT_MAX_DEPTH: usize = 4;

/// Caller-supplied whitelist of filterable fields.
#[derive(Debug, Clone, Default)]
pub struct AllowedFields {
    names: HashSet<String>,
}

impl AllowedFields {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Exact membership.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Whether a parameter key is allowed: the key itself, the key with a
    /// trailing bracket operator stripped, or its leading dotted segment.
    pub fn is_allowed(&self, key: &str) -> bool {
        if self.contains(key) {
            return true;
        }
        let unbracketed = strip_brackets(key).0;
        if self.contains(unbracketed) {
            return true;
        }
        unbracketed
            .split('.')
            .next()
            .is_some_and(|base| self.contains(base))
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for AllowedFields {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Split `price[gte]` into `("price", ["gte"])`. Keys without well-formed
/// trailing brackets come back unchanged.
fn strip_brackets(key: &str) -> (&str, Vec<&str>) {
    let Some(open) = key.find('[') else {
        return (key, Vec::new());
    };
    if open == 0 || !key.ends_with(']') {
        return (key, Vec::new());
    }
    let segments: Vec<&str> = key[open + 1..key.len() - 1].split("][").collect();
    if segments.iter().any(|s| s.is_empty() || s.contains(['[', ']'])) {
        return (key, Vec::new());
    }
    (&key[..open], segments)
}

/// Compiles filter parameters into a [`WhereClause`].
pub struct FilterCompiler<'a> {
    allowed: &'a AllowedFields,
    policy: &'a CoercionPolicy,
    max_depth: usize,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(allowed: &'a AllowedFields, policy: &'a CoercionPolicy) -> Self {
        Self {
            allowed,
            policy,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Override the maximum nesting depth.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Compile every filter parameter in the bag.
    pub fn compile(&self, bag: &ParameterBag, diagnostics: &mut Diagnostics) -> WhereClause {
        let mut clause = WhereClause::new();

        for (key, value) in bag.filters() {
            if !self.allowed.is_allowed(key) {
                diagnostics.push(
                    DiagnosticKind::UnknownField,
                    key.as_str(),
                    "field is not filterable",
                );
                continue;
            }

            // Literal bracket keys (`price[gte]`) wrap the value in operator objects.
            let (path, brackets) = strip_brackets(key);
            let mut value = value.clone();
            for segment in brackets.iter().rev() {
                let mut wrapped = Map::new();
                wrapped.insert((*segment).to_string(), value);
                value = Value::Object(wrapped);
            }

            let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
            let Some((leaf, relations)) = segments.split_last() else {
                diagnostics.push(DiagnosticKind::InvalidValue, key.as_str(), "empty field path");
                continue;
            };

            if relations.len() >= self.max_depth {
                diagnostics.push(
                    DiagnosticKind::DepthExceeded,
                    key.as_str(),
                    "dotted path is nested too deeply",
                );
                continue;
            }

            let Some(mut condition) =
                self.compile_field(key, leaf, &value, relations.len(), diagnostics)
            else {
                continue;
            };

            // `category.name=x` → category: { is: { name: x } }
            let mut name = *leaf;
            for relation in relations.iter().rev() {
                condition = FieldCondition::Relation(RelationFilter::is(WhereClause::field(
                    name, condition,
                )));
                name = *relation;
            }
            clause.insert(name, condition);
        }

        clause
    }

    /// Compile the value for one field. `key` is the original parameter key,
    /// used for diagnostics.
    fn compile_field(
        &self,
        key: &str,
        field: &str,
        value: &Value,
        depth: usize,
        diagnostics: &mut Diagnostics,
    ) -> Option<FieldCondition> {
        match value {
            Value::Object(map) => self.compile_object(key, field, map, depth, diagnostics),
            // Repeated keys (`color=red&color=blue`) mean membership.
            Value::Array(items) => {
                let values = self.coerce_list(key, field, items, diagnostics);
                Some(FieldCondition::Operators(OperatorMap {
                    in_list: Some(values),
                    ..Default::default()
                }))
            }
            scalar => Some(FieldCondition::Equals(self.policy.coerce(field, scalar))),
        }
    }

    /// Compile an operator or quantifier object.
    fn compile_object(
        &self,
        key: &str,
        field: &str,
        map: &Map<String, Value>,
        depth: usize,
        diagnostics: &mut Diagnostics,
    ) -> Option<FieldCondition> {
        if depth >= self.max_depth {
            diagnostics.push(
                DiagnosticKind::DepthExceeded,
                key,
                format!("filter on '{field}' is nested too deeply"),
            );
            return None;
        }

        let mut ops = OperatorMap::default();
        let mut relation = RelationFilter::default();

        for (name, op_value) in map {
            if let Some(quantifier) = Quantifier::parse(name) {
                let Value::Object(inner) = op_value else {
                    diagnostics.push(
                        DiagnosticKind::InvalidValue,
                        key,
                        format!("'{}' on '{field}' requires an object", quantifier.as_str()),
                    );
                    continue;
                };
                let nested = self.compile_nested(key, inner, depth + 1, diagnostics);
                if !nested.is_empty() {
                    relation.set(quantifier, nested);
                }
                continue;
            }

            match Operator::parse(name) {
                Some(op) => self.apply_operator(&mut ops, key, field, op, op_value, depth, diagnostics),
                None => diagnostics.push(
                    DiagnosticKind::UnknownOperator,
                    key,
                    format!("unknown operator '{name}' on '{field}'"),
                ),
            }
        }

        match (ops.is_empty(), relation.is_empty()) {
            (true, true) => None,
            (false, true) => Some(FieldCondition::Operators(ops)),
            (true, false) => Some(FieldCondition::Relation(relation)),
            (false, false) => {
                diagnostics.push(
                    DiagnosticKind::InvalidValue,
                    key,
                    format!("'{field}' mixes operators with relation quantifiers; keeping the quantifiers"),
                );
                Some(FieldCondition::Relation(relation))
            }
        }
    }

    /// Compile a nested condition inside a quantifier. Nested field names
    /// belong to the related entity and are not checked against the
    /// top-level whitelist.
    fn compile_nested(
        &self,
        key: &str,
        map: &Map<String, Value>,
        depth: usize,
        diagnostics: &mut Diagnostics,
    ) -> WhereClause {
        let mut clause = WhereClause::new();
        if depth >= self.max_depth {
            diagnostics.push(
                DiagnosticKind::DepthExceeded,
                key,
                "relation filter is nested too deeply",
            );
            return clause;
        }
        for (field, value) in map {
            if let Some(condition) = self.compile_field(key, field, value, depth, diagnostics) {
                clause.insert(field.as_str(), condition);
            }
        }
        clause
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_operator(
        &self,
        ops: &mut OperatorMap,
        key: &str,
        field: &str,
        op: Operator,
        value: &Value,
        depth: usize,
        diagnostics: &mut Diagnostics,
    ) {
        match op {
            Operator::In => {
                let Value::Array(items) = value else {
                    diagnostics.push(
                        DiagnosticKind::InvalidValue,
                        key,
                        format!("'in' on '{field}' requires an array"),
                    );
                    return;
                };
                ops.in_list = Some(self.coerce_list(key, field, items, diagnostics));
            }
            Operator::Not => match value {
                Value::Object(inner) => {
                    match self.compile_object(key, field, inner, depth + 1, diagnostics) {
                        Some(FieldCondition::Operators(negated)) => {
                            ops.not = Some(Negation::Operators(Box::new(negated)));
                        }
                        Some(_) => diagnostics.push(
                            DiagnosticKind::InvalidValue,
                            key,
                            format!("'not' on '{field}' cannot wrap a relation quantifier"),
                        ),
                        None => {}
                    }
                }
                Value::Array(_) => diagnostics.push(
                    DiagnosticKind::InvalidValue,
                    key,
                    format!("'not' on '{field}' requires a scalar or operator object"),
                ),
                scalar => ops.not = Some(Negation::Value(self.policy.coerce(field, scalar))),
            },
            op if op.is_string_match() => {
                let Some(text) = scalar_text(value) else {
                    diagnostics.push(
                        DiagnosticKind::InvalidValue,
                        key,
                        format!("'{}' on '{field}' requires a scalar", op.as_str()),
                    );
                    return;
                };
                match op {
                    Operator::Contains => ops.contains = Some(text),
                    Operator::StartsWith => ops.starts_with = Some(text),
                    _ => ops.ends_with = Some(text),
                }
                ops.mode = Some(MatchMode::Insensitive);
            }
            _ => {
                if value.is_object() || value.is_array() {
                    diagnostics.push(
                        DiagnosticKind::InvalidValue,
                        key,
                        format!("'{}' on '{field}' requires a scalar", op.as_str()),
                    );
                    return;
                }
                let coerced = Some(self.policy.coerce(field, value));
                match op {
                    Operator::Gt => ops.gt = coerced,
                    Operator::Gte => ops.gte = coerced,
                    Operator::Lt => ops.lt = coerced,
                    Operator::Lte => ops.lte = coerced,
                    _ => ops.equals = coerced,
                }
            }
        }
    }

    /// Coerce each scalar element of a list; nested objects/arrays are dropped.
    fn coerce_list(
        &self,
        key: &str,
        field: &str,
        items: &[Value],
        diagnostics: &mut Diagnostics,
    ) -> Vec<FilterValue> {
        items
            .iter()
            .filter_map(|item| {
                if item.is_object() || item.is_array() {
                    diagnostics.push(
                        DiagnosticKind::InvalidValue,
                        key,
                        format!("list for '{field}' contains a non-scalar element"),
                    );
                    None
                } else {
                    Some(self.policy.coerce(field, item))
                }
            })
            .collect()
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::query::context::RequestContext;
    use serde_json::json;

    fn compile(bag: Value, allowed: &[&str]) -> (WhereClause, Diagnostics) {
        let bag = ParameterBag::from_json(bag).unwrap();
        let allowed: AllowedFields = allowed.iter().copied().collect();
        let policy = CoercionPolicy::new();
        let mut diagnostics = Diagnostics::new(&RequestContext::new());
        let clause = FilterCompiler::new(&allowed, &policy).compile(&bag, &mut diagnostics);
        (clause, diagnostics)
    }

    fn to_json(clause: &WhereClause) -> Value {
        serde_json::to_value(clause).unwrap()
    }

    #[test]
    fn unknown_fields_are_dropped() {
        let (clause, diagnostics) = compile(json!({"unknownField": "x"}), &["name"]);
        assert!(clause.is_empty());
        assert!(diagnostics.contains(DiagnosticKind::UnknownField));
    }

    #[test]
    fn range_operators_coerce_numbers() {
        let (clause, diagnostics) =
            compile(json!({"price": {"gte": "10", "lte": "20.5"}}), &["price"]);
        assert_eq!(to_json(&clause), json!({"price": {"gte": 10, "lte": 20.5}}));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn repeated_operator_keeps_both_bounds() {
        let (clause, _) = compile(
            json!({"price[gte]": "10", "price": {"gte": "20"}}),
            &["price"],
        );
        assert_eq!(
            to_json(&clause),
            json!({"price": {"gte": 20}, "AND": [{"price": {"gte": 10}}]})
        );
    }

    #[test]
    fn scalar_equality() {
        let (clause, _) = compile(json!({"isPopular": "true", "name": "Rotor"}), &["isPopular", "name"]);
        assert_eq!(to_json(&clause), json!({"isPopular": true, "name": "Rotor"}));
    }

    #[test]
    fn reserved_keys_are_skipped() {
        let (clause, diagnostics) = compile(
            json!({"page": "2", "limit": "5", "sort": "-name", "fields": "id", "search": "x"}),
            &[],
        );
        assert!(clause.is_empty());
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn string_match_forces_insensitive_mode() {
        let (clause, _) = compile(json!({"name": {"startsWith": "Bra", "endsWith": 9}}), &["name"]);
        assert_eq!(
            to_json(&clause),
            json!({"name": {"startsWith": "Bra", "endsWith": "9", "mode": "insensitive"}})
        );
    }

    #[test]
    fn in_requires_array_and_coerces_elements() {
        let (clause, _) = compile(json!({"id": {"in": ["1", "2", "x"]}}), &["id"]);
        assert_eq!(to_json(&clause), json!({"id": {"in": [1, 2, "x"]}}));

        let (clause, diagnostics) = compile(json!({"id": {"in": "1"}}), &["id"]);
        assert!(clause.is_empty());
        assert!(diagnostics.contains(DiagnosticKind::InvalidValue));
    }

    #[test]
    fn unknown_operators_never_leak_empty_maps() {
        let (clause, diagnostics) = compile(json!({"price": {"between": "1"}}), &["price"]);
        assert!(clause.is_empty());
        assert!(diagnostics.contains(DiagnosticKind::UnknownOperator));

        let (clause, _) = compile(json!({"price": {"between": "1", "lt": "3"}}), &["price"]);
        assert_eq!(to_json(&clause), json!({"price": {"lt": 3}}));
    }

    #[test]
    fn not_accepts_scalar_and_operator_map() {
        let (clause, _) = compile(json!({"status": {"not": "archived"}}), &["status"]);
        assert_eq!(to_json(&clause), json!({"status": {"not": "archived"}}));

        let (clause, _) = compile(json!({"price": {"not": {"gt": "5"}}}), &["price"]);
        assert_eq!(to_json(&clause), json!({"price": {"not": {"gt": 5}}}));
    }

    #[test]
    fn quantifiers_recurse() {
        let (clause, _) = compile(
            json!({"offerings": {"some": {"price": {"lt": "50"}, "inStock": "true"}}}),
            &["offerings"],
        );
        assert_eq!(
            to_json(&clause),
            json!({"offerings": {"some": {"price": {"lt": 50}, "inStock": true}}})
        );
    }

    #[test]
    fn quantifier_with_non_object_is_dropped() {
        let (clause, diagnostics) = compile(json!({"offerings": {"every": "x"}}), &["offerings"]);
        assert!(clause.is_empty());
        assert!(diagnostics.contains(DiagnosticKind::InvalidValue));
    }

    #[test]
    fn literal_bracket_keys() {
        let (clause, _) = compile(json!({"price[gte]": "3", "price[lt]": "9"}), &["price"]);
        assert_eq!(to_json(&clause), json!({"price": {"gte": 3, "lt": 9}}));
    }

    #[test]
    fn dotted_keys_build_to_one_conditions() {
        let (clause, _) = compile(json!({"category.name": "Brakes"}), &["category"]);
        assert_eq!(
            to_json(&clause),
            json!({"category": {"is": {"name": "Brakes"}}})
        );

        let (clause, _) = compile(
            json!({"category.parent.slug": {"contains": "aut"}}),
            &["category.parent.slug"],
        );
        assert_eq!(
            to_json(&clause),
            json!({"category": {"is": {"parent": {"is": {"slug": {"contains": "aut", "mode": "insensitive"}}}}}})
        );
    }

    #[test]
    fn depth_limit_drops_deep_nesting() {
        let deep = json!({"a": {"some": {"b": {"some": {"c": {"some": {"d": {"some": {"e": "1"}}}}}}}}});
        let (clause, diagnostics) = compile(deep, &["a"]);
        assert!(diagnostics.contains(DiagnosticKind::DepthExceeded));
        assert!(clause.is_empty());
    }

    #[test]
    fn repeated_values_mean_membership() {
        let (clause, _) = compile(json!({"color": ["red", "blue"]}), &["color"]);
        assert_eq!(to_json(&clause), json!({"color": {"in": ["red", "blue"]}}));
    }

    #[test]
    fn allowed_field_variants() {
        let allowed = AllowedFields::new(["price", "category.name"]);
        assert!(allowed.is_allowed("price"));
        assert!(allowed.is_allowed("price[gte]"));
        assert!(allowed.is_allowed("category.name"));
        assert!(allowed.is_allowed("category.name[contains]"));
        assert!(!allowed.is_allowed("category"));
        assert!(!allowed.is_allowed("cost[gte]"));
    }
}
