//! Raw request parameters.
//!
//! A [`ParameterBag`] is the untyped input to one compilation pass. It can be
//! built from a JSON object or parsed from a URL query string, where bracket
//! paths nest (`price[gte]=10` → `{"price": {"gte": "10"}}`), a trailing `[]`
//! or a repeated key collects an array, and numeric bracket indices
//! (`ids[in][0]=a`) collapse into arrays.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys consumed by pagination, sorting, search and projection.
pub const RESERVED_KEYS: [&str; 5] = ["page", "sort", "limit", "fields", "search"];

/// Immutable bag of raw request parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterBag {
    entries: BTreeMap<String, Value>,
}

impl ParameterBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a bag from a JSON object. Non-object values yield `None`.
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(map.into_iter().collect()),
            _ => None,
        }
    }

    /// Parse a URL query string (with or without a leading `?`).
    pub fn from_query_str(query: &str) -> Self {
        let mut root = Map::new();

        for pair in query.trim_start_matches('?').split('&') {
            if pair.is_empty() {
                continue;
            }
            let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = decode_component(raw_key);
            if key.is_empty() {
                continue;
            }
            let value = decode_component(raw_value);

            let (root_key, segments) = split_key_path(&key);
            insert_path(&mut root, root_key.to_string(), &segments, value);
        }

        root.into_iter()
            .map(|(key, value)| (key, normalize_indices(value)))
            .collect()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Text form of a parameter: strings as-is, numbers and booleans
    /// rendered, arrays by their first element.
    pub fn get_text(&self, key: &str) -> Option<Cow<'_, str>> {
        self.entries.get(key).and_then(value_text)
    }

    /// Iterate over filter parameters (everything except reserved keys).
    pub fn filters(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries
            .iter()
            .filter(|(key, _)| !Self::is_reserved(key))
    }

    /// Whether the key is consumed by something other than filtering.
    pub fn is_reserved(key: &str) -> bool {
        RESERVED_KEYS.contains(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Value)> for ParameterBag {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

fn value_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        Value::Array(items) => items.first().and_then(value_text),
        Value::Null | Value::Object(_) => None,
    }
}

/// Percent-decode a query component, treating `+` as a space.
fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

/// Split `a[b][c]` into `("a", ["b", "c"])`. Malformed bracket syntax is
/// treated as a literal key.
fn split_key_path(key: &str) -> (&str, Vec<&str>) {
    let Some(open) = key.find('[') else {
        return (key, Vec::new());
    };
    if open == 0 {
        return (key, Vec::new());
    }

    let mut segments = Vec::new();
    let mut rest = &key[open..];
    while !rest.is_empty() {
        let Some(inner) = rest.strip_prefix('[') else {
            return (key, Vec::new());
        };
        let Some(close) = inner.find(']') else {
            return (key, Vec::new());
        };
        segments.push(&inner[..close]);
        rest = &inner[close + 1..];
    }

    (&key[..open], segments)
}

fn insert_path(target: &mut Map<String, Value>, key: String, segments: &[&str], value: String) {
    match segments {
        [] => append_value(target, key, Value::String(value)),
        [""] => {
            let entry = target
                .entry(key)
                .or_insert_with(|| Value::Array(Vec::new()));
            match entry {
                Value::Array(items) => items.push(Value::String(value)),
                Value::String(existing) => {
                    let first = Value::String(std::mem::take(existing));
                    *entry = Value::Array(vec![first, Value::String(value)]);
                }
                // Conflicts with an object already at this key; first wins.
                _ => {}
            }
        }
        [next, rest @ ..] => {
            let entry = target
                .entry(key)
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(child) = entry {
                insert_path(child, (*next).to_string(), rest, value);
            }
        }
    }
}

/// Repeated keys collect into an array.
fn append_value(target: &mut Map<String, Value>, key: String, value: Value) {
    match target.get_mut(&key) {
        None => {
            target.insert(key, value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing @ Value::String(_)) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        Some(_) => {}
    }
}

/// Turn objects whose keys are all array indices into arrays.
fn normalize_indices(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let all_indices =
                !map.is_empty() && map.keys().all(|k| k.chars().all(|c| c.is_ascii_digit()));
            if all_indices {
                let mut indexed: Vec<(usize, Value)> = map
                    .into_iter()
                    .filter_map(|(k, v)| k.parse().ok().map(|i| (i, normalize_indices(v))))
                    .collect();
                indexed.sort_by_key(|(i, _)| *i);
                Value::Array(indexed.into_iter().map(|(_, v)| v).collect())
            } else {
                Value::Object(
                    map.into_iter()
                        .map(|(k, v)| (k, normalize_indices(v)))
                        .collect(),
                )
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_indices).collect()),
        other => other,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flat_pairs() {
        let bag = ParameterBag::from_query_str("?isPopular=true&page=2&name=disc+brake");
        assert_eq!(bag.get("isPopular"), Some(&json!("true")));
        assert_eq!(bag.get_text("page").as_deref(), Some("2"));
        assert_eq!(bag.get("name"), Some(&json!("disc brake")));
    }

    #[test]
    fn bracket_operators_nest() {
        let bag = ParameterBag::from_query_str("price[gte]=10&price[lte]=20.5");
        assert_eq!(bag.get("price"), Some(&json!({"gte": "10", "lte": "20.5"})));
    }

    #[test]
    fn arrays_from_brackets_repeats_and_indices() {
        let bag = ParameterBag::from_query_str(
            "tags[in][]=a&tags[in][]=b&color=red&color=blue&ids[in][1]=y&ids[in][0]=x",
        );
        assert_eq!(bag.get("tags"), Some(&json!({"in": ["a", "b"]})));
        assert_eq!(bag.get("color"), Some(&json!(["red", "blue"])));
        assert_eq!(bag.get("ids"), Some(&json!({"in": ["x", "y"]})));
    }

    #[test]
    fn quantifier_paths_nest_deeply() {
        let bag = ParameterBag::from_query_str("offerings[some][title][contains]=pad");
        assert_eq!(
            bag.get("offerings"),
            Some(&json!({"some": {"title": {"contains": "pad"}}}))
        );
    }

    #[test]
    fn percent_decoding() {
        let bag = ParameterBag::from_query_str("name%5Bcontains%5D=caf%C3%A9");
        assert_eq!(bag.get("name"), Some(&json!({"contains": "café"})));
    }

    #[test]
    fn malformed_brackets_are_literal_keys() {
        let bag = ParameterBag::from_query_str("price[gte=1&[x]=2");
        assert_eq!(bag.get("price[gte"), Some(&json!("1")));
        assert_eq!(bag.get("[x]"), Some(&json!("2")));
    }

    #[test]
    fn reserved_keys_are_not_filters() {
        let bag = ParameterBag::from_query_str("page=1&sort=-name&limit=5&fields=id&search=x&q=1");
        let keys: Vec<&String> = bag.filters().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["q"]);
    }

    #[test]
    fn from_json_requires_object() {
        assert!(ParameterBag::from_json(json!([1, 2])).is_none());
        let bag = ParameterBag::from_json(json!({"page": 3})).unwrap();
        assert_eq!(bag.get_text("page").as_deref(), Some("3"));
    }
}
