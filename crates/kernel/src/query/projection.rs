//! Projection compiler: `fields=a,-b,c.d` → nested inclusion tree.

use super::types::ProjectionTree;

/// Parse a `fields` parameter.
///
/// Returns `None` when the parameter is absent or names no fields, in which
/// case rows are returned whole. When no top-level field ends up `true` and
/// `id_field` is not explicitly excluded, `id_field` is included so rows
/// stay addressable.
pub fn parse_projection(raw: Option<&str>, id_field: &str) -> Option<ProjectionTree> {
    let raw = raw?;
    let mut tree = ProjectionTree::new();

    for segment in raw.split(',') {
        let segment = segment.trim();
        let (path, include) = match segment.strip_prefix('-') {
            Some(rest) => (rest.trim(), false),
            None => (segment, true),
        };
        let parts: Vec<&str> = path
            .split('.')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        tree.insert_path(&parts, include);
    }

    if tree.is_empty() {
        return None;
    }
    if !tree.has_included_leaf() && tree.get(id_field).is_none() {
        tree.include_by_default(id_field);
    }

    Some(tree)
}
