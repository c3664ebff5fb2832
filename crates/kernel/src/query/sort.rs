//! Sort compiler: `sort=-createdAt,name` → ordered sort keys.

use super::context::{DiagnosticKind, Diagnostics};
use super::filter::AllowedFields;
use super::types::SortSpec;

/// Parse a sort parameter, falling back to `default` when it is absent or
/// contains no usable keys. Fields are not checked against any whitelist.
pub fn parse_sort(raw: Option<&str>, default: &SortSpec) -> SortSpec {
    let Some(raw) = raw else {
        return default.clone();
    };
    let spec = raw.parse::<SortSpec>().unwrap_or_default();
    if spec.is_empty() {
        default.clone()
    } else {
        spec
    }
}

/// Parse a sort parameter and drop keys outside `allowed`.
///
/// If every key is dropped the default ordering is used.
pub fn parse_sort_checked(
    raw: Option<&str>,
    default: &SortSpec,
    allowed: &AllowedFields,
    diagnostics: &mut Diagnostics,
) -> SortSpec {
    let parsed = parse_sort(raw, default);
    if raw.is_none() {
        return parsed;
    }

    let mut checked = SortSpec::default();
    for key in parsed.keys() {
        if allowed.is_allowed(&key.field) {
            checked.push(key.clone());
        } else {
            diagnostics.push(
                DiagnosticKind::UnknownField,
                "sort",
                format!("'{}' is not sortable", key.field),
            );
        }
    }

    if checked.is_empty() {
        default.clone()
    } else {
        checked
    }
}
