//! Matching free-text values against the catalog's enumerated fields.

use serde_json::{Map, Value};

use crate::{
    entities::{EntityCatalog, EntityType},
    transform::string_ops,
};

/// The comparison form: trimmed, lowercased, whitespace runs as `_`.
pub fn comparison_key(value: &str) -> String {
    string_ops::normalize_status(value.trim()).into_owned()
}

/// Finds the canonically-cased valid value matching `value`, if any.
pub fn find_canonical<'a>(valid: &'a [String], value: &str) -> Option<&'a str> {
    let wanted = comparison_key(value);
    valid
        .iter()
        .find(|candidate| comparison_key(candidate) == wanted)
        .map(String::as_str)
}

/// Substitutes the canonical enum value when one matches; otherwise the raw
/// value passes through unchanged and is left for validation to report.
pub fn normalize_enum_value(
    catalog: &EntityCatalog,
    entity: EntityType,
    field: &str,
    value: &str,
) -> String {
    catalog
        .enum_values(entity, field)
        .and_then(|valid| find_canonical(valid, value))
        .unwrap_or(value)
        .to_string()
}

/// Applies [`normalize_enum_value`] to every string field of a mapped row.
pub fn normalize_row(catalog: &EntityCatalog, entity: EntityType, row: &mut Map<String, Value>) {
    for (field, value) in row.iter_mut() {
        if let Value::String(text) = value
            && let Some(valid) = catalog.enum_values(entity, field)
            && let Some(canonical) = find_canonical(valid, text)
            && canonical != text.as_str()
        {
            *text = canonical.to_string();
        }
    }
}
