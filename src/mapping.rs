//! Column mapping: how raw CSV columns become target-schema fields.
//!
//! A job carries one [`ColumnMapping`], either the legacy flat form
//! (`column -> field`, empty target = skip) or a list of structured
//! [`MappingEntry`] values. [`ColumnMapping::resolve`] turns both into a
//! [`ResolvedMapping`] once, and [`ResolvedMapping::apply`] maps rows.

use std::collections::{BTreeMap, HashSet};

use heck::ToSnakeCase;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    entities::EntitySchema,
    keys::{normalize_key, normalize_value},
    transform,
};

pub const NOTES_SINK: &str = "__notes__";
pub const TAGS_SINK: &str = "__tags__";
pub const CUSTOM_FIELD_PREFIX: &str = "custom_fields.";
pub const NOTES_FIELD: &str = "notes";
pub const TAGS_FIELD: &str = "tags";
pub const CUSTOM_FIELDS: &str = "custom_fields";
pub const IMPORTED_NOTES_HEADER: &str = "--- Imported fields ---";

/// One column from a raw CSV row, keyed by its normalized header name.
pub type RawRow = Vec<(String, String)>;
/// A row keyed by target field name, ready for enum normalization.
pub type MappedRow = Map<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MappingEntry {
    #[serde(alias = "csv_column", alias = "source")]
    pub source_column: String,
    #[serde(alias = "target", alias = "field")]
    pub target_field: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation: Option<String>,
}

impl MappingEntry {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source_column: source.into(),
            target_field: target.into(),
            confidence: 1.0,
            transformation: None,
        }
    }

    pub fn with_transformation(mut self, name: impl Into<String>) -> Self {
        self.transformation = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ColumnMapping {
    Structured(Vec<MappingEntry>),
    Legacy(BTreeMap<String, String>),
}

/// Where a mapping entry writes its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingTarget {
    Skip,
    Notes,
    Tags,
    CustomField(String),
    Field(String),
}

impl MappingTarget {
    pub fn parse(raw: &str) -> Self {
        let target = raw.trim();
        if target.is_empty() {
            return MappingTarget::Skip;
        }
        if target == NOTES_SINK {
            return MappingTarget::Notes;
        }
        if target == TAGS_SINK {
            return MappingTarget::Tags;
        }
        match target.strip_prefix(CUSTOM_FIELD_PREFIX) {
            Some("") => MappingTarget::Skip,
            Some(key) => MappingTarget::CustomField(key.to_string()),
            None => MappingTarget::Field(target.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntry {
    pub source: String,
    pub target: MappingTarget,
    pub transformation: Option<String>,
}

/// The single shape both mapping formats resolve to.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMapping {
    pub entries: Vec<ResolvedEntry>,
    /// Columns not named by any entry keep their original name (legacy only).
    pub passthrough_unmapped: bool,
}

impl ColumnMapping {
    pub fn resolve(&self) -> ResolvedMapping {
        let resolved = match self {
            ColumnMapping::Legacy(pairs) => ResolvedMapping {
                entries: pairs
                    .iter()
                    .map(|(source, target)| ResolvedEntry {
                        source: normalize_key(source).into_owned(),
                        target: MappingTarget::parse(target),
                        transformation: None,
                    })
                    .collect(),
                passthrough_unmapped: true,
            },
            ColumnMapping::Structured(entries) => ResolvedMapping {
                entries: entries
                    .iter()
                    .map(|entry| ResolvedEntry {
                        source: normalize_key(&entry.source_column).into_owned(),
                        target: MappingTarget::parse(&entry.target_field),
                        transformation: entry.transformation.clone(),
                    })
                    .collect(),
                passthrough_unmapped: false,
            },
        };
        debug!(
            "Resolved {} mapping entr(ies) (passthrough: {})",
            resolved.entries.len(),
            resolved.passthrough_unmapped
        );
        resolved
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ColumnMapping::Legacy(pairs) => pairs.is_empty(),
            ColumnMapping::Structured(entries) => entries.is_empty(),
        }
    }
}

impl ResolvedMapping {
    /// Maps one raw row. Empty or absent source values contribute nothing,
    /// even for required fields; validation decides what is missing.
    pub fn apply(&self, raw: &RawRow) -> MappedRow {
        let mut row = MappedRow::new();
        let mut notes: Vec<String> = Vec::new();
        let mut tags: Vec<Value> = Vec::new();
        let mut custom = Map::new();

        for entry in &self.entries {
            if entry.target == MappingTarget::Skip {
                continue;
            }
            let Some(value) = lookup(raw, &entry.source) else {
                continue;
            };
            match &entry.target {
                MappingTarget::Skip => {}
                MappingTarget::Notes => notes.push(format!("{}: {value}", entry.source)),
                MappingTarget::Tags => tags.push(Value::String(value)),
                MappingTarget::CustomField(key) => {
                    custom.insert(key.clone(), Value::String(value));
                }
                MappingTarget::Field(field) => {
                    let mapped = transform::apply_named(entry.transformation.as_deref(), &value);
                    row.insert(field.clone(), mapped);
                }
            }
        }

        if self.passthrough_unmapped {
            let named: HashSet<&str> = self.entries.iter().map(|e| e.source.as_str()).collect();
            for (column, value) in raw {
                if named.contains(column.as_str()) || row.contains_key(column) {
                    continue;
                }
                let value = normalize_value(value);
                if !value.is_empty() {
                    row.insert(column.clone(), Value::String(value.into_owned()));
                }
            }
        }

        if !notes.is_empty() {
            append_notes(&mut row, &notes);
        }
        if !tags.is_empty() {
            append_tags(&mut row, tags);
        }
        if !custom.is_empty() {
            merge_custom_fields(&mut row, custom);
        }
        row
    }
}

fn lookup(raw: &RawRow, source: &str) -> Option<String> {
    raw.iter()
        .rev()
        .find(|(column, _)| column == source)
        .map(|(_, value)| normalize_value(value).into_owned())
        .filter(|value| !value.is_empty())
}

fn append_notes(row: &mut MappedRow, lines: &[String]) {
    let block = format!("{IMPORTED_NOTES_HEADER}\n{}", lines.join("\n"));
    let combined = match row.get(NOTES_FIELD).and_then(Value::as_str) {
        Some(existing) if !existing.trim().is_empty() => format!("{existing}\n\n{block}"),
        _ => block,
    };
    row.insert(NOTES_FIELD.to_string(), Value::String(combined));
}

fn append_tags(row: &mut MappedRow, extra: Vec<Value>) {
    let mut tags = match row.remove(TAGS_FIELD) {
        Some(Value::Array(existing)) => existing,
        Some(Value::String(existing)) => existing
            .split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(|tag| Value::String(tag.to_string()))
            .collect(),
        Some(other) => vec![other],
        None => Vec::new(),
    };
    tags.extend(extra);
    row.insert(TAGS_FIELD.to_string(), Value::Array(tags));
}

fn merge_custom_fields(row: &mut MappedRow, custom: Map<String, Value>) {
    match row.get_mut(CUSTOM_FIELDS) {
        Some(Value::Object(existing)) => existing.extend(custom),
        _ => {
            row.insert(CUSTOM_FIELDS.to_string(), Value::Object(custom));
        }
    }
}

/// Builds a structured mapping by matching snake-cased headers against the
/// entity's known field names. Unmatched headers become skip entries.
pub fn suggest(headers: &[String], schema: &EntitySchema) -> Vec<MappingEntry> {
    let known = schema.known_fields();
    headers
        .iter()
        .map(|header| {
            let source = normalize_key(header).into_owned();
            let candidate = source.to_snake_case();
            match known.iter().find(|field| **field == candidate) {
                Some(field) => MappingEntry::new(source, *field),
                None => MappingEntry {
                    source_column: source,
                    target_field: String::new(),
                    confidence: 0.0,
                    transformation: None,
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{EntityCatalog, EntityType};
    use serde_json::json;

    fn raw(pairs: &[(&str, &str)]) -> RawRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn split_name_pair_fills_both_fields() {
        let mapping = ColumnMapping::Structured(vec![
            MappingEntry::new("Full Name", "first_name").with_transformation("split_name_first"),
            MappingEntry::new("Full Name", "last_name").with_transformation("split_name_last"),
        ]);
        let row = mapping.resolve().apply(&raw(&[("Full Name", "Ada Lovelace")]));
        assert_eq!(row["first_name"], json!("Ada"));
        assert_eq!(row["last_name"], json!("Lovelace"));
    }

    #[test]
    fn legacy_mapping_renames_drops_and_passes_through() {
        let mapping: ColumnMapping = serde_json::from_value(json!({
            "E-mail": "email",
            "Internal Id": "",
        }))
        .unwrap();
        assert!(matches!(mapping, ColumnMapping::Legacy(_)));
        let row = mapping.resolve().apply(&raw(&[
            ("E-mail", "ada@example.com"),
            ("Internal Id", "77"),
            ("city", "London"),
            ("fax", ""),
        ]));
        assert_eq!(row["email"], json!("ada@example.com"));
        assert_eq!(row["city"], json!("London"));
        assert!(!row.contains_key("Internal Id"));
        assert!(!row.contains_key("fax"));
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn structured_mapping_parses_from_entry_list() {
        let mapping: ColumnMapping = serde_json::from_value(json!([
            {"csv_column": "Name", "target_field": "name", "confidence": 0.9},
            {"source_column": "Size", "target_field": "size", "transformation": "to_lowercase"}
        ]))
        .unwrap();
        let ColumnMapping::Structured(entries) = &mapping else {
            panic!("expected structured mapping");
        };
        assert_eq!(entries[0].source_column, "Name");
        assert_eq!(entries[1].transformation.as_deref(), Some("to_lowercase"));
    }

    #[test]
    fn empty_values_never_create_fields() {
        let mapping = ColumnMapping::Structured(vec![
            MappingEntry::new("First", "first_name"),
            MappingEntry::new("Missing", "last_name"),
        ]);
        let row = mapping.resolve().apply(&raw(&[("First", "   ")]));
        assert!(row.is_empty());
    }

    #[test]
    fn sinks_accumulate_notes_tags_and_custom_fields() {
        let mapping = ColumnMapping::Structured(vec![
            MappingEntry::new("Notes", "notes"),
            MappingEntry::new("Hobby", NOTES_SINK),
            MappingEntry::new("Pet", NOTES_SINK),
            MappingEntry::new("Tags", "tags"),
            MappingEntry::new("Segment", TAGS_SINK),
            MappingEntry::new("Region", "custom_fields.region"),
        ]);
        let row = mapping.resolve().apply(&raw(&[
            ("Notes", "Met at expo"),
            ("Hobby", "chess"),
            ("Pet", "cat"),
            ("Tags", "vip, early"),
            ("Segment", " enterprise "),
            ("Region", "EMEA"),
        ]));
        assert_eq!(
            row["notes"],
            json!("Met at expo\n\n--- Imported fields ---\nHobby: chess\nPet: cat")
        );
        assert_eq!(row["tags"], json!(["vip", "early", "enterprise"]));
        assert_eq!(row["custom_fields"], json!({"region": "EMEA"}));
    }

    #[test]
    fn notes_sink_without_existing_notes_starts_with_header() {
        let mapping = ColumnMapping::Structured(vec![MappingEntry::new("Hobby", NOTES_SINK)]);
        let row = mapping.resolve().apply(&raw(&[("Hobby", "chess")]));
        assert_eq!(row["notes"], json!("--- Imported fields ---\nHobby: chess"));
    }

    #[test]
    fn entry_and_header_names_are_normalized_alike() {
        let mapping = ColumnMapping::Structured(vec![MappingEntry::new(" \"Email\" ", "email")]);
        let header = normalize_key("\u{feff}Email\u{200b}").into_owned();
        let row = mapping.resolve().apply(&vec![(header, "a@b.co".to_string())]);
        assert_eq!(row["email"], json!("a@b.co"));
    }

    #[test]
    fn target_markers_parse() {
        assert_eq!(MappingTarget::parse(" "), MappingTarget::Skip);
        assert_eq!(MappingTarget::parse(NOTES_SINK), MappingTarget::Notes);
        assert_eq!(MappingTarget::parse(TAGS_SINK), MappingTarget::Tags);
        assert_eq!(
            MappingTarget::parse("custom_fields.tier"),
            MappingTarget::CustomField("tier".into())
        );
        assert_eq!(MappingTarget::parse("email"), MappingTarget::Field("email".into()));
    }

    #[test]
    fn suggestions_match_snake_cased_headers() {
        let catalog = EntityCatalog::builtin().unwrap();
        let schema = catalog.schema(EntityType::Contacts).unwrap();
        let headers = vec!["First Name".to_string(), "E-mail Address".to_string()];
        let entries = suggest(&headers, schema);
        assert_eq!(entries[0].target_field, "first_name");
        assert_eq!(entries[0].confidence, 1.0);
        assert_eq!(entries[1].target_field, "");
        assert_eq!(entries[1].confidence, 0.0);
    }
}
