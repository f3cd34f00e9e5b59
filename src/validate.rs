//! Dry-run validation: maps a bounded sample of rows and reports what an
//! import would trip over, without persisting anything.
//!
//! Reference names are *not* resolved here, only during execution, so a
//! report cannot predict references that will end up null.

use std::{collections::HashMap, sync::OnceLock};

use anyhow::Result;
use log::info;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::ImportConfig,
    entities::{EntityCatalog, EntitySchema},
    enums,
    job::ImportJob,
    mapping::{MappedRow, MappingTarget, ResolvedMapping},
    source::SourceFile,
    transform::string_ops,
};

/// Fields checked for numeric content on every entity type.
pub const NUMERIC_FIELDS: &[&str] = &[
    "employee_count",
    "annual_revenue",
    "value",
    "probability",
    "score",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    MissingRequired,
    InvalidEnum,
    InvalidEmail,
    InvalidNumber,
    MissingColumn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl WarningKind {
    pub fn severity(&self) -> Severity {
        match self {
            WarningKind::MissingRequired => Severity::Error,
            _ => Severity::Warning,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WarningKind::MissingRequired => "missing_required",
            WarningKind::InvalidEnum => "invalid_enum",
            WarningKind::InvalidEmail => "invalid_email",
            WarningKind::InvalidNumber => "invalid_number",
            WarningKind::MissingColumn => "missing_column",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationWarning {
    #[serde(rename = "type")]
    pub kind: WarningKind,
    pub field: String,
    pub severity: Severity,
    pub message: String,
    pub count: usize,
    pub rows: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub total_rows: usize,
    pub sampled_rows: usize,
    pub valid_rows: usize,
    pub error_rows: usize,
    pub quality_score: u32,
    pub warnings: Vec<ValidationWarning>,
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static email pattern"))
}

pub fn is_plausible_email(value: &str) -> bool {
    email_pattern().is_match(value.trim())
}

/// Warnings keyed by `(kind, field)`, kept in first-seen order so repeated
/// runs produce identical reports.
struct WarningAccumulator {
    max_rows: usize,
    order: Vec<(WarningKind, String)>,
    entries: HashMap<(WarningKind, String), (usize, Vec<usize>, String)>,
}

impl WarningAccumulator {
    fn new(max_rows: usize) -> Self {
        Self {
            max_rows,
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }

    fn record(&mut self, kind: WarningKind, field: &str, row: Option<usize>, sample: &str) {
        let key = (kind, field.to_string());
        let entry = self.entries.entry(key.clone()).or_insert_with(|| {
            self.order.push(key);
            (0, Vec::new(), sample.to_string())
        });
        entry.0 += 1;
        if let Some(row) = row
            && entry.1.len() < self.max_rows
        {
            entry.1.push(row);
        }
    }

    fn finish(mut self, schema: &EntitySchema) -> Vec<ValidationWarning> {
        self.order
            .into_iter()
            .filter_map(|key| {
                let (count, rows, sample) = self.entries.remove(&key)?;
                let (kind, field) = key;
                Some(ValidationWarning {
                    kind,
                    severity: kind.severity(),
                    message: describe(kind, &field, count, &sample, schema),
                    field,
                    count,
                    rows,
                })
            })
            .collect()
    }
}

fn describe(
    kind: WarningKind,
    field: &str,
    count: usize,
    sample: &str,
    schema: &EntitySchema,
) -> String {
    match kind {
        WarningKind::MissingRequired => {
            format!("Required field '{field}' is empty in {count} row(s)")
        }
        WarningKind::InvalidEnum => {
            let allowed = schema
                .enum_values(field)
                .map(|values| values.join(", "))
                .unwrap_or_default();
            format!(
                "{count} row(s) have a value for '{field}' outside [{allowed}] (e.g. '{sample}')"
            )
        }
        WarningKind::InvalidEmail => {
            format!("{count} row(s) have a malformed email in '{field}' (e.g. '{sample}')")
        }
        WarningKind::InvalidNumber => {
            format!("{count} row(s) have a non-numeric '{field}' (e.g. '{sample}')")
        }
        WarningKind::MissingColumn => {
            format!("Mapped column '{field}' does not appear in the file header")
        }
    }
}

pub struct Validator<'a> {
    catalog: &'a EntityCatalog,
    config: &'a ImportConfig,
}

impl<'a> Validator<'a> {
    pub fn new(catalog: &'a EntityCatalog, config: &'a ImportConfig) -> Self {
        Self { catalog, config }
    }

    pub fn validate(&self, job: &ImportJob) -> Result<ValidationReport> {
        let mapping = job.mapping()?.resolve();
        let schema = self.catalog.schema(job.entity_type)?;
        let mut source = SourceFile::open(&job.file_path, self.config.input_encoding.as_deref())?;
        let mut warnings = WarningAccumulator::new(self.config.max_warning_rows);
        flag_missing_columns(&mapping, source.headers(), &mut warnings);

        let mut total_rows = 0usize;
        let mut sampled_rows = 0usize;
        let mut error_rows = 0usize;
        while let Some(record) = source.next_record()? {
            total_rows += 1;
            if sampled_rows >= self.config.validation_sample_rows {
                continue;
            }
            sampled_rows += 1;
            let row_number = total_rows;
            let mapped = mapping.apply(&source.decode(&record));
            if !check_row(schema, &mapped, row_number, &mut warnings) {
                error_rows += 1;
            }
        }

        let valid_rows = sampled_rows - error_rows;
        let quality_score = if sampled_rows == 0 {
            0
        } else {
            (valid_rows as f64 / sampled_rows as f64 * 100.0).round() as u32
        };
        let report = ValidationReport {
            total_rows,
            sampled_rows,
            valid_rows,
            error_rows,
            quality_score,
            warnings: warnings.finish(schema),
        };
        info!(
            "Validated job {}: {}/{} sampled row(s) valid, quality {}%",
            job.id, report.valid_rows, report.sampled_rows, report.quality_score
        );
        Ok(report)
    }
}

fn flag_missing_columns(
    mapping: &ResolvedMapping,
    headers: &[String],
    warnings: &mut WarningAccumulator,
) {
    for entry in &mapping.entries {
        if entry.target != MappingTarget::Skip && !headers.contains(&entry.source) {
            warnings.record(WarningKind::MissingColumn, &entry.source, None, "");
        }
    }
}

/// Checks one mapped row; returns false when a required field is missing.
fn check_row(
    schema: &EntitySchema,
    row: &MappedRow,
    row_number: usize,
    warnings: &mut WarningAccumulator,
) -> bool {
    let mut row_ok = true;
    for field in &schema.required {
        if !is_present(row.get(field)) {
            warnings.record(WarningKind::MissingRequired, field, Some(row_number), "");
            row_ok = false;
        }
    }

    for (field, value) in row {
        let Value::String(text) = value else {
            continue;
        };
        if let Some(valid) = schema.enum_values(field)
            && enums::find_canonical(valid, text).is_none()
        {
            warnings.record(WarningKind::InvalidEnum, field, Some(row_number), text);
        }
        if field == "email" && !is_plausible_email(text) {
            warnings.record(WarningKind::InvalidEmail, field, Some(row_number), text);
        }
        let numeric = NUMERIC_FIELDS.contains(&field.as_str())
            || schema.numeric.iter().any(|name| name == field);
        if numeric
            && string_ops::parse_number(text).is_none()
        {
            warnings.record(WarningKind::InvalidNumber, field, Some(row_number), text);
        }
    }
    row_ok
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(text)) => !text.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape_is_basic() {
        assert!(is_plausible_email("ada@example.com"));
        assert!(!is_plausible_email("ada@example"));
        assert!(!is_plausible_email("ada example.com"));
        assert!(!is_plausible_email("@example.com"));
    }

    #[test]
    fn accumulator_caps_rows_but_keeps_counting() {
        let catalog = EntityCatalog::builtin().unwrap();
        let schema = catalog.schema(crate::entities::EntityType::Contacts).unwrap();
        let mut warnings = WarningAccumulator::new(2);
        for row in 1..=5 {
            warnings.record(WarningKind::MissingRequired, "first_name", Some(row), "");
        }
        warnings.record(WarningKind::InvalidEmail, "email", Some(9), "nope");
        let finished = warnings.finish(schema);
        assert_eq!(finished.len(), 2);
        assert_eq!(finished[0].count, 5);
        assert_eq!(finished[0].rows, vec![1, 2]);
        assert_eq!(finished[0].severity, Severity::Error);
        assert_eq!(finished[1].kind, WarningKind::InvalidEmail);
        assert!(finished[1].message.contains("nope"));
    }
}
