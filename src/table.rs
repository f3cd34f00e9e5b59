//! Plain-text tables for previews, job listings, and validation reports.

use std::{borrow::Cow, fmt::Write as _};

use crate::{
    job::ImportJob,
    service::Preview,
    validate::ValidationReport,
};

const GAP: &str = "  ";
const MAX_CELL_WIDTH: usize = 40;

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            (0..headers.len())
                .map(|idx| clip(&flatten(row.get(idx).map(String::as_str).unwrap_or(""))))
                .collect()
        })
        .collect();
    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            cells
                .iter()
                .map(|row| visible_width(&row[idx]))
                .chain(std::iter::once(visible_width(header)))
                .max()
                .unwrap_or(0)
                .max(3)
        })
        .collect();

    let mut output = String::new();
    push_line(&mut output, headers.iter().map(String::as_str), &widths);
    let rules: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    push_line(&mut output, rules.iter().map(String::as_str), &widths);
    for row in &cells {
        push_line(&mut output, row.iter().map(String::as_str), &widths);
    }
    output
}

fn push_line<'a>(output: &mut String, values: impl Iterator<Item = &'a str>, widths: &[usize]) {
    let mut line = String::new();
    for (idx, (value, width)) in values.zip(widths).enumerate() {
        if idx > 0 {
            line.push_str(GAP);
        }
        line.push_str(value);
        let pad = width.saturating_sub(visible_width(value));
        line.extend(std::iter::repeat_n(' ', pad));
    }
    let _ = writeln!(output, "{}", line.trim_end());
}

fn visible_width(value: &str) -> usize {
    value.chars().count()
}

/// Control characters would break the grid; fold them into spaces.
fn flatten(value: &str) -> Cow<'_, str> {
    if value.chars().any(char::is_control) {
        Cow::Owned(
            value
                .chars()
                .map(|ch| if ch.is_control() { ' ' } else { ch })
                .collect(),
        )
    } else {
        Cow::Borrowed(value)
    }
}

fn clip(value: &str) -> String {
    if visible_width(value) <= MAX_CELL_WIDTH {
        return value.to_string();
    }
    let mut clipped: String = value.chars().take(MAX_CELL_WIDTH - 3).collect();
    clipped.push_str("...");
    clipped
}

pub fn preview_table(preview: &Preview) -> String {
    let rows: Vec<Vec<String>> = preview
        .rows
        .iter()
        .map(|row| {
            let mut cells: Vec<String> = row.values().map(str::to_string).collect();
            cells.resize(preview.headers.len(), String::new());
            cells
        })
        .collect();
    render_table(&preview.headers, &rows)
}

pub fn jobs_table(jobs: &[ImportJob]) -> String {
    let headers: Vec<String> = [
        "id", "entity", "file", "status", "rows", "ok", "failed", "created",
    ]
    .iter()
    .map(|h| h.to_string())
    .collect();
    let rows: Vec<Vec<String>> = jobs
        .iter()
        .map(|job| {
            vec![
                job.id.to_string(),
                job.entity_type.to_string(),
                job.original_filename.clone(),
                job.status.to_string(),
                job.total_rows.to_string(),
                job.success_count.to_string(),
                job.error_count.to_string(),
                job.created_at.format("%Y-%m-%d %H:%M").to_string(),
            ]
        })
        .collect();
    render_table(&headers, &rows)
}

pub fn report_summary(report: &ValidationReport) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "Rows: {} total, {} sampled, {} valid, {} with errors (quality {}%)",
        report.total_rows,
        report.sampled_rows,
        report.valid_rows,
        report.error_rows,
        report.quality_score
    );
    if report.warnings.is_empty() {
        output.push_str("No warnings.\n");
        return output;
    }
    let headers: Vec<String> = ["severity", "type", "field", "count", "rows", "message"]
        .iter()
        .map(|h| h.to_string())
        .collect();
    let rows: Vec<Vec<String>> = report
        .warnings
        .iter()
        .map(|warning| {
            vec![
                format!("{:?}", warning.severity).to_lowercase(),
                warning.kind.as_str().to_string(),
                warning.field.clone(),
                warning.count.to_string(),
                warning
                    .rows
                    .iter()
                    .map(usize::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
                warning.message.clone(),
            ]
        })
        .collect();
    output.push_str(&render_table(&headers, &rows));
    output
}
