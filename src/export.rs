use anyhow::Context;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::calc::{
    format_number, round_off, AggregationRun, AssessmentKey, Contribution, RunReport, ScoreRow,
    Warning,
};

const MANIFEST_ENTRY: &str = "manifest.json";
pub const GRADEBOOK_FORMAT: &str = "gradebook-sheets-v1";

/// Header and rows of a CSV table.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

fn csv_field(s: &str) -> String {
    if s.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

impl Table {
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        for line in std::iter::once(&self.header).chain(self.rows.iter()) {
            let fields: Vec<String> = line.iter().map(|f| csv_field(f)).collect();
            out.push_str(&fields.join(","));
            out.push('\n');
        }
        out
    }
}

fn render_number(v: f64, places: u32) -> String {
    format_number(round_off(v, places))
}

/// The course export: one column per populated assessment, one row per
/// class list student, totals rounded or `X`.
pub fn edx_marks_table(run: &AggregationRun) -> Table {
    let columns = run.columns();
    let places = run.config.precision;
    let mut header = vec![String::new()];
    header.extend(columns.iter().map(|k| k.label()));

    let rows = run
        .students
        .iter()
        .map(|s| {
            let mut row = vec![s.student_id.clone()];
            for key in &columns {
                let total = s.total(*key).unwrap_or(Contribution::Scored(0.0));
                row.push(total.render(places));
            }
            row
        })
        .collect();
    Table { header, rows }
}

pub fn write_edx_marks(path: &Path, run: &AggregationRun) -> anyhow::Result<()> {
    write_text(path, &edx_marks_table(run).to_csv())
}

fn write_text(path: &Path, text: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.to_string_lossy()))
}

/// Breakdown of one assessment: sorted part keys, then the total.
fn breakdown_table(run: &AggregationRun, key: AssessmentKey) -> Table {
    let places = run.config.precision;
    let parts: BTreeSet<&String> = run
        .students
        .iter()
        .filter_map(|s| s.assessment(key))
        .flat_map(|a| a.parts.keys())
        .collect();

    let mut header = vec!["student".to_string()];
    header.extend(parts.iter().map(|p| p.to_string()));
    header.push("Total (100)".to_string());

    let rows = run
        .students
        .iter()
        .map(|s| {
            let mut row = vec![s.student_id.clone()];
            for p in &parts {
                let v = s
                    .part(key, p)
                    .and_then(|c| c.value())
                    .unwrap_or(0.0);
                row.push(render_number(v, places));
            }
            let total = s.total(key).unwrap_or(Contribution::Scored(0.0));
            row.push(total.render(places));
            row
        })
        .collect();
    Table { header, rows }
}

fn clicker_table(run: &AggregationRun, clicker: &[ScoreRow], report: &mut RunReport) -> Table {
    let places = run.config.precision;
    let header = ["student", "Marks", "Total (100)"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let mut rows = Vec::new();
    for r in clicker {
        if run.student(&r.student_id).is_none() {
            report.warn(Warning::MissingStudent {
                source: "clicker results".to_string(),
                student_id: r.student_id.clone(),
            });
            continue;
        }
        let total = if run.config.clicker_weight > 0.0 {
            r.score / run.config.clicker_weight * 100.0
        } else {
            0.0
        };
        rows.push(vec![
            r.student_id.clone(),
            render_number(r.score, places),
            render_number(total, places),
        ]);
    }
    Table { header, rows }
}

/// Gradebook sheets: `A<n>` per populated assignment, `AStyle`, and
/// `iClicker` when clicker results exist.
pub fn gradebook_sheets(
    run: &AggregationRun,
    clicker: Option<&[ScoreRow]>,
    report: &mut RunReport,
) -> Vec<(String, Table)> {
    let mut sheets = Vec::new();
    for key in run.columns() {
        if let AssessmentKey::Assignment(n) = key {
            sheets.push((format!("A{}", n), breakdown_table(run, key)));
        }
    }
    sheets.push((
        "AStyle".to_string(),
        breakdown_table(run, AssessmentKey::OverallStyle),
    ));
    if let Some(rows) = clicker {
        sheets.push(("iClicker".to_string(), clicker_table(run, rows, report)));
    }
    sheets
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradebookSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub sheets: Vec<String>,
}

/// Writes the sheets as CSV entries of a zip bundle with a manifest that
/// lists each entry and its SHA-256.
pub fn write_gradebook(
    out_path: &Path,
    run_id: &str,
    sheets: &[(String, Table)],
) -> anyhow::Result<GradebookSummary> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let entries: Vec<(String, String)> = sheets
        .iter()
        .map(|(name, table)| (format!("sheets/{}.csv", name), table.to_csv()))
        .collect();

    let generated_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let manifest = json!({
        "format": GRADEBOOK_FORMAT,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "runId": run_id,
        "generatedAt": generated_at,
        "sheets": sheets
            .iter()
            .zip(entries.iter())
            .map(|((name, table), (entry, text))| json!({
                "name": name,
                "entry": entry,
                "rows": table.rows.len(),
                "sha256": format!("{:x}", Sha256::digest(text.as_bytes())),
            }))
            .collect::<Vec<_>>(),
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    for (entry, text) in &entries {
        zip.start_file(entry.as_str(), opts)
            .with_context(|| format!("failed to start entry {}", entry))?;
        zip.write_all(text.as_bytes())
            .with_context(|| format!("failed to write entry {}", entry))?;
    }

    zip.finish().context("failed to finalize gradebook bundle")?;

    Ok(GradebookSummary {
        bundle_format: GRADEBOOK_FORMAT.to_string(),
        entry_count: entries.len() + 1,
        sheets: sheets.iter().map(|(n, _)| n.clone()).collect(),
    })
}

/// Email addresses of students whose Assignment 0 total is below the pass
/// mark. Empty when Assignment 0 has no data this term.
pub fn a0_followups(run: &AggregationRun) -> Vec<String> {
    if !run.populated.contains(&AssessmentKey::Assignment(0)) {
        return Vec::new();
    }
    run.students
        .iter()
        .filter(|s| {
            matches!(
                s.total(AssessmentKey::Assignment(0)),
                Some(Contribution::Scored(v)) if round_off(v, 2) < run.config.a0_pass_mark
            )
        })
        .map(|s| format!("{}@{}", s.student_id, run.config.email_domain))
        .collect()
}

pub fn write_a0_result(path: &Path, emails: &[String]) -> anyhow::Result<()> {
    let mut text = emails.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    write_text(path, &text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_fields_are_quoted_when_needed() {
        let t = Table {
            header: vec!["".into(), "Assignment1".into()],
            rows: vec![vec!["Doe, Jane".into(), "say \"hi\"".into()]],
        };
        assert_eq!(t.to_csv(), ",Assignment1\n\"Doe, Jane\",\"say \"\"hi\"\"\"\n");
    }
}
