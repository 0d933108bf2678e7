use anyhow::Context;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

use crate::sources::split_csv_line;

/// A course export read back: column labels (without the id column) and
/// each student's cells keyed by label.
#[derive(Debug, Clone, Default)]
pub struct MarksSheet {
    pub columns: Vec<String>,
    pub rows: HashMap<String, HashMap<String, String>>,
}

pub fn parse_marks_sheet(text: &str) -> MarksSheet {
    let mut lines = text
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return MarksSheet::default();
    };
    let columns: Vec<String> = split_csv_line(header).into_iter().skip(1).collect();

    let mut rows = HashMap::new();
    for line in lines {
        let fields = split_csv_line(line);
        let Some((id, cells)) = fields.split_first() else {
            continue;
        };
        let by_label = columns
            .iter()
            .cloned()
            .zip(cells.iter().cloned())
            .collect::<HashMap<_, _>>();
        rows.insert(id.clone(), by_label);
    }
    MarksSheet { columns, rows }
}

pub fn read_marks_sheet(path: &Path) -> anyhow::Result<MarksSheet> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    Ok(parse_marks_sheet(&String::from_utf8_lossy(&bytes)))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellChange {
    pub student_id: String,
    pub assessment: String,
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarksDiff {
    pub changes: Vec<CellChange>,
    /// Columns only in the new export.
    pub added_columns: Vec<String>,
    /// Columns only in the old export.
    pub removed_columns: Vec<String>,
    /// Class list students absent from either export.
    pub missing_students: Vec<String>,
}

fn same_cell(a: &str, b: &str) -> bool {
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) => x == y,
        _ => a.trim() == b.trim(),
    }
}

/// Cell-by-cell comparison in class list order. Columns are matched by
/// label, so reordered or newly populated assessments do not shift values.
pub fn diff_marks(old: &MarksSheet, new: &MarksSheet, roster: &[String]) -> MarksDiff {
    let shared: Vec<&String> = old
        .columns
        .iter()
        .filter(|c| new.columns.contains(c))
        .collect();
    let mut out = MarksDiff {
        added_columns: new
            .columns
            .iter()
            .filter(|c| !old.columns.contains(c))
            .cloned()
            .collect(),
        removed_columns: old
            .columns
            .iter()
            .filter(|c| !new.columns.contains(c))
            .cloned()
            .collect(),
        ..MarksDiff::default()
    };

    for student in roster {
        let (Some(a), Some(b)) = (old.rows.get(student), new.rows.get(student)) else {
            out.missing_students.push(student.clone());
            continue;
        };
        for col in &shared {
            let before = a.get(*col).map(String::as_str).unwrap_or("");
            let after = b.get(*col).map(String::as_str).unwrap_or("");
            if !same_cell(before, after) {
                out.changes.push(CellChange {
                    student_id: student.clone(),
                    assessment: col.to_string(),
                    old: before.to_string(),
                    new: after.to_string(),
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_align_by_label() {
        let old = parse_marks_sheet(",Assignment0,Assignment1,Midterm\njdoe,100,80,70\nasmith,90,X,60\n");
        let new = parse_marks_sheet(
            ",Assignment0,Assignment1,Assignment2,Midterm\njdoe,100,80,55,72\nasmith,90.0,X,40,60\n",
        );
        let roster = vec!["jdoe".to_string(), "asmith".to_string(), "zed".to_string()];
        let d = diff_marks(&old, &new, &roster);

        assert_eq!(
            d.changes,
            vec![CellChange {
                student_id: "jdoe".into(),
                assessment: "Midterm".into(),
                old: "70".into(),
                new: "72".into(),
            }]
        );
        assert_eq!(d.added_columns, vec!["Assignment2"]);
        assert!(d.removed_columns.is_empty());
        assert_eq!(d.missing_students, vec!["zed"]);
    }

    #[test]
    fn exemption_change_is_reported() {
        let old = parse_marks_sheet(",Assignment5\njdoe,40\n");
        let new = parse_marks_sheet(",Assignment5\njdoe,X\n");
        let d = diff_marks(&old, &new, &["jdoe".to_string()]);
        assert_eq!(d.changes.len(), 1);
        assert_eq!(d.changes[0].new, "X");
    }
}
