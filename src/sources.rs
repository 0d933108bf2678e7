use anyhow::Context;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use crate::calc::{
    extended_base, AssessmentKey, Exemption, GradeError, Remark, Remarks, RunReport, ScoreRow,
    TermInputs,
};
use crate::config::{CourseConfig, MarkingKind, TermPaths, UnitConfig};

fn read_lines(path: &Path) -> anyhow::Result<Vec<String>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(text
        .lines()
        .map(|l| l.trim_end_matches('\r').to_string())
        .collect())
}

/// Splits one CSV line. Double-quoted fields may contain commas; `""`
/// inside quotes is a literal quote.
pub fn split_csv_line(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                cur.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => out.push(std::mem::take(&mut cur).trim().to_string()),
            _ => cur.push(c),
        }
    }
    out.push(cur.trim().to_string());
    out
}

fn is_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Ordered student ids of a class list: blank and `#` lines are skipped,
/// the id is the second comma-separated field.
pub fn parse_classlist(path: &Path) -> anyhow::Result<Vec<String>> {
    let mut out = Vec::new();
    for line in read_lines(path)? {
        let t = line.trim();
        if t.is_empty() || t.starts_with('#') {
            continue;
        }
        match t.split(',').nth(1).map(str::trim) {
            Some(id) if !id.is_empty() => out.push(id.to_string()),
            _ => tracing::warn!("class list line without a student id: {}", t),
        }
    }
    Ok(out)
}

struct Header {
    columns: HashMap<String, usize>,
}

impl Header {
    fn parse(line: &str) -> Self {
        let columns = split_csv_line(line)
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name, i))
            .collect();
        Self { columns }
    }

    fn get<'a>(&self, row: &'a [String], name: &str) -> Option<&'a str> {
        self.columns
            .get(name)
            .and_then(|&i| row.get(i))
            .map(|s| s.as_str())
    }

    fn require<'a>(&self, row: &'a [String], name: &str) -> anyhow::Result<&'a str> {
        self.get(row, name)
            .ok_or_else(|| anyhow::anyhow!("missing column {}", name))
    }
}

/// Units of `config.csv` (`project,fullMarks,weight,isHandMarking,styleWeight`).
/// Projects containing `#` are commented out.
pub fn parse_unit_config(path: &Path) -> anyhow::Result<Vec<UnitConfig>> {
    let lines = read_lines(path)?;
    let mut it = lines.iter().filter(|l| !l.trim().is_empty());
    let header_line = it
        .next()
        .ok_or_else(|| anyhow::anyhow!("{} is empty", path.to_string_lossy()))?;
    let header = Header::parse(header_line);

    let mut units = Vec::new();
    for line in it {
        let row = split_csv_line(line);
        let project = header.require(&row, "project")?;
        if project.contains('#') || project.is_empty() {
            continue;
        }
        let full_marks = is_number(header.require(&row, "fullMarks")?)
            .ok_or_else(|| anyhow::anyhow!("bad fullMarks for {}", project))?;
        let weight = is_number(header.require(&row, "weight")?)
            .ok_or_else(|| anyhow::anyhow!("bad weight for {}", project))?;
        let marking = match header.get(&row, "isHandMarking").unwrap_or("0").trim() {
            "1" => MarkingKind::MemoryQuestion,
            "2" => {
                let style_weight = header
                    .get(&row, "styleWeight")
                    .and_then(is_number)
                    .ok_or_else(|| anyhow::anyhow!("bad styleWeight for {}", project))?;
                MarkingKind::Styled { style_weight }
            }
            _ => MarkingKind::Auto,
        };
        let unit = UnitConfig::new(project, full_marks, weight, marking)
            .ok_or_else(|| anyhow::anyhow!("cannot read assignment number of {}", project))?;
        units.push(unit);
    }
    if let Some(last) = units.last() {
        tracing::info!("latest assessment in config is {:?}", last.assessment);
    }
    Ok(units)
}

/// `remarks.csv`: header, then `student,unit,newTotal,markusRemark`.
/// Non-numeric values mean "no remark on this track".
pub fn parse_remarks(path: &Path) -> anyhow::Result<Remarks> {
    let mut remarks = Remarks::default();
    for line in read_lines(path)?.iter().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        let row = split_csv_line(line);
        if row.len() < 4 {
            anyhow::bail!("bad remark line: {}", line);
        }
        remarks.insert(
            &row[1],
            &row[0],
            Remark {
                autograded: is_number(&row[2]),
                manual_review: is_number(&row[3]),
            },
        );
    }
    Ok(remarks)
}

/// Assessment named by an exemption selector: `A5`/`a5` (the digit is the
/// second character) or `MID`.
pub fn parse_exemption_target(selector: &str) -> Option<AssessmentKey> {
    let s = selector.trim();
    if s.eq_ignore_ascii_case("MID") {
        return Some(AssessmentKey::Midterm);
    }
    s.chars()
        .nth(1)
        .and_then(|c| c.to_digit(10))
        .map(AssessmentKey::Assignment)
}

pub fn parse_exemptions(path: &Path) -> anyhow::Result<Vec<Exemption>> {
    let mut out = Vec::new();
    for line in read_lines(path)? {
        let row = split_csv_line(&line);
        if row.len() < 2 || row[0].is_empty() {
            continue;
        }
        match parse_exemption_target(&row[1]) {
            Some(target) => out.push(Exemption {
                student_id: row[0].clone(),
                target,
            }),
            None => tracing::warn!("unrecognized exemption {} for {}", row[1], row[0]),
        }
    }
    Ok(out)
}

/// Headerless `student,score` rows.
pub fn parse_score_rows(path: &Path) -> anyhow::Result<Vec<ScoreRow>> {
    let mut out = Vec::new();
    for line in read_lines(path)? {
        if line.trim().is_empty() {
            continue;
        }
        let row = split_csv_line(&line);
        let (Some(id), Some(score)) = (row.first(), row.get(1)) else {
            anyhow::bail!("bad score line in {}: {}", path.to_string_lossy(), line);
        };
        let score = is_number(score).ok_or_else(|| {
            anyhow::anyhow!("bad score in {}: {}", path.to_string_lossy(), line)
        })?;
        out.push(ScoreRow::new(id.as_str(), score));
    }
    Ok(out)
}

/// Midterm export with `Email` and `Total` columns, keyed by the local part
/// of the email.
pub fn parse_midterm_export(path: &Path) -> anyhow::Result<Vec<ScoreRow>> {
    let lines = read_lines(path)?;
    let mut it = lines.iter().filter(|l| !l.trim().is_empty());
    let Some(header_line) = it.next() else {
        return Ok(Vec::new());
    };
    let header = Header::parse(header_line);
    let mut out = Vec::new();
    for line in it {
        let row = split_csv_line(line);
        let email = header.require(&row, "Email")?;
        let total = header.require(&row, "Total")?;
        let id = email.split('@').next().unwrap_or_default();
        let total = is_number(total)
            .ok_or_else(|| anyhow::anyhow!("bad midterm total for {}: {}", email, total))?;
        out.push(ScoreRow::new(id, total));
    }
    Ok(out)
}

fn sorted_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for ent in std::fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.to_string_lossy()))?
    {
        let p = ent?.path();
        if p.is_file() {
            files.push(p);
        }
    }
    files.sort();
    Ok(files)
}

fn file_name(p: &Path) -> &str {
    p.file_name().and_then(|s| s.to_str()).unwrap_or("")
}

/// Autograded result files: `project-<unit>-...csv`; names containing
/// `extended` feed `<unit>-extended`.
pub fn scan_autograded_results(dir: &Path) -> anyhow::Result<BTreeMap<String, PathBuf>> {
    let mut out = BTreeMap::new();
    for p in sorted_files(dir)? {
        let name = file_name(&p);
        if !name.contains("project") {
            continue;
        }
        let Some(unit) = name.split('-').nth(1).filter(|s| !s.is_empty()) else {
            continue;
        };
        let unit = if name.contains("extended") {
            format!("{}-extended", unit)
        } else {
            unit.to_string()
        };
        out.insert(unit, p);
    }
    Ok(out)
}

/// Manual review files, keyed by the leading `[a-z0-9]+` run of the name.
pub fn scan_manual_results(dir: &Path) -> anyhow::Result<BTreeMap<String, PathBuf>> {
    let unit_name = Regex::new(r"^[a-z0-9]+").context("invalid unit name pattern")?;
    let mut out = BTreeMap::new();
    for p in sorted_files(dir)? {
        if let Some(m) = unit_name.find(file_name(&p)) {
            out.insert(m.as_str().to_string(), p);
        }
    }
    Ok(out)
}

pub fn find_midterm_file(dir: &Path) -> anyhow::Result<Option<PathBuf>> {
    Ok(sorted_files(dir)?
        .into_iter()
        .find(|p| file_name(p).contains("midterm")))
}

/// Units and inputs of one term folder.
#[derive(Debug, Clone, Default)]
pub struct LoadedTerm {
    pub units: Vec<UnitConfig>,
    pub inputs: TermInputs,
    /// One configuration error per unit whose result file could not be read.
    pub report: RunReport,
}

/// Rows of one unit's result file. A file that fails to parse aborts that
/// unit only.
fn unit_rows(
    unit: &str,
    rows: anyhow::Result<Vec<ScoreRow>>,
    report: &mut RunReport,
    failed: &mut BTreeSet<String>,
) -> Option<Vec<ScoreRow>> {
    match rows {
        Ok(rows) => Some(rows),
        Err(e) => {
            report.fail(GradeError::configuration(unit, None, format!("{:#}", e)));
            failed.insert(unit.to_string());
            None
        }
    }
}

/// Reads every source of a term folder into typed inputs. Units beyond the
/// course's assignment count are dropped. Result files for units missing
/// from `config.csv` are skipped, except extended results, which the engine
/// reports. An unreadable result file drops its unit (and that unit's
/// extended variant) from the run and is recorded in the returned report.
pub fn load_term_inputs(paths: &TermPaths, config: &CourseConfig) -> anyhow::Result<LoadedTerm> {
    tracing::info!("loading config");
    let mut units = parse_unit_config(&paths.unit_config())?;
    units.retain(|u| match u.assignment() {
        Some(n) if n >= config.assignments => {
            tracing::warn!("{} is outside the course layout, skipping", u.name);
            false
        }
        _ => true,
    });
    let configured = |name: &str| units.iter().any(|u| u.name == name);
    let mut report = RunReport::default();
    let mut failed = BTreeSet::new();

    let mut inputs = TermInputs {
        roster: parse_classlist(&paths.classlist())?,
        ..TermInputs::default()
    };

    if paths.remarks().is_file() {
        inputs.remarks = parse_remarks(&paths.remarks())?;
        tracing::info!("loaded {} remarks", inputs.remarks.len());
    }
    if paths.exemptions().is_file() {
        inputs.exemptions = parse_exemptions(&paths.exemptions())?;
    }

    tracing::info!("reading autograded results");
    for (unit, p) in scan_autograded_results(&paths.marmoset_results())? {
        if !configured(&unit) && !unit.ends_with("-extended") {
            tracing::debug!("skipping unconfigured results {}", p.to_string_lossy());
            continue;
        }
        if let Some(rows) = unit_rows(&unit, parse_score_rows(&p), &mut report, &mut failed) {
            inputs.autograded.insert(unit, rows);
        }
    }

    tracing::info!("reading manual review results");
    for (unit, p) in scan_manual_results(&paths.markus_results())? {
        if !configured(&unit) {
            tracing::debug!("skipping unconfigured review {}", p.to_string_lossy());
            continue;
        }
        if let Some(rows) = unit_rows(&unit, parse_score_rows(&p), &mut report, &mut failed) {
            inputs.manual.insert(unit, rows);
        }
    }

    if configured("midterm") {
        if let Some(p) = find_midterm_file(&paths.midterm_results())? {
            tracing::info!("reading midterm export");
            let rows = parse_midterm_export(&p);
            inputs.midterm = unit_rows("midterm", rows, &mut report, &mut failed);
        }
    }

    if !failed.is_empty() {
        let dropped = |name: &str| {
            failed.contains(name) || extended_base(name).is_some_and(|b| failed.contains(b))
        };
        units.retain(|u| !dropped(&u.name));
        inputs.autograded.retain(|k, _| !dropped(k));
        inputs.manual.retain(|k, _| !dropped(k));
    }

    Ok(LoadedTerm {
        units,
        inputs,
        report,
    })
}
