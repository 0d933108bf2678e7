use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use super::combine::{memory_contribution, pool_share, style_contribution, ManualReview};
use super::{
    apply_exemption, extended_base, finalize_record, merge_extended, normalize, pool_key,
    AssessmentKey, Contribution, Exemption, GradeError, Remarks, RunReport, StudentRecord, Track,
    Warning,
};
use crate::config::{CourseConfig, MarkingKind, UnitConfig};

/// One `(student, score)` row of a results table.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRow {
    pub student_id: String,
    pub score: f64,
}

impl ScoreRow {
    pub fn new(student_id: impl Into<String>, score: f64) -> Self {
        Self {
            student_id: student_id.into(),
            score,
        }
    }
}

/// Already-identified source data for one run.
#[derive(Debug, Clone, Default)]
pub struct TermInputs {
    pub roster: Vec<String>,
    /// Autograded results keyed by unit name (`a5p1`, `a5p1-extended`).
    pub autograded: BTreeMap<String, Vec<ScoreRow>>,
    /// Manual review results (style or memory) keyed by unit name.
    pub manual: BTreeMap<String, Vec<ScoreRow>>,
    pub midterm: Option<Vec<ScoreRow>>,
    pub remarks: Remarks,
    pub exemptions: Vec<Exemption>,
}

#[derive(Debug, Clone)]
struct PlannedUnit {
    config: UnitConfig,
    /// Whether any source delivered data for the unit this term.
    has_data: bool,
}

#[derive(Debug, Clone)]
pub struct AggregationRun {
    pub config: CourseConfig,
    pub students: Vec<StudentRecord>,
    /// Assessments that received data this term.
    pub populated: BTreeSet<AssessmentKey>,
    pub report: RunReport,
    index: HashMap<String, usize>,
}

impl AggregationRun {
    pub fn student(&self, student_id: &str) -> Option<&StudentRecord> {
        self.index.get(student_id).map(|&i| &self.students[i])
    }

    /// Export columns: each populated assignment followed by its populated
    /// style assessment, then the midterm.
    pub fn columns(&self) -> Vec<AssessmentKey> {
        let mut out = Vec::new();
        for n in 0..self.config.assignments {
            let a = AssessmentKey::Assignment(n);
            if !self.populated.contains(&a) {
                continue;
            }
            out.push(a);
            let s = AssessmentKey::AssignmentStyle(n);
            if self.config.is_styled(n) && self.populated.contains(&s) {
                out.push(s);
            }
        }
        if self.populated.contains(&AssessmentKey::Midterm) {
            out.push(AssessmentKey::Midterm);
        }
        out
    }
}

/// Pending contributions of one unit, applied only when the whole unit
/// scored without a configuration error.
struct UnitScores {
    entries: Vec<(usize, AssessmentKey, String, f64)>,
    /// Additions to the overall style pool.
    pool: Vec<(usize, u32, f64)>,
    /// False when the entries are placeholders for data not yet delivered.
    delivered: bool,
}

impl Default for UnitScores {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            pool: Vec::new(),
            delivered: true,
        }
    }
}

pub struct Aggregator {
    config: CourseConfig,
    units: Vec<UnitConfig>,
}

impl Aggregator {
    pub fn new(config: CourseConfig, units: Vec<UnitConfig>) -> Self {
        Self { config, units }
    }

    pub fn config(&self) -> &CourseConfig {
        &self.config
    }

    pub fn run(&self, inputs: &TermInputs) -> AggregationRun {
        let mut report = RunReport::default();
        let mut run = self.empty_run(&inputs.roster);
        let mut plan = self.plan(&mut report);

        for key in inputs.autograded.keys() {
            if extended_base(key).is_some() && !self.units.iter().any(|u| u.name == *key) {
                report.fail(GradeError::configuration(
                    key,
                    None,
                    "extended results have no configured unit",
                ));
            }
        }

        for unit in plan.iter_mut() {
            let scored = self.score_unit(unit, inputs, &run.index, &mut report);
            match scored {
                Ok(Some(scores)) => {
                    unit.has_data = scores.delivered;
                    apply(&mut run.students, scores);
                }
                Ok(None) => {}
                Err(e) => report.fail(e),
            }
        }

        for unit in plan.iter().filter(|u| u.has_data) {
            run.populated.insert(unit.config.assessment);
            if let (MarkingKind::Styled { .. }, Some(n)) =
                (unit.config.marking, unit.config.assignment())
            {
                if inputs.manual.contains_key(&unit.config.name) {
                    run.populated.insert(AssessmentKey::AssignmentStyle(n));
                }
            }
        }
        run.populated.insert(AssessmentKey::OverallStyle);

        for student in run.students.iter_mut() {
            for record in student.assessments.values_mut() {
                merge_extended(record);
            }
        }

        for ex in &inputs.exemptions {
            let Some(&i) = run.index.get(&ex.student_id) else {
                report.warn(Warning::MissingStudent {
                    source: "exemptions".to_string(),
                    student_id: ex.student_id.clone(),
                });
                continue;
            };
            let applied = apply_exemption(
                &mut run.students[i],
                ex.target,
                self.config.unstyled_assignments,
            );
            if !applied {
                tracing::debug!(
                    "exemption of {:?} for {} has no matching record",
                    ex.target,
                    ex.student_id
                );
            }
        }

        for student in run.students.iter_mut() {
            let keys: Vec<AssessmentKey> = student.assessments.keys().copied().collect();
            for key in keys {
                if let Err(e) = finalize_record(student, key) {
                    report.fail(e);
                }
            }
        }

        run.report = report;
        run
    }

    fn empty_run(&self, roster: &[String]) -> AggregationRun {
        let mut students = Vec::with_capacity(roster.len());
        let mut index = HashMap::new();
        for id in roster {
            if index.contains_key(id) {
                tracing::debug!("duplicate class list entry {}", id);
                continue;
            }
            // Every assessment of the layout exists from the start, so an
            // exemption applies even to a student with no submissions.
            let mut rec = StudentRecord::new(id.clone());
            for n in 0..self.config.assignments {
                rec.assessment_mut(AssessmentKey::Assignment(n));
                if self.config.is_styled(n) {
                    rec.assessment_mut(AssessmentKey::AssignmentStyle(n));
                }
            }
            if self.config.has_midterm() {
                rec.assessment_mut(AssessmentKey::Midterm);
            }
            let pool = rec.assessment_mut(AssessmentKey::OverallStyle);
            for n in self.config.unstyled_assignments..self.config.assignments {
                pool.parts.insert(pool_key(n), Contribution::Scored(0.0));
            }
            index.insert(id.clone(), students.len());
            students.push(rec);
        }
        AggregationRun {
            config: self.config.clone(),
            students,
            populated: BTreeSet::new(),
            report: RunReport::default(),
            index,
        }
    }

    /// Validates the configured units. Invalid units are reported and left
    /// out of the run.
    fn plan(&self, report: &mut RunReport) -> Vec<PlannedUnit> {
        let names: HashSet<&str> = self.units.iter().map(|u| u.name.as_str()).collect();
        let mut out = Vec::new();
        for unit in &self.units {
            if let Some(base) = unit.extends() {
                if !names.contains(base) {
                    report.fail(GradeError::configuration(
                        &unit.name,
                        None,
                        format!("extended unit has no base unit `{}`", base),
                    ));
                    continue;
                }
            }
            match (unit.marking, unit.assessment) {
                (MarkingKind::Styled { .. }, AssessmentKey::Assignment(n))
                    if !self.config.is_styled(n) =>
                {
                    report.fail(GradeError::configuration(
                        &unit.name,
                        None,
                        format!("assignment {} has no style component", n),
                    ));
                    continue;
                }
                (_, AssessmentKey::Midterm) if !self.config.has_midterm() => {
                    report.fail(GradeError::configuration(
                        &unit.name,
                        None,
                        "the course has no exams",
                    ));
                    continue;
                }
                (MarkingKind::MemoryQuestion, AssessmentKey::Midterm) => {
                    report.fail(GradeError::configuration(
                        &unit.name,
                        None,
                        "the midterm cannot be a memory question",
                    ));
                    continue;
                }
                _ => {}
            }
            out.push(PlannedUnit {
                config: unit.clone(),
                has_data: false,
            });
        }
        out
    }

    /// Scores one unit. `Ok(None)` means no source delivered data for it.
    fn score_unit(
        &self,
        unit: &PlannedUnit,
        inputs: &TermInputs,
        index: &HashMap<String, usize>,
        report: &mut RunReport,
    ) -> Result<Option<UnitScores>, GradeError> {
        let cfg = &unit.config;
        if cfg.assessment == AssessmentKey::Midterm {
            let Some(rows) = inputs.midterm.as_ref() else {
                return Ok(None);
            };
            let mut scores = UnitScores::default();
            self.score_straight(cfg, rows, "midterm", inputs, index, report, &mut scores)?;
            return Ok(Some(scores));
        }

        match cfg.marking {
            MarkingKind::MemoryQuestion => self.score_memory(cfg, inputs, index, report),
            MarkingKind::Auto => {
                let Some(rows) = inputs.autograded.get(&cfg.name) else {
                    return Ok(None);
                };
                let mut scores = UnitScores::default();
                self.score_straight(cfg, rows, "autograded results", inputs, index, report, &mut scores)?;
                Ok(Some(scores))
            }
            MarkingKind::Styled { style_weight } => {
                let auto = inputs.autograded.get(&cfg.name);
                let manual = inputs.manual.get(&cfg.name);
                if auto.is_none() && manual.is_none() {
                    return Ok(None);
                }
                let mut scores = UnitScores::default();
                if let Some(rows) = auto {
                    self.score_straight(cfg, rows, "autograded results", inputs, index, report, &mut scores)?;
                }
                if let Some(rows) = manual {
                    self.score_style(cfg, style_weight, rows, inputs, index, report, &mut scores)?;
                }
                Ok(Some(scores))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn score_straight(
        &self,
        cfg: &UnitConfig,
        rows: &[ScoreRow],
        source: &str,
        inputs: &TermInputs,
        index: &HashMap<String, usize>,
        report: &mut RunReport,
        out: &mut UnitScores,
    ) -> Result<(), GradeError> {
        for (i, row) in roster_rows(cfg, rows, source, index, report)? {
            let raw = inputs
                .remarks
                .resolve(&cfg.name, &row.student_id, Track::Autograded, row.score);
            let v = normalize(&cfg.name, &row.student_id, raw, cfg.full_marks, cfg.weight)?;
            out.entries.push((i, cfg.assessment, cfg.name.clone(), v));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn score_style(
        &self,
        cfg: &UnitConfig,
        style_weight: f64,
        rows: &[ScoreRow],
        inputs: &TermInputs,
        index: &HashMap<String, usize>,
        report: &mut RunReport,
        out: &mut UnitScores,
    ) -> Result<(), GradeError> {
        let Some(n) = cfg.assignment() else {
            return Ok(());
        };
        for (i, row) in roster_rows(cfg, rows, "style results", index, report)? {
            let raw = inputs
                .remarks
                .resolve(&cfg.name, &row.student_id, Track::ManualReview, row.score);
            let v = style_contribution(&cfg.name, &row.student_id, raw, style_weight)?;
            out.entries
                .push((i, AssessmentKey::AssignmentStyle(n), cfg.name.clone(), v));
            out.pool
                .push((i, n, pool_share(v, self.config.style_assignments())));
        }
        Ok(())
    }

    fn score_memory(
        &self,
        cfg: &UnitConfig,
        inputs: &TermInputs,
        index: &HashMap<String, usize>,
        report: &mut RunReport,
    ) -> Result<Option<UnitScores>, GradeError> {
        let auto = inputs.autograded.get(&cfg.name);
        let manual = inputs.manual.get(&cfg.name);
        let (Some(auto), Some(manual)) = (auto, manual) else {
            // Incomplete manual review zeroes the unit without failing the run.
            report.warn(Warning::IncompleteData {
                unit: cfg.name.clone(),
            });
            let mut zeroed = UnitScores {
                delivered: false,
                ..UnitScores::default()
            };
            let mut students: Vec<(&String, usize)> =
                index.iter().map(|(id, &i)| (id, i)).collect();
            students.sort_unstable_by_key(|&(_, i)| i);
            for (id, i) in students {
                let v = memory_contribution(&cfg.name, id, 0.0, ManualReview::Incomplete)?;
                zeroed.entries.push((i, cfg.assessment, cfg.name.clone(), v));
            }
            return Ok(Some(zeroed));
        };

        let mut components: HashMap<&str, f64> = HashMap::new();
        for (_, row) in roster_rows(cfg, auto, "autograded results", index, report)? {
            let raw = inputs
                .remarks
                .resolve(&cfg.name, &row.student_id, Track::Autograded, row.score);
            let v = normalize(&cfg.name, &row.student_id, raw, cfg.full_marks, cfg.weight)?;
            components.insert(row.student_id.as_str(), v);
        }

        let mut out = UnitScores::default();
        for (i, row) in roster_rows(cfg, manual, "manual review results", index, report)? {
            let Some(&component) = components.get(row.student_id.as_str()) else {
                continue;
            };
            let pct = inputs
                .remarks
                .resolve(&cfg.name, &row.student_id, Track::ManualReview, row.score);
            let v = memory_contribution(
                &cfg.name,
                &row.student_id,
                component,
                ManualReview::Percent(pct),
            )?;
            out.entries.push((i, cfg.assessment, cfg.name.clone(), v));
        }
        Ok(Some(out))
    }
}

/// Rows whose student is on the class list, paired with the roster index.
/// Unknown students are reported and skipped; a student listed twice is a
/// configuration error of the unit.
fn roster_rows<'r>(
    cfg: &UnitConfig,
    rows: &'r [ScoreRow],
    source: &str,
    index: &HashMap<String, usize>,
    report: &mut RunReport,
) -> Result<Vec<(usize, &'r ScoreRow)>, GradeError> {
    let mut seen: HashSet<usize> = HashSet::new();
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(&i) = index.get(&row.student_id) else {
            report.warn(Warning::MissingStudent {
                source: source.to_string(),
                student_id: row.student_id.clone(),
            });
            continue;
        };
        if !seen.insert(i) {
            return Err(GradeError::configuration(
                &cfg.name,
                Some(&row.student_id),
                format!("student listed twice in {}", source),
            ));
        }
        out.push((i, row));
    }
    Ok(out)
}

fn apply(students: &mut [StudentRecord], scores: UnitScores) {
    for (i, key, unit, v) in scores.entries {
        students[i]
            .assessment_mut(key)
            .parts
            .insert(unit, Contribution::Scored(v));
    }
    for (i, n, share) in scores.pool {
        let entry = students[i]
            .assessment_mut(AssessmentKey::OverallStyle)
            .parts
            .entry(pool_key(n))
            .or_insert(Contribution::Scored(0.0));
        if let Contribution::Scored(v) = entry {
            *v += share;
        }
    }
}
