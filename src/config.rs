use anyhow::Context;
use crate::calc::{extended_base, AssessmentKey};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Course layout and run settings. Passed into the engine explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CourseConfig {
    /// Assignments `0..unstyled_assignments` carry no style component.
    pub unstyled_assignments: u32,
    pub assignments: u32,
    pub exams: u32,
    pub clicker_weight: f64,
    pub grace_period_minutes: i64,
    /// Decimal places of exported totals.
    pub precision: u32,
    pub email_domain: String,
    pub a0_pass_mark: f64,
}

impl Default for CourseConfig {
    fn default() -> Self {
        Self {
            unstyled_assignments: 5,
            assignments: 10,
            exams: 1,
            clicker_weight: 5.0,
            grace_period_minutes: 1,
            precision: 5,
            email_domain: "uwaterloo.ca".to_string(),
            a0_pass_mark: 100.0,
        }
    }
}

impl CourseConfig {
    pub fn style_assignments(&self) -> u32 {
        self.assignments.saturating_sub(self.unstyled_assignments)
    }

    pub fn is_styled(&self, assignment: u32) -> bool {
        assignment >= self.unstyled_assignments && assignment < self.assignments
    }

    /// Whether the layout carries a midterm column.
    pub fn has_midterm(&self) -> bool {
        self.exams > 0
    }

    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.grace_period_minutes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MarkingKind {
    Auto,
    /// Autograded component multiplied by a manual-review percentage.
    MemoryQuestion,
    Styled { style_weight: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitConfig {
    pub name: String,
    pub assessment: AssessmentKey,
    pub full_marks: f64,
    pub weight: f64,
    pub marking: MarkingKind,
}

impl UnitConfig {
    /// Builds a unit from its project name (`a5p1`, `a5p1-extended`,
    /// `midterm`). Returns `None` when no assignment number can be read.
    pub fn new(name: &str, full_marks: f64, weight: f64, marking: MarkingKind) -> Option<Self> {
        let assessment = if name.eq_ignore_ascii_case("midterm") {
            AssessmentKey::Midterm
        } else {
            AssessmentKey::Assignment(assignment_number(name)?)
        };
        Some(Self {
            name: name.to_string(),
            assessment,
            full_marks,
            weight,
            marking,
        })
    }

    pub fn extends(&self) -> Option<&str> {
        extended_base(&self.name)
    }

    pub fn assignment(&self) -> Option<u32> {
        match self.assessment {
            AssessmentKey::Assignment(n) => Some(n),
            _ => None,
        }
    }
}

/// Assignment number of a project name: the first digit after the leading
/// letters (`a5p1` → 5, `lab3b` → 3).
pub fn assignment_number(name: &str) -> Option<u32> {
    let rest = name.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    rest.chars().next().and_then(|c| c.to_digit(10))
}

/// Well-known files of one term folder.
#[derive(Debug, Clone)]
pub struct TermPaths {
    pub root: PathBuf,
}

impl TermPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn join(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    pub fn classlist(&self) -> PathBuf {
        self.join("classlist.csv")
    }
    pub fn unit_config(&self) -> PathBuf {
        self.join("config.csv")
    }
    pub fn course_config(&self) -> PathBuf {
        self.join("course.json")
    }
    pub fn remarks(&self) -> PathBuf {
        self.join("remarks.csv")
    }
    pub fn exemptions(&self) -> PathBuf {
        self.join("exemptions.csv")
    }
    pub fn marmoset_results(&self) -> PathBuf {
        self.join("marmoset_result")
    }
    pub fn markus_results(&self) -> PathBuf {
        self.join("markus_result")
    }
    pub fn midterm_results(&self) -> PathBuf {
        self.join("midterm")
    }
    pub fn clicker(&self) -> PathBuf {
        self.join("clicker_result/final_grades.csv")
    }
    pub fn edx_marks(&self) -> PathBuf {
        self.join("edx_marks.csv")
    }
    pub fn gradebook(&self) -> PathBuf {
        self.join("gradebook/gradebook.zip")
    }
    pub fn a0_result(&self) -> PathBuf {
        self.join("a0_result.txt")
    }
}

/// Course settings for a term: `course.json` in the term folder when
/// present, otherwise the defaults.
pub fn load_course_config(paths: &TermPaths) -> anyhow::Result<CourseConfig> {
    let p = paths.course_config();
    if !p.is_file() {
        return Ok(CourseConfig::default());
    }
    read_course_config(&p)
}

fn read_course_config(p: &Path) -> anyhow::Result<CourseConfig> {
    let text = std::fs::read_to_string(p)
        .with_context(|| format!("failed to read {}", p.to_string_lossy()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is invalid", p.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout() {
        let c = CourseConfig::default();
        assert_eq!(c.style_assignments(), 5);
        assert!(c.is_styled(5));
        assert!(!c.is_styled(4));
        assert!(!c.is_styled(10));
        assert!(c.has_midterm());
        assert_eq!(c.grace_period(), chrono::Duration::minutes(1));
    }

    #[test]
    fn unit_names_map_to_assessments() {
        let u = UnitConfig::new("a5p1-extended", 10.0, 40.0, MarkingKind::Auto).expect("unit");
        assert_eq!(u.assessment, AssessmentKey::Assignment(5));
        assert_eq!(u.extends(), Some("a5p1"));

        let m = UnitConfig::new("midterm", 50.0, 100.0, MarkingKind::Auto).expect("unit");
        assert_eq!(m.assessment, AssessmentKey::Midterm);
        assert!(UnitConfig::new("bonus", 1.0, 1.0, MarkingKind::Auto).is_none());
    }

    #[test]
    fn partial_course_json_keeps_defaults() {
        let c: CourseConfig =
            serde_json::from_str(r#"{ "assignments": 8, "precision": 2 }"#).expect("parse");
        assert_eq!(c.assignments, 8);
        assert_eq!(c.precision, 2);
        assert_eq!(c.unstyled_assignments, 5);
        assert_eq!(c.style_assignments(), 3);
    }
}
