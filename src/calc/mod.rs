mod combine;
mod engine;
mod error;
mod exempt;
mod extended;
mod finalize;
mod normalize;
mod remarks;
mod select;

use serde::Serialize;
use std::collections::BTreeMap;

pub use engine::{AggregationRun, Aggregator, ScoreRow, TermInputs};
pub use error::{GradeError, RunReport, Warning};
pub use exempt::{apply_exemption, Exemption};
pub use extended::{extended_base, merge_extended};
pub use finalize::finalize_record;
pub use normalize::normalize;
pub use remarks::{Remark, Remarks, Track};
pub use select::{select_best, Attempt, DeadlinePolicy};

/// Marker rendered in place of an excluded total.
pub const EXEMPT_TOKEN: &str = "X";

/// A recorded score, or the exemption sentinel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Contribution {
    Excluded,
    Scored(f64),
}

impl Contribution {
    pub fn value(self) -> Option<f64> {
        match self {
            Contribution::Excluded => None,
            Contribution::Scored(v) => Some(v),
        }
    }

    pub fn is_excluded(self) -> bool {
        matches!(self, Contribution::Excluded)
    }

    pub fn render(self, places: u32) -> String {
        match self {
            Contribution::Excluded => EXEMPT_TOKEN.to_string(),
            Contribution::Scored(v) => format_number(round_off(v, places)),
        }
    }
}

impl Serialize for Contribution {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Contribution::Excluded => s.serialize_str(EXEMPT_TOKEN),
            Contribution::Scored(v) => s.serialize_f64(*v),
        }
    }
}

/// Top-level gradable categories of a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AssessmentKey {
    Assignment(u32),
    AssignmentStyle(u32),
    Midterm,
    OverallStyle,
}

impl AssessmentKey {
    /// Column label used by the course export.
    pub fn label(self) -> String {
        match self {
            AssessmentKey::Assignment(n) => format!("Assignment{}", n),
            AssessmentKey::AssignmentStyle(n) => format!("Assignment{}Style", n),
            AssessmentKey::Midterm => "Midterm".to_string(),
            AssessmentKey::OverallStyle => "Style".to_string(),
        }
    }
}

/// Key of a per-assignment entry inside the overall style pool.
pub fn pool_key(assignment: u32) -> String {
    format!("Assignment {}", assignment)
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentRecord {
    pub total: Contribution,
    pub parts: BTreeMap<String, Contribution>,
    finalized: bool,
}

impl Default for AssessmentRecord {
    fn default() -> Self {
        Self {
            total: Contribution::Scored(0.0),
            parts: BTreeMap::new(),
            finalized: false,
        }
    }
}

impl AssessmentRecord {
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Sum of non-extended scored parts.
    pub fn parts_sum(&self) -> f64 {
        self.parts
            .iter()
            .filter(|(k, _)| extended_base(k).is_none())
            .filter_map(|(_, v)| v.value())
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentRecord {
    pub student_id: String,
    pub assessments: BTreeMap<AssessmentKey, AssessmentRecord>,
}

impl StudentRecord {
    pub fn new(student_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            assessments: BTreeMap::new(),
        }
    }

    pub fn assessment(&self, key: AssessmentKey) -> Option<&AssessmentRecord> {
        self.assessments.get(&key)
    }

    pub fn assessment_mut(&mut self, key: AssessmentKey) -> &mut AssessmentRecord {
        self.assessments.entry(key).or_default()
    }

    pub fn total(&self, key: AssessmentKey) -> Option<Contribution> {
        self.assessments.get(&key).map(|a| a.total)
    }

    pub fn part(&self, key: AssessmentKey, unit: &str) -> Option<Contribution> {
        self.assessments
            .get(&key)
            .and_then(|a| a.parts.get(unit))
            .copied()
    }
}

/// VB6-style rounding generalized to `places` decimals:
/// `Int(10^p * x + 0.5) / 10^p`
pub fn round_off(x: f64, places: u32) -> f64 {
    let f = 10_f64.powi(places as i32);
    ((f * x) + 0.5).floor() / f
}

/// Shortest decimal rendering (`8` rather than `8.0`).
pub fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_off_matches_vb6_at_one_place() {
        assert_eq!(round_off(0.0, 1), 0.0);
        assert_eq!(round_off(3.54, 1), 3.5);
        assert_eq!(round_off(35.6818, 1), 35.7);
        assert_eq!(round_off(7.123456, 5), 7.12346);
    }

    #[test]
    fn render_uses_exempt_token() {
        assert_eq!(Contribution::Excluded.render(5), "X");
        assert_eq!(Contribution::Scored(8.0).render(5), "8");
        assert_eq!(Contribution::Scored(7.5).render(5), "7.5");
    }

    #[test]
    fn parts_sum_skips_extended_and_excluded() {
        let mut rec = AssessmentRecord::default();
        rec.parts.insert("a5p1".into(), Contribution::Scored(4.0));
        rec.parts.insert("a5p1-extended".into(), Contribution::Scored(9.0));
        rec.parts.insert("a5p2".into(), Contribution::Excluded);
        rec.parts.insert("a5p3".into(), Contribution::Scored(2.5));
        assert_eq!(rec.parts_sum(), 6.5);
    }
}
