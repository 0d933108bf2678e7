use super::{pool_key, AssessmentKey, Contribution, StudentRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exemption {
    pub student_id: String,
    /// `Assignment(n)` or `Midterm`.
    pub target: AssessmentKey,
}

/// Excludes `target` from the student's grades. Styled assignments also
/// drop their style assessment and their entry in the overall style pool,
/// so the pool does not count them as zero.
///
/// Returns false when the student has no record for `target`.
pub fn apply_exemption(
    record: &mut StudentRecord,
    target: AssessmentKey,
    unstyled_assignments: u32,
) -> bool {
    let Some(assessment) = record.assessments.get_mut(&target) else {
        return false;
    };
    assessment.total = Contribution::Excluded;

    if let AssessmentKey::Assignment(n) = target {
        if n >= unstyled_assignments {
            if let Some(style) = record
                .assessments
                .get_mut(&AssessmentKey::AssignmentStyle(n))
            {
                style.total = Contribution::Excluded;
            }
            if let Some(pool) = record.assessments.get_mut(&AssessmentKey::OverallStyle) {
                pool.parts.remove(&pool_key(n));
            }
        }
    }
    true
}
