use super::{normalize, GradeError};

/// Full-mark scale of manual style and memory reviews.
pub const REVIEW_SCALE: f64 = 100.0;

/// State of the manual-review source of a memory question.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ManualReview {
    /// The review has not been delivered for this unit yet.
    Incomplete,
    Percent(f64),
}

/// Share of one style contribution inside the overall style pool. The
/// divisor is the configured number of style assignments, not the number
/// of units that happened to produce a score.
pub fn pool_share(style_contribution: f64, style_assignments: u32) -> f64 {
    if style_assignments == 0 {
        return 0.0;
    }
    style_contribution / f64::from(style_assignments)
}

/// Two-factor combination: the autograded component (already on the unit's
/// weight) scaled by the manual-review percentage.
pub fn memory_contribution(
    unit: &str,
    student_id: &str,
    autograded_component: f64,
    review: ManualReview,
) -> Result<f64, GradeError> {
    match review {
        ManualReview::Incomplete => Ok(0.0),
        ManualReview::Percent(p) => {
            if !p.is_finite() || p < 0.0 || p > REVIEW_SCALE {
                return Err(GradeError::configuration(
                    unit,
                    Some(student_id),
                    format!("manual review {} is outside 0..=100", p),
                ));
            }
            Ok(autograded_component * p / REVIEW_SCALE)
        }
    }
}

/// Style contribution of one unit for one student.
pub fn style_contribution(
    unit: &str,
    student_id: &str,
    review_score: f64,
    style_weight: f64,
) -> Result<f64, GradeError> {
    normalize(unit, student_id, review_score, REVIEW_SCALE, style_weight)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_question_multiplies_components() {
        assert_eq!(
            memory_contribution("a7q1", "jdoe", 8.0, ManualReview::Percent(75.0)),
            Ok(6.0)
        );
    }

    #[test]
    fn incomplete_review_contributes_zero() {
        assert_eq!(
            memory_contribution("a7q1", "jdoe", 8.0, ManualReview::Incomplete),
            Ok(0.0)
        );
    }

    #[test]
    fn review_above_hundred_is_rejected() {
        assert!(memory_contribution("a7q1", "jdoe", 8.0, ManualReview::Percent(120.0)).is_err());
    }

    #[test]
    fn pool_share_divides_by_configured_count() {
        let style = style_contribution("a6p1", "jdoe", 90.0, 20.0).expect("in range");
        assert_eq!(style, 18.0);
        assert_eq!(pool_share(style, 5), 3.6);
        assert_eq!(pool_share(style, 0), 0.0);
    }
}
