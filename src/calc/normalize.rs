use super::GradeError;

/// Scales an effective raw score onto the assessment's point weight.
/// Scores above `full_marks` are a configuration error, never clamped.
pub fn normalize(
    unit: &str,
    student_id: &str,
    raw: f64,
    full_marks: f64,
    weight: f64,
) -> Result<f64, GradeError> {
    if !(full_marks > 0.0) {
        return Err(GradeError::configuration(
            unit,
            None,
            format!("full marks must be positive, got {}", full_marks),
        ));
    }
    if !raw.is_finite() || raw < 0.0 {
        return Err(GradeError::configuration(
            unit,
            Some(student_id),
            format!("score {} is not a valid mark", raw),
        ));
    }
    if raw > full_marks {
        return Err(GradeError::configuration(
            unit,
            Some(student_id),
            format!("score {} exceeds full marks {}", raw, full_marks),
        ));
    }
    Ok(raw / full_marks * weight)
}
