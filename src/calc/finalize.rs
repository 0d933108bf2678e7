use super::{AssessmentKey, Contribution, GradeError, StudentRecord};

/// Sums one assessment of one student into its total.
///
/// Must run exactly once per record, after every contribution and
/// exemption is in place. A second call is rejected because it would add
/// the parts on top of the previous total.
pub fn finalize_record(record: &mut StudentRecord, key: AssessmentKey) -> Result<(), GradeError> {
    let student = record.student_id.clone();
    let assessment = record.assessment_mut(key);
    if assessment.is_finalized() {
        return Err(GradeError::AlreadyFinalized {
            student,
            assessment: key,
        });
    }

    if assessment.total.is_excluded() {
        for part in assessment.parts.values_mut() {
            *part = Contribution::Scored(0.0);
        }
    } else {
        assessment.total = Contribution::Scored(assessment.parts_sum());
    }
    assessment.finalized = true;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> StudentRecord {
        let mut rec = StudentRecord::new("jdoe");
        let a = rec.assessment_mut(AssessmentKey::Assignment(3));
        a.parts.insert("a3p1".into(), Contribution::Scored(20.0));
        a.parts.insert("a3p2".into(), Contribution::Scored(12.5));
        a.parts.insert("a3p2-extended".into(), Contribution::Scored(30.0));
        rec
    }

    #[test]
    fn total_is_sum_of_non_extended_parts() {
        let mut rec = record();
        finalize_record(&mut rec, AssessmentKey::Assignment(3)).expect("finalize");
        assert_eq!(
            rec.total(AssessmentKey::Assignment(3)),
            Some(Contribution::Scored(32.5))
        );
    }

    #[test]
    fn second_finalize_is_a_usage_error() {
        let mut rec = record();
        finalize_record(&mut rec, AssessmentKey::Assignment(3)).expect("finalize");
        let e = finalize_record(&mut rec, AssessmentKey::Assignment(3))
            .expect_err("second finalize must be rejected");
        assert_eq!(e.code(), "usage_error");
        assert_eq!(
            rec.total(AssessmentKey::Assignment(3)),
            Some(Contribution::Scored(32.5))
        );
    }

    #[test]
    fn excluded_total_zeroes_parts() {
        let mut rec = record();
        rec.assessment_mut(AssessmentKey::Assignment(3)).total = Contribution::Excluded;
        finalize_record(&mut rec, AssessmentKey::Assignment(3)).expect("finalize");
        let a = rec.assessment(AssessmentKey::Assignment(3)).expect("record");
        assert_eq!(a.total, Contribution::Excluded);
        assert!(a.parts.values().all(|p| *p == Contribution::Scored(0.0)));
    }
}
