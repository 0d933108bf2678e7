use serde::Serialize;

use super::AssessmentKey;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GradeError {
    /// Source data disagrees with the course configuration. Aborts the unit.
    #[error("configuration error in unit `{unit}`{}: {message}", student_suffix(.student))]
    Configuration {
        unit: String,
        student: Option<String>,
        message: String,
    },
    /// A record was summed twice.
    #[error("{assessment:?} of `{student}` is already finalized")]
    AlreadyFinalized {
        student: String,
        assessment: AssessmentKey,
    },
}

fn student_suffix(student: &Option<String>) -> String {
    student
        .as_deref()
        .map(|s| format!(" (student `{}`)", s))
        .unwrap_or_default()
}

impl GradeError {
    pub fn configuration(unit: &str, student: Option<&str>, message: impl Into<String>) -> Self {
        GradeError::Configuration {
            unit: unit.to_string(),
            student: student.map(|s| s.to_string()),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GradeError::Configuration { .. } => "configuration_error",
            GradeError::AlreadyFinalized { .. } => "usage_error",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut v = serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let GradeError::Configuration { unit, student, .. } = self {
            v["unit"] = serde_json::json!(unit);
            v["student"] = serde_json::json!(student);
        }
        v
    }
}

/// Non-fatal findings. Processing continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Warning {
    /// A memory question has no manual-review results yet.
    #[serde(rename_all = "camelCase")]
    IncompleteData { unit: String },
    #[serde(rename_all = "camelCase")]
    MissingStudent { source: String, student_id: String },
    /// A class list student without a registration in the submission store.
    #[serde(rename_all = "camelCase")]
    Unregistered { student_id: String },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::IncompleteData { unit } => {
                write!(f, "{} is missing its manual review results", unit)
            }
            Warning::MissingStudent { source, student_id } => {
                write!(f, "{} appears in {} but not in the class list", student_id, source)
            }
            Warning::Unregistered { student_id } => {
                write!(f, "{} is not registered in the submission store", student_id)
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub warnings: Vec<Warning>,
    pub errors: Vec<GradeError>,
}

impl RunReport {
    /// Records a warning once; repeats of an identical warning are dropped.
    pub fn warn(&mut self, w: Warning) {
        if self.warnings.contains(&w) {
            return;
        }
        tracing::warn!("{}", w);
        self.warnings.push(w);
    }

    pub fn fail(&mut self, e: GradeError) {
        tracing::warn!("{}", e);
        self.errors.push(e);
    }

    pub fn extend(&mut self, other: RunReport) {
        for w in other.warnings {
            self.warn(w);
        }
        self.errors.extend(other.errors);
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "warnings": self.warnings,
            "errors": self.errors.iter().map(|e| e.to_json()).collect::<Vec<_>>(),
        })
    }
}
