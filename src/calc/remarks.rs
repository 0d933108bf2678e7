use std::collections::HashMap;

/// Which score of a unit a remark replaces. Memory questions carry both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Track {
    Autograded,
    ManualReview,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Remark {
    pub autograded: Option<f64>,
    pub manual_review: Option<f64>,
}

impl Remark {
    pub fn on(&self, track: Track) -> Option<f64> {
        match track {
            Track::Autograded => self.autograded,
            Track::ManualReview => self.manual_review,
        }
    }
}

/// Remarks keyed by unit, then student.
#[derive(Debug, Clone, Default)]
pub struct Remarks {
    by_unit: HashMap<String, HashMap<String, Remark>>,
}

impl Remarks {
    pub fn insert(&mut self, unit: &str, student_id: &str, remark: Remark) {
        self.by_unit
            .entry(unit.to_string())
            .or_default()
            .insert(student_id.to_string(), remark);
    }

    pub fn get(&self, unit: &str, student_id: &str) -> Option<&Remark> {
        self.by_unit.get(unit).and_then(|m| m.get(student_id))
    }

    pub fn len(&self) -> usize {
        self.by_unit.values().map(|m| m.len()).sum()
    }

    /// Effective score: the remark on `track` when one is present, else `raw`.
    pub fn resolve(&self, unit: &str, student_id: &str, track: Track, raw: f64) -> f64 {
        self.get(unit, student_id)
            .and_then(|r| r.on(track))
            .unwrap_or(raw)
    }
}
