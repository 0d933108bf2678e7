use super::{AssessmentRecord, Contribution};

pub const EXTENDED_SUFFIX: &str = "-extended";

/// Base unit of an extended-deadline key (`a5p1-extended` → `a5p1`).
pub fn extended_base(key: &str) -> Option<&str> {
    key.strip_suffix(EXTENDED_SUFFIX).filter(|b| !b.is_empty())
}

/// Folds every extended part into its base part:
/// `max(on_time, (on_time + extended) / 2)`.
///
/// A missing base part is taken as 0. Extended parts stay in the map for
/// reporting; they are never summed.
pub fn merge_extended(record: &mut AssessmentRecord) {
    let pairs: Vec<(String, f64)> = record
        .parts
        .iter()
        .filter_map(|(k, v)| {
            let base = extended_base(k)?;
            Some((base.to_string(), v.value()?))
        })
        .collect();

    for (base, ext) in pairs {
        let entry = record
            .parts
            .entry(base)
            .or_insert(Contribution::Scored(0.0));
        if let Contribution::Scored(on_time) = *entry {
            *entry = Contribution::Scored(on_time.max((on_time + ext) / 2.0));
        }
    }
}
