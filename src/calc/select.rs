use chrono::{Duration, NaiveDateTime};

/// One submission attempt. `payload` carries whatever the caller needs back
/// from the chosen attempt (an archive id for downloads, `()` for marks).
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt<T> {
    pub timestamp: NaiveDateTime,
    pub score: f64,
    pub payload: T,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeadlinePolicy {
    /// Practice units: every attempt counts.
    NoDeadline,
    Deadline {
        due: NaiveDateTime,
        grace: Duration,
    },
}

impl DeadlinePolicy {
    pub fn cutoff(&self) -> Option<NaiveDateTime> {
        match self {
            DeadlinePolicy::NoDeadline => None,
            DeadlinePolicy::Deadline { due, grace } => Some(*due + *grace),
        }
    }

    pub fn accepts(&self, at: NaiveDateTime) -> bool {
        self.cutoff().map(|c| at <= c).unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection<'a, T> {
    pub score: f64,
    /// `None` when no attempt qualified; the score is then 0.
    pub attempt: Option<&'a Attempt<T>>,
}

/// Picks the authoritative attempt: the highest score among attempts that
/// the deadline policy accepts. Equal scores resolve to the later entry in
/// input order.
pub fn select_best<T>(attempts: &[Attempt<T>], policy: DeadlinePolicy) -> Selection<'_, T> {
    let best = attempts
        .iter()
        .filter(|a| policy.accepts(a.timestamp))
        .max_by(|a, b| a.score.total_cmp(&b.score));
    Selection {
        score: best.map(|a| a.score).unwrap_or(0.0),
        attempt: best,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 20)
            .and_then(|d| d.and_hms_opt(h, m, 0))
            .expect("valid time")
    }

    fn attempt(t: NaiveDateTime, score: f64) -> Attempt<()> {
        Attempt {
            timestamp: t,
            score,
            payload: (),
        }
    }

    #[test]
    fn late_attempt_is_ignored_without_grace() {
        let due = at(21, 0);
        let attempts = vec![attempt(at(20, 59), 5.0), attempt(at(21, 1), 9.0)];
        let policy = DeadlinePolicy::Deadline {
            due,
            grace: Duration::zero(),
        };
        assert_eq!(select_best(&attempts, policy).score, 5.0);
    }

    #[test]
    fn grace_period_admits_late_attempt() {
        let due = at(21, 0);
        let attempts = vec![attempt(at(20, 59), 5.0), attempt(at(21, 1), 9.0)];
        let policy = DeadlinePolicy::Deadline {
            due,
            grace: Duration::minutes(1),
        };
        assert_eq!(select_best(&attempts, policy).score, 9.0);
    }

    #[test]
    fn no_attempts_scores_zero() {
        let attempts: Vec<Attempt<()>> = Vec::new();
        let sel = select_best(
            &attempts,
            DeadlinePolicy::Deadline {
                due: at(21, 0),
                grace: Duration::minutes(1),
            },
        );
        assert_eq!(sel.score, 0.0);
        assert!(sel.attempt.is_none());
    }

    #[test]
    fn only_late_attempts_scores_zero() {
        let attempts = vec![attempt(at(22, 0), 7.0)];
        let sel = select_best(
            &attempts,
            DeadlinePolicy::Deadline {
                due: at(21, 0),
                grace: Duration::minutes(1),
            },
        );
        assert_eq!(sel.score, 0.0);
    }

    #[test]
    fn no_deadline_takes_overall_max() {
        let attempts = vec![
            attempt(at(9, 0), 3.0),
            attempt(at(23, 0), 10.0),
            attempt(at(12, 0), 8.0),
        ];
        let sel = select_best(&attempts, DeadlinePolicy::NoDeadline);
        assert_eq!(sel.score, 10.0);
        assert_eq!(sel.attempt.map(|a| a.timestamp), Some(at(23, 0)));
    }

    #[test]
    fn payload_of_chosen_attempt_is_returned() {
        let attempts = vec![
            Attempt {
                timestamp: at(10, 0),
                score: 4.0,
                payload: 11_i64,
            },
            Attempt {
                timestamp: at(11, 0),
                score: 6.0,
                payload: 12_i64,
            },
        ];
        let sel = select_best(&attempts, DeadlinePolicy::NoDeadline);
        assert_eq!(sel.attempt.map(|a| a.payload), Some(12));
    }
}
