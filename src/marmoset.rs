use anyhow::Context;
use chrono::{Duration, NaiveDateTime};
use regex::Regex;
use rusqlite::Connection;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::calc::{select_best, Attempt, DeadlinePolicy, RunReport, Warning};
use crate::config::assignment_number;
use crate::store::{self, ProjectRow};

/// Which projects of a course an operation covers.
#[derive(Debug, Clone)]
pub enum ProjectSelector {
    /// `a`: every project whose deadline has passed.
    Passed,
    /// `c`: the project(s) sharing the latest passed deadline.
    Current,
    /// Digits, `A<n>`/`LAB<n>`, or a free regular expression over the
    /// project number. Matching is case-insensitive.
    Pattern(Regex),
}

impl ProjectSelector {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        match s {
            "" => anyhow::bail!("empty project selector"),
            "a" => return Ok(ProjectSelector::Passed),
            "c" => return Ok(ProjectSelector::Current),
            _ => {}
        }
        let upper = s.to_ascii_uppercase();
        let pattern = if upper.chars().all(|c| c.is_ascii_digit()) {
            format!("^(A|LAB){}[PBQ]", upper)
        } else if is_assignment_prefix(&upper) {
            format!("^{}[PBQ]", upper)
        } else {
            upper
        };
        let re = Regex::new(&format!("(?i){}", pattern))
            .with_context(|| format!("invalid project selector: {}", s))?;
        Ok(ProjectSelector::Pattern(re))
    }

    pub fn filter<'a>(&self, projects: &'a [ProjectRow], now: NaiveDateTime) -> Vec<&'a ProjectRow> {
        match self {
            ProjectSelector::Passed => projects.iter().filter(|p| p.ontime < now).collect(),
            ProjectSelector::Current => {
                let latest = projects
                    .iter()
                    .filter(|p| p.ontime < now)
                    .map(|p| p.ontime)
                    .max();
                projects
                    .iter()
                    .filter(|p| Some(p.ontime) == latest)
                    .collect()
            }
            ProjectSelector::Pattern(re) => projects
                .iter()
                .filter(|p| re.is_match(&p.project_number))
                .collect(),
        }
    }
}

fn is_assignment_prefix(s: &str) -> bool {
    let digits = s
        .strip_prefix("LAB")
        .or_else(|| s.strip_prefix('A'))
        .unwrap_or("");
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Leading non-digit prefix of a project number, upper-cased (`A`, `LAB`).
pub fn project_type(project_number: &str) -> String {
    project_number
        .chars()
        .take_while(|c| !c.is_ascii_digit())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Selection context shared by the store operations.
pub struct StoreQuery<'a> {
    pub conn: &'a Connection,
    pub semester: &'a str,
    pub course: &'a str,
    pub selector: &'a ProjectSelector,
    pub now: NaiveDateTime,
    pub grace: Duration,
}

struct Course {
    projects: Vec<ProjectRow>,
    registrations: std::collections::HashMap<String, i64>,
}

impl StoreQuery<'_> {
    fn course(&self) -> anyhow::Result<Course> {
        let Some(course_pk) = store::course_pk(self.conn, self.semester, self.course)? else {
            anyhow::bail!("course {} {} not found", self.course, self.semester);
        };
        let all = store::list_projects(self.conn, course_pk)?;
        let projects: Vec<ProjectRow> = self
            .selector
            .filter(&all, self.now)
            .into_iter()
            .cloned()
            .collect();
        if projects.is_empty() {
            anyhow::bail!("no projects match the selector");
        }
        Ok(Course {
            projects,
            registrations: store::registrations(self.conn, course_pk)?,
        })
    }

    fn policy(&self, project: &ProjectRow) -> DeadlinePolicy {
        match assignment_number(&project.project_number) {
            Some(0) => DeadlinePolicy::NoDeadline,
            _ => DeadlinePolicy::Deadline {
                due: project.ontime,
                grace: self.grace,
            },
        }
    }

    /// Authoritative attempt per roster student. Unregistered students get
    /// a warning and no attempts.
    fn attempts_for(
        &self,
        course: &Course,
        project: &ProjectRow,
        roster: &[String],
        report: &mut RunReport,
    ) -> anyhow::Result<Vec<(String, f64, Option<i64>)>> {
        let mut by_reg = store::submissions(self.conn, project.project_pk)?;
        let policy = self.policy(project);
        let mut out = Vec::with_capacity(roster.len());
        for student in roster {
            let Some(reg) = course.registrations.get(student) else {
                report.warn(Warning::Unregistered {
                    student_id: student.clone(),
                });
                out.push((student.clone(), 0.0, None));
                continue;
            };
            let attempts: Vec<Attempt<Option<i64>>> = by_reg
                .remove(reg)
                .unwrap_or_default()
                .into_iter()
                .map(|s| Attempt {
                    timestamp: s.timestamp,
                    score: s.num_passed as f64,
                    payload: s.archive_pk,
                })
                .collect();
            let chosen = select_best(&attempts, policy);
            let archive = chosen.attempt.and_then(|a| a.payload);
            out.push((student.clone(), chosen.score, archive));
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarksFile {
    pub project: String,
    pub path: String,
    pub students: usize,
}

/// Writes `project-<name>-grades.csv` (`student_id,score`) per selected
/// project into `dest`.
pub fn select_marks(
    q: &StoreQuery<'_>,
    roster: &[String],
    dest: &Path,
    report: &mut RunReport,
) -> anyhow::Result<Vec<MarksFile>> {
    let course = q.course()?;
    std::fs::create_dir_all(dest)
        .with_context(|| format!("failed to create directory {}", dest.to_string_lossy()))?;

    let mut out = Vec::new();
    for project in &course.projects {
        tracing::info!("selecting marks for {}", project.project_number);
        let rows = q.attempts_for(&course, project, roster, report)?;
        let mut text = String::new();
        for (student, score, _) in &rows {
            text.push_str(&format!("{},{}\n", student, score));
        }
        let path = dest.join(format!("project-{}-grades.csv", project.project_number));
        std::fs::write(&path, text)
            .with_context(|| format!("failed to write {}", path.to_string_lossy()))?;
        out.push(MarksFile {
            project: project.project_number.clone(),
            path: path.to_string_lossy().to_string(),
            students: rows.len(),
        });
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadedArchive {
    pub student_id: String,
    pub project: String,
    pub path: String,
    pub sha256: String,
    pub is_zip: bool,
}

fn has_zip_signature(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && bytes[..4] == [0x50, 0x4B, 0x03, 0x04]
}

/// Writes each roster student's authoritative archive to
/// `<dest>/a<n>/<project>/<student>.zip`. Students without a qualifying
/// attempt get no file.
pub fn download_archives(
    q: &StoreQuery<'_>,
    roster: &[String],
    dest: &Path,
    report: &mut RunReport,
) -> anyhow::Result<Vec<DownloadedArchive>> {
    let course = q.course()?;
    let mut out = Vec::new();
    for project in &course.projects {
        let n = assignment_number(&project.project_number).ok_or_else(|| {
            anyhow::anyhow!("cannot read assignment number of {}", project.project_number)
        })?;
        let folder: PathBuf = dest
            .join(format!("a{}", n))
            .join(&project.project_number);
        std::fs::create_dir_all(&folder)
            .with_context(|| format!("failed to create directory {}", folder.to_string_lossy()))?;
        tracing::info!(
            "downloading {}{} to {}",
            project_type(&project.project_number),
            n,
            folder.to_string_lossy()
        );

        for (student, _, archive_pk) in q.attempts_for(&course, project, roster, report)? {
            let Some(archive_pk) = archive_pk else {
                continue;
            };
            let Some(bytes) = store::archive(q.conn, archive_pk)? else {
                tracing::warn!("archive {} of {} is missing", archive_pk, student);
                continue;
            };
            let is_zip = has_zip_signature(&bytes);
            if !is_zip {
                tracing::warn!(
                    "archive of {} for {} is not a zip file",
                    student,
                    project.project_number
                );
            }
            let path = folder.join(format!("{}.zip", student));
            std::fs::write(&path, &bytes)
                .with_context(|| format!("failed to write {}", path.to_string_lossy()))?;
            out.push(DownloadedArchive {
                student_id: student,
                project: project.project_number.clone(),
                path: path.to_string_lossy().to_string(),
                sha256: format!("{:x}", Sha256::digest(&bytes)),
                is_zip,
            });
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectOutOf {
    pub project: String,
    pub assignment: Option<u32>,
    /// `None` when the project has no active test setup.
    pub full_marks: Option<i64>,
}

/// Full marks of each selected project, sorted by project name. Names are
/// cut at the first `-`.
pub fn out_of(q: &StoreQuery<'_>) -> anyhow::Result<Vec<ProjectOutOf>> {
    let course = q.course()?;
    let mut out = Vec::new();
    for project in &course.projects {
        let name = project
            .project_number
            .split('-')
            .next()
            .unwrap_or_default()
            .to_string();
        out.push(ProjectOutOf {
            assignment: assignment_number(&name),
            full_marks: store::active_points(q.conn, project.project_pk)?,
            project: name,
        });
    }
    out.sort_by(|a, b| a.project.cmp(&b.project));
    out.dedup_by(|a, b| a.project == b.project);
    Ok(out)
}

/// `project,fullMarks` listing with a `# Assignment <n>` line before each
/// new assignment, ready to paste into `config.csv`.
pub fn render_out_of(rows: &[ProjectOutOf]) -> String {
    let mut text = String::from("project,fullMarks\n");
    let mut current: Option<u32> = None;
    for row in rows {
        if let Some(n) = row.assignment {
            if current.map(|c| n > c).unwrap_or(true) {
                current = Some(n);
                text.push_str(&format!("# Assignment {}\n", n));
            }
        }
        let marks = row
            .full_marks
            .map(|m| m.to_string())
            .unwrap_or_default();
        text.push_str(&format!("{},{}\n", row.project, marks));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .and_then(|d| d.and_hms_opt(h, 0, 0))
            .expect("valid time")
    }

    fn projects() -> Vec<ProjectRow> {
        [
            (1, "A0P1", at(1, 21)),
            (2, "A1P1", at(8, 21)),
            (3, "A1P2", at(8, 21)),
            (4, "LAB1Q1", at(9, 21)),
            (5, "A2P1", at(22, 21)),
            (6, "A10P1", at(23, 21)),
        ]
        .into_iter()
        .map(|(pk, name, ontime)| ProjectRow {
            project_pk: pk,
            project_number: name.to_string(),
            ontime,
        })
        .collect()
    }

    fn names(sel: &str, now: NaiveDateTime) -> Vec<String> {
        let all = projects();
        ProjectSelector::parse(sel)
            .expect("selector")
            .filter(&all, now)
            .into_iter()
            .map(|p| p.project_number.clone())
            .collect()
    }

    #[test]
    fn passed_and_current_selectors() {
        let now = at(10, 12);
        assert_eq!(names("a", now), vec!["A0P1", "A1P1", "A1P2", "LAB1Q1"]);
        assert_eq!(names("c", now), vec!["LAB1Q1"]);
        assert_eq!(names("c", at(8, 22)), vec!["A1P1", "A1P2"]);
    }

    #[test]
    fn numeric_selector_matches_assignments_and_labs() {
        let now = at(1, 0);
        assert_eq!(names("1", now), vec!["A1P1", "A1P2", "LAB1Q1"]);
        assert_eq!(names("a1", now), vec!["A1P1", "A1P2"]);
        assert_eq!(names("lab1", now), vec!["LAB1Q1"]);
        assert_eq!(names("10", now), vec!["A10P1"]);
        assert_eq!(names("P2$", now), vec!["A1P2"]);
    }

    #[test]
    fn bad_regex_is_rejected() {
        assert!(ProjectSelector::parse("A(").is_err());
        assert!(ProjectSelector::parse("  ").is_err());
    }

    #[test]
    fn project_types() {
        assert_eq!(project_type("lab3q1"), "LAB");
        assert_eq!(project_type("A5P1"), "A");
    }

    #[test]
    fn out_of_listing_groups_by_assignment() {
        let rows = vec![
            ProjectOutOf {
                project: "A1P1".into(),
                assignment: Some(1),
                full_marks: Some(10),
            },
            ProjectOutOf {
                project: "A1P2".into(),
                assignment: Some(1),
                full_marks: None,
            },
            ProjectOutOf {
                project: "A2P1".into(),
                assignment: Some(2),
                full_marks: Some(7),
            },
        ];
        assert_eq!(
            render_out_of(&rows),
            "project,fullMarks\n# Assignment 1\nA1P1,10\nA1P2,\n# Assignment 2\nA2P1,7\n"
        );
    }

    #[test]
    fn zip_signature() {
        assert!(has_zip_signature(b"PK\x03\x04rest"));
        assert!(!has_zip_signature(b"PK"));
        assert!(!has_zip_signature(b"%PDF-1.4"));
    }
}
