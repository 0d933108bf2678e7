use anyhow::Context;
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

pub const STORE_FILE: &str = "marmoset.sqlite3";

pub fn open_store(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(workspace.join(STORE_FILE))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            course_pk INTEGER PRIMARY KEY,
            semester TEXT NOT NULL,
            coursename TEXT NOT NULL,
            UNIQUE(semester, coursename)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS projects(
            project_pk INTEGER PRIMARY KEY,
            course_pk INTEGER NOT NULL,
            project_number TEXT NOT NULL,
            ontime TEXT NOT NULL,
            FOREIGN KEY(course_pk) REFERENCES courses(course_pk)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_projects_course ON projects(course_pk)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_registration(
            student_registration_pk INTEGER PRIMARY KEY,
            course_pk INTEGER NOT NULL,
            cvs_account TEXT NOT NULL,
            FOREIGN KEY(course_pk) REFERENCES courses(course_pk),
            UNIQUE(course_pk, cvs_account)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS submission_archives(
            archive_pk INTEGER PRIMARY KEY,
            archive BLOB NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS submissions(
            submission_pk INTEGER PRIMARY KEY,
            project_pk INTEGER NOT NULL,
            student_registration_pk INTEGER NOT NULL,
            submission_timestamp TEXT NOT NULL,
            num_passed_overall INTEGER NOT NULL,
            archive_pk INTEGER,
            FOREIGN KEY(project_pk) REFERENCES projects(project_pk),
            FOREIGN KEY(student_registration_pk)
                REFERENCES student_registration(student_registration_pk),
            FOREIGN KEY(archive_pk) REFERENCES submission_archives(archive_pk)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_project ON submissions(project_pk)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS project_jarfiles(
            project_pk INTEGER NOT NULL,
            test_run_pk INTEGER NOT NULL,
            jarfile_status TEXT NOT NULL,
            FOREIGN KEY(project_pk) REFERENCES projects(project_pk)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS test_outcomes(
            test_run_pk INTEGER NOT NULL,
            test_type TEXT NOT NULL,
            point_value INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_test_outcomes_run ON test_outcomes(test_run_pk)",
        [],
    )?;

    Ok(conn)
}

/// Accepts `2024-03-20 21:00:00` and `2024-03-20T21:00:00`, with optional
/// fractional seconds.
pub fn parse_timestamp(s: &str) -> anyhow::Result<NaiveDateTime> {
    let s = s.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(t);
        }
    }
    anyhow::bail!("invalid timestamp: {}", s)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectRow {
    pub project_pk: i64,
    pub project_number: String,
    pub ontime: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionRow {
    pub timestamp: NaiveDateTime,
    pub num_passed: i64,
    pub archive_pk: Option<i64>,
}

pub fn course_pk(conn: &Connection, semester: &str, coursename: &str) -> anyhow::Result<Option<i64>> {
    conn.query_row(
        "SELECT course_pk FROM courses WHERE semester = ? AND coursename = ?",
        params![semester, coursename],
        |r| r.get(0),
    )
    .optional()
    .context("failed to look up course")
}

/// Every project of a course, ordered by project number.
pub fn list_projects(conn: &Connection, course_pk: i64) -> anyhow::Result<Vec<ProjectRow>> {
    let mut stmt = conn.prepare(
        "SELECT project_pk, project_number, ontime
         FROM projects
         WHERE course_pk = ?
         ORDER BY project_number",
    )?;
    let rows = stmt
        .query_map(params![course_pk], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(project_pk, project_number, ontime)| {
            Ok(ProjectRow {
                project_pk,
                ontime: parse_timestamp(&ontime)
                    .with_context(|| format!("project {}", project_number))?,
                project_number,
            })
        })
        .collect()
}

/// `cvs_account -> student_registration_pk` for one course.
pub fn registrations(conn: &Connection, course_pk: i64) -> anyhow::Result<HashMap<String, i64>> {
    let mut stmt = conn.prepare(
        "SELECT cvs_account, student_registration_pk
         FROM student_registration
         WHERE course_pk = ?",
    )?;
    let rows = stmt
        .query_map(params![course_pk], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?
        .collect::<Result<HashMap<String, i64>, _>>()?;
    Ok(rows)
}

/// Submissions of one project grouped by registration, in submission order.
pub fn submissions(
    conn: &Connection,
    project_pk: i64,
) -> anyhow::Result<HashMap<i64, Vec<SubmissionRow>>> {
    let mut stmt = conn.prepare(
        "SELECT student_registration_pk, submission_timestamp, num_passed_overall, archive_pk
         FROM submissions
         WHERE project_pk = ?
         ORDER BY submission_timestamp, submission_pk",
    )?;
    let rows = stmt
        .query_map(params![project_pk], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, Option<i64>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out: HashMap<i64, Vec<SubmissionRow>> = HashMap::new();
    for (reg, ts, num_passed, archive_pk) in rows {
        out.entry(reg).or_default().push(SubmissionRow {
            timestamp: parse_timestamp(&ts)?,
            num_passed,
            archive_pk,
        });
    }
    Ok(out)
}

pub fn archive(conn: &Connection, archive_pk: i64) -> anyhow::Result<Option<Vec<u8>>> {
    conn.query_row(
        "SELECT archive FROM submission_archives WHERE archive_pk = ?",
        params![archive_pk],
        |r| r.get(0),
    )
    .optional()
    .context("failed to read submission archive")
}

/// Points of the project's active test setup, build tests excluded.
/// `None` when the project has no active setup.
pub fn active_points(conn: &Connection, project_pk: i64) -> anyhow::Result<Option<i64>> {
    let test_run_pk: Option<i64> = conn
        .query_row(
            "SELECT test_run_pk FROM project_jarfiles
             WHERE project_pk = ? AND jarfile_status = 'active'
             ORDER BY test_run_pk DESC
             LIMIT 1",
            params![project_pk],
            |r| r.get(0),
        )
        .optional()?;
    let Some(test_run_pk) = test_run_pk else {
        return Ok(None);
    };
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(point_value), 0) FROM test_outcomes
         WHERE test_run_pk = ? AND test_type <> 'build'",
        params![test_run_pk],
        |r| r.get(0),
    )?;
    Ok(Some(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_in_both_layouts() {
        let a = parse_timestamp("2024-03-20 21:00:00").expect("space");
        let b = parse_timestamp("2024-03-20T21:00:00").expect("t");
        assert_eq!(a, b);
        assert!(parse_timestamp("2024-03-20").is_err());
    }

    #[test]
    fn store_queries_round_trip() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch(
            "CREATE TABLE courses(course_pk INTEGER PRIMARY KEY, semester TEXT, coursename TEXT);
             CREATE TABLE projects(project_pk INTEGER PRIMARY KEY, course_pk INTEGER, project_number TEXT, ontime TEXT);
             CREATE TABLE project_jarfiles(project_pk INTEGER, test_run_pk INTEGER, jarfile_status TEXT);
             CREATE TABLE test_outcomes(test_run_pk INTEGER, test_type TEXT, point_value INTEGER);
             INSERT INTO courses VALUES (1, 'Winter 2024', 'CS136');
             INSERT INTO projects VALUES (10, 1, 'A1P2', '2024-01-20 21:00:00');
             INSERT INTO projects VALUES (11, 1, 'A1P1', '2024-01-20 21:00:00');
             INSERT INTO project_jarfiles VALUES (10, 5, 'retired');
             INSERT INTO project_jarfiles VALUES (10, 6, 'active');
             INSERT INTO test_outcomes VALUES (6, 'build', 1);
             INSERT INTO test_outcomes VALUES (6, 'public', 2);
             INSERT INTO test_outcomes VALUES (6, 'secret', 5);
             INSERT INTO test_outcomes VALUES (5, 'secret', 50);",
        )
        .expect("seed");

        assert_eq!(course_pk(&conn, "Winter 2024", "CS136").expect("q"), Some(1));
        assert_eq!(course_pk(&conn, "Fall 2024", "CS136").expect("q"), None);

        let projects = list_projects(&conn, 1).expect("projects");
        assert_eq!(
            projects.iter().map(|p| p.project_number.as_str()).collect::<Vec<_>>(),
            vec!["A1P1", "A1P2"]
        );

        assert_eq!(active_points(&conn, 10).expect("points"), Some(7));
        assert_eq!(active_points(&conn, 11).expect("points"), None);
    }
}
