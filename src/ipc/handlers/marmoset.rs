use crate::calc::RunReport;
use crate::config::TermPaths;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{
    course_config, get_required_path, get_required_str, load_roster, store_conn,
};
use crate::ipc::types::{AppState, Request};
use crate::marmoset::{self, ProjectSelector, StoreQuery};
use crate::store;
use chrono::{Duration, NaiveDateTime};
use serde_json::json;

/// Fields every store request carries: `semester`, `courseName`,
/// `selector`, and optionally `now`. The grace period is
/// `gracePeriodMinutes` when given, else the course settings' value
/// (`course` param or `course.json` under `termDir`).
struct StoreParams {
    semester: String,
    course: String,
    selector: ProjectSelector,
    now: NaiveDateTime,
    grace: Duration,
}

fn store_params(params: &serde_json::Value) -> Result<StoreParams, HandlerErr> {
    let semester = get_required_str(params, "semester")?;
    let course = get_required_str(params, "courseName")?;
    let selector = ProjectSelector::parse(&get_required_str(params, "selector")?)
        .map_err(|e| HandlerErr::from_anyhow("bad_params", e))?;
    let now = match params.get("now").and_then(|v| v.as_str()) {
        Some(s) => store::parse_timestamp(s).map_err(|e| HandlerErr::from_anyhow("bad_params", e))?,
        None => chrono::Local::now().naive_local(),
    };
    let paths = params
        .get("termDir")
        .and_then(|v| v.as_str())
        .map(TermPaths::new);
    let grace = match params.get("gracePeriodMinutes").and_then(|v| v.as_i64()) {
        Some(minutes) => Duration::minutes(minutes),
        None => course_config(params, paths.as_ref())?.grace_period(),
    };
    Ok(StoreParams {
        semester,
        course,
        selector,
        now,
        grace,
    })
}

fn query_failed(e: anyhow::Error) -> HandlerErr {
    HandlerErr::from_anyhow("db_query_failed", e)
}

fn with_query<T>(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&StoreQuery<'_>) -> Result<T, HandlerErr>,
) -> Result<T, HandlerErr> {
    let conn = store_conn(state)?;
    let p = store_params(&req.params)?;
    let q = StoreQuery {
        conn,
        semester: &p.semester,
        course: &p.course,
        selector: &p.selector,
        now: p.now,
        grace: p.grace,
    };
    f(&q)
}

fn handle_marks_select(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let roster = load_roster(&req.params)?;
    let dest = get_required_path(&req.params, "dest")?;
    with_query(state, req, |q| {
        let mut report = RunReport::default();
        let files = marmoset::select_marks(q, &roster, &dest, &mut report).map_err(query_failed)?;
        Ok(json!({ "files": files, "report": report.to_json() }))
    })
}

fn handle_submissions_download(
    state: &AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let roster = load_roster(&req.params)?;
    let dest = get_required_path(&req.params, "dest")?;
    with_query(state, req, |q| {
        let mut report = RunReport::default();
        let archives =
            marmoset::download_archives(q, &roster, &dest, &mut report).map_err(query_failed)?;
        Ok(json!({
            "downloaded": archives.len(),
            "archives": archives,
            "report": report.to_json(),
        }))
    })
}

fn handle_projects_out_of(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    with_query(state, req, |q| {
        let rows = marmoset::out_of(q).map_err(query_failed)?;
        Ok(json!({
            "text": marmoset::render_out_of(&rows),
            "projects": rows,
        }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "marks.select" => handle_marks_select(state, req),
        "submissions.download" => handle_submissions_download(state, req),
        "projects.outOf" => handle_projects_out_of(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
