use crate::config::{load_course_config, CourseConfig, TermPaths};
use crate::ipc::error::HandlerErr;
use crate::ipc::types::AppState;
use rusqlite::Connection;
use std::path::PathBuf;

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_required_path(params: &serde_json::Value, key: &str) -> Result<PathBuf, HandlerErr> {
    get_required_str(params, key).map(PathBuf::from)
}

pub fn get_optional_bool(params: &serde_json::Value, key: &str, default: bool) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

/// Course settings: the `course` param when given, otherwise `course.json`
/// of the term folder, otherwise the defaults.
pub fn course_config(
    params: &serde_json::Value,
    paths: Option<&TermPaths>,
) -> Result<CourseConfig, HandlerErr> {
    match params.get("course") {
        Some(v) if !v.is_null() => serde_json::from_value(v.clone())
            .map_err(|e| HandlerErr::new("bad_params", format!("invalid course: {}", e))),
        _ => match paths {
            Some(paths) => {
                load_course_config(paths).map_err(|e| HandlerErr::from_anyhow("bad_params", e))
            }
            None => Ok(CourseConfig::default()),
        },
    }
}

pub fn store_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .store
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

/// Class list named by `classlistPath`.
pub fn load_roster(params: &serde_json::Value) -> Result<Vec<String>, HandlerErr> {
    let path = get_required_path(params, "classlistPath")?;
    if !path.is_file() {
        return Err(HandlerErr::new("not_found", "class list not found")
            .with_details(serde_json::json!({ "classlistPath": path.to_string_lossy() })));
    }
    crate::sources::parse_classlist(&path).map_err(|e| HandlerErr::from_anyhow("io_failed", e))
}
