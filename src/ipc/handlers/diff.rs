use crate::diff::{diff_marks, read_marks_sheet};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{get_required_path, load_roster};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_results_diff(req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let old_path = get_required_path(&req.params, "oldPath")?;
    let new_path = get_required_path(&req.params, "newPath")?;
    for p in [&old_path, &new_path] {
        if !p.is_file() {
            return Err(HandlerErr::new("not_found", "export not found")
                .with_details(json!({ "path": p.to_string_lossy() })));
        }
    }
    let roster = load_roster(&req.params)?;
    let io = |e: anyhow::Error| HandlerErr::from_anyhow("io_failed", e);
    let old = read_marks_sheet(&old_path).map_err(io)?;
    let new = read_marks_sheet(&new_path).map_err(io)?;

    let diff = diff_marks(&old, &new, &roster);
    tracing::info!("{} changed cells", diff.changes.len());
    serde_json::to_value(diff).map_err(|e| HandlerErr::new("io_failed", e.to_string()))
}

pub fn try_handle(_state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.diff" => Some(match handle_results_diff(req) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
