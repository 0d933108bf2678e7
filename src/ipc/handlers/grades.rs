use crate::calc::Aggregator;
use crate::config::TermPaths;
use crate::export;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{course_config, get_optional_bool, get_required_path};
use crate::ipc::types::{AppState, Request};
use crate::sources;
use serde_json::json;
use uuid::Uuid;

fn compute(req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let term_dir = get_required_path(&req.params, "termDir")?;
    if !term_dir.is_dir() {
        return Err(HandlerErr::new("not_found", "term folder not found")
            .with_details(json!({ "termDir": term_dir.to_string_lossy() })));
    }
    let write = get_optional_bool(&req.params, "write", true);
    let paths = TermPaths::new(term_dir);
    let config = course_config(&req.params, Some(&paths))?;

    let loaded = sources::load_term_inputs(&paths, &config)
        .map_err(|e| HandlerErr::from_anyhow("io_failed", e))?;
    let aggregator = Aggregator::new(config, loaded.units);
    tracing::info!(
        "aggregating {} students over {} assignments",
        loaded.inputs.roster.len(),
        aggregator.config().assignments
    );
    let run = aggregator.run(&loaded.inputs);

    let clicker = if paths.clicker().is_file() {
        Some(
            sources::parse_score_rows(&paths.clicker())
                .map_err(|e| HandlerErr::from_anyhow("io_failed", e))?,
        )
    } else {
        None
    };

    let mut report = loaded.report;
    report.extend(run.report.clone());
    let table = export::edx_marks_table(&run);
    let sheets = export::gradebook_sheets(&run, clicker.as_deref(), &mut report);
    let followups = export::a0_followups(&run);
    let run_id = Uuid::new_v4().to_string();

    let files = if write {
        let io = |e: anyhow::Error| HandlerErr::from_anyhow("io_failed", e);
        export::write_edx_marks(&paths.edx_marks(), &run).map_err(io)?;
        let summary = export::write_gradebook(&paths.gradebook(), &run_id, &sheets).map_err(io)?;
        export::write_a0_result(&paths.a0_result(), &followups).map_err(io)?;
        tracing::info!("wrote {}", paths.edx_marks().to_string_lossy());
        json!({
            "edxMarks": paths.edx_marks().to_string_lossy(),
            "gradebook": paths.gradebook().to_string_lossy(),
            "gradebookSummary": summary,
            "a0Result": paths.a0_result().to_string_lossy(),
        })
    } else {
        serde_json::Value::Null
    };

    Ok(json!({
        "runId": run_id,
        "header": table.header,
        "rows": table.rows,
        "a0Followups": followups,
        "report": report.to_json(),
        "files": files,
    }))
}

pub fn try_handle(_state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.compute" => Some(match compute(req) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
