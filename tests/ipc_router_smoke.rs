use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn read_response(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let value = read_response(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("gradebook-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["result"]["storeOpen"], false);

    let selected = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["ok"], true);
    assert!(workspace.join("marmoset.sqlite3").is_file());

    for (id, method) in [
        ("3", "grades.compute"),
        ("4", "marks.select"),
        ("5", "submissions.download"),
        ("6", "projects.outOf"),
        ("7", "results.diff"),
    ] {
        let resp = request(&mut stdin, &mut reader, id, method, json!({}));
        assert_eq!(resp["ok"], false, "{} with no params", method);
        assert_eq!(resp["error"]["code"], "bad_params", "{}", method);
    }

    writeln!(stdin, "{{\"id\":\"8\",\"method\":\"grades.unknown\"}}").expect("write");
    stdin.flush().expect("flush");
    let unknown = read_response(&mut reader);
    assert_eq!(unknown["error"]["code"], "not_implemented");

    writeln!(stdin, "not json").expect("write");
    stdin.flush().expect("flush");
    let bad = read_response(&mut reader);
    assert_eq!(bad["error"]["code"], "bad_json");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn results_diff_aligns_columns_by_name() {
    let dir = temp_dir("gradebook-diff");
    std::fs::write(dir.join("classlist.csv"), "1,alice,A,A\n2,bob,B,B\n").expect("classlist");
    std::fs::write(
        dir.join("old.csv"),
        ",Assignment0,Assignment1\nalice,100,60\nbob,80,45\n",
    )
    .expect("old");
    std::fs::write(
        dir.join("new.csv"),
        ",Assignment0,Assignment1,Assignment1Style\nalice,100,60,18\nbob,80,X,10\n",
    )
    .expect("new");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "results.diff",
        json!({
            "oldPath": dir.join("old.csv").to_string_lossy(),
            "newPath": dir.join("new.csv").to_string_lossy(),
            "classlistPath": dir.join("classlist.csv").to_string_lossy(),
        }),
    );
    assert_eq!(resp["ok"], true, "{}", resp);
    assert_eq!(
        resp["result"]["changes"],
        json!([{ "studentId": "bob", "assessment": "Assignment1", "old": "45", "new": "X" }])
    );
    assert_eq!(resp["result"]["addedColumns"], json!(["Assignment1Style"]));
    assert_eq!(resp["result"]["removedColumns"], json!([]));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(dir);
}
