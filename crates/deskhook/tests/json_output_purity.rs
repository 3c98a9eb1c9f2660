//! With `--output json`, stdout carries exactly one JSON document and all
//! logging stays on stderr, in either log format.

mod support;

use support::{deskhook, stdout_json};

#[test]
fn test_json_output_with_debug_text_logs() {
    let dir = tempfile::tempdir().unwrap();
    let output = deskhook()
        .arg("render-page")
        .arg("--web-root")
        .arg(dir.path())
        .arg("--output")
        .arg("json")
        .arg("--log-level")
        .arg("debug")
        .output()
        .unwrap();
    assert!(output.status.success());

    let result = stdout_json(&output);
    assert!(result["path"].as_str().unwrap().ends_with("index.html"));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Wrote client page"));
}

#[test]
fn test_json_output_with_json_logs() {
    let dir = tempfile::tempdir().unwrap();
    let output = deskhook()
        .arg("run-hooks")
        .arg("--hook-dir")
        .arg(dir.path().join("none"))
        .arg("--log-dir")
        .arg(dir.path().join("logs"))
        .arg("--output")
        .arg("json")
        .arg("--log-format")
        .arg("json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let summary = stdout_json(&output);
    assert_eq!(summary["outcomes"], serde_json::json!([]));

    for line in String::from_utf8_lossy(&output.stderr).lines() {
        serde_json::from_str::<serde_json::Value>(line)
            .unwrap_or_else(|e| panic!("stderr line is not JSON ({}): {}", e, line));
    }
}
