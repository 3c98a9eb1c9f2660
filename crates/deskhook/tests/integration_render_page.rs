//! Client page rendering through the CLI.

mod support;

use predicates::prelude::*;
use support::deskhook;

#[test]
fn test_render_page_writes_index() {
    let dir = tempfile::tempdir().unwrap();
    let web_root = dir.path().join("novnc");

    deskhook()
        .arg("render-page")
        .arg("--web-root")
        .arg(&web_root)
        .arg("--title")
        .arg("Workbench")
        .arg("--reconnect-delay-ms")
        .arg("1500")
        .assert()
        .success()
        .stdout(predicate::str::contains("index.html"));

    let page = std::fs::read_to_string(web_root.join("index.html")).unwrap();
    assert!(page.contains("<title>Workbench</title>"));
    assert!(page.contains("const RECONNECT_DELAY_MS = 1500;"));
    assert!(page.contains("rfb.resizeSession = false;"));
    assert!(page.contains("clipboardPasteFrom"));
}

#[test]
fn test_render_page_web_root_from_environment() {
    let dir = tempfile::tempdir().unwrap();
    deskhook()
        .env("DESKHOOK_WEB_ROOT", dir.path())
        .arg("render-page")
        .assert()
        .success();
    assert!(dir.path().join("index.html").exists());
}
