//! Shared test utilities for deskhook CLI tests.

#![allow(dead_code)]

use assert_cmd::Command;
use std::path::Path;

/// A `deskhook` command with no inherited DESKHOOK_* or RUST_LOG configuration
pub fn deskhook() -> Command {
    let mut cmd = Command::cargo_bin("deskhook").unwrap();
    cmd.env_remove("RUST_LOG");
    for (key, _) in std::env::vars() {
        if key.starts_with("DESKHOOK_") {
            cmd.env_remove(key);
        }
    }
    cmd
}

/// Write an executable `/bin/sh` script
#[cfg(unix)]
pub fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Parse stdout as a single JSON document
pub fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout)
        .unwrap_or_else(|e| panic!("stdout is not JSON ({}): {}", e, stdout))
}
