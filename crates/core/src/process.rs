//! External command plumbing shared by hooks, the extension installer and
//! the display supervisor
//!
//! Provides [`CommandSpec`] (program + arguments), optional wrapping so a
//! command runs under an unprivileged account, and append-only log sinks.

use crate::errors::{DeskhookError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Program that switches to an unprivileged account before exec'ing
pub const RUN_AS_PROGRAM: &str = "runuser";

/// A program with its arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Parse a shell-style command line (`"code-server --auth none"`)
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = shell_words::split(line)
            .map_err(|e| DeskhookError::Config(format!("Invalid command '{}': {}", line, e)))?;
        if parts.is_empty() {
            return Err(DeskhookError::Config("Command must not be empty".to_string()));
        }
        let program = parts.remove(0);
        Ok(Self {
            program,
            args: parts,
        })
    }

    /// Human-readable rendering for logs
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Wrap this command so it runs as `account` (no-op when `None`)
    pub fn run_as(&self, account: Option<&str>) -> CommandSpec {
        match account {
            Some(user) => CommandSpec::new(RUN_AS_PROGRAM)
                .args(["-u", user, "--"])
                .arg(self.program.clone())
                .args(self.args.iter().cloned()),
            None => self.clone(),
        }
    }

    /// Build a tokio command, inheriting the caller's environment plus `env`
    pub fn to_command(&self, env: &HashMap<String, String>) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        for (key, value) in env {
            command.env(key, value);
        }
        command
    }
}

/// Append-only log file for one hook or one supervised stage
#[derive(Debug, Clone)]
pub struct LogSink {
    path: PathBuf,
}

impl LogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the sink for appending, creating parent directories as needed
    pub fn open(&self) -> std::io::Result<File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&self.path)
    }

    /// Stdout/stderr handles for a child process, both appending to the sink.
    ///
    /// Falls back to discarding output if the file cannot be opened, since a
    /// missing log must never keep a stage from starting.
    pub fn stdio_pair(&self) -> (Stdio, Stdio) {
        match self.open().and_then(|f| Ok((f.try_clone()?, f))) {
            Ok((out, err)) => (Stdio::from(out), Stdio::from(err)),
            Err(e) => {
                warn!("Cannot open log {}: {}; discarding output", self.path.display(), e);
                (Stdio::null(), Stdio::null())
            }
        }
    }

    /// Best-effort handover of the log file to `owner`
    pub fn chown(&self, owner: Option<(u32, u32)>) {
        #[cfg(unix)]
        if let Some((uid, gid)) = owner {
            if let Err(e) = std::os::unix::fs::chown(&self.path, Some(uid), Some(gid)) {
                debug!("Could not chown {}: {}", self.path.display(), e);
            }
        }
        #[cfg(not(unix))]
        let _ = owner;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_command_line() {
        let spec = CommandSpec::parse("code-server --bind-addr '0.0.0.0:8080' --auth none").unwrap();
        assert_eq!(spec.program, "code-server");
        assert_eq!(spec.args, vec!["--bind-addr", "0.0.0.0:8080", "--auth", "none"]);
    }

    #[test]
    fn test_parse_rejects_empty_and_unbalanced() {
        assert!(CommandSpec::parse("   ").is_err());
        assert!(CommandSpec::parse("echo 'unterminated").is_err());
    }

    #[test]
    fn test_run_as_wraps_command() {
        let spec = CommandSpec::new("fluxbox").arg("-rc").arg("/tmp/init");
        let wrapped = spec.run_as(Some("coder"));
        assert_eq!(wrapped.program, RUN_AS_PROGRAM);
        assert_eq!(
            wrapped.args,
            vec!["-u", "coder", "--", "fluxbox", "-rc", "/tmp/init"]
        );
        assert_eq!(spec.run_as(None), spec);
    }

    #[test]
    fn test_display_joins_args() {
        let spec = CommandSpec::new("Xvfb").args([":1", "-screen", "0", "1920x1080x24"]);
        assert_eq!(spec.display(), "Xvfb :1 -screen 0 1920x1080x24");
    }

    #[test]
    fn test_log_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::new(dir.path().join("nested/stage.log"));

        writeln!(sink.open().unwrap(), "first").unwrap();
        writeln!(sink.open().unwrap(), "second").unwrap();

        let content = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }
}
