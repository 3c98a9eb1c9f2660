//! Boot-time hook scheduler
//!
//! Discovers executable entries in a hook directory, orders them by the raw
//! bytes of their file names, and runs them one after another. A hook that
//! exits non-zero (or cannot be spawned) is logged as a warning and the pass
//! carries on: one broken hook must never keep later hooks, in particular the
//! desktop bootstrap, from running.
//!
//! Ordering is byte-wise, not numeric and not locale-aware. `-` (0x2d) sorts
//! before `.` (0x2e) and `_` (0x5f), so `120-x` runs before `120_y`. Hooks that
//! must run in a given relative order have to be named so the separator
//! character itself preserves it; [`detect_ordering_hazards`] reports the
//! cases where only the separator decides.

use crate::errors::{HookError, Result};
use crate::process::LogSink;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Default directory populated with hooks at image-build time
pub const DEFAULT_HOOK_DIR: &str = "/etc/deskhook/hooks.d";
/// Default directory for per-hook logs
pub const DEFAULT_HOOK_LOG_DIR: &str = "/var/log/deskhook/hooks";
/// Lines of hook output kept in the summary; the log file has all of it
pub const OUTPUT_TAIL_LINES: usize = 200;

/// Separator characters whose relative byte order is a naming hazard
const SEPARATORS: &[u8] = b"-._";

/// One discovered hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookScript {
    /// File name, lossily decoded for display
    pub name: String,
    /// Raw file-name bytes; the only ordering key
    #[serde(skip)]
    pub sort_key: Vec<u8>,
    pub path: PathBuf,
    pub executable: bool,
}

impl HookScript {
    /// Build a hook entry from a path, probing its executable bit
    pub fn from_path(path: PathBuf) -> Self {
        let file_name = path.file_name().unwrap_or(path.as_os_str());
        let sort_key = name_bytes(file_name);
        let name = file_name.to_string_lossy().into_owned();
        let executable = is_executable(&path);
        Self {
            name,
            sort_key,
            path,
            executable,
        }
    }
}

impl PartialOrd for HookScript {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HookScript {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key.cmp(&other.sort_key)
    }
}

#[cfg(unix)]
fn name_bytes(name: &std::ffi::OsStr) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    name.as_bytes().to_vec()
}

#[cfg(not(unix))]
fn name_bytes(name: &std::ffi::OsStr) -> Vec<u8> {
    name.to_string_lossy().as_bytes().to_vec()
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Two hooks whose relative order is decided only by a separator character
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingHazard {
    /// Runs first
    pub first: String,
    /// Runs second
    pub second: String,
}

/// Find hook pairs that share a prefix and then differ only by which
/// separator character follows it. Input must already be sorted.
pub fn detect_ordering_hazards(hooks: &[HookScript]) -> Vec<OrderingHazard> {
    let mut hazards = Vec::new();
    for (i, a) in hooks.iter().enumerate() {
        for b in &hooks[i + 1..] {
            let diverge = a
                .sort_key
                .iter()
                .zip(&b.sort_key)
                .position(|(x, y)| x != y);
            if let Some(pos) = diverge {
                if SEPARATORS.contains(&a.sort_key[pos]) && SEPARATORS.contains(&b.sort_key[pos]) {
                    hazards.push(OrderingHazard {
                        first: a.name.clone(),
                        second: b.name.clone(),
                    });
                }
            }
        }
    }
    hazards
}

/// Final status of one hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStatus {
    Succeeded,
    Failed,
    SpawnFailed,
}

impl HookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookStatus::Succeeded => "succeeded",
            HookStatus::Failed => "failed",
            HookStatus::SpawnFailed => "spawn_failed",
        }
    }
}

/// Execution record for one hook; kept in memory only
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutcome {
    pub name: String,
    pub path: PathBuf,
    pub status: HookStatus,
    /// Process exit code; -1 when killed by a signal, `None` when never spawned
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub log_path: PathBuf,
    /// Last [`OUTPUT_TAIL_LINES`] lines of combined stdout/stderr
    pub output: String,
}

/// Result of one scheduler pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookRunSummary {
    pub hook_dir: PathBuf,
    /// Outcomes in execution order
    pub outcomes: Vec<HookOutcome>,
    /// Entries skipped because they are not executable files
    pub skipped: Vec<String>,
    pub hazards: Vec<OrderingHazard>,
}

impl HookRunSummary {
    /// Names in the order they ran
    pub fn execution_order(&self) -> Vec<&str> {
        self.outcomes.iter().map(|o| o.name.as_str()).collect()
    }

    pub fn failed(&self) -> Vec<&HookOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status != HookStatus::Succeeded)
            .collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed().is_empty()
    }
}

/// Scheduler settings
#[derive(Debug, Clone)]
pub struct HookSchedulerConfig {
    pub hook_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Added on top of the inherited environment
    pub env: HashMap<String, String>,
}

impl Default for HookSchedulerConfig {
    fn default() -> Self {
        Self {
            hook_dir: PathBuf::from(DEFAULT_HOOK_DIR),
            log_dir: PathBuf::from(DEFAULT_HOOK_LOG_DIR),
            env: HashMap::new(),
        }
    }
}

/// Hooks found in a directory, split by whether they will run
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Executable hooks in execution order
    pub hooks: Vec<HookScript>,
    /// Non-executable entries, in byte order
    pub skipped: Vec<HookScript>,
}

/// Sequential, failure-isolating hook runner
#[derive(Debug, Clone)]
pub struct HookScheduler {
    config: HookSchedulerConfig,
}

impl HookScheduler {
    pub fn new(config: HookSchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HookSchedulerConfig {
        &self.config
    }

    /// List the hook directory and sort its entries by file-name bytes.
    ///
    /// A missing directory is an empty pass, not an error.
    pub fn discover(&self) -> Result<Discovery> {
        let dir = &self.config.hook_dir;
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Hook directory {} does not exist; nothing to run", dir.display());
                return Ok(Discovery::default());
            }
            Err(source) => {
                return Err(HookError::ReadDir {
                    path: dir.display().to_string(),
                    source,
                }
                .into())
            }
        };

        let mut all = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| HookError::ReadDir {
                path: dir.display().to_string(),
                source,
            })?;
            all.push(HookScript::from_path(entry.path()));
        }
        all.sort();

        let (hooks, skipped): (Vec<_>, Vec<_>) = all.into_iter().partition(|h| h.executable);
        for entry in &skipped {
            debug!("Skipping non-executable entry {}", entry.path.display());
        }

        Ok(Discovery { hooks, skipped })
    }

    /// Run every discovered hook exactly once, in byte order.
    ///
    /// Only a failure to list the directory is returned as an error; hook
    /// failures are recorded in the summary.
    #[instrument(level = "info", skip(self), fields(hook_dir = %self.config.hook_dir.display()))]
    pub async fn run(&self) -> Result<HookRunSummary> {
        let discovery = self.discover()?;
        let hazards = detect_ordering_hazards(&discovery.hooks);
        for hazard in &hazards {
            warn!(
                "Hooks '{}' and '{}' differ only by separator; '{}' runs first (byte order)",
                hazard.first, hazard.second, hazard.first
            );
        }

        info!("Running {} hook(s)", discovery.hooks.len());

        let mut outcomes = Vec::with_capacity(discovery.hooks.len());
        for hook in &discovery.hooks {
            outcomes.push(self.run_hook(hook).await);
        }

        let summary = HookRunSummary {
            hook_dir: self.config.hook_dir.clone(),
            outcomes,
            skipped: discovery.skipped.into_iter().map(|h| h.name).collect(),
            hazards,
        };

        let failed = summary.failed().len();
        if failed > 0 {
            warn!(
                "Hook pass complete: {} run, {} failed",
                summary.outcomes.len(),
                failed
            );
        } else {
            info!("Hook pass complete: {} run, all succeeded", summary.outcomes.len());
        }

        Ok(summary)
    }

    /// Execute a single hook with stdout/stderr appended to its log file.
    ///
    /// The hook holds no pipe back to this process, so anything it leaves
    /// running in the background cannot keep the pass waiting.
    #[instrument(level = "info", skip(self, hook), fields(hook = %hook.name))]
    async fn run_hook(&self, hook: &HookScript) -> HookOutcome {
        let sink = LogSink::new(self.config.log_dir.join(format!("{}.log", hook.name)));
        let log_start = std::fs::metadata(sink.path()).map(|m| m.len()).unwrap_or(0);

        let started_at = Utc::now();
        let start = Instant::now();
        info!("Starting hook {}", hook.path.display());

        let (stdout, stderr) = sink.stdio_pair();
        let mut command = Command::new(&hook.path);
        for (key, value) in &self.config.env {
            command.env(key, value);
        }
        command
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let err = HookError::Spawn {
                    name: hook.name.clone(),
                    message: e.to_string(),
                };
                warn!("{}; continuing with next hook", err);
                if let Ok(mut file) = sink.open() {
                    let _ = writeln!(file, "{}", err);
                }
                return HookOutcome {
                    name: hook.name.clone(),
                    path: hook.path.clone(),
                    status: HookStatus::SpawnFailed,
                    exit_code: None,
                    started_at,
                    duration_ms: start.elapsed().as_millis() as u64,
                    log_path: sink.path().to_path_buf(),
                    output: err.to_string(),
                };
            }
        };

        let exit_code = match child.wait().await {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                warn!("Failed to wait for hook {}: {}", hook.name, e);
                -1
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let output = read_tail(sink.path(), log_start, OUTPUT_TAIL_LINES);
        for line in output.lines() {
            debug!("[{}] {}", hook.name, line);
        }

        let status = if exit_code == 0 {
            info!("Hook {} succeeded in {} ms", hook.name, duration_ms);
            HookStatus::Succeeded
        } else {
            warn!(
                "Hook {} exited with code {} after {} ms; continuing with next hook",
                hook.name, exit_code, duration_ms
            );
            HookStatus::Failed
        };

        HookOutcome {
            name: hook.name.clone(),
            path: hook.path.clone(),
            status,
            exit_code: Some(exit_code),
            started_at,
            duration_ms,
            log_path: sink.path().to_path_buf(),
            output,
        }
    }
}

/// The last `limit` lines appended to `path` past byte offset `from`.
/// Invalid UTF-8 is replaced.
fn read_tail(path: &Path, from: u64, limit: usize) -> String {
    if limit == 0 {
        return String::new();
    }
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            debug!("Cannot read back {}: {}", path.display(), e);
            return String::new();
        }
    };
    if let Err(e) = file.seek(SeekFrom::Start(from)) {
        debug!("Cannot seek in {}: {}", path.display(), e);
        return String::new();
    }

    let mut reader = BufReader::new(file);
    let mut tail = VecDeque::with_capacity(limit);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                if tail.len() == limit {
                    tail.pop_front();
                }
                let line = String::from_utf8_lossy(&buf);
                tail.push_back(line.trim_end_matches(['\n', '\r']).to_string());
            }
            Err(e) => {
                debug!("Stopped reading {}: {}", path.display(), e);
                break;
            }
        }
    }
    Vec::from(tail).join("\n")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_hook(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn scheduler(hooks: &TempDir, logs: &TempDir) -> HookScheduler {
        HookScheduler::new(HookSchedulerConfig {
            hook_dir: hooks.path().to_path_buf(),
            log_dir: logs.path().to_path_buf(),
            env: HashMap::new(),
        })
    }

    fn names(hooks: &[HookScript]) -> Vec<&str> {
        hooks.iter().map(|h| h.name.as_str()).collect()
    }

    #[test]
    fn test_hyphen_sorts_before_underscore() {
        let hooks = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        for name in ["120_b", "120-a", "110_b"] {
            write_hook(hooks.path(), name, "true");
        }

        let discovery = scheduler(&hooks, &logs).discover().unwrap();
        assert_eq!(names(&discovery.hooks), vec!["110_b", "120-a", "120_b"]);
    }

    #[test]
    fn test_order_is_bytewise_not_numeric() {
        let hooks = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        for name in ["2_late", "10_early", "B_upper", "a_lower"] {
            write_hook(hooks.path(), name, "true");
        }

        let discovery = scheduler(&hooks, &logs).discover().unwrap();
        assert_eq!(
            names(&discovery.hooks),
            vec!["10_early", "2_late", "B_upper", "a_lower"]
        );
    }

    #[test]
    fn test_non_executable_entries_are_skipped() {
        let hooks = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        write_hook(hooks.path(), "010_run", "true");
        std::fs::write(hooks.path().join("020_readme"), "not a hook").unwrap();
        std::fs::create_dir(hooks.path().join("030_dir")).unwrap();

        let discovery = scheduler(&hooks, &logs).discover().unwrap();
        assert_eq!(names(&discovery.hooks), vec!["010_run"]);
        assert_eq!(names(&discovery.skipped), vec!["020_readme", "030_dir"]);
    }

    #[test]
    fn test_missing_directory_is_empty_pass() {
        let logs = TempDir::new().unwrap();
        let scheduler = HookScheduler::new(HookSchedulerConfig {
            hook_dir: logs.path().join("does-not-exist"),
            log_dir: logs.path().to_path_buf(),
            env: HashMap::new(),
        });
        let discovery = scheduler.discover().unwrap();
        assert!(discovery.hooks.is_empty());
    }

    #[test]
    fn test_detect_ordering_hazards() {
        let mk = |name: &str| HookScript {
            name: name.to_string(),
            sort_key: name.as_bytes().to_vec(),
            path: PathBuf::from(name),
            executable: true,
        };
        let mut hooks = vec![mk("120_d"), mk("120-c"), mk("010_b"), mk("000_a")];
        hooks.sort();

        let hazards = detect_ordering_hazards(&hooks);
        assert_eq!(
            hazards,
            vec![OrderingHazard {
                first: "120-c".to_string(),
                second: "120_d".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_failing_hook_does_not_halt_sequence() {
        let hooks = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        let order = hooks.path().join("order.txt");
        let order_str = order.display().to_string();

        write_hook(hooks.path(), "000_a", &format!("echo 000_a >> {}", order_str));
        write_hook(hooks.path(), "010_b", &format!("echo 010_b >> {}", order_str));
        write_hook(
            hooks.path(),
            "120-c",
            &format!("echo 120-c >> {}\necho boom >&2\nexit 1", order_str),
        );
        write_hook(
            hooks.path(),
            "120_d",
            &format!("echo 120_d >> {}\necho done", order_str),
        );

        let summary = scheduler(&hooks, &logs).run().await.unwrap();

        assert_eq!(
            summary.execution_order(),
            vec!["000_a", "010_b", "120-c", "120_d"]
        );
        assert_eq!(
            std::fs::read_to_string(&order).unwrap(),
            "000_a\n010_b\n120-c\n120_d\n"
        );

        let failed = summary.failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name, "120-c");
        assert_eq!(failed[0].exit_code, Some(1));
        assert!(failed[0].output.contains("boom"));
        assert_eq!(summary.hazards.len(), 1);
    }

    #[tokio::test]
    async fn test_hook_output_goes_to_log_sink() {
        let hooks = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        write_hook(hooks.path(), "050_talk", "echo to-stdout\necho to-stderr >&2");

        let summary = scheduler(&hooks, &logs).run().await.unwrap();
        let outcome = &summary.outcomes[0];
        assert_eq!(outcome.status, HookStatus::Succeeded);
        assert_eq!(outcome.log_path, logs.path().join("050_talk.log"));

        let log = std::fs::read_to_string(&outcome.log_path).unwrap();
        assert!(log.contains("to-stdout"));
        assert!(log.contains("to-stderr"));
    }

    #[tokio::test]
    async fn test_hook_inherits_environment() {
        let hooks = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        write_hook(hooks.path(), "000_env", "echo \"value=$DESKHOOK_TEST_VALUE\"");

        let mut config = scheduler(&hooks, &logs).config().clone();
        config
            .env
            .insert("DESKHOOK_TEST_VALUE".to_string(), "42".to_string());
        let summary = HookScheduler::new(config).run().await.unwrap();

        assert_eq!(summary.outcomes[0].output, "value=42");
    }

    #[tokio::test]
    async fn test_backgrounded_process_does_not_hold_the_pass() {
        let hooks = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        write_hook(hooks.path(), "010_daemon", "sleep 8 &\necho started\nexit 0");
        write_hook(hooks.path(), "020_next", "echo next");

        let start = Instant::now();
        let summary = scheduler(&hooks, &logs).run().await.unwrap();

        assert!(
            start.elapsed() < std::time::Duration::from_secs(4),
            "pass took {:?}",
            start.elapsed()
        );
        assert_eq!(summary.execution_order(), vec!["010_daemon", "020_next"]);
        assert!(summary.all_succeeded());
        assert_eq!(summary.outcomes[0].output, "started");
        assert_eq!(summary.outcomes[1].output, "next");
    }

    #[tokio::test]
    async fn test_summary_keeps_only_output_tail() {
        let hooks = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        write_hook(
            hooks.path(),
            "030_chatty",
            "i=0\nwhile [ $i -lt 500 ]; do echo line-$i; i=$((i+1)); done",
        );

        let summary = scheduler(&hooks, &logs).run().await.unwrap();
        let outcome = &summary.outcomes[0];
        let lines: Vec<&str> = outcome.output.lines().collect();
        assert_eq!(lines.len(), OUTPUT_TAIL_LINES);
        assert_eq!(lines.first(), Some(&"line-300"));
        assert_eq!(lines.last(), Some(&"line-499"));

        let log = std::fs::read_to_string(&outcome.log_path).unwrap();
        assert_eq!(log.lines().count(), 500);
    }

    #[tokio::test]
    async fn test_output_covers_only_the_current_run() {
        let hooks = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        std::fs::write(logs.path().join("040_again.log"), "from an earlier boot\n").unwrap();
        write_hook(hooks.path(), "040_again", "echo this boot");

        let summary = scheduler(&hooks, &logs).run().await.unwrap();
        assert_eq!(summary.outcomes[0].output, "this boot");
    }

    #[tokio::test]
    async fn test_unspawnable_hook_is_recorded() {
        let hooks = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        let bad = hooks.path().join("000_bad");
        std::fs::write(&bad, "#!/nonexistent/interpreter\n").unwrap();
        std::fs::set_permissions(&bad, std::fs::Permissions::from_mode(0o755)).unwrap();
        write_hook(hooks.path(), "010_good", "true");

        let summary = scheduler(&hooks, &logs).run().await.unwrap();
        assert_eq!(summary.outcomes[0].status, HookStatus::SpawnFailed);
        assert_eq!(summary.outcomes[0].exit_code, None);
        assert_eq!(summary.outcomes[1].status, HookStatus::Succeeded);
    }
}
