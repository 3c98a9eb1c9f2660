//! Run-hooks command implementation
//!
//! Implements `deskhook run-hooks`: one sequential pass over the hook
//! directory. Hook failures are reported, never turned into a failing exit.

use crate::cli::OutputFormat;
use anyhow::Result;
use deskhook_core::hooks::{HookRunSummary, HookScheduler, HookSchedulerConfig, HookStatus};
use std::fmt::Write;
use std::path::PathBuf;
use tracing::{debug, instrument};

/// Run-hooks command arguments
#[derive(Debug, Clone)]
pub struct RunHooksArgs {
    pub hook_dir: PathBuf,
    pub log_dir: PathBuf,
    pub output: OutputFormat,
}

/// Execute the run-hooks command
#[instrument(skip(args))]
pub async fn execute_run_hooks(args: RunHooksArgs) -> Result<()> {
    debug!("Run-hooks args: {:?}", args);

    let scheduler = HookScheduler::new(HookSchedulerConfig {
        hook_dir: args.hook_dir,
        log_dir: args.log_dir,
        ..Default::default()
    });
    let summary = scheduler.run().await?;

    super::emit(args.output, &summary, || render_text(&summary))
}

fn render_text(summary: &HookRunSummary) -> String {
    let mut out = String::new();
    for outcome in &summary.outcomes {
        let detail = match (outcome.status, outcome.exit_code) {
            (HookStatus::SpawnFailed, _) => "could not start".to_string(),
            (_, Some(-1)) | (_, None) => "killed by signal".to_string(),
            (_, Some(code)) => format!("exit {}", code),
        };
        let _ = writeln!(
            out,
            "{:<8} {} ({}, {} ms)",
            outcome.status.as_str(),
            outcome.name,
            detail,
            outcome.duration_ms
        );
    }
    for name in &summary.skipped {
        let _ = writeln!(out, "{:<8} {} (not executable)", "skipped", name);
    }
    let _ = writeln!(
        out,
        "{} hook(s) run, {} failed",
        summary.outcomes.len(),
        summary.failed().len()
    );
    out
}
