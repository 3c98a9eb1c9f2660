//! Reconcile-permissions command implementation

use crate::cli::OutputFormat;
use anyhow::Result;
use deskhook_core::permissions::{PermissionReconciler, ReconcileReport, ReconcileTarget};
use std::fmt::Write;
use std::path::PathBuf;
use tracing::{debug, instrument};

/// Reconcile-permissions command arguments
#[derive(Debug, Clone)]
pub struct ReconcileArgs {
    pub home: PathBuf,
    pub user: Option<String>,
    pub output: OutputFormat,
}

/// Execute the reconcile-permissions command.
///
/// Reconciliation problems are reported, not returned; only an unknown
/// account fails the command.
#[instrument(skip(args), fields(home = %args.home.display()))]
pub fn execute_reconcile(args: ReconcileArgs) -> Result<()> {
    debug!("Reconcile args: {:?}", args);

    let owner = super::resolve_account(args.user.as_deref())?;
    let reconciler = PermissionReconciler::new(ReconcileTarget::editor_home(args.home, owner));
    let report = reconciler.reconcile();

    super::emit(args.output, &report, || render_text(&report))
}

fn render_text(report: &ReconcileReport) -> String {
    let mut out = String::new();
    if report.is_noop() {
        let _ = writeln!(out, "{}: already reconciled", report.root.display());
        return out;
    }
    if report.ownership_reassigned {
        let _ = writeln!(out, "{}: ownership reassigned", report.root.display());
    }
    for path in &report.created {
        let _ = writeln!(out, "created {}", path.display());
    }
    for error in &report.errors {
        let _ = writeln!(out, "error: {}", error);
    }
    out
}
