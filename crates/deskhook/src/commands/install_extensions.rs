//! Install-extensions command implementation
//!
//! Implements `deskhook install-extensions`, normally invoked from the
//! extension-installation hook. An extension that gives up is reported but
//! does not fail the command.

use crate::cli::OutputFormat;
use anyhow::Result;
use deskhook_core::extensions::{
    ExtensionInstallReport, ExtensionInstaller, ExtensionInstallerConfig, InstallOutcome,
};
use deskhook_core::permissions::{PermissionReconciler, ReconcileTarget};
use deskhook_core::process::CommandSpec;
use deskhook_core::readiness::GateConfig;
use std::fmt::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, instrument};

/// Install-extensions command arguments
#[derive(Debug, Clone)]
pub struct InstallExtensionsArgs {
    pub extensions: Vec<String>,
    /// Editor command line, split shell-style
    pub editor: String,
    pub user: Option<String>,
    pub home: Option<PathBuf>,
    pub attempts: u32,
    pub backoff: Duration,
    pub output: OutputFormat,
}

/// Execute the install-extensions command
#[instrument(skip(args), fields(count = args.extensions.len()))]
pub async fn execute_install_extensions(args: InstallExtensionsArgs) -> Result<()> {
    debug!("Install-extensions args: {:?}", args);

    let home = reconcile_home(args.home.clone(), args.user.as_deref())?;

    let mut config = ExtensionInstallerConfig {
        editor: CommandSpec::parse(&args.editor)?,
        run_as: args.user.clone(),
        retry: GateConfig::new(args.attempts, args.backoff),
        ..Default::default()
    };
    if args.home.is_some() {
        config
            .env
            .insert("HOME".to_string(), home.display().to_string());
    }

    let owner = super::resolve_account(args.user.as_deref())?;
    let installer = ExtensionInstaller::new(config).with_reconciler(PermissionReconciler::new(
        ReconcileTarget::editor_home(home, owner),
    ));

    let report = installer.install_all(&args.extensions).await;
    super::emit(args.output, &report, || render_text(&report))
}

/// Home directory reconciled before each install.
///
/// Without `--home` the invoking account's `HOME` is used. That fallback is
/// refused for `--user`, whose home would otherwise be the caller's.
fn reconcile_home(home: Option<PathBuf>, user: Option<&str>) -> Result<PathBuf> {
    if let Some(home) = home {
        return Ok(home);
    }
    if let Some(user) = user {
        anyhow::bail!("--home is required when installing as --user {}", user);
    }
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => Ok(PathBuf::from(home)),
        _ => anyhow::bail!("No home directory to reconcile: pass --home or set HOME"),
    }
}

fn render_text(report: &ExtensionInstallReport) -> String {
    let mut out = String::new();
    for extension in &report.extensions {
        let attempts = extension.attempts.len();
        let status = match extension.final_outcome() {
            InstallOutcome::Success => "installed",
            InstallOutcome::Retrying => "retrying",
            InstallOutcome::GaveUp => "gave up",
        };
        let _ = writeln!(
            out,
            "{}: {} after {} attempt(s)",
            extension.extension_id, status, attempts
        );
    }
    if !report.installed.is_empty() {
        let _ = writeln!(out, "Installed: {}", report.installed.join(", "));
    }
    out
}
