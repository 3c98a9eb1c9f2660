//! Editor extension installation
//!
//! Installs extensions one identifier at a time through the editor's CLI.
//! Before each install the home directory is reconciled, and a failed
//! install is retried once after a fixed backoff. Whatever happens, the
//! installer returns a report instead of an error: an extension that cannot
//! be installed is recorded as given up and the boot sequence moves on.

use crate::errors::ExtensionError;
use crate::permissions::PermissionReconciler;
use crate::process::CommandSpec;
use crate::readiness::{GateConfig, ReadinessGate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Editor CLI used when none is configured
pub const DEFAULT_EDITOR_COMMAND: &str = "code-server";
/// Pause between the first attempt and the retry
pub const DEFAULT_INSTALL_BACKOFF: Duration = Duration::from_secs(10);
/// First try plus one retry
pub const DEFAULT_INSTALL_ATTEMPTS: u32 = 2;

/// Outcome of one install attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InstallOutcome {
    Success,
    /// Failed, another attempt follows
    Retrying,
    /// Failed on the last allowed attempt
    GaveUp,
}

/// One try at installing one extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallAttempt {
    pub extension_id: String,
    /// 1-based
    pub attempt_number: u32,
    pub outcome: InstallOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// All attempts made for one extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionReport {
    pub extension_id: String,
    pub attempts: Vec<InstallAttempt>,
}

impl ExtensionReport {
    pub fn final_attempt(&self) -> Option<&InstallAttempt> {
        self.attempts.last()
    }

    pub fn final_outcome(&self) -> InstallOutcome {
        self.final_attempt()
            .map(|a| a.outcome)
            .unwrap_or(InstallOutcome::GaveUp)
    }
}

/// Result of installing a list of extensions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionInstallReport {
    pub extensions: Vec<ExtensionReport>,
    /// Extensions reported by the editor after installation (diagnostic only)
    pub installed: Vec<String>,
}

impl ExtensionInstallReport {
    pub fn succeeded(&self) -> Vec<&str> {
        self.by_outcome(InstallOutcome::Success)
    }

    pub fn gave_up(&self) -> Vec<&str> {
        self.by_outcome(InstallOutcome::GaveUp)
    }

    fn by_outcome(&self, outcome: InstallOutcome) -> Vec<&str> {
        self.extensions
            .iter()
            .filter(|e| e.final_outcome() == outcome)
            .map(|e| e.extension_id.as_str())
            .collect()
    }
}

/// Installer settings
#[derive(Debug, Clone)]
pub struct ExtensionInstallerConfig {
    /// Editor CLI, possibly with leading arguments
    pub editor: CommandSpec,
    /// Unprivileged account the editor CLI runs as
    pub run_as: Option<String>,
    /// Attempt ceiling and backoff for each extension
    pub retry: GateConfig,
    pub env: HashMap<String, String>,
}

impl Default for ExtensionInstallerConfig {
    fn default() -> Self {
        Self {
            editor: CommandSpec::new(DEFAULT_EDITOR_COMMAND),
            run_as: None,
            retry: GateConfig::new(DEFAULT_INSTALL_ATTEMPTS, DEFAULT_INSTALL_BACKOFF),
            env: HashMap::new(),
        }
    }
}

/// Installs editor extensions with bounded retry
#[derive(Debug, Clone)]
pub struct ExtensionInstaller {
    config: ExtensionInstallerConfig,
    reconciler: Option<PermissionReconciler>,
}

impl ExtensionInstaller {
    pub fn new(config: ExtensionInstallerConfig) -> Self {
        Self {
            config,
            reconciler: None,
        }
    }

    /// Reconcile the home directory before every install
    pub fn with_reconciler(mut self, reconciler: PermissionReconciler) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    /// Install each identifier in order, then list what the editor reports
    /// as installed. Never fails.
    #[instrument(level = "info", skip(self, extension_ids), fields(count = extension_ids.len()))]
    pub async fn install_all(&self, extension_ids: &[String]) -> ExtensionInstallReport {
        let mut report = ExtensionInstallReport::default();

        for extension_id in extension_ids {
            report.extensions.push(self.install_one(extension_id).await);
        }

        report.installed = self.list_installed().await;
        info!(
            "Extension installation finished: {} succeeded, {} gave up; editor lists {} installed",
            report.succeeded().len(),
            report.gave_up().len(),
            report.installed.len()
        );
        for extension_id in report.gave_up() {
            warn!("Gave up installing {}", extension_id);
        }

        report
    }

    /// Install one extension, retrying once on failure
    #[instrument(level = "info", skip(self))]
    pub async fn install_one(&self, extension_id: &str) -> ExtensionReport {
        let gate = ReadinessGate::new(format!("install {}", extension_id), self.config.retry);
        let ceiling = self.config.retry.max_attempts.max(1);
        let mut attempts = Vec::new();

        let outcome = gate
            .retry(
                |_attempt| async move {
                    if let Some(reconciler) = &self.reconciler {
                        reconciler.reconcile();
                    }
                    self.run_install(extension_id).await
                },
                |attempt, error: &ExtensionError| {
                    let exit_code = match error {
                        ExtensionError::InstallFailed { code, .. } => Some(*code),
                        ExtensionError::Spawn { .. } => None,
                    };
                    attempts.push(InstallAttempt {
                        extension_id: extension_id.to_string(),
                        attempt_number: attempt,
                        outcome: if attempt < ceiling {
                            InstallOutcome::Retrying
                        } else {
                            InstallOutcome::GaveUp
                        },
                        exit_code,
                        message: Some(error.to_string()),
                    });
                },
            )
            .await;

        if outcome.succeeded() {
            info!("Installed {} on attempt {}", extension_id, outcome.attempts);
            attempts.push(InstallAttempt {
                extension_id: extension_id.to_string(),
                attempt_number: outcome.attempts,
                outcome: InstallOutcome::Success,
                exit_code: Some(0),
                message: None,
            });
        }

        ExtensionReport {
            extension_id: extension_id.to_string(),
            attempts,
        }
    }

    async fn run_install(&self, extension_id: &str) -> Result<(), ExtensionError> {
        let spec = self
            .config
            .editor
            .clone()
            .args(["--install-extension", extension_id, "--force"])
            .run_as(self.config.run_as.as_deref());
        debug!("Running {}", spec.display());

        let output = spec
            .to_command(&self.config.env)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ExtensionError::Spawn {
                command: spec.display(),
                message: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stdout.lines().chain(stderr.lines()) {
            debug!("[{}] {}", extension_id, line);
        }

        if output.status.success() {
            Ok(())
        } else {
            Err(ExtensionError::InstallFailed {
                extension_id: extension_id.to_string(),
                code: output.status.code().unwrap_or(-1),
            })
        }
    }

    /// Ask the editor which extensions it has; empty on any failure
    pub async fn list_installed(&self) -> Vec<String> {
        let spec = self
            .config
            .editor
            .clone()
            .arg("--list-extensions")
            .run_as(self.config.run_as.as_deref());

        match spec
            .to_command(&self.config.env)
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                let installed: Vec<String> = String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect();
                for extension in &installed {
                    info!("Installed extension: {}", extension);
                }
                installed
            }
            Ok(output) => {
                warn!(
                    "Listing extensions exited with code {}",
                    output.status.code().unwrap_or(-1)
                );
                Vec::new()
            }
            Err(e) => {
                warn!("Failed to list extensions with {}: {}", spec.display(), e);
                Vec::new()
            }
        }
    }
}
