//! Desktop command implementation
//!
//! Implements `deskhook desktop`, normally invoked from the desktop-bootstrap
//! hook. The command lives exactly as long as the browser proxy and exits
//! with the proxy's status.

use anyhow::Result;
use deskhook_core::display::{DisplayStackConfig, DisplayStackSupervisor, Resolution, StageTimings};
use deskhook_core::process::CommandSpec;
use deskhook_core::readiness::GateConfig;
use std::path::PathBuf;
use tracing::{debug, error, info, instrument};

/// Desktop command arguments
#[derive(Debug, Clone)]
pub struct DesktopArgs {
    pub user: Option<String>,
    pub home: Option<PathBuf>,
    pub display: u32,
    pub resolution: String,
    pub depth: u8,
    pub vnc_port: u16,
    pub http_port: u16,
    pub web_root: PathBuf,
    pub log_dir: PathBuf,
    /// Shell-style command line
    pub target_app: Option<String>,
    pub window_class: Option<String>,
    pub framebuffer_attempts: u32,
}

/// Non-zero proxy exit, surfaced as the process exit code by `main`
#[derive(Debug)]
pub struct ProxyExitCode(pub i32);

impl std::fmt::Display for ProxyExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Proxy exited with code {}", self.0)
    }
}

impl std::error::Error for ProxyExitCode {}

impl DesktopArgs {
    fn into_config(self) -> Result<DisplayStackConfig> {
        let defaults = DisplayStackConfig::default();
        let resolution: Resolution = self.resolution.parse()?;
        let target_application = self
            .target_app
            .as_deref()
            .map(CommandSpec::parse)
            .transpose()?;
        let window_manager_dir = self
            .home
            .as_ref()
            .map(|home| home.join(".fluxbox"))
            .unwrap_or_else(|| defaults.window_manager_dir.clone());

        Ok(DisplayStackConfig {
            display_number: self.display,
            resolution,
            color_depth: self.depth,
            framebuffer_port: self.vnc_port,
            http_port: self.http_port,
            web_root: self.web_root,
            log_dir: self.log_dir,
            window_manager_dir,
            run_as: self.user,
            home: self.home,
            target_application,
            target_window_class: self.window_class,
            timings: StageTimings {
                framebuffer_gate: GateConfig::new(
                    self.framebuffer_attempts,
                    defaults.timings.framebuffer_gate.interval,
                ),
                ..defaults.timings
            },
            ..defaults
        })
    }
}

/// Execute the desktop command
#[instrument(skip(args), fields(display = args.display))]
pub async fn execute_desktop(args: DesktopArgs) -> Result<()> {
    debug!("Desktop args: {:?}", args);

    let log_owner = match args.user.as_deref() {
        Some(name) => {
            let account = super::resolve_account(Some(name))?;
            Some((account.uid, account.gid))
        }
        None => None,
    };

    let config = args.into_config()?;
    info!(
        "Starting desktop on {} at {}x{}",
        config.display_name(),
        config.resolution,
        config.color_depth
    );

    let mut supervisor = DisplayStackSupervisor::new(config).with_log_owner(log_owner);
    let code = match supervisor.run().await {
        Ok(code) => code,
        Err(e) => {
            if e.is_fatal_display_failure() {
                error!("Desktop stack cannot come up: {}", e);
            }
            return Err(e.into());
        }
    };
    if code != 0 {
        return Err(ProxyExitCode(code).into());
    }
    Ok(())
}
