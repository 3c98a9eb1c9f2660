//! Display stack settings and the command lines derived from them

use crate::display::client_page::ClientPageOptions;
use crate::errors::{DeskhookError, Result};
use crate::process::CommandSpec;
use crate::readiness::GateConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Width and height of the virtual screen, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = DeskhookError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || DeskhookError::Config(format!("Invalid resolution '{}', expected WIDTHxHEIGHT", s));
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = w.parse().map_err(|_| invalid())?;
        let height: u32 = h.parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

/// Executables for each stage. Arguments are derived from the config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageBinaries {
    pub virtual_display: String,
    pub window_manager: String,
    pub framebuffer_server: String,
    pub clipboard: String,
    pub proxy: String,
}

impl Default for StageBinaries {
    fn default() -> Self {
        Self {
            virtual_display: "Xvfb".to_string(),
            window_manager: "fluxbox".to_string(),
            framebuffer_server: "x11vnc".to_string(),
            clipboard: "autocutsel".to_string(),
            proxy: "websockify".to_string(),
        }
    }
}

/// Timing of fixed settle delays and readiness polling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimings {
    /// Wait after launching the virtual display before the liveness check
    pub display_settle: Duration,
    /// Optimistic readiness delay for the window manager
    pub window_manager_settle: Duration,
    /// Wait before checking clipboard and target application liveness
    pub companion_settle: Duration,
    /// Polling of the remote-framebuffer port
    pub framebuffer_gate: GateConfig,
    /// Per-connect timeout while polling the port
    pub connect_timeout: Duration,
}

impl Default for StageTimings {
    fn default() -> Self {
        Self {
            display_settle: Duration::from_secs(2),
            window_manager_settle: Duration::from_secs(1),
            companion_settle: Duration::from_secs(1),
            framebuffer_gate: GateConfig::new(30, Duration::from_secs(1)),
            connect_timeout: Duration::from_millis(500),
        }
    }
}

/// Everything the display stack supervisor needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayStackConfig {
    /// X display number (`:1`)
    pub display_number: u32,
    pub resolution: Resolution,
    pub color_depth: u8,
    /// Remote-framebuffer port; unauthenticated
    pub framebuffer_port: u16,
    /// Browser-facing HTTP/WebSocket port
    pub http_port: u16,
    /// Directory served by the proxy; the client page is written here
    pub web_root: PathBuf,
    /// Directory holding the display server's lock files
    pub lock_dir: PathBuf,
    /// Per-stage log files
    pub log_dir: PathBuf,
    /// Where the generated window manager configuration goes
    pub window_manager_dir: PathBuf,
    /// Unprivileged account for the window manager, clipboard bridge and target application
    pub run_as: Option<String>,
    /// HOME for processes started under `run_as`
    pub home: Option<PathBuf>,
    /// Application pinned full-screen on the desktop
    pub target_application: Option<CommandSpec>,
    /// Window class the window manager maximizes; defaults to the target program name
    pub target_window_class: Option<String>,
    pub binaries: StageBinaries,
    pub timings: StageTimings,
    pub page: ClientPageOptions,
}

impl Default for DisplayStackConfig {
    fn default() -> Self {
        Self {
            display_number: 1,
            resolution: Resolution::default(),
            color_depth: 24,
            framebuffer_port: 5900,
            http_port: 6080,
            web_root: PathBuf::from("/usr/share/novnc"),
            lock_dir: PathBuf::from("/tmp"),
            log_dir: PathBuf::from("/var/log/deskhook"),
            window_manager_dir: PathBuf::from("/tmp/deskhook/fluxbox"),
            run_as: None,
            home: None,
            target_application: None,
            target_window_class: None,
            binaries: StageBinaries::default(),
            timings: StageTimings::default(),
            page: ClientPageOptions::default(),
        }
    }
}

impl DisplayStackConfig {
    /// X display name, e.g. `:1`
    pub fn display_name(&self) -> String {
        format!(":{}", self.display_number)
    }

    /// Stale artifacts a crashed display server leaves behind
    pub fn lock_files(&self) -> Vec<PathBuf> {
        vec![
            self.lock_dir.join(format!(".X{}-lock", self.display_number)),
            self.lock_dir
                .join(".X11-unix")
                .join(format!("X{}", self.display_number)),
        ]
    }

    pub fn framebuffer_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.framebuffer_port))
    }

    /// Window class pinned by the window manager placement rule
    pub fn window_class(&self) -> Option<String> {
        self.target_window_class.clone().or_else(|| {
            self.target_application.as_ref().map(|app| {
                std::path::Path::new(&app.program)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| app.program.clone())
            })
        })
    }

    /// Environment shared by every process attached to the display
    pub fn display_env(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("DISPLAY".to_string(), self.display_name());
        if let Some(home) = &self.home {
            env.insert("HOME".to_string(), home.display().to_string());
        }
        env
    }

    pub fn virtual_display_command(&self) -> CommandSpec {
        CommandSpec::new(&self.binaries.virtual_display)
            .arg(self.display_name())
            .args(["-screen", "0"])
            .arg(format!("{}x{}", self.resolution, self.color_depth))
            .args(["-nolisten", "tcp"])
    }

    pub fn window_manager_command(&self, init_file: &std::path::Path) -> CommandSpec {
        CommandSpec::new(&self.binaries.window_manager)
            .arg("-rc")
            .arg(init_file.display().to_string())
            .run_as(self.run_as.as_deref())
    }

    /// Unauthenticated server on a fixed port, reporting cursor shape and
    /// skipping X DAMAGE events to save bandwidth
    pub fn framebuffer_command(&self) -> CommandSpec {
        CommandSpec::new(&self.binaries.framebuffer_server)
            .args(["-display"])
            .arg(self.display_name())
            .arg("-rfbport")
            .arg(self.framebuffer_port.to_string())
            .args(["-nopw", "-forever", "-shared", "-cursor", "most", "-noxdamage"])
    }

    pub fn proxy_command(&self) -> CommandSpec {
        CommandSpec::new(&self.binaries.proxy)
            .arg("--web")
            .arg(self.web_root.display().to_string())
            .arg(self.http_port.to_string())
            .arg(format!("localhost:{}", self.framebuffer_port))
    }

    pub fn target_command(&self) -> Option<CommandSpec> {
        self.target_application
            .as_ref()
            .map(|app| app.run_as(self.run_as.as_deref()))
    }
}
