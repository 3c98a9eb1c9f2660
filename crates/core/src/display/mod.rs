//! Remote desktop stack supervision
//!
//! [`DisplayStackSupervisor`] brings up the virtual display, window manager,
//! remote-framebuffer server, clipboard bridge, target application and
//! browser proxy in dependency order, gating each stage on the readiness of
//! the stages before it. It then blocks on the proxy, whose exit ends the
//! supervisor's run.

pub mod client_page;
pub mod clipboard;
pub mod config;
pub mod managed;
pub mod role;
pub mod window_manager;

pub use client_page::ClientPageOptions;
pub use clipboard::{ClipboardBridge, ClipboardDirection};
pub use config::{DisplayStackConfig, Resolution, StageBinaries, StageTimings};
pub use managed::ManagedProcess;
pub use role::{ProcessRole, ProcessState};
pub use window_manager::WindowManagerConfig;

use crate::errors::{DisplayError, Result};
use crate::process::{CommandSpec, LogSink};
use crate::readiness::{port_accepting, ReadinessGate};
use std::collections::{BTreeMap, BTreeSet};
use std::process::ExitStatus;
use tracing::{debug, info, instrument, warn};

/// Owns every managed process of the stack
#[derive(Debug)]
pub struct DisplayStackSupervisor {
    config: DisplayStackConfig,
    processes: BTreeMap<ProcessRole, ManagedProcess>,
    /// Roles in the order they were launched
    launched: Vec<ProcessRole>,
    /// Roles deliberately left out of this run
    skipped: BTreeSet<ProcessRole>,
    log_owner: Option<(u32, u32)>,
}

impl DisplayStackSupervisor {
    pub fn new(config: DisplayStackConfig) -> Self {
        let processes = ProcessRole::START_ORDER
            .iter()
            .map(|role| (*role, ManagedProcess::new(*role)))
            .collect();
        Self {
            config,
            processes,
            launched: Vec::new(),
            skipped: BTreeSet::new(),
            log_owner: None,
        }
    }

    /// Hand logs of unprivileged stages to this uid/gid
    pub fn with_log_owner(mut self, owner: Option<(u32, u32)>) -> Self {
        self.log_owner = owner;
        self
    }

    pub fn config(&self) -> &DisplayStackConfig {
        &self.config
    }

    pub fn state(&self, role: ProcessRole) -> ProcessState {
        self.processes
            .get(&role)
            .map(ManagedProcess::state)
            .unwrap_or(ProcessState::NotStarted)
    }

    /// Every role with its current state, in start order
    pub fn states(&self) -> Vec<(ProcessRole, ProcessState)> {
        ProcessRole::START_ORDER
            .iter()
            .map(|role| (*role, self.state(*role)))
            .collect()
    }

    /// Start the stack, block on the proxy, then stop everything.
    ///
    /// Returns the proxy's exit code. A fatal startup failure stops whatever
    /// was already launched before the error is returned.
    #[instrument(skip(self), fields(display = %self.config.display_name()))]
    pub async fn run(&mut self) -> Result<i32> {
        if let Err(e) = self.start().await {
            warn!("Display stack startup failed: {}", e);
            self.shutdown().await;
            return Err(e);
        }

        info!("Remote desktop available on port {}", self.config.http_port);
        let waited = self.process_mut(ProcessRole::Proxy).wait().await;
        self.shutdown().await;

        let status = waited.map_err(DisplayError::ProxyWait)?;
        let code = status.map(exit_code).unwrap_or(1);
        info!("Proxy exited with code {}", code);
        Ok(code)
    }

    /// Launch every stage up to and including the proxy
    pub async fn start(&mut self) -> Result<()> {
        self.start_virtual_display().await?;
        self.start_window_manager().await?;
        self.start_framebuffer_server().await?;
        self.start_companions().await?;
        self.start_proxy()?;
        Ok(())
    }

    /// Stop launched roles in reverse start order; every role ends Stopped
    pub async fn shutdown(&mut self) {
        let launched: Vec<ProcessRole> = self.launched.drain(..).rev().collect();
        for role in launched {
            debug!("Stopping {}", role);
            self.process_mut(role).stop().await;
        }
        for process in self.processes.values_mut() {
            if process.state() != ProcessState::Stopped {
                process.stop().await;
            }
        }
    }

    fn process_mut(&mut self, role: ProcessRole) -> &mut ManagedProcess {
        self.processes
            .entry(role)
            .or_insert_with(|| ManagedProcess::new(role))
    }

    fn sink(&self, role: ProcessRole) -> LogSink {
        LogSink::new(self.config.log_dir.join(format!("{}.log", role)))
    }

    /// Refuse to enter `role` unless its dependencies have settled
    fn ensure_dependencies(&self, role: ProcessRole) -> Result<()> {
        for dependency in role.dependencies() {
            if self.skipped.contains(dependency) {
                continue;
            }
            let state = self.state(*dependency);
            if !state.satisfies_dependency_of(*dependency) {
                return Err(DisplayError::DependencyNotReady {
                    role,
                    dependency: *dependency,
                    state,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Dependency check, transition to Starting, spawn. Returns whether
    /// the spawn succeeded; on failure the role is already Failed.
    fn launch(
        &mut self,
        role: ProcessRole,
        specs: Vec<CommandSpec>,
        as_owner: bool,
    ) -> Result<bool> {
        self.ensure_dependencies(role)?;
        let env = self.config.display_env();
        let sink = self.sink(role);
        let owner = if as_owner { self.log_owner } else { None };

        let process = self.process_mut(role);
        process.transition(ProcessState::Starting)?;

        let mut spawn_error = None;
        for spec in &specs {
            info!("Starting {}: {}", role, spec.display());
            if let Err(e) = process.spawn(spec, &env, &sink) {
                spawn_error = Some(format!("{}: {}", spec.program, e));
                break;
            }
        }
        sink.chown(owner);
        self.launched.push(role);

        match spawn_error {
            None => Ok(true),
            Some(message) => {
                self.process_mut(role).transition(ProcessState::Failed)?;
                if role.is_critical() {
                    Err(DisplayError::SpawnFailed { role, message }.into())
                } else {
                    warn!("Failed to start {}: {}", role, message);
                    Ok(false)
                }
            }
        }
    }

    fn clear_lock_files(&self) {
        for path in self.config.lock_files() {
            match std::fs::remove_file(&path) {
                Ok(()) => info!("Removed stale lock {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove {}: {}", path.display(), e),
            }
        }
    }

    async fn start_virtual_display(&mut self) -> Result<()> {
        let role = ProcessRole::VirtualDisplay;
        let display_name = self.config.display_name();
        self.clear_lock_files();
        let spec = self.config.virtual_display_command();
        self.launch(role, vec![spec], false)?;

        tokio::time::sleep(self.config.timings.display_settle).await;
        let process = self.process_mut(role);
        if !process.is_alive() {
            process.transition(ProcessState::Failed)?;
            return Err(DisplayError::DisplayNotAlive {
                display: display_name,
            }
            .into());
        }
        process.transition(ProcessState::Ready)?;
        info!(
            "Virtual display {} is up (pid {:?})",
            display_name,
            process.pid()
        );
        Ok(())
    }

    /// Readiness is optimistic: a fixed settle delay, no probe
    async fn start_window_manager(&mut self) -> Result<()> {
        let role = ProcessRole::WindowManager;
        let rendered = WindowManagerConfig::render(
            self.config.resolution,
            self.config.window_class().as_deref(),
        );
        let init_path = match rendered.write_to(&self.config.window_manager_dir) {
            Ok(path) => path,
            Err(e) => {
                warn!("{}; continuing without a window manager", e);
                self.ensure_dependencies(role)?;
                let process = self.process_mut(role);
                process.transition(ProcessState::Starting)?;
                process.transition(ProcessState::Failed)?;
                return Ok(());
            }
        };

        let spec = self.config.window_manager_command(&init_path);
        if !self.launch(role, vec![spec], true)? {
            return Ok(());
        }
        let settle = self.config.timings.window_manager_settle;
        debug!("Window manager readiness assumed after {:?}", settle);
        tokio::time::sleep(settle).await;

        let process = self.process_mut(role);
        if process.is_alive() {
            process.transition(ProcessState::Ready)?;
        } else {
            warn!("Window manager exited during startup; desktop will be undecorated");
            process.transition(ProcessState::Failed)?;
        }
        Ok(())
    }

    async fn start_framebuffer_server(&mut self) -> Result<()> {
        let role = ProcessRole::RemoteFramebufferServer;
        let spec = self.config.framebuffer_command();
        self.launch(role, vec![spec], false)?;

        let addr = self.config.framebuffer_addr();
        let timeout = self.config.timings.connect_timeout;
        let gate = ReadinessGate::new(role.as_str(), self.config.timings.framebuffer_gate);
        let outcome = gate.wait_for(|| port_accepting(addr, timeout)).await;

        let process = self.process_mut(role);
        if !outcome.ready {
            process.transition(ProcessState::Failed)?;
            return Err(DisplayError::FramebufferNotReady {
                port: addr.port(),
                attempts: outcome.attempts,
            }
            .into());
        }
        process.transition(ProcessState::Ready)?;
        info!(
            "Remote framebuffer server accepting on {} after {} attempt(s)",
            addr, outcome.attempts
        );
        Ok(())
    }

    /// Clipboard bridge and target application, launched together; neither
    /// failure stops the stack
    async fn start_companions(&mut self) -> Result<()> {
        let bridge = ClipboardBridge::new(
            self.config.binaries.clipboard.clone(),
            self.config.run_as.clone(),
        );
        let mut pending = Vec::new();
        if self.launch(ProcessRole::ClipboardBridge, bridge.commands(), true)? {
            pending.push(ProcessRole::ClipboardBridge);
        }

        match self.config.target_command() {
            Some(spec) => {
                if self.launch(ProcessRole::TargetApplication, vec![spec], true)? {
                    pending.push(ProcessRole::TargetApplication);
                }
            }
            None => {
                debug!("No target application configured");
                self.skipped.insert(ProcessRole::TargetApplication);
            }
        }

        if pending.is_empty() {
            return Ok(());
        }
        tokio::time::sleep(self.config.timings.companion_settle).await;

        for role in pending {
            let process = self.process_mut(role);
            if process.is_alive() {
                process.transition(ProcessState::Ready)?;
                info!("{} is running (pids {:?})", role, process.pids());
            } else {
                warn!("{} exited during startup; continuing without it", role);
                process.transition(ProcessState::Failed)?;
            }
        }
        Ok(())
    }

    fn start_proxy(&mut self) -> Result<()> {
        let role = ProcessRole::Proxy;
        self.ensure_dependencies(role)?;
        if let Err(e) = self.config.page.write_to(&self.config.web_root) {
            let process = self.process_mut(role);
            process.transition(ProcessState::Starting)?;
            process.transition(ProcessState::Failed)?;
            return Err(e);
        }

        let spec = self.config.proxy_command();
        self.launch(role, vec![spec], false)?;
        self.process_mut(role).transition(ProcessState::Ready)?;
        Ok(())
    }
}

/// Exit code of a process, using the shell's 128+signal convention when
/// it was killed by a signal
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
