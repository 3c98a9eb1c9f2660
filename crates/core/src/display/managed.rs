//! A supervised role and the OS processes backing it

use crate::display::role::{ProcessRole, ProcessState};
use crate::errors::{DisplayError, Result};
use crate::process::{CommandSpec, LogSink};
use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use tokio::process::Child;
use tracing::{debug, warn};

/// One role, its state, and the children spawned for it.
///
/// Most roles own a single child; the clipboard bridge owns one per
/// selection.
#[derive(Debug)]
pub struct ManagedProcess {
    role: ProcessRole,
    state: ProcessState,
    children: Vec<Child>,
}

impl ManagedProcess {
    pub fn new(role: ProcessRole) -> Self {
        Self {
            role,
            state: ProcessState::NotStarted,
            children: Vec::new(),
        }
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Move to `next`, rejecting transitions the state machine forbids
    pub fn transition(&mut self, next: ProcessState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(DisplayError::InvalidTransition {
                role: self.role,
                from: self.state,
                to: next,
            }
            .into());
        }
        debug!("{}: {} -> {}", self.role, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Spawn one child for this role with output appended to `sink`
    pub fn spawn(
        &mut self,
        spec: &CommandSpec,
        env: &HashMap<String, String>,
        sink: &LogSink,
    ) -> std::io::Result<u32> {
        let (stdout, stderr) = sink.stdio_pair();
        let mut command = spec.to_command(env);
        command
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);

        let child = command.spawn()?;
        let pid = child.id().unwrap_or_default();
        debug!("{}: spawned `{}` as pid {}", self.role, spec.display(), pid);
        self.children.push(child);
        Ok(pid)
    }

    pub fn pid(&self) -> Option<u32> {
        self.children.first().and_then(Child::id)
    }

    pub fn pids(&self) -> Vec<u32> {
        self.children.iter().filter_map(Child::id).collect()
    }

    /// True when at least one child exists and none has exited
    pub fn is_alive(&mut self) -> bool {
        if self.children.is_empty() {
            return false;
        }
        self.children
            .iter_mut()
            .all(|child| matches!(child.try_wait(), Ok(None)))
    }

    /// Wait for the first child to exit
    pub async fn wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        match self.children.first_mut() {
            Some(child) => child.wait().await.map(Some),
            None => Ok(None),
        }
    }

    /// Kill every child and mark the role stopped
    pub async fn stop(&mut self) {
        for child in self.children.iter_mut() {
            if let Ok(Some(_)) = child.try_wait() {
                continue;
            }
            if let Err(e) = child.kill().await {
                warn!("{}: failed to stop pid {:?}: {}", self.role, child.id(), e);
            }
        }
        self.children.clear();
        if self.state != ProcessState::Stopped {
            self.state = ProcessState::Stopped;
        }
    }
}
