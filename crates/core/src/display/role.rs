//! Process roles, their dependency order, and the per-process state machine

use serde::{Deserialize, Serialize};
use std::fmt;

/// One supervised component of the remote desktop stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessRole {
    VirtualDisplay,
    WindowManager,
    RemoteFramebufferServer,
    ClipboardBridge,
    TargetApplication,
    Proxy,
}

impl ProcessRole {
    /// Every role, in a valid start order
    pub const START_ORDER: [ProcessRole; 6] = [
        ProcessRole::VirtualDisplay,
        ProcessRole::WindowManager,
        ProcessRole::RemoteFramebufferServer,
        ProcessRole::ClipboardBridge,
        ProcessRole::TargetApplication,
        ProcessRole::Proxy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessRole::VirtualDisplay => "virtual-display",
            ProcessRole::WindowManager => "window-manager",
            ProcessRole::RemoteFramebufferServer => "remote-framebuffer-server",
            ProcessRole::ClipboardBridge => "clipboard-bridge",
            ProcessRole::TargetApplication => "target-application",
            ProcessRole::Proxy => "proxy",
        }
    }

    /// Roles that must have settled before this one may start.
    ///
    /// VirtualDisplay < WindowManager < RemoteFramebufferServer
    /// < {ClipboardBridge, TargetApplication} < Proxy
    pub fn dependencies(&self) -> &'static [ProcessRole] {
        match self {
            ProcessRole::VirtualDisplay => &[],
            ProcessRole::WindowManager => &[ProcessRole::VirtualDisplay],
            ProcessRole::RemoteFramebufferServer => &[ProcessRole::WindowManager],
            ProcessRole::ClipboardBridge | ProcessRole::TargetApplication => {
                &[ProcessRole::RemoteFramebufferServer]
            }
            ProcessRole::Proxy => &[
                ProcessRole::RemoteFramebufferServer,
                ProcessRole::ClipboardBridge,
                ProcessRole::TargetApplication,
            ],
        }
    }

    /// Whether failure of this role aborts the whole bootstrap.
    ///
    /// A failed non-critical role still counts as settled for its dependents.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            ProcessRole::VirtualDisplay | ProcessRole::RemoteFramebufferServer | ProcessRole::Proxy
        )
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a managed process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessState {
    NotStarted,
    Starting,
    Ready,
    Failed,
    Stopped,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::NotStarted => "not-started",
            ProcessState::Starting => "starting",
            ProcessState::Ready => "ready",
            ProcessState::Failed => "failed",
            ProcessState::Stopped => "stopped",
        }
    }

    /// Legal transitions. Stopped is terminal and only reached on shutdown.
    pub fn can_transition_to(&self, next: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (*self, next),
            (NotStarted, Starting)
                | (Starting, Ready)
                | (Starting, Failed)
                | (Ready, Failed)
                | (NotStarted | Starting | Ready | Failed, Stopped)
        )
    }

    /// Whether a dependent of `role` may proceed given this state
    pub fn satisfies_dependency_of(&self, role: ProcessRole) -> bool {
        match self {
            ProcessState::Ready => true,
            ProcessState::Failed => !role.is_critical(),
            _ => false,
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_order_respects_dependencies() {
        for (index, role) in ProcessRole::START_ORDER.iter().enumerate() {
            for dependency in role.dependencies() {
                let dep_index = ProcessRole::START_ORDER
                    .iter()
                    .position(|r| r == dependency)
                    .unwrap();
                assert!(dep_index < index, "{} must start before {}", dependency, role);
            }
        }
    }

    #[test]
    fn test_clipboard_and_target_are_unordered() {
        assert!(!ProcessRole::ClipboardBridge
            .dependencies()
            .contains(&ProcessRole::TargetApplication));
        assert!(!ProcessRole::TargetApplication
            .dependencies()
            .contains(&ProcessRole::ClipboardBridge));
    }

    #[test]
    fn test_transitions() {
        use ProcessState::*;
        assert!(NotStarted.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Ready));
        assert!(Starting.can_transition_to(Failed));
        assert!(Ready.can_transition_to(Stopped));
        assert!(!NotStarted.can_transition_to(Ready));
        assert!(!Failed.can_transition_to(Ready));
        assert!(!Stopped.can_transition_to(Starting));
        assert!(!Stopped.can_transition_to(Stopped));
    }

    #[test]
    fn test_failed_dependency_only_blocks_for_critical_roles() {
        assert!(ProcessState::Failed.satisfies_dependency_of(ProcessRole::ClipboardBridge));
        assert!(ProcessState::Failed.satisfies_dependency_of(ProcessRole::WindowManager));
        assert!(!ProcessState::Failed.satisfies_dependency_of(ProcessRole::VirtualDisplay));
        assert!(!ProcessState::Starting.satisfies_dependency_of(ProcessRole::ClipboardBridge));
        assert!(ProcessState::Ready.satisfies_dependency_of(ProcessRole::RemoteFramebufferServer));
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&ProcessRole::RemoteFramebufferServer).unwrap();
        assert_eq!(json, "\"remote-framebuffer-server\"");
    }
}
