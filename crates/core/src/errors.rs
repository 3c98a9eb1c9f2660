//! Error types and handling
//!
//! The error taxonomy mirrors the boot sequence: each component has its own
//! domain enum, wrapped in the top-level [`DeskhookError`]. Only conditions
//! that must abort the caller are ever returned as `Err`; degraded outcomes
//! (hook failures, abandoned extension installs, reconciliation errors) are
//! recorded in report structs instead.

use crate::display::{ProcessRole, ProcessState};
use thiserror::Error;

/// Hook discovery and execution errors
#[derive(Error, Debug)]
pub enum HookError {
    /// The hook directory exists but could not be listed
    #[error("Failed to read hook directory {path}")]
    ReadDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A hook could not be spawned at all
    #[error("Failed to spawn hook {name}: {message}")]
    Spawn { name: String, message: String },
}

/// Ownership and skeleton reconciliation errors
#[derive(Error, Debug)]
pub enum PermissionError {
    /// Account name could not be resolved to numeric ids
    #[error("Unknown account '{name}': {message}")]
    UnknownAccount { name: String, message: String },

    /// Filesystem operation failed
    #[error("Failed to {action} {path}")]
    Io {
        action: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Editor extension installation errors
#[derive(Error, Debug)]
pub enum ExtensionError {
    /// The editor CLI could not be spawned
    #[error("Failed to run editor command '{command}': {message}")]
    Spawn { command: String, message: String },

    /// The install command ran and reported failure
    #[error("Installing {extension_id} exited with code {code}")]
    InstallFailed { extension_id: String, code: i32 },
}

/// Display stack supervision errors
#[derive(Error, Debug)]
pub enum DisplayError {
    /// A process for a critical role could not be started
    #[error("Failed to start {role}: {message}")]
    SpawnFailed { role: ProcessRole, message: String },

    /// The virtual display exited during its settle delay
    #[error("Virtual display {display} is not running after startup")]
    DisplayNotAlive { display: String },

    /// The remote-framebuffer port never accepted connections
    #[error("Remote framebuffer server did not accept connections on port {port} after {attempts} attempts")]
    FramebufferNotReady { port: u16, attempts: u32 },

    /// A stage was entered before the roles it depends on settled
    #[error("Cannot start {role}: dependency {dependency} is {state}")]
    DependencyNotReady {
        role: ProcessRole,
        dependency: ProcessRole,
        state: ProcessState,
    },

    /// Illegal state machine transition
    #[error("Invalid transition for {role}: {from} -> {to}")]
    InvalidTransition {
        role: ProcessRole,
        from: ProcessState,
        to: ProcessState,
    },

    /// Generated configuration or page could not be written
    #[error("Failed to write {what} to {path}")]
    Write {
        what: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The terminal proxy could not be waited on
    #[error("Failed to wait for proxy: {0}")]
    ProxyWait(#[source] std::io::Error),
}

/// Main error enum wrapping all domain-specific errors
#[derive(Error, Debug)]
pub enum DeskhookError {
    /// Hook scheduling errors
    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    /// Permission reconciliation errors
    #[error("Permission error: {0}")]
    Permission(#[from] PermissionError),

    /// Extension installation errors
    #[error("Extension error: {0}")]
    Extension(#[from] ExtensionError),

    /// Display stack errors
    #[error("Display stack error: {0}")]
    Display(#[from] DisplayError),

    /// Configuration value errors (bad resolution string, empty command, ...)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DeskhookError {
    /// Whether this error must abort the whole bootstrap
    pub fn is_fatal_display_failure(&self) -> bool {
        matches!(
            self,
            DeskhookError::Display(
                DisplayError::DisplayNotAlive { .. }
                    | DisplayError::FramebufferNotReady { .. }
                    | DisplayError::SpawnFailed { .. }
            )
        )
    }
}

/// Convenience type alias for Results with DeskhookError
pub type Result<T> = std::result::Result<T, DeskhookError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display_error_display() {
        let error = DisplayError::FramebufferNotReady {
            port: 5900,
            attempts: 30,
        };
        assert_eq!(
            format!("{}", error),
            "Remote framebuffer server did not accept connections on port 5900 after 30 attempts"
        );

        let error = DisplayError::DependencyNotReady {
            role: ProcessRole::Proxy,
            dependency: ProcessRole::RemoteFramebufferServer,
            state: ProcessState::Starting,
        };
        assert_eq!(
            format!("{}", error),
            "Cannot start proxy: dependency remote-framebuffer-server is starting"
        );
    }

    #[test]
    fn test_extension_error_display() {
        let error = ExtensionError::InstallFailed {
            extension_id: "ms-python.python".to_string(),
            code: 1,
        };
        assert_eq!(
            format!("{}", error),
            "Installing ms-python.python exited with code 1"
        );
    }

    #[test]
    fn test_fatal_classification() {
        let fatal: DeskhookError = DisplayError::DisplayNotAlive {
            display: ":1".to_string(),
        }
        .into();
        assert!(fatal.is_fatal_display_failure());

        let not_fatal: DeskhookError = ExtensionError::InstallFailed {
            extension_id: "x".to_string(),
            code: 2,
        }
        .into();
        assert!(!not_fatal.is_fatal_display_failure());
    }

    #[test]
    fn test_error_source_chain() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let error: DeskhookError = HookError::ReadDir {
            path: "/etc/hooks".to_string(),
            source: io_error,
        }
        .into();

        assert!(error.source().is_some());
        if let Some(source) = error.source() {
            assert!(source.source().is_some());
        }
    }

    #[test]
    fn test_anyhow_conversion() {
        let error = DeskhookError::Config("bad resolution".to_string());
        let anyhow_error = anyhow::Error::from(error);
        assert!(anyhow_error.to_string().contains("bad resolution"));
    }
}
