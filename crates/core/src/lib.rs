//! Core library for the deskhook boot orchestrator
//!
//! This crate contains the hook scheduler, home-directory permission
//! reconciliation, editor extension installation, remote desktop stack
//! supervision, readiness polling, logging, and error handling.

pub mod display;
pub mod errors;
pub mod extensions;
pub mod hooks;
pub mod logging;
pub mod permissions;
pub mod process;
pub mod readiness;

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let version = version();
        assert!(!version.is_empty());
        assert!(version.contains('.'));
    }
}
