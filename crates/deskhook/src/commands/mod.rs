//! Command implementations
//!
//! This module contains implementations for all CLI subcommands.

pub mod desktop;
pub mod install_extensions;
pub mod reconcile;
pub mod render_page;
pub mod run_hooks;

use crate::cli::OutputFormat;
use anyhow::Result;
use serde::Serialize;

/// Write a report to stdout: pretty JSON, or the text rendering
pub(crate) fn emit<T: Serialize>(output: OutputFormat, report: &T, text: impl FnOnce() -> String) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => print!("{}", text()),
    }
    Ok(())
}

/// The named account, or the invoking one when no name is given
pub(crate) fn resolve_account(user: Option<&str>) -> Result<deskhook_core::permissions::Account> {
    let account = match user {
        Some(name) => deskhook_core::permissions::Account::lookup(name)?,
        None => deskhook_core::permissions::Account::current()?,
    };
    Ok(account)
}
