//! Render-page command implementation

use crate::cli::OutputFormat;
use anyhow::Result;
use deskhook_core::display::client_page::ClientPageOptions;
use serde::Serialize;
use std::path::PathBuf;
use tracing::instrument;

/// Render-page command arguments
#[derive(Debug, Clone)]
pub struct RenderPageArgs {
    pub web_root: PathBuf,
    pub title: Option<String>,
    pub reconnect_delay_ms: u64,
    pub output: OutputFormat,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderPageResult {
    path: PathBuf,
}

/// Execute the render-page command
#[instrument(skip(args))]
pub fn execute_render_page(args: RenderPageArgs) -> Result<()> {
    let mut options = ClientPageOptions {
        reconnect_delay_ms: args.reconnect_delay_ms,
        ..Default::default()
    };
    if let Some(title) = args.title {
        options.title = title;
    }

    let path = options.write_to(&args.web_root)?;
    let result = RenderPageResult { path };
    super::emit(args.output, &result, || format!("{}\n", result.path.display()))
}
