//! Minimal window manager configuration
//!
//! Generates a Fluxbox-style resource file (no toolbar, no decorations, one
//! workspace) and an `apps` file with a placement rule that pins the target
//! application maximized at the virtual screen's resolution.

use crate::display::config::Resolution;
use crate::errors::{DisplayError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Rendered configuration files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowManagerConfig {
    pub init: String,
    pub apps: String,
}

impl WindowManagerConfig {
    pub fn render(resolution: Resolution, window_class: Option<&str>) -> Self {
        let init = [
            "session.screen0.toolbar.visible: false",
            "session.screen0.workspaces: 1",
            "session.screen0.workspaceNames: desktop",
            "session.screen0.defaultDeco: NONE",
            "session.screen0.fullMaximization: true",
            "session.screen0.allowRemoteActions: false",
            "session.screen0.rootCommand: ",
            "session.appsFile: apps",
            "session.styleOverlay: /dev/null",
        ]
        .join("\n")
            + "\n";

        let apps = match window_class {
            Some(class) => format!(
                "[app] (class={class})\n  [Deco]\t{{NONE}}\n  [Position]\t(UpperLeft)\t{{0 0}}\n  [Dimensions]\t{{{w} {h}}}\n  [Maximized]\t{{yes}}\n  [Workspace]\t{{0}}\n[end]\n",
                class = class,
                w = resolution.width,
                h = resolution.height,
            ),
            None => String::new(),
        };

        Self { init, apps }
    }

    /// Write `init` and `apps` into `dir`, returning the path of `init`
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).map_err(|source| DisplayError::Write {
            what: "window manager configuration directory",
            path: dir.display().to_string(),
            source,
        })?;

        // The resource file names its apps file relative to itself.
        let init_path = dir.join("init");
        let apps_path = dir.join("apps");
        let init = self
            .init
            .replace("session.appsFile: apps", &format!("session.appsFile: {}", apps_path.display()));

        for (path, content) in [(&init_path, &init), (&apps_path, &self.apps)] {
            std::fs::write(path, content).map_err(|source| DisplayError::Write {
                what: "window manager configuration",
                path: path.display().to_string(),
                source,
            })?;
        }

        debug!("Wrote window manager configuration to {}", dir.display());
        Ok(init_path)
    }
}
