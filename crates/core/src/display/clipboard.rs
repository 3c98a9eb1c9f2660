//! Clipboard synchronization between the virtual display and the browser
//!
//! Inside the display, two selection-syncing utilities keep the PRIMARY and
//! CLIPBOARD selections equivalent. Towards the browser the bridge is
//! asymmetric: remote changes are written to the browser clipboard as they
//! arrive, while browser text only reaches the display when the user presses
//! "Send". Browsers refuse clipboard reads without a user gesture.

use crate::process::CommandSpec;

/// DOM id of the paste field on the client page
pub const PASTE_FIELD_ID: &str = "clipboard-text";
/// DOM id of the send button on the client page
pub const SEND_BUTTON_ID: &str = "clipboard-send";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardDirection {
    RemoteToBrowser,
    BrowserToRemote,
}

impl ClipboardDirection {
    pub const ALL: [ClipboardDirection; 2] = [
        ClipboardDirection::RemoteToBrowser,
        ClipboardDirection::BrowserToRemote,
    ];

    /// Client-side handler wiring this direction into the page
    fn browser_handler(&self) -> String {
        match self {
            ClipboardDirection::RemoteToBrowser => concat!(
                "    rfb.addEventListener('clipboard', (e) => {\n",
                "      if (navigator.clipboard && navigator.clipboard.writeText) {\n",
                "        navigator.clipboard.writeText(e.detail.text).catch(() => {});\n",
                "      }\n",
                "    });\n",
            )
            .to_string(),
            ClipboardDirection::BrowserToRemote => format!(
                concat!(
                    "    document.getElementById('{button}').onclick = () => {{\n",
                    "      const field = document.getElementById('{field}');\n",
                    "      if (rfb && field.value) {{\n",
                    "        rfb.clipboardPasteFrom(field.value);\n",
                    "      }}\n",
                    "    }};\n",
                ),
                button = SEND_BUTTON_ID,
                field = PASTE_FIELD_ID,
            ),
        }
    }
}

/// The in-display half of the bridge: one selection-sync utility per selection
#[derive(Debug, Clone)]
pub struct ClipboardBridge {
    binary: String,
    run_as: Option<String>,
}

impl ClipboardBridge {
    pub fn new(binary: impl Into<String>, run_as: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            run_as,
        }
    }

    /// Commands for the CLIPBOARD and PRIMARY syncers, both in the foreground
    pub fn commands(&self) -> Vec<CommandSpec> {
        [
            CommandSpec::new(&self.binary),
            CommandSpec::new(&self.binary).args(["-selection", "PRIMARY"]),
        ]
        .iter()
        .map(|spec| spec.run_as(self.run_as.as_deref()))
        .collect()
    }

    /// Browser half of the bridge, run once the RFB connection object exists
    pub fn browser_script() -> String {
        ClipboardDirection::ALL
            .iter()
            .map(ClipboardDirection::browser_handler)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_cover_both_selections() {
        let bridge = ClipboardBridge::new("autocutsel", Some("coder".to_string()));
        let lines: Vec<String> = bridge.commands().iter().map(CommandSpec::display).collect();
        assert_eq!(
            lines,
            vec![
                "runuser -u coder -- autocutsel",
                "runuser -u coder -- autocutsel -selection PRIMARY",
            ]
        );
        assert!(lines.iter().all(|l| !l.contains("-fork")));
    }

    #[test]
    fn test_browser_script_wires_each_direction() {
        let script = ClipboardBridge::browser_script();
        assert!(script.contains("addEventListener('clipboard'"));
        assert!(script.contains("navigator.clipboard.writeText"));
        assert!(script.contains(&format!("getElementById('{}').onclick", SEND_BUTTON_ID)));
        assert!(script.contains("rfb.clipboardPasteFrom(field.value)"));
        // Nothing reads the browser clipboard without the button.
        assert!(!script.contains("readText"));
    }
}
