//! Browser client page served by the proxy

use crate::display::clipboard::{ClipboardBridge, PASTE_FIELD_ID, SEND_BUTTON_ID};
use crate::errors::{DisplayError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientPageOptions {
    pub title: String,
    /// File name inside the web root
    pub file_name: String,
    /// WebSocket path the proxy bridges to the framebuffer server
    pub websocket_path: String,
    /// Delay before reconnecting after a disconnect
    pub reconnect_delay_ms: u64,
}

impl Default for ClientPageOptions {
    fn default() -> Self {
        Self {
            title: "Remote Desktop".to_string(),
            file_name: "index.html".to_string(),
            websocket_path: "websockify".to_string(),
            reconnect_delay_ms: 2000,
        }
    }
}

/// Escape text for an HTML text node or attribute
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

impl ClientPageOptions {
    /// Render the page.
    ///
    /// The viewer never asks the server to resize: the virtual display has a
    /// fixed resolution and the page scales it locally instead.
    pub fn render(&self) -> String {
        let title = escape_html(&self.title);
        // Goes into a JS single-quoted string.
        let path = self.websocket_path.replace('\\', "\\\\").replace('\'', "\\'");
        format!(
            r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>{title}</title>
  <style>
    html, body {{ margin: 0; height: 100%; overflow: hidden; background: #222; }}
    #screen {{ position: absolute; top: 0; bottom: 2.5em; left: 0; right: 0; }}
    #clipboard {{ position: absolute; bottom: 0; left: 0; right: 0; height: 2.5em; display: flex; gap: 0.5em; padding: 0.25em; box-sizing: border-box; background: #333; }}
    #{field} {{ flex: 1; resize: none; }}
    #status {{ color: #ccc; font-family: sans-serif; align-self: center; }}
  </style>
</head>
<body>
  <div id="screen"></div>
  <div id="clipboard">
    <textarea id="{field}" placeholder="Paste here, then Send to copy into the desktop"></textarea>
    <button id="{button}">Send</button>
    <span id="status">connecting</span>
  </div>
  <script type="module">
    import RFB from './core/rfb.js';

    const RECONNECT_DELAY_MS = {delay};
    const status = document.getElementById('status');
    const scheme = window.location.protocol === 'https:' ? 'wss' : 'ws';
    const url = `${{scheme}}://${{window.location.host}}/{path}`;
    let rfb = null;

    function connect() {{
      status.textContent = 'connecting';
      rfb = new RFB(document.getElementById('screen'), url);
      rfb.resizeSession = false;
      rfb.scaleViewport = true;
      rfb.addEventListener('connect', () => {{ status.textContent = 'connected'; }});
      rfb.addEventListener('disconnect', () => {{
        status.textContent = 'reconnecting';
        setTimeout(connect, RECONNECT_DELAY_MS);
      }});
{clipboard}    }}

    connect();
  </script>
</body>
</html>
"#,
            title = title,
            field = PASTE_FIELD_ID,
            button = SEND_BUTTON_ID,
            delay = self.reconnect_delay_ms,
            path = path,
            clipboard = ClipboardBridge::browser_script(),
        )
    }

    /// Write the rendered page into `web_root`
    pub fn write_to(&self, web_root: &Path) -> Result<PathBuf> {
        let path = web_root.join(&self.file_name);
        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(web_root)?;
            std::fs::write(&path, self.render())
        };
        write().map_err(|source| DisplayError::Write {
            what: "client page",
            path: path.display().to_string(),
            source,
        })?;
        info!("Wrote client page to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_disables_remote_resize() {
        let page = ClientPageOptions::default().render();
        assert!(page.contains("rfb.resizeSession = false;"));
        assert!(!page.contains("resizeSession = true"));
    }

    #[test]
    fn test_page_reconnects_on_disconnect() {
        let options = ClientPageOptions {
            reconnect_delay_ms: 750,
            ..Default::default()
        };
        let page = options.render();
        assert!(page.contains("const RECONNECT_DELAY_MS = 750;"));
        assert!(page.contains("setTimeout(connect, RECONNECT_DELAY_MS)"));
    }

    #[test]
    fn test_page_has_manual_send_and_automatic_receive() {
        let page = ClientPageOptions::default().render();
        assert!(page.contains(&format!("<textarea id=\"{}\"", PASTE_FIELD_ID)));
        assert!(page.contains(&format!("<button id=\"{}\">Send</button>", SEND_BUTTON_ID)));
        assert!(page.contains("navigator.clipboard.writeText"));
        assert!(page.contains("clipboardPasteFrom"));
    }

    #[test]
    fn test_title_is_escaped() {
        let options = ClientPageOptions {
            title: "<dev & test>".to_string(),
            ..Default::default()
        };
        assert!(options
            .render()
            .contains("<title>&lt;dev &amp; test&gt;</title>"));
    }

    #[test]
    fn test_write_creates_web_root() {
        let dir = tempfile::tempdir().unwrap();
        let web_root = dir.path().join("novnc");
        let path = ClientPageOptions::default().write_to(&web_root).unwrap();
        assert_eq!(path, web_root.join("index.html"));
        assert!(std::fs::read_to_string(path).unwrap().starts_with("<!DOCTYPE html>"));
    }
}
