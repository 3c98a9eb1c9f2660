use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use deskhook_core::display::client_page::ClientPageOptions;
use deskhook_core::extensions::{
    DEFAULT_EDITOR_COMMAND, DEFAULT_INSTALL_ATTEMPTS, DEFAULT_INSTALL_BACKOFF,
};
use deskhook_core::hooks::{DEFAULT_HOOK_DIR, DEFAULT_HOOK_LOG_DIR};
use std::path::PathBuf;

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

/// Log format options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

/// Log level options
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    /// Error messages only
    Error,
    /// Warning and error messages
    Warn,
    /// Informational messages and above
    Info,
    /// Debug messages and above
    Debug,
    /// All messages including trace
    Trace,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run every executable hook in a directory once, in byte order of file name
    RunHooks {
        /// Directory holding the hook scripts
        #[arg(long, env = "DESKHOOK_HOOK_DIR", default_value = DEFAULT_HOOK_DIR)]
        hook_dir: PathBuf,
        /// Directory receiving one log file per hook
        #[arg(long, env = "DESKHOOK_HOOK_LOG_DIR", default_value = DEFAULT_HOOK_LOG_DIR)]
        log_dir: PathBuf,
        /// Output format for the run summary
        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Install editor extensions, retrying each once after a backoff
    InstallExtensions {
        /// Extension identifiers (publisher.name)
        #[arg(required = true, value_name = "ID")]
        extensions: Vec<String>,
        /// Editor command line used for --install-extension
        #[arg(long, env = "DESKHOOK_EDITOR", default_value = DEFAULT_EDITOR_COMMAND)]
        editor: String,
        /// Account the editor runs as
        #[arg(long, env = "DESKHOOK_USER")]
        user: Option<String>,
        /// Home directory reconciled before each attempt (defaults to HOME; required with --user)
        #[arg(long, env = "DESKHOOK_HOME")]
        home: Option<PathBuf>,
        /// Attempts per extension
        #[arg(long, default_value_t = DEFAULT_INSTALL_ATTEMPTS)]
        attempts: u32,
        /// Seconds to wait before retrying a failed install
        #[arg(long, default_value_t = DEFAULT_INSTALL_BACKOFF.as_secs())]
        backoff_secs: u64,
        /// Output format for the install report
        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Make sure a home directory is owned by its account and has the editor skeleton
    ReconcilePermissions {
        /// Home directory to reconcile
        #[arg(long, env = "DESKHOOK_HOME")]
        home: PathBuf,
        /// Owning account (defaults to the invoking account)
        #[arg(long, env = "DESKHOOK_USER")]
        user: Option<String>,
        /// Output format for the reconcile report
        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Start the remote desktop stack and block until the browser proxy exits
    Desktop {
        /// Account for the window manager, clipboard bridge and target application
        #[arg(long, env = "DESKHOOK_USER")]
        user: Option<String>,
        /// HOME for processes started as --user
        #[arg(long, env = "DESKHOOK_HOME")]
        home: Option<PathBuf>,
        /// X display number
        #[arg(long, env = "DESKHOOK_DISPLAY", default_value_t = 1)]
        display: u32,
        /// Virtual screen size (WIDTHxHEIGHT)
        #[arg(long, env = "DESKHOOK_RESOLUTION", default_value = "1920x1080")]
        resolution: String,
        /// Color depth in bits
        #[arg(long, default_value_t = 24)]
        depth: u8,
        /// Remote-framebuffer port
        #[arg(long, env = "DESKHOOK_VNC_PORT", default_value_t = 5900)]
        vnc_port: u16,
        /// Browser-facing port
        #[arg(long, env = "DESKHOOK_HTTP_PORT", default_value_t = 6080)]
        http_port: u16,
        /// Directory served by the proxy
        #[arg(long, env = "DESKHOOK_WEB_ROOT", default_value = "/usr/share/novnc")]
        web_root: PathBuf,
        /// Directory receiving one log file per stage
        #[arg(long, env = "DESKHOOK_LOG_DIR", default_value = "/var/log/deskhook")]
        log_dir: PathBuf,
        /// Application to pin full-screen (shell-style command line)
        #[arg(long, env = "DESKHOOK_TARGET_APP")]
        target_app: Option<String>,
        /// Window class the window manager maximizes
        #[arg(long)]
        window_class: Option<String>,
        /// Attempts while waiting for the remote-framebuffer port
        #[arg(long, default_value_t = 30)]
        framebuffer_attempts: u32,
    },

    /// Write the browser client page without starting anything
    RenderPage {
        /// Directory the page is written to
        #[arg(long, env = "DESKHOOK_WEB_ROOT", default_value = "/usr/share/novnc")]
        web_root: PathBuf,
        /// Page title
        #[arg(long)]
        title: Option<String>,
        /// Delay before reconnecting after a disconnect, in milliseconds
        #[arg(long, default_value_t = ClientPageOptions::default().reconnect_delay_ms)]
        reconnect_delay_ms: u64,
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,
    },
}

/// Boot-time orchestrator for remote desktop containers
#[derive(Debug, Parser)]
#[command(name = "deskhook", version)]
pub struct Cli {
    /// Log format (text or json, defaults to text, can be set via DESKHOOK_LOG_FORMAT env var)
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Log level
    #[arg(long, global = true, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub async fn dispatch(self) -> Result<()> {
        // Initialize logging based on global options
        let log_format = match self.log_format {
            Some(LogFormat::Text) => Some("text"),
            Some(LogFormat::Json) => Some("json"),
            None => None, // Let logging module check environment variable
        };

        let log_level = match self.log_level {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };

        if std::env::var_os(deskhook_core::logging::LOG_FILTER_ENV).is_none()
            && std::env::var_os("RUST_LOG").is_none()
        {
            std::env::set_var(
                "RUST_LOG",
                format!("deskhook={},deskhook_core={}", log_level, log_level),
            );
        }
        deskhook_core::logging::init(log_format)?;

        tracing::debug!("CLI initialized with log level: {}", log_level);

        match self.command {
            Commands::RunHooks {
                hook_dir,
                log_dir,
                output,
            } => {
                use crate::commands::run_hooks::{execute_run_hooks, RunHooksArgs};

                execute_run_hooks(RunHooksArgs {
                    hook_dir,
                    log_dir,
                    output,
                })
                .await
            }
            Commands::InstallExtensions {
                extensions,
                editor,
                user,
                home,
                attempts,
                backoff_secs,
                output,
            } => {
                use crate::commands::install_extensions::{
                    execute_install_extensions, InstallExtensionsArgs,
                };

                execute_install_extensions(InstallExtensionsArgs {
                    extensions,
                    editor,
                    user,
                    home,
                    attempts,
                    backoff: std::time::Duration::from_secs(backoff_secs),
                    output,
                })
                .await
            }
            Commands::ReconcilePermissions { home, user, output } => {
                use crate::commands::reconcile::{execute_reconcile, ReconcileArgs};

                execute_reconcile(ReconcileArgs { home, user, output })
            }
            Commands::Desktop {
                user,
                home,
                display,
                resolution,
                depth,
                vnc_port,
                http_port,
                web_root,
                log_dir,
                target_app,
                window_class,
                framebuffer_attempts,
            } => {
                use crate::commands::desktop::{execute_desktop, DesktopArgs};

                execute_desktop(DesktopArgs {
                    user,
                    home,
                    display,
                    resolution,
                    depth,
                    vnc_port,
                    http_port,
                    web_root,
                    log_dir,
                    target_app,
                    window_class,
                    framebuffer_attempts,
                })
                .await
            }
            Commands::RenderPage {
                web_root,
                title,
                reconnect_delay_ms,
                output,
            } => {
                use crate::commands::render_page::{execute_render_page, RenderPageArgs};

                execute_render_page(RenderPageArgs {
                    web_root,
                    title,
                    reconnect_delay_ms,
                    output,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_install_extensions_requires_ids() {
        assert!(Cli::try_parse_from(["deskhook", "install-extensions"]).is_err());
        let cli = Cli::try_parse_from([
            "deskhook",
            "install-extensions",
            "ms-python.python",
            "--attempts",
            "3",
        ])
        .unwrap();
        match cli.command {
            Commands::InstallExtensions {
                extensions,
                attempts,
                backoff_secs,
                ..
            } => {
                assert_eq!(extensions, vec!["ms-python.python"]);
                assert_eq!(attempts, 3);
                assert_eq!(backoff_secs, 10);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_log_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "deskhook",
            "render-page",
            "--log-format",
            "json",
            "--output",
            "json",
        ])
        .unwrap();
        assert!(matches!(cli.log_format, Some(LogFormat::Json)));
        assert!(matches!(
            cli.command,
            Commands::RenderPage {
                output: OutputFormat::Json,
                ..
            }
        ));
    }
}
