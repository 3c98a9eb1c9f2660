//! Logging and observability
//!
//! Structured diagnostics go through `tracing` to stderr, in text or JSON.
//! stdout stays reserved for machine-readable reports. Per-hook and per-stage
//! log files are separate sinks handled by [`crate::process::LogSink`].

use anyhow::Result;
use std::{io, sync::Once};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Environment variable selecting the log format
pub const LOG_FORMAT_ENV: &str = "DESKHOOK_LOG_FORMAT";
/// Environment variable holding the log filter
pub const LOG_FILTER_ENV: &str = "DESKHOOK_LOG";
/// Environment variable controlling span lifecycle events
pub const SPAN_EVENTS_ENV: &str = "DESKHOOK_LOG_SPAN_EVENTS";

/// Initialize the logging system with an optional output format
///
/// Safe to call more than once; only the first call installs a subscriber.
///
/// ## Arguments
///
/// * `format` - `None`/`"text"` for human-readable output, `"json"` for
///   structured output. When `None`, `DESKHOOK_LOG_FORMAT` is consulted.
///
/// ## Environment Variables
///
/// * `DESKHOOK_LOG_FORMAT` - "json" for JSON, anything else for text
/// * `DESKHOOK_LOG` - filter directive, takes precedence over `RUST_LOG`
/// * `RUST_LOG` - fallback filter directive
///
/// ## Example
///
/// ```rust
/// use deskhook_core::logging;
///
/// logging::init(None).expect("Failed to initialize logging");
/// ```
pub fn init(format: Option<&str>) -> Result<()> {
    INIT.call_once(|| {
        let filter = create_env_filter();

        let env_format = std::env::var(LOG_FORMAT_ENV).ok();
        let effective_format = format.or(env_format.as_deref()).unwrap_or("text");
        let span_events = span_events_for_format(effective_format);

        match effective_format {
            "json" => {
                tracing_subscriber::registry()
                    .with(
                        fmt::layer()
                            .json()
                            .with_target(true)
                            .with_span_events(span_events)
                            .with_writer(io::stderr),
                    )
                    .with(filter)
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(
                        fmt::layer()
                            .with_target(true)
                            .with_span_events(span_events)
                            .with_writer(io::stderr),
                    )
                    .with(filter)
                    .init();
            }
        }

        tracing::debug!("Logging initialized with format: {}", effective_format);
    });

    Ok(())
}

/// Create an EnvFilter based on environment variables
fn create_env_filter() -> EnvFilter {
    if let Ok(spec) = std::env::var(LOG_FILTER_ENV) {
        EnvFilter::try_new(&spec).unwrap_or_else(|_| {
            tracing::warn!(
                "Invalid {} directive '{}', using default 'info'",
                LOG_FILTER_ENV,
                spec
            );
            EnvFilter::new("info")
        })
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Determine span lifecycle event configuration based on env var and format
fn span_events_for_format(format: &str) -> fmt::format::FmtSpan {
    use fmt::format::FmtSpan;

    if let Ok(raw) = std::env::var(SPAN_EVENTS_ENV) {
        let mut acc = FmtSpan::NONE;
        for token in raw.split(&[',', '|'][..]).map(|t| t.trim().to_lowercase()) {
            acc |= match token.as_str() {
                "new" => FmtSpan::NEW,
                "close" => FmtSpan::CLOSE,
                "enter" => FmtSpan::ENTER,
                "exit" => FmtSpan::EXIT,
                "active" => FmtSpan::ACTIVE,
                "full" => FmtSpan::FULL,
                _ => FmtSpan::NONE,
            };
        }
        return acc;
    }

    match format {
        "json" => FmtSpan::NEW | FmtSpan::CLOSE,
        _ => FmtSpan::NONE,
    }
}

/// Check if logging has been initialized
pub fn is_initialized() -> bool {
    INIT.is_completed()
}
