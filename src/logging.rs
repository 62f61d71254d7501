//! Tracing initialisation.
//!
//! Log output is configured from the `[logging]` settings section; `RUST_LOG`
//! overrides the configured level when set.
//!
//! # Example
//! ```no_run
//! use ami::{config::Settings, logging};
//!
//! # fn main() -> anyhow::Result<()> {
//! let settings = Settings::load()?;
//! logging::init(&settings.logging)?;
//! tracing::info!("imager starting");
//! # Ok(())
//! # }
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    filter::LevelFilter,
    EnvFilter, Layer,
};

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, coloured output for an operator at the console
    Pretty,
    /// One line per event
    #[default]
    Compact,
    /// JSON objects for log collection
    Json,
}

/// `[logging]` settings section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// trace, debug, info, warn or error
    pub level: String,
    /// Output format
    pub format: OutputFormat,
    /// Emit span open/close events
    pub span_events: bool,
    /// ANSI colours (pretty and compact only)
    pub ansi: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: OutputFormat::Compact,
            span_events: false,
            ansi: true,
        }
    }
}

/// Install the global subscriber.
///
/// Calling this again after a subscriber is installed is a no-op, which keeps
/// it safe to use from tests.
pub fn init(settings: &LoggingSettings) -> Result<()> {
    let level = parse_log_level(&settings.level)?;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::from_level(level).into()));

    let span_events = if settings.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = match settings.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_ansi(settings.ansi)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(span_events)
            .with_ansi(settings.ansi)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_ansi(false)
            .boxed(),
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(layer.with_filter(env_filter))
        .try_init()
    {
        tracing::debug!(%err, "subscriber already installed");
    }
    Ok(())
}

/// Level named in the settings; `RUST_LOG` syntax is not accepted here.
fn parse_log_level(level: &str) -> Result<Level> {
    level
        .parse::<Level>()
        .map_err(|_| anyhow!("unknown log level {:?}; use trace, debug, info, warn or error", level))
}
