//! Logging
//!
//! Diagnostics go to stderr through `tracing`; stdout stays free for the
//! scene output the CLI prints.
//!
//! Precedence, highest first: CLI flag, `GENAGENT_LOG` / `GENAGENT_LOG_FORMAT`,
//! the `logging` config section, defaults.

use crate::config::LoggingConfig;
use crate::error::{self, Error, ErrorKind, Result};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

pub const LOG_ENV: &str = "GENAGENT_LOG";
pub const LOG_FORMAT_ENV: &str = "GENAGENT_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(error::config_invalid(format!(
                "invalid log format: {} (must be 'json' or 'text')",
                other
            ))),
        }
    }
}

/// Filter directive from the first non-empty source
pub fn resolve_level(cli: Option<&str>, env: Option<&str>, config: &LoggingConfig) -> String {
    [cli, env]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or(config.level.as_str())
        .to_string()
}

pub fn resolve_format(cli: Option<&str>, env: Option<&str>, config: &LoggingConfig) -> Result<LogFormat> {
    if let Some(format) = cli {
        return format.parse();
    }
    // An unusable env value falls through to config
    if let Some(Ok(format)) = env.map(str::parse::<LogFormat>) {
        return Ok(format);
    }
    config.format.parse()
}

/// Install the global subscriber.
pub fn init_logging(config: &LoggingConfig, cli_level: Option<&str>, cli_format: Option<&str>) -> Result<()> {
    let env_level = std::env::var(LOG_ENV).ok();
    let env_format = std::env::var(LOG_FORMAT_ENV).ok();

    let directive = resolve_level(cli_level, env_level.as_deref(), config);
    let format = resolve_format(cli_format, env_format.as_deref(), config)?;

    let filter = EnvFilter::try_new(&directive).map_err(|e| {
        error::config_invalid(format!("invalid log level '{}': {}", directive, e)).set_source(e)
    })?;

    let base = Registry::default().with(filter);
    let installed = match format {
        LogFormat::Json => base
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Text => base
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    installed.map_err(|e| {
        Error::new(ErrorKind::Unexpected, format!("failed to install logger: {}", e)).set_source(e)
    })
}
