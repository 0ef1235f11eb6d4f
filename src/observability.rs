//! Logging setup for the stage binaries and the run lifecycle events.

use std::env;

use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub const ENV_LOG_LEVEL: &str = "SLEEP_SELECT_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "SLEEP_SELECT_LOG_FORMAT";
pub const ENV_LOG_TARGET: &str = "SLEEP_SELECT_LOG_TARGET";

const DEFAULT_LEVEL: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }
}

/// Level filter directive, output format and whether targets are printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL.to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    /// Reads `SLEEP_SELECT_LOG_{LEVEL,FORMAT,TARGET}`. Unrecognized values
    /// keep the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let level = lookup(ENV_LOG_LEVEL)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .unwrap_or(defaults.level);
        let format = lookup(ENV_LOG_FORMAT)
            .and_then(|raw| LogFormat::parse(&raw))
            .unwrap_or(defaults.format);
        let include_target = lookup(ENV_LOG_TARGET)
            .and_then(|raw| parse_bool(&raw))
            .unwrap_or(defaults.include_target);

        Self {
            level,
            format,
            include_target,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Installs the global subscriber. Fails if one is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_target(config.include_target);

    match config.format {
        LogFormat::Json => {
            tracing::subscriber::set_global_default(builder.with_ansi(false).json().finish())?
        }
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }
    Ok(())
}

pub fn init_logging_from_env() -> Result<LoggingConfig, LoggingInitError> {
    let config = LoggingConfig::from_env();
    init_logging(&config)?;
    Ok(config)
}

pub fn log_run_start(stage: &str, config: &LoggingConfig) {
    info!(
        component = "run",
        event = "run.start",
        stage,
        log_level = %config.level,
        log_format = ?config.format
    );
}

/// Logged at WARN when any unit of work failed.
pub fn log_run_finish(stage: &str, processed: usize, skipped: usize, failed: usize) {
    if failed > 0 {
        warn!(
            component = "run",
            event = "run.finish",
            stage,
            processed,
            skipped,
            failed
        );
    } else {
        info!(
            component = "run",
            event = "run.finish",
            stage,
            processed,
            skipped,
            failed
        );
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> LoggingConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LoggingConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        assert_eq!(config_from(&[]), LoggingConfig::default());
        assert_eq!(config_from(&[(ENV_LOG_LEVEL, "  ")]).level, "info");
    }

    #[test]
    fn reads_level_format_and_target() {
        let cfg = config_from(&[
            (ENV_LOG_LEVEL, "sleep_select=debug"),
            (ENV_LOG_FORMAT, "JSON"),
            (ENV_LOG_TARGET, "off"),
        ]);

        assert_eq!(cfg.level, "sleep_select=debug");
        assert_eq!(cfg.format, LogFormat::Json);
        assert!(!cfg.include_target);
    }

    #[test]
    fn unrecognized_format_and_target_keep_defaults() {
        let cfg = config_from(&[(ENV_LOG_FORMAT, "yaml"), (ENV_LOG_TARGET, "maybe")]);
        assert_eq!(cfg.format, LogFormat::Pretty);
        assert!(cfg.include_target);
    }

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        for raw in ["1", "true", " YES ", "on"] {
            assert_eq!(parse_bool(raw), Some(true));
        }
        for raw in ["0", "False", "no", "off"] {
            assert_eq!(parse_bool(raw), Some(false));
        }
        assert_eq!(parse_bool("sometimes"), None);
    }
}
