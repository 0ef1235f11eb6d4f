//! Stage configuration from `SLEEP_SELECT_*` environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::manifest::ManifestConfig;
use crate::observability::parse_bool;
use crate::pipeline::SelectionStageConfig;
use crate::selection::SelectionConfig;
use crate::splits::{SessionSource, WalkForwardConfig};

pub const ENV_SPLITS_DIR: &str = "SLEEP_SELECT_SPLITS_DIR";
pub const ENV_SELECTED_DIR: &str = "SLEEP_SELECT_SELECTED_DIR";
pub const ENV_SESSIONS: &str = "SLEEP_SELECT_SESSIONS";
pub const ENV_MIN_TRAIN_DAYS: &str = "SLEEP_SELECT_MIN_TRAIN_DAYS";
pub const ENV_MAX_SPLITS: &str = "SLEEP_SELECT_MAX_SPLITS";
pub const ENV_MAX_FEATURES: &str = "SLEEP_SELECT_MAX_FEATURES";
pub const ENV_RIDGE_ALPHA: &str = "SLEEP_SELECT_RIDGE_ALPHA";
pub const ENV_FILE_SUFFIX: &str = "SLEEP_SELECT_FILE_SUFFIX";
pub const ENV_SKIP_IF_EXISTING: &str = "SLEEP_SELECT_SKIP_IF_EXISTING";

const DEFAULT_SPLITS_DIR: &str = ".";
const DEFAULT_SELECTED_DIR: &str = "selected_features";
const DEFAULT_SESSIONS: &str =
    "A=features_session_A.csv,B=features_session_B.csv,C=features_session_C.csv";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid {var} value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitStageConfig {
    pub sessions: Vec<SessionSource>,
    pub output_dir: PathBuf,
    pub walk_forward: WalkForwardConfig,
}

pub fn walk_forward_config_from_env() -> Result<WalkForwardConfig, ConfigError> {
    let defaults = WalkForwardConfig::default();
    Ok(WalkForwardConfig {
        min_train_days: parse_var(ENV_MIN_TRAIN_DAYS)?.unwrap_or(defaults.min_train_days),
        max_splits: parse_var(ENV_MAX_SPLITS)?.unwrap_or(defaults.max_splits),
    })
}

/// `SLEEP_SELECT_MAX_FEATURES` is required.
pub fn selection_config_from_env() -> Result<SelectionConfig, ConfigError> {
    let max_features: usize =
        parse_var(ENV_MAX_FEATURES)?.ok_or(ConfigError::Missing(ENV_MAX_FEATURES))?;
    let mut cfg = SelectionConfig::new(max_features);
    if let Some(alpha) = parse_var(ENV_RIDGE_ALPHA)? {
        cfg.ridge_alpha = alpha;
    }
    cfg.validate().map_err(|err| ConfigError::Invalid {
        var: ENV_MAX_FEATURES,
        value: max_features.to_string(),
        reason: err.to_string(),
    })?;
    Ok(cfg)
}

pub fn split_stage_config_from_env() -> Result<SplitStageConfig, ConfigError> {
    let sessions_raw = non_empty_var(ENV_SESSIONS).unwrap_or_else(|| DEFAULT_SESSIONS.to_string());
    Ok(SplitStageConfig {
        sessions: parse_sessions(&sessions_raw)?,
        output_dir: path_var(ENV_SPLITS_DIR, DEFAULT_SPLITS_DIR),
        walk_forward: walk_forward_config_from_env()?,
    })
}

pub fn selection_stage_config_from_env() -> Result<SelectionStageConfig, ConfigError> {
    let skip_if_existing = match non_empty_var(ENV_SKIP_IF_EXISTING) {
        Some(raw) => parse_bool(&raw).ok_or_else(|| ConfigError::Invalid {
            var: ENV_SKIP_IF_EXISTING,
            value: raw.clone(),
            reason: "expected a boolean".to_string(),
        })?,
        None => true,
    };

    Ok(SelectionStageConfig {
        input_dir: path_var(ENV_SPLITS_DIR, DEFAULT_SPLITS_DIR),
        output_dir: path_var(ENV_SELECTED_DIR, DEFAULT_SELECTED_DIR),
        manifest: ManifestConfig {
            file_suffix: env::var(ENV_FILE_SUFFIX).unwrap_or_default(),
        },
        selection: selection_config_from_env()?,
        skip_if_existing,
    })
}

/// Parses `name=path` entries separated by commas.
pub fn parse_sessions(raw: &str) -> Result<Vec<SessionSource>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, path) = entry.split_once('=').ok_or_else(|| ConfigError::Invalid {
                var: ENV_SESSIONS,
                value: entry.to_string(),
                reason: "expected name=path".to_string(),
            })?;
            let (name, path) = (name.trim(), path.trim());
            if name.is_empty() || path.is_empty() {
                return Err(ConfigError::Invalid {
                    var: ENV_SESSIONS,
                    value: entry.to_string(),
                    reason: "name and path must be non-empty".to_string(),
                });
            }
            Ok(SessionSource::new(name, path))
        })
        .collect()
}

fn non_empty_var(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn path_var(var: &str, default: &str) -> PathBuf {
    PathBuf::from(non_empty_var(var).unwrap_or_else(|| default.to_string()))
}

fn parse_var<T>(var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty_var(var) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|err| ConfigError::Invalid {
                var,
                value: raw.clone(),
                reason: err.to_string(),
            }),
        None => Ok(None),
    }
}
