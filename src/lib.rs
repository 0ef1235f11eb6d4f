//! Per-user feature selection for sleep-quality prediction.
//!
//! Pipeline stages:
//! - walk-forward train/test split generation per user
//! - exhaustive feature-subset search scored by time-series cross-validated
//!   ridge regression, one independent search per (uid, split)

mod config;
mod cross_validation;
mod manifest;
mod observability;
mod output;
mod pipeline;
mod regression;
mod report;
mod selection;
mod splits;
mod table;

pub use config::{
    parse_sessions, selection_config_from_env, selection_stage_config_from_env,
    split_stage_config_from_env, walk_forward_config_from_env, ConfigError, SplitStageConfig,
};
pub use cross_validation::{
    cross_validated_mse, fold_count, time_series_folds, CrossValidationError, Fold, MAX_CV_FOLDS,
    MIN_CV_FOLDS,
};
pub use manifest::{
    parse_split_file_name, selected_file_name, split_file_name, CompletePair, ManifestConfig,
    ManifestError, ManifestIssue, ManifestValidation, PairFiles, PairKey, SplitManifest,
    SplitSide,
};
pub use observability::{
    init_logging, init_logging_from_env, log_run_finish, log_run_start, LogFormat,
    LoggingConfig, LoggingInitError, ENV_LOG_FORMAT, ENV_LOG_LEVEL, ENV_LOG_TARGET,
};
pub use output::{CsvSelectionWriter, OutputError, SelectionOutputWriter, WrittenSelection};
pub use pipeline::{
    run_selection, run_selection_stage, summary_path, PairSkip, PipelineError,
    SelectionRunSummary, SelectionStageConfig, SkipReason, SELECTION_SUMMARY_FILE,
};
pub use regression::{
    DesignMatrix, FitError, LinearModel, Predictor, Regressor, RidgeRegression,
    DEFAULT_RIDGE_ALPHA,
};
pub use report::{fingerprint, write_summary, RunError, SummaryWriteError};
pub use selection::{
    search_best_subset, select_best_subset, subset_count, Combinations, ScoredSubset,
    SelectionConfig, SelectionError, SelectionRecord, SelectionResult, SubsetFailure,
    SubsetSearch,
};
pub use splits::{
    generate_user_splits, plan_walk_forward_splits, split_user_table, InsufficientHistory,
    SessionSource, SplitGenerationError, SplitGenerationSummary, UserSkip, WalkForwardConfig,
    WalkForwardSplit,
};
pub use table::{
    parse_label_date, parse_numeric_cell, Observation, ObservationTable, TableError,
    LABEL_DATE_COLUMN, LEGACY_TARGET_COLUMN, SESSION_COLUMN, TARGET_COLUMN, UID_COLUMN,
};
