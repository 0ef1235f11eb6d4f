//! Walk-forward train/test split generation per user.
//!
//! Splits are cumulative: split `i` trains on the first `min_train_days + i`
//! observations and tests on the next one.

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::manifest::{split_file_name, PairKey, SplitSide};
use crate::report::{fingerprint, RunError};
use crate::table::{write_atomic_all, ObservationTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    pub min_train_days: usize,
    pub max_splits: usize,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            min_train_days: 3,
            max_splits: 5,
        }
    }
}

impl WalkForwardConfig {
    pub fn validate(&self) -> Result<(), SplitGenerationError> {
        if self.min_train_days == 0 {
            return Err(SplitGenerationError::InvalidConfig(
                "min_train_days must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Fewest observations a user needs before any split is produced.
    pub fn required_observations(&self) -> usize {
        self.min_train_days + 2
    }
}

/// Index ranges into a user's date-sorted observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkForwardSplit {
    pub index: usize,
    pub train: Range<usize>,
    pub test: Range<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("insufficient history: {observations} observations, need at least {required}")]
pub struct InsufficientHistory {
    pub observations: usize,
    pub required: usize,
}

#[derive(Debug, Error)]
pub enum SplitGenerationError {
    #[error("invalid walk-forward config: {0}")]
    InvalidConfig(String),
    #[error("failed to create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSource {
    pub name: String,
    pub path: PathBuf,
}

impl SessionSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSkip {
    pub uid: String,
    pub observations: usize,
    pub required: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitGenerationSummary {
    pub started_at: DateTime<Utc>,
    pub config: WalkForwardConfig,
    pub sessions_loaded: usize,
    pub rows_loaded: usize,
    pub rows_dropped_unlabeled: usize,
    pub users_seen: usize,
    pub users_split: usize,
    pub users_skipped: usize,
    pub splits_written: usize,
    pub skips: Vec<UserSkip>,
    pub errors: Vec<RunError>,
    pub config_fingerprint: String,
}

/// Plans splits for `n_observations` date-sorted observations.
///
/// Produces `min(max_splits, n - min_train_days)` splits, or
/// `InsufficientHistory` when `n < min_train_days + 2`.
pub fn plan_walk_forward_splits(
    n_observations: usize,
    cfg: &WalkForwardConfig,
) -> Result<Vec<WalkForwardSplit>, InsufficientHistory> {
    let required = cfg.required_observations();
    if n_observations < required {
        return Err(InsufficientHistory {
            observations: n_observations,
            required,
        });
    }

    let num_splits = cfg.max_splits.min(n_observations - cfg.min_train_days);
    Ok((0..num_splits)
        .map(|index| {
            let boundary = cfg.min_train_days + index;
            WalkForwardSplit {
                index,
                train: 0..boundary,
                test: boundary..boundary + 1,
            }
        })
        .collect())
}

/// Sorts one user's table by `label_date` and materializes its splits.
pub fn split_user_table(
    table: &mut ObservationTable,
    cfg: &WalkForwardConfig,
) -> Result<Vec<(WalkForwardSplit, ObservationTable, ObservationTable)>, InsufficientHistory> {
    table.sort_by_label_date();
    let plan = plan_walk_forward_splits(table.len(), cfg)?;
    Ok(plan
        .into_iter()
        .map(|split| {
            let train = table.subset(split.train.clone());
            let test = table.subset(split.test.clone());
            (split, train, test)
        })
        .collect())
}

/// Loads the session feature tables, splits every user walk-forward and
/// writes `train_user_{uid}_split{i}.csv` / `test_user_{uid}_split{i}.csv`
/// into `out_dir`.
pub fn generate_user_splits(
    sessions: &[SessionSource],
    out_dir: &Path,
    cfg: &WalkForwardConfig,
) -> Result<SplitGenerationSummary, SplitGenerationError> {
    cfg.validate()?;
    fs::create_dir_all(out_dir).map_err(|source| SplitGenerationError::OutputDir {
        path: out_dir.to_path_buf(),
        source,
    })?;

    info!(
        component = "splits",
        event = "splits.generate.start",
        sessions = sessions.len(),
        out_dir = %out_dir.display(),
        min_train_days = cfg.min_train_days,
        max_splits = cfg.max_splits
    );

    let mut summary = SplitGenerationSummary {
        started_at: Utc::now(),
        config: *cfg,
        sessions_loaded: 0,
        rows_loaded: 0,
        rows_dropped_unlabeled: 0,
        users_seen: 0,
        users_split: 0,
        users_skipped: 0,
        splits_written: 0,
        skips: Vec::new(),
        errors: Vec::new(),
        config_fingerprint: String::new(),
    };

    let mut tables = Vec::with_capacity(sessions.len());
    for session in sessions {
        match ObservationTable::from_path(&session.path) {
            Ok(table) => {
                summary.sessions_loaded += 1;
                tables.push(table.with_session(&session.name));
            }
            Err(err) => {
                error!(
                    component = "splits",
                    event = "splits.session.load_failed",
                    session = %session.name,
                    path = %session.path.display(),
                    error = %err
                );
                summary
                    .errors
                    .push(RunError::new(format!("session {}", session.name), err));
            }
        }
    }

    let combined = ObservationTable::concat(tables);
    summary.rows_loaded = combined.len();
    summary.rows_dropped_unlabeled = combined.dropped_unlabeled();

    let mut written_keys = Vec::new();
    for mut user in combined.partition_by_uid() {
        let Some(uid) = user.rows().first().map(|row| row.uid.clone()) else {
            continue;
        };
        summary.users_seen += 1;

        let splits = match split_user_table(&mut user, cfg) {
            Ok(splits) => splits,
            Err(skip) => {
                warn!(
                    component = "splits",
                    event = "splits.user.skipped",
                    uid = %uid,
                    reason = "insufficient_history",
                    observations = skip.observations,
                    required = skip.required
                );
                summary.users_skipped += 1;
                summary.skips.push(UserSkip {
                    uid,
                    observations: skip.observations,
                    required: skip.required,
                });
                continue;
            }
        };

        info!(
            component = "splits",
            event = "splits.user.planned",
            uid = %uid,
            observations = user.len(),
            splits = splits.len()
        );
        summary.users_split += 1;

        for (split, train, test) in splits {
            let key = PairKey::new(uid.clone(), split.index);
            match write_split(out_dir, &key, &train, &test) {
                Ok(()) => {
                    summary.splits_written += 1;
                    written_keys.push(key.to_string());
                }
                Err(err) => {
                    error!(
                        component = "splits",
                        event = "splits.write.failed",
                        uid = %key.uid,
                        split = key.split,
                        error = %err
                    );
                    summary.errors.push(RunError::new(key.to_string(), err));
                }
            }
        }
    }

    let mut parts = vec![
        format!("min_train_days:{}", cfg.min_train_days),
        format!("max_splits:{}", cfg.max_splits),
    ];
    parts.extend(sessions.iter().map(|s| format!("session:{}", s.name)));
    parts.extend(written_keys);
    summary.config_fingerprint = fingerprint(parts);

    info!(
        component = "splits",
        event = "splits.generate.finish",
        users_seen = summary.users_seen,
        users_split = summary.users_split,
        users_skipped = summary.users_skipped,
        splits_written = summary.splits_written,
        errors = summary.errors.len()
    );

    Ok(summary)
}

fn write_split(
    out_dir: &Path,
    key: &PairKey,
    train: &ObservationTable,
    test: &ObservationTable,
) -> Result<(), crate::table::TableError> {
    let columns = train.columns();
    let train_path = out_dir.join(split_file_name(SplitSide::Train, key, ""));
    let test_path = out_dir.join(split_file_name(SplitSide::Test, key, ""));
    let train_bytes = train.to_csv_bytes(columns)?;
    let test_bytes = test.to_csv_bytes(columns)?;
    write_atomic_all(&[
        (train_path.as_path(), train_bytes.as_slice()),
        (test_path.as_path(), test_bytes.as_slice()),
    ])
}
