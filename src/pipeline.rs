//! Selection stage driver: one independent search per (uid, split) pair,
//! with per-pair log-and-skip recovery.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::manifest::{
    CompletePair, ManifestConfig, ManifestError, PairKey, SplitManifest, SplitSide,
};
use crate::output::{CsvSelectionWriter, OutputError, SelectionOutputWriter};
use crate::regression::RidgeRegression;
use crate::report::{fingerprint, write_summary, RunError, SummaryWriteError};
use crate::selection::{select_best_subset, SelectionConfig, SelectionError, SelectionRecord};
use crate::table::ObservationTable;

pub const SELECTION_SUMMARY_FILE: &str = "selection_summary.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    MissingCounterpartFile {
        missing: SplitSide,
        present_path: PathBuf,
    },
    InsufficientFoldCount {
        n_train_samples: usize,
        n_splits: usize,
    },
    NoViableSubset {
        evaluated: usize,
        failed: usize,
    },
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingCounterpartFile { .. } => "missing_counterpart_file",
            Self::InsufficientFoldCount { .. } => "insufficient_fold_count",
            Self::NoViableSubset { .. } => "no_viable_subset",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairSkip {
    pub key: PairKey,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionRunSummary {
    pub started_at: DateTime<Utc>,
    pub config: SelectionConfig,
    pub skipped_existing: bool,
    pub pairs_total: usize,
    pub pairs_selected: usize,
    pub pairs_skipped: usize,
    pub pairs_failed: usize,
    pub subsets_evaluated: usize,
    pub subsets_failed: usize,
    pub selections: Vec<SelectionRecord>,
    pub skips: Vec<PairSkip>,
    pub errors: Vec<RunError>,
    pub config_fingerprint: String,
}

impl SelectionRunSummary {
    fn empty(config: SelectionConfig) -> Self {
        Self {
            started_at: Utc::now(),
            config,
            skipped_existing: false,
            pairs_total: 0,
            pairs_selected: 0,
            pairs_skipped: 0,
            pairs_failed: 0,
            subsets_evaluated: 0,
            subsets_failed: 0,
            selections: Vec::new(),
            skips: Vec::new(),
            errors: Vec::new(),
            config_fingerprint: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionStageConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub manifest: ManifestConfig,
    pub selection: SelectionConfig,
    pub skip_if_existing: bool,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error("failed to write run summary: {0}")]
    Summary(#[from] SummaryWriteError),
}

enum PairFailure {
    Skip(SkipReason),
    Error(String),
}

/// Runs the subset search for every pair in the manifest. Only an invalid
/// config fails the run; per-pair problems land in the summary.
pub fn run_selection(
    manifest: &SplitManifest,
    cfg: &SelectionConfig,
    writer: &dyn SelectionOutputWriter,
) -> Result<SelectionRunSummary, SelectionError> {
    cfg.validate()?;
    let regressor = RidgeRegression {
        alpha: cfg.ridge_alpha,
    };
    let validation = manifest.validate();
    let mut summary = SelectionRunSummary::empty(*cfg);
    summary.pairs_total = validation.complete.len() + validation.issues.len();

    info!(
        component = "selection",
        event = "selection.run.start",
        pairs = summary.pairs_total,
        complete_pairs = validation.complete.len(),
        max_features = cfg.max_features,
        ridge_alpha = cfg.ridge_alpha
    );

    for issue in validation.issues {
        warn!(
            component = "selection",
            event = "selection.pair.skipped",
            uid = %issue.key.uid,
            split = issue.key.split,
            reason = "missing_counterpart_file",
            missing = issue.missing.as_str(),
            present_path = %issue.path.display()
        );
        summary.pairs_skipped += 1;
        summary.skips.push(PairSkip {
            key: issue.key,
            reason: SkipReason::MissingCounterpartFile {
                missing: issue.missing,
                present_path: issue.path,
            },
        });
    }

    for pair in &validation.complete {
        match process_pair(pair, cfg, &regressor, writer) {
            Ok(record) => {
                summary.pairs_selected += 1;
                summary.subsets_evaluated += record.subsets_evaluated;
                summary.subsets_failed += record.subsets_failed;
                summary.selections.push(record);
            }
            Err(PairFailure::Skip(reason)) => {
                warn!(
                    component = "selection",
                    event = "selection.pair.skipped",
                    uid = %pair.key.uid,
                    split = pair.key.split,
                    reason = reason.as_str(),
                    details = ?reason
                );
                if let SkipReason::NoViableSubset { evaluated, failed } = reason {
                    summary.subsets_evaluated += evaluated;
                    summary.subsets_failed += failed;
                }
                summary.pairs_skipped += 1;
                summary.skips.push(PairSkip {
                    key: pair.key.clone(),
                    reason,
                });
            }
            Err(PairFailure::Error(message)) => {
                error!(
                    component = "selection",
                    event = "selection.pair.failed",
                    uid = %pair.key.uid,
                    split = pair.key.split,
                    error = %message
                );
                summary.pairs_failed += 1;
                summary
                    .errors
                    .push(RunError::new(pair.key.to_string(), message));
            }
        }
    }

    let mut parts = vec![
        format!("max_features:{}", cfg.max_features),
        format!("ridge_alpha:{}", cfg.ridge_alpha),
    ];
    parts.extend(manifest.keys().map(ToString::to_string));
    summary.config_fingerprint = fingerprint(parts);

    info!(
        component = "selection",
        event = "selection.run.finish",
        pairs_total = summary.pairs_total,
        pairs_selected = summary.pairs_selected,
        pairs_skipped = summary.pairs_skipped,
        pairs_failed = summary.pairs_failed,
        subsets_evaluated = summary.subsets_evaluated,
        subsets_failed = summary.subsets_failed
    );

    Ok(summary)
}

/// Scans `input_dir`, runs selection into `output_dir` and writes
/// `selection_summary.json` there. With `skip_if_existing`, an output
/// directory that already holds selections is left untouched.
pub fn run_selection_stage(cfg: &SelectionStageConfig) -> Result<SelectionRunSummary, PipelineError> {
    cfg.selection.validate()?;
    let writer = CsvSelectionWriter::new(&cfg.output_dir)?;

    if cfg.skip_if_existing {
        let existing = writer.existing_selection_count()?;
        if existing > 0 {
            info!(
                component = "selection",
                event = "selection.run.skipped_existing",
                output_dir = %cfg.output_dir.display(),
                existing_files = existing
            );
            let mut summary = SelectionRunSummary::empty(cfg.selection);
            summary.skipped_existing = true;
            return Ok(summary);
        }
    }

    let manifest = SplitManifest::scan(&cfg.input_dir, &cfg.manifest)?;
    let summary = run_selection(&manifest, &cfg.selection, &writer)?;
    write_summary(&summary_path(&cfg.output_dir), &summary)?;
    Ok(summary)
}

pub fn summary_path(output_dir: &Path) -> PathBuf {
    output_dir.join(SELECTION_SUMMARY_FILE)
}

fn process_pair(
    pair: &CompletePair,
    cfg: &SelectionConfig,
    regressor: &RidgeRegression,
    writer: &dyn SelectionOutputWriter,
) -> Result<SelectionRecord, PairFailure> {
    let train = ObservationTable::from_path(&pair.train).map_err(|err| {
        PairFailure::Error(format!("failed to read {}: {err}", pair.train.display()))
    })?;
    let test = ObservationTable::from_path(&pair.test).map_err(|err| {
        PairFailure::Error(format!("failed to read {}: {err}", pair.test.display()))
    })?;
    let candidates = train.feature_columns().to_vec();

    let result = select_best_subset(&pair.key, train, test, &candidates, cfg, regressor)
        .map_err(|err| match err {
            SelectionError::InsufficientFoldCount {
                n_train_samples,
                n_splits,
            } => PairFailure::Skip(SkipReason::InsufficientFoldCount {
                n_train_samples,
                n_splits,
            }),
            SelectionError::NoViableSubset { evaluated, failed } => {
                PairFailure::Skip(SkipReason::NoViableSubset { evaluated, failed })
            }
            other => PairFailure::Error(other.to_string()),
        })?;

    writer
        .write(&result)
        .map_err(|err| PairFailure::Error(err.to_string()))?;
    Ok(result.record)
}
