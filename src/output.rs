//! Persistence of winning feature subsets.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::manifest::{selected_file_name, SplitSide};
use crate::selection::SelectionResult;
use crate::table::{write_atomic_all, TableError};

const SELECTED_TRAIN_PREFIX: &str = "selected_train_user_";

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to prepare output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: TableError,
    },
    #[error("failed to write {} and {}: {source}", .train.display(), .test.display())]
    Write {
        train: PathBuf,
        test: PathBuf,
        #[source]
        source: TableError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrittenSelection {
    pub train: PathBuf,
    pub test: PathBuf,
}

pub trait SelectionOutputWriter {
    fn write(&self, result: &SelectionResult) -> Result<WrittenSelection, OutputError>;
}

/// Writes `selected_{train,test}_user_{uid}_split{n}.csv` restricted to the
/// winning features plus target, uid and label_date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvSelectionWriter {
    out_dir: PathBuf,
}

impl CsvSelectionWriter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Result<Self, OutputError> {
        let out_dir = out_dir.into();
        fs::create_dir_all(&out_dir).map_err(|source| OutputError::OutputDir {
            path: out_dir.clone(),
            source,
        })?;
        Ok(Self { out_dir })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Counts previously written selection files in the output directory.
    pub fn existing_selection_count(&self) -> Result<usize, OutputError> {
        let entries = fs::read_dir(&self.out_dir).map_err(|source| OutputError::OutputDir {
            path: self.out_dir.clone(),
            source,
        })?;
        Ok(entries
            .filter_map(Result::ok)
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(|name| name.starts_with(SELECTED_TRAIN_PREFIX) && name.ends_with(".csv"))
                    .unwrap_or(false)
            })
            .count())
    }
}

impl SelectionOutputWriter for CsvSelectionWriter {
    fn write(&self, result: &SelectionResult) -> Result<WrittenSelection, OutputError> {
        let key = &result.record.key;
        let train = self
            .out_dir
            .join(selected_file_name(SplitSide::Train, key));
        let test = self.out_dir.join(selected_file_name(SplitSide::Test, key));

        let train_bytes = result
            .train
            .to_csv_bytes(&result.output_columns)
            .map_err(|source| OutputError::Encode {
                path: train.clone(),
                source,
            })?;
        let test_bytes = result
            .test
            .to_csv_bytes(&result.output_columns)
            .map_err(|source| OutputError::Encode {
                path: test.clone(),
                source,
            })?;

        // Both files land or neither does.
        write_atomic_all(&[
            (train.as_path(), train_bytes.as_slice()),
            (test.as_path(), test_bytes.as_slice()),
        ])
        .map_err(|source| OutputError::Write {
            train: train.clone(),
            test: test.clone(),
            source,
        })?;

        info!(
            component = "output",
            event = "output.selection.written",
            uid = %key.uid,
            split = key.split,
            train_path = %train.display(),
            test_path = %test.display(),
            columns = result.output_columns.len()
        );

        Ok(WrittenSelection { train, test })
    }
}
