//! Run-level report records shared by the split and selection stages.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::table::write_atomic;

/// A failure that is not a planned skip: unreadable input, failed write.
/// The run keeps going; these are surfaced in the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub scope: String,
    pub message: String,
}

impl RunError {
    pub fn new(scope: impl Into<String>, message: impl ToString) -> Self {
        Self {
            scope: scope.into(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SummaryWriteError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("table write error: {0}")]
    Table(#[from] crate::table::TableError),
}

/// SHA-256 over `;`-terminated parts, hex encoded.
pub fn fingerprint<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref().as_bytes());
        hasher.update(b";");
    }
    hex::encode(hasher.finalize())
}

pub fn write_summary<T: Serialize>(path: &Path, summary: &T) -> Result<(), SummaryWriteError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let bytes = serde_json::to_vec_pretty(summary)?;
    write_atomic(path, &bytes)?;

    info!(
        component = "report",
        event = "report.summary.written",
        path = %path.display(),
        bytes = bytes.len()
    );
    Ok(())
}
