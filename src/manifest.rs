//! Explicit index of per-(uid, split) train/test tables.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SplitSide {
    Train,
    Test,
}

impl SplitSide {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Test => "test",
        }
    }

    fn file_prefix(self) -> &'static str {
        match self {
            Self::Train => "train_user_",
            Self::Test => "test_user_",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    pub uid: String,
    pub split: usize,
}

impl PairKey {
    pub fn new(uid: impl Into<String>, split: usize) -> Self {
        Self {
            uid: uid.into(),
            split,
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uid {} split {}", self.uid, self.split)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestConfig {
    /// Text between the split number and `.csv`, e.g. `_vetted`.
    pub file_suffix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairFiles {
    pub train: Option<PathBuf>,
    pub test: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletePair {
    pub key: PairKey,
    pub train: PathBuf,
    pub test: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestIssue {
    pub key: PairKey,
    pub present: SplitSide,
    pub missing: SplitSide,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestValidation {
    pub complete: Vec<CompletePair>,
    pub issues: Vec<ManifestIssue>,
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read split directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitManifest {
    pairs: BTreeMap<PairKey, PairFiles>,
}

impl SplitManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes every `{train,test}_user_{uid}_split{n}{suffix}.csv` file in
    /// `dir`. Other files are ignored.
    pub fn scan(dir: &Path, cfg: &ManifestConfig) -> Result<Self, ManifestError> {
        let read_dir_err = |source| ManifestError::ReadDir {
            path: dir.to_path_buf(),
            source,
        };

        let mut manifest = Self::new();
        let mut ignored = 0usize;
        for entry in fs::read_dir(dir).map_err(read_dir_err)? {
            let entry = entry.map_err(read_dir_err)?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                ignored += 1;
                continue;
            };
            match parse_split_file_name(name, &cfg.file_suffix) {
                Some((side, key)) => manifest.insert(key, side, path.clone()),
                None => ignored += 1,
            }
        }

        info!(
            component = "manifest",
            event = "manifest.scan.finish",
            dir = %dir.display(),
            file_suffix = %cfg.file_suffix,
            pairs = manifest.len(),
            ignored_files = ignored
        );

        Ok(manifest)
    }

    pub fn insert(&mut self, key: PairKey, side: SplitSide, path: PathBuf) {
        let files = self.pairs.entry(key).or_default();
        match side {
            SplitSide::Train => files.train = Some(path),
            SplitSide::Test => files.test = Some(path),
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn get(&self, key: &PairKey) -> Option<&PairFiles> {
        self.pairs.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &PairKey> {
        self.pairs.keys()
    }

    /// Splits the index into pairs with both tables present and pairs
    /// missing a counterpart, both in key order.
    pub fn validate(&self) -> ManifestValidation {
        let mut out = ManifestValidation::default();
        for (key, files) in &self.pairs {
            match (&files.train, &files.test) {
                (Some(train), Some(test)) => out.complete.push(CompletePair {
                    key: key.clone(),
                    train: train.clone(),
                    test: test.clone(),
                }),
                (Some(path), None) => out.issues.push(ManifestIssue {
                    key: key.clone(),
                    present: SplitSide::Train,
                    missing: SplitSide::Test,
                    path: path.clone(),
                }),
                (None, Some(path)) => out.issues.push(ManifestIssue {
                    key: key.clone(),
                    present: SplitSide::Test,
                    missing: SplitSide::Train,
                    path: path.clone(),
                }),
                (None, None) => {}
            }
        }
        out
    }
}

pub fn split_file_name(side: SplitSide, key: &PairKey, suffix: &str) -> String {
    format!(
        "{}{}_split{}{}.csv",
        side.file_prefix(),
        key.uid,
        key.split,
        suffix
    )
}

pub fn selected_file_name(side: SplitSide, key: &PairKey) -> String {
    format!("selected_{}", split_file_name(side, key, ""))
}

pub fn parse_split_file_name(name: &str, suffix: &str) -> Option<(SplitSide, PairKey)> {
    let (side, rest) = [SplitSide::Train, SplitSide::Test]
        .into_iter()
        .find_map(|side| name.strip_prefix(side.file_prefix()).map(|rest| (side, rest)))?;
    let stem = rest.strip_suffix(".csv")?.strip_suffix(suffix)?;
    let (uid, split) = stem.rsplit_once("_split")?;
    if uid.is_empty() || split.is_empty() || !split.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((side, PairKey::new(uid, split.parse().ok()?)))
}
