//! Labeled observation tables: one row per (uid, labeled day).

use std::fs;
use std::io::{Read, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const UID_COLUMN: &str = "uid";
pub const LABEL_DATE_COLUMN: &str = "label_date";
pub const TARGET_COLUMN: &str = "sleep_quality";
pub const LEGACY_TARGET_COLUMN: &str = "sleep_score";
pub const SESSION_COLUMN: &str = "session";

const RESERVED_COLUMNS: [&str; 4] = [UID_COLUMN, LABEL_DATE_COLUMN, TARGET_COLUMN, SESSION_COLUMN];

const LABEL_DATE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

#[derive(Debug, Error)]
pub enum TableError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing required column '{0}'")]
    MissingColumn(String),
    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),
    #[error("failed to parse {column} value '{value}' at row {row}")]
    ParseField {
        column: String,
        value: String,
        row: usize,
    },
    #[error("invalid label_date '{value}' at row {row}")]
    InvalidLabelDate { value: String, row: usize },
    #[error("invalid output path: {0}")]
    InvalidPath(String),
}

/// One labeled day for one user. `cells` holds the raw CSV text aligned with
/// the owning table's columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub uid: String,
    pub label_date: NaiveDateTime,
    pub sleep_quality: f64,
    pub cells: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObservationTable {
    columns: Vec<String>,
    feature_columns: Vec<String>,
    rows: Vec<Observation>,
    dropped_unlabeled: usize,
}

impl ObservationTable {
    pub fn from_path(path: &Path) -> Result<Self, TableError> {
        let file = fs::File::open(path)?;
        let table = Self::from_reader(file)?;
        debug!(
            component = "table",
            event = "table.loaded",
            path = %path.display(),
            rows = table.rows.len(),
            feature_columns = table.feature_columns.len(),
            dropped_unlabeled = table.dropped_unlabeled
        );
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let mut columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if !columns.iter().any(|c| c == TARGET_COLUMN) {
            if let Some(legacy) = columns.iter_mut().find(|c| c.as_str() == LEGACY_TARGET_COLUMN) {
                *legacy = TARGET_COLUMN.to_string();
            }
        }
        for (idx, column) in columns.iter().enumerate() {
            if columns[..idx].contains(column) {
                return Err(TableError::DuplicateColumn(column.clone()));
            }
        }

        let uid_idx = required_index(&columns, UID_COLUMN)?;
        let date_idx = required_index(&columns, LABEL_DATE_COLUMN)?;
        let target_idx = required_index(&columns, TARGET_COLUMN)?;

        let mut rows = Vec::new();
        let mut dropped_unlabeled = 0usize;
        for (row_number, record) in reader.records().enumerate() {
            let record = record?;
            match parse_observation(&record, row_number, uid_idx, date_idx, target_idx)? {
                Some(observation) => rows.push(observation),
                None => dropped_unlabeled += 1,
            }
        }

        let feature_columns = classify_feature_columns(&columns, &rows);
        Ok(Self {
            columns,
            feature_columns,
            rows,
            dropped_unlabeled,
        })
    }

    /// Concatenates tables over the union of their columns; cells absent from
    /// a source table are left empty.
    pub fn concat(tables: Vec<ObservationTable>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for table in &tables {
            for column in &table.columns {
                if !columns.contains(column) {
                    columns.push(column.clone());
                }
            }
        }

        let mut rows = Vec::new();
        let mut dropped_unlabeled = 0usize;
        for table in tables {
            let mapping: Vec<Option<usize>> = columns
                .iter()
                .map(|column| table.column_index(column))
                .collect();
            dropped_unlabeled += table.dropped_unlabeled;
            for row in table.rows {
                let cells = mapping
                    .iter()
                    .map(|source| match source {
                        Some(idx) => row.cells[*idx].clone(),
                        None => String::new(),
                    })
                    .collect();
                rows.push(Observation { cells, ..row });
            }
        }

        let feature_columns = classify_feature_columns(&columns, &rows);
        Self {
            columns,
            feature_columns,
            rows,
            dropped_unlabeled,
        }
    }

    /// Tags every row with the session name, adding the column if needed.
    pub fn with_session(mut self, session: &str) -> Self {
        let idx = match self.column_index(SESSION_COLUMN) {
            Some(idx) => idx,
            None => {
                self.columns.push(SESSION_COLUMN.to_string());
                for row in &mut self.rows {
                    row.cells.push(String::new());
                }
                self.columns.len() - 1
            }
        };
        for row in &mut self.rows {
            row.cells[idx] = session.to_string();
        }
        self
    }

    /// Stable sort: rows sharing a `label_date` keep their original order.
    pub fn sort_by_label_date(&mut self) {
        self.rows.sort_by_key(|row| row.label_date);
    }

    /// Splits the table per uid, in order of each uid's first appearance.
    pub fn partition_by_uid(self) -> Vec<ObservationTable> {
        let mut groups: Vec<(String, Vec<Observation>)> = Vec::new();
        for row in self.rows {
            match groups.iter_mut().find(|(uid, _)| *uid == row.uid) {
                Some((_, rows)) => rows.push(row),
                None => groups.push((row.uid.clone(), vec![row])),
            }
        }

        groups
            .into_iter()
            .map(|(_, rows)| ObservationTable {
                columns: self.columns.clone(),
                feature_columns: self.feature_columns.clone(),
                rows,
                dropped_unlabeled: 0,
            })
            .collect()
    }

    pub fn subset(&self, range: Range<usize>) -> ObservationTable {
        ObservationTable {
            columns: self.columns.clone(),
            feature_columns: self.feature_columns.clone(),
            rows: self.rows[range].to_vec(),
            dropped_unlabeled: 0,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Numeric candidate features in column order, excluding identifier,
    /// date, target and session columns.
    pub fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dropped_unlabeled(&self) -> usize {
        self.dropped_unlabeled
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn targets(&self) -> Vec<f64> {
        self.rows.iter().map(|row| row.sleep_quality).collect()
    }

    pub fn numeric_column(&self, name: &str) -> Result<Vec<Option<f64>>, TableError> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))?;
        self.rows
            .iter()
            .enumerate()
            .map(|(row_number, row)| {
                parse_numeric_cell(&row.cells[idx]).ok_or_else(|| TableError::ParseField {
                    column: name.to_string(),
                    value: row.cells[idx].clone(),
                    row: row_number,
                })
            })
            .collect()
    }

    /// Renders the table as CSV restricted to `columns`, in that order.
    pub fn to_csv_bytes(&self, columns: &[String]) -> Result<Vec<u8>, TableError> {
        let indices = columns
            .iter()
            .map(|column| {
                self.column_index(column)
                    .ok_or_else(|| TableError::MissingColumn(column.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(columns)?;
        for row in &self.rows {
            writer.write_record(indices.iter().map(|idx| row.cells[*idx].as_str()))?;
        }
        writer
            .into_inner()
            .map_err(|err| TableError::Io(err.into_error()))
    }
}

pub fn parse_label_date(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(with_offset.naive_utc());
    }
    for format in LABEL_DATE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(parsed);
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// `Some(None)` for an empty or NaN cell, `None` when the cell is not numeric.
pub fn parse_numeric_cell(raw: &str) -> Option<Option<f64>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return Some(None);
    }
    trimmed.parse::<f64>().ok().map(Some)
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), TableError> {
    write_atomic_all(&[(path, bytes)])
}

/// Stages every file as `{name}.tmp`, then renames them into place. On
/// failure no temp file is left behind and files already renamed by this
/// call are removed, so either all paths are written or none are.
pub(crate) fn write_atomic_all(files: &[(&Path, &[u8])]) -> Result<(), TableError> {
    let mut staged: Vec<(PathBuf, &Path)> = Vec::with_capacity(files.len());
    for &(path, bytes) in files {
        let tmp_path = tmp_path_for(path)?;
        if let Err(err) = write_synced(&tmp_path, bytes) {
            let _ = fs::remove_file(&tmp_path);
            discard(staged.iter().map(|(tmp, _)| tmp.as_path()));
            return Err(err);
        }
        staged.push((tmp_path, path));
    }

    for (idx, (tmp_path, path)) in staged.iter().enumerate() {
        if let Err(err) = fs::rename(tmp_path, path) {
            discard(staged[idx..].iter().map(|(tmp, _)| tmp.as_path()));
            discard(staged[..idx].iter().map(|(_, path)| *path));
            return Err(err.into());
        }
    }
    Ok(())
}

fn tmp_path_for(path: &Path) -> Result<PathBuf, TableError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| TableError::InvalidPath(path.display().to_string()))?;
    Ok(path.with_file_name(format!("{file_name}.tmp")))
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), TableError> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

fn discard<'a>(paths: impl Iterator<Item = &'a Path>) {
    for path in paths {
        let _ = fs::remove_file(path);
    }
}

fn required_index(columns: &[String], name: &str) -> Result<usize, TableError> {
    columns
        .iter()
        .position(|c| c == name)
        .ok_or_else(|| TableError::MissingColumn(name.to_string()))
}

fn parse_observation(
    record: &StringRecord,
    row: usize,
    uid_idx: usize,
    date_idx: usize,
    target_idx: usize,
) -> Result<Option<Observation>, TableError> {
    let target_raw = record.get(target_idx).unwrap_or_default();
    let sleep_quality = match parse_numeric_cell(target_raw) {
        Some(Some(value)) => value,
        Some(None) => return Ok(None),
        None => {
            return Err(TableError::ParseField {
                column: TARGET_COLUMN.to_string(),
                value: target_raw.to_string(),
                row,
            })
        }
    };

    let date_raw = record.get(date_idx).unwrap_or_default();
    let label_date = parse_label_date(date_raw).ok_or_else(|| TableError::InvalidLabelDate {
        value: date_raw.to_string(),
        row,
    })?;

    Ok(Some(Observation {
        uid: record.get(uid_idx).unwrap_or_default().trim().to_string(),
        label_date,
        sleep_quality,
        cells: record.iter().map(str::to_string).collect(),
    }))
}

fn classify_feature_columns(columns: &[String], rows: &[Observation]) -> Vec<String> {
    columns
        .iter()
        .enumerate()
        .filter(|(_, column)| !RESERVED_COLUMNS.contains(&column.as_str()))
        .filter(|(idx, _)| {
            rows.iter()
                .all(|row| parse_numeric_cell(&row.cells[*idx]).is_some())
        })
        .map(|(_, column)| column.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(csv: &str) -> ObservationTable {
        ObservationTable::from_reader(csv.as_bytes()).unwrap()
    }

    #[test]
    fn numeric_columns_exclude_reserved_and_text_columns() {
        let table = load(
            "uid,label_date,sleep_quality,session,steps,note,light\n\
             7,2025-03-01 08:00:00,3,A,100,ok,\n\
             7,2025-03-02 08:00:00,4,A,120,fine,2.5\n",
        );

        assert_eq!(table.feature_columns(), ["steps", "light"]);
        assert_eq!(table.numeric_column("light").unwrap(), vec![None, Some(2.5)]);
    }

    #[test]
    fn unlabeled_rows_are_dropped_and_legacy_target_is_renamed() {
        let table = load(
            "uid,label_date,sleep_score,steps\n\
             1,2025-03-01,3,10\n\
             1,2025-03-02,,11\n\
             1,2025-03-03,NaN,12\n",
        );

        assert_eq!(table.len(), 1);
        assert_eq!(table.dropped_unlabeled(), 2);
        assert!(table.column_index(TARGET_COLUMN).is_some());
    }

    #[test]
    fn sort_is_stable_for_equal_dates() {
        let mut table = load(
            "uid,label_date,sleep_quality,steps\n\
             1,2025-03-02 08:00:00,1,1\n\
             1,2025-03-01 08:00:00,2,2\n\
             1,2025-03-02 08:00:00,3,3\n",
        );
        table.sort_by_label_date();

        let order: Vec<f64> = table.targets();
        assert_eq!(order, vec![2.0, 1.0, 3.0]);
    }

    #[test]
    fn label_date_formats_are_accepted() {
        assert!(parse_label_date("2025-03-01 07:15:00").is_some());
        assert!(parse_label_date("2025-03-01T07:15:00.250").is_some());
        assert!(parse_label_date("2025-03-01T07:15:00+02:00").is_some());
        assert!(parse_label_date("2025-03-01").is_some());
        assert!(parse_label_date("01/03/2025").is_none());
    }

    #[test]
    fn missing_required_column_is_rejected() {
        let err = ObservationTable::from_reader("uid,sleep_quality\n1,3\n".as_bytes()).unwrap_err();
        assert!(matches!(err, TableError::MissingColumn(column) if column == LABEL_DATE_COLUMN));
    }

    #[test]
    fn concat_unions_columns_and_session_tag_is_applied() {
        let a = load("uid,label_date,sleep_quality,steps\n1,2025-03-01,3,10\n").with_session("A");
        let b = load("uid,label_date,sleep_quality,light\n2,2025-04-01,4,0.5\n").with_session("B");
        let joined = ObservationTable::concat(vec![a, b]);

        assert_eq!(
            joined.columns(),
            ["uid", "label_date", "sleep_quality", "steps", "session", "light"]
        );
        assert_eq!(joined.feature_columns(), ["steps", "light"]);
        assert_eq!(joined.rows()[1].cells[4], "B");
        assert_eq!(joined.rows()[1].cells[3], "");
    }

    #[test]
    fn projection_writes_requested_columns_only() {
        let table = load("uid,label_date,sleep_quality,steps,light\n1,2025-03-01,3,10,0.5\n");
        let columns = vec!["light".to_string(), "sleep_quality".to_string()];
        let bytes = table.to_csv_bytes(&columns).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "light,sleep_quality\n0.5,3\n");

        let missing = vec!["steps_total".to_string()];
        assert!(matches!(
            table.to_csv_bytes(&missing).unwrap_err(),
            TableError::MissingColumn(_)
        ));
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn atomic_group_write_lands_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");

        write_atomic_all(&[(a.as_path(), b"one".as_slice()), (b.as_path(), b"two".as_slice())])
            .unwrap();

        assert_eq!(fs::read_to_string(&a).unwrap(), "one");
        assert_eq!(fs::read_to_string(&b).unwrap(), "two");
        assert_eq!(dir_entries(dir.path()), vec!["a.csv", "b.csv"]);
    }

    #[test]
    fn failed_rename_rolls_back_the_whole_group() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let blocked = dir.path().join("b.csv");
        fs::create_dir(&blocked).unwrap();

        let err = write_atomic_all(&[
            (a.as_path(), b"one".as_slice()),
            (blocked.as_path(), b"two".as_slice()),
        ])
        .unwrap_err();

        assert!(matches!(err, TableError::Io(_)));
        assert_eq!(dir_entries(dir.path()), vec!["b.csv"]);
    }

    #[test]
    fn failed_single_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("out.csv");
        fs::create_dir(&blocked).unwrap();

        assert!(write_atomic(&blocked, b"data").is_err());
        assert_eq!(dir_entries(dir.path()), vec!["out.csv"]);
    }
}
