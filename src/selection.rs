//! Exhaustive feature-subset search scored by time-ordered cross-validation.
//!
//! Subsets are enumerated by size (1..=max_features) and, within a size, in
//! lexicographic order over the candidate list. The first subset reaching the
//! lowest error wins; later ties never replace it.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cross_validation::{
    cross_validated_mse, fold_count, time_series_folds, Fold, MIN_CV_FOLDS,
};
use crate::manifest::PairKey;
use crate::regression::{DesignMatrix, FitError, Regressor, DEFAULT_RIDGE_ALPHA};
use crate::table::{ObservationTable, TableError, LABEL_DATE_COLUMN, TARGET_COLUMN, UID_COLUMN};

const MAX_REPORTED_FAILURES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelectionConfig {
    pub max_features: usize,
    pub ridge_alpha: f64,
}

impl SelectionConfig {
    /// `max_features` has no default: callers pick the subset-size cap.
    pub fn new(max_features: usize) -> Self {
        Self {
            max_features,
            ridge_alpha: DEFAULT_RIDGE_ALPHA,
        }
    }

    pub fn validate(&self) -> Result<(), SelectionError> {
        if self.max_features == 0 {
            return Err(SelectionError::InvalidConfig(
                "max_features must be >= 1".to_string(),
            ));
        }
        if !self.ridge_alpha.is_finite() || self.ridge_alpha < 0.0 {
            return Err(SelectionError::InvalidConfig(
                "ridge_alpha must be finite and >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("invalid selection config: {0}")]
    InvalidConfig(String),
    #[error(
        "insufficient samples to cross-validate: {n_train_samples} training rows give {n_splits} folds"
    )]
    InsufficientFoldCount {
        n_train_samples: usize,
        n_splits: usize,
    },
    #[error("no viable feature subset: {evaluated} evaluated, {failed} failed")]
    NoViableSubset { evaluated: usize, failed: usize },
    #[error("table error: {0}")]
    Table(#[from] TableError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSubset {
    pub features: Vec<String>,
    pub mse: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsetFailure {
    pub features: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsetSearch {
    pub best: Option<ScoredSubset>,
    pub evaluated: usize,
    pub failed: usize,
    /// First failures only; `failed` holds the full count.
    pub failures: Vec<SubsetFailure>,
}

/// Serializable outcome of one (uid, split) selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionRecord {
    pub key: PairKey,
    pub features: Vec<String>,
    pub mse: f64,
    pub n_train_samples: usize,
    pub n_test_samples: usize,
    pub n_folds: usize,
    pub subsets_evaluated: usize,
    pub subsets_failed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionResult {
    pub record: SelectionRecord,
    /// Winning features followed by target, uid and label_date.
    pub output_columns: Vec<String>,
    pub train: ObservationTable,
    pub test: ObservationTable,
}

/// Lexicographic `k`-combinations of `0..n`.
#[derive(Debug, Clone)]
pub struct Combinations {
    n: usize,
    indices: Vec<usize>,
    started: bool,
    done: bool,
}

impl Combinations {
    pub fn new(n: usize, k: usize) -> Self {
        Self {
            n,
            indices: (0..k).collect(),
            started: false,
            done: k == 0 || k > n,
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            return Some(self.indices.clone());
        }

        let k = self.indices.len();
        let mut i = k;
        while i > 0 {
            i -= 1;
            if self.indices[i] < self.n - k + i {
                self.indices[i] += 1;
                for j in i + 1..k {
                    self.indices[j] = self.indices[j - 1] + 1;
                }
                return Some(self.indices.clone());
            }
        }

        self.done = true;
        None
    }
}

/// Number of subsets of size 1..=max_k drawn from `n` candidates.
pub fn subset_count(n: usize, max_k: usize) -> u128 {
    let mut total = 0u128;
    let mut choose = 1u128;
    for k in 1..=max_k.min(n) {
        choose = match choose.checked_mul((n - k + 1) as u128) {
            Some(product) => product / k as u128,
            None => return u128::MAX,
        };
        total = total.saturating_add(choose);
    }
    total
}

/// Scores every subset of `candidates` up to `max_features` columns and
/// keeps the lowest cross-validated MSE.
///
/// `columns[i]` holds the training values of `candidates[i]`, aligned with
/// `targets`. Subsets that fail to fit are counted and skipped.
pub fn search_best_subset<R: Regressor>(
    candidates: &[String],
    columns: &[Vec<Option<f64>>],
    targets: &[f64],
    max_features: usize,
    regressor: &R,
) -> Result<SubsetSearch, SelectionError> {
    let n_samples = targets.len();
    let n_splits = fold_count(n_samples);
    let folds = time_series_folds(n_samples, n_splits).map_err(|_| {
        SelectionError::InsufficientFoldCount {
            n_train_samples: n_samples,
            n_splits,
        }
    })?;

    let mut search = SubsetSearch {
        best: None,
        evaluated: 0,
        failed: 0,
        failures: Vec::new(),
    };

    for k in 1..=max_features.min(candidates.len()) {
        for combo in Combinations::new(candidates.len(), k) {
            search.evaluated += 1;
            match score_subset(candidates, columns, targets, &combo, &folds, regressor) {
                Ok(mse) => {
                    let improves = search.best.as_ref().map_or(true, |best| mse < best.mse);
                    if improves {
                        search.best = Some(ScoredSubset {
                            features: combo.iter().map(|&i| candidates[i].clone()).collect(),
                            mse,
                        });
                    }
                }
                Err(err) => {
                    let features: Vec<String> =
                        combo.iter().map(|&i| candidates[i].clone()).collect();
                    warn!(
                        component = "selection",
                        event = "selection.subset.failed",
                        features = ?features,
                        error = %err
                    );
                    search.failed += 1;
                    if search.failures.len() < MAX_REPORTED_FAILURES {
                        search.failures.push(SubsetFailure {
                            features,
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }
        debug!(
            component = "selection",
            event = "selection.size.finish",
            k = k,
            evaluated = search.evaluated,
            best_mse = ?search.best.as_ref().map(|b| b.mse)
        );
    }

    Ok(search)
}

/// Selects the best subset for one (uid, split) pair. Training rows are
/// re-sorted by `label_date`; the test rows never enter scoring.
pub fn select_best_subset<R: Regressor>(
    key: &PairKey,
    mut train: ObservationTable,
    test: ObservationTable,
    candidates: &[String],
    cfg: &SelectionConfig,
    regressor: &R,
) -> Result<SelectionResult, SelectionError> {
    cfg.validate()?;
    train.sort_by_label_date();

    let n_train_samples = train.len();
    let n_folds = fold_count(n_train_samples);
    if n_folds < MIN_CV_FOLDS {
        return Err(SelectionError::InsufficientFoldCount {
            n_train_samples,
            n_splits: n_folds,
        });
    }

    let columns = candidates
        .iter()
        .map(|name| train.numeric_column(name))
        .collect::<Result<Vec<_>, _>>()?;
    let targets = train.targets();

    info!(
        component = "selection",
        event = "selection.pair.start",
        uid = %key.uid,
        split = key.split,
        n_train_samples = n_train_samples,
        n_folds = n_folds,
        candidates = candidates.len(),
        max_features = cfg.max_features,
        subsets = %subset_count(candidates.len(), cfg.max_features)
    );

    let search = search_best_subset(candidates, &columns, &targets, cfg.max_features, regressor)?;
    let Some(best) = search.best else {
        return Err(SelectionError::NoViableSubset {
            evaluated: search.evaluated,
            failed: search.failed,
        });
    };

    let mut output_columns = best.features.clone();
    output_columns.extend(
        [TARGET_COLUMN, UID_COLUMN, LABEL_DATE_COLUMN]
            .iter()
            .map(|c| c.to_string()),
    );
    if let Some(missing) = output_columns
        .iter()
        .find(|column| test.column_index(column).is_none())
    {
        return Err(SelectionError::Table(TableError::MissingColumn(
            missing.clone(),
        )));
    }

    info!(
        component = "selection",
        event = "selection.pair.selected",
        uid = %key.uid,
        split = key.split,
        features = ?best.features,
        mse = best.mse,
        evaluated = search.evaluated,
        failed = search.failed
    );

    Ok(SelectionResult {
        record: SelectionRecord {
            key: key.clone(),
            features: best.features,
            mse: best.mse,
            n_train_samples,
            n_test_samples: test.len(),
            n_folds,
            subsets_evaluated: search.evaluated,
            subsets_failed: search.failed,
        },
        output_columns,
        train,
        test,
    })
}

fn score_subset<R: Regressor>(
    candidates: &[String],
    columns: &[Vec<Option<f64>>],
    targets: &[f64],
    combo: &[usize],
    folds: &[Fold],
    regressor: &R,
) -> Result<f64, FitError> {
    let names: Vec<&str> = combo.iter().map(|&i| candidates[i].as_str()).collect();
    let selected: Vec<&[Option<f64>]> = combo.iter().map(|&i| columns[i].as_slice()).collect();
    let x = DesignMatrix::from_columns(&names, &selected, 0..targets.len())?;
    cross_validated_mse(regressor, &x, targets, folds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regression::{Predictor, RidgeRegression};
    use std::collections::HashMap;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    /// Scores each subset from a fixed table keyed by its column values.
    struct FixedScores {
        by_first_value: HashMap<Vec<u64>, f64>,
    }

    struct FixedModel(f64);

    impl Predictor for FixedModel {
        fn predict(&self, x: &DesignMatrix) -> Result<Vec<f64>, FitError> {
            Ok(vec![self.0; x.rows()])
        }
    }

    impl Regressor for FixedScores {
        type Model = FixedModel;

        fn fit(&self, x: &DesignMatrix, _y: &[f64]) -> Result<FixedModel, FitError> {
            let signature: Vec<u64> = x.row(0).iter().map(|v| *v as u64).collect();
            let error = self
                .by_first_value
                .get(&signature)
                .copied()
                .ok_or(FitError::Singular)?;
            // Targets are all zero, so predicting sqrt(error) scores `error`.
            Ok(FixedModel(error.sqrt()))
        }
    }

    #[test]
    fn combinations_are_lexicographic() {
        let all: Vec<Vec<usize>> = Combinations::new(4, 2).collect();
        assert_eq!(
            all,
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![0, 3],
                vec![1, 2],
                vec![1, 3],
                vec![2, 3]
            ]
        );
        assert_eq!(Combinations::new(3, 3).count(), 1);
        assert_eq!(Combinations::new(2, 3).count(), 0);
        assert_eq!(Combinations::new(3, 0).count(), 0);
    }

    #[test]
    fn subset_count_sums_binomials() {
        assert_eq!(subset_count(3, 2), 6);
        assert_eq!(subset_count(5, 5), 31);
        assert_eq!(subset_count(4, 10), 15);
        assert_eq!(subset_count(200, 3), 200 + 19_900 + 1_313_400);
    }

    #[test]
    fn subset_count_saturates_for_wide_searches() {
        assert_eq!(subset_count(130, 65), u128::MAX);
        assert_eq!(subset_count(400, 400), u128::MAX);
    }

    #[test]
    fn first_subset_wins_exact_ties() {
        // A=1, B=2, C=3 identify the columns in the first row of each fit.
        let candidates = names(&["A", "B", "C"]);
        let columns = vec![
            vec![Some(1.0); 4],
            vec![Some(2.0); 4],
            vec![Some(3.0); 4],
        ];
        let targets = vec![0.0; 4];
        let regressor = FixedScores {
            by_first_value: HashMap::from([
                (vec![1], 0.5),
                (vec![2], 0.9),
                (vec![3], 0.7),
                (vec![1, 2], 0.6),
                (vec![1, 3], 0.8),
                (vec![2, 3], 0.5),
            ]),
        };

        let search = search_best_subset(&candidates, &columns, &targets, 2, &regressor).unwrap();

        assert_eq!(search.evaluated, 6);
        assert_eq!(search.failed, 0);
        let best = search.best.unwrap();
        assert_eq!(best.features, names(&["A"]));
        assert!((best.mse - 0.5).abs() < 1e-12);
    }

    #[test]
    fn failing_subsets_are_skipped_not_fatal() {
        let candidates = names(&["A", "B"]);
        let columns = vec![vec![Some(1.0); 3], vec![Some(2.0); 3]];
        let regressor = FixedScores {
            by_first_value: HashMap::from([(vec![2], 0.25)]),
        };

        let search =
            search_best_subset(&candidates, &columns, &[0.0, 0.0, 0.0], 2, &regressor).unwrap();

        assert_eq!(search.evaluated, 3);
        assert_eq!(search.failed, 2);
        assert_eq!(search.failures[0].features, names(&["A"]));
        assert_eq!(search.best.unwrap().features, names(&["B"]));
    }

    #[test]
    fn missing_values_fail_only_their_subsets() {
        let candidates = names(&["gappy", "steady"]);
        let columns = vec![
            vec![Some(1.0), None, Some(3.0), Some(4.0)],
            vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)],
        ];
        let targets = [1.0, 2.0, 3.0, 4.0];

        let search = search_best_subset(
            &candidates,
            &columns,
            &targets,
            2,
            &RidgeRegression::default(),
        )
        .unwrap();

        assert_eq!(search.evaluated, 3);
        assert_eq!(search.failed, 2);
        assert_eq!(search.best.unwrap().features, names(&["steady"]));
    }

    #[test]
    fn two_training_rows_are_refused_before_scoring() {
        let candidates = names(&["A"]);
        let columns = vec![vec![Some(1.0), Some(2.0)]];
        let err = search_best_subset(
            &candidates,
            &columns,
            &[1.0, 2.0],
            1,
            &RidgeRegression::default(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            SelectionError::InsufficientFoldCount {
                n_train_samples: 2,
                n_splits: 1
            }
        ));
    }

    #[test]
    fn zero_max_features_is_invalid() {
        assert!(SelectionConfig::new(0).validate().is_err());
        assert!(SelectionConfig::new(5).validate().is_ok());
    }

    fn table(csv: &str) -> ObservationTable {
        ObservationTable::from_reader(csv.as_bytes()).unwrap()
    }

    #[test]
    fn all_failing_subsets_leave_no_viable_subset() {
        let train = table(
            "uid,label_date,sleep_quality,light\n\
             1,2025-03-01,2,\n\
             1,2025-03-02,3,\n\
             1,2025-03-03,4,\n\
             1,2025-03-04,5,\n",
        );
        let test = table("uid,label_date,sleep_quality,light\n1,2025-03-05,6,\n");
        let candidates = train.feature_columns().to_vec();
        assert_eq!(candidates, names(&["light"]));

        let err = select_best_subset(
            &PairKey::new("1", 0),
            train,
            test,
            &candidates,
            &SelectionConfig::new(3),
            &RidgeRegression::default(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            SelectionError::NoViableSubset {
                evaluated: 1,
                failed: 1
            }
        ));
    }

    #[test]
    fn no_numeric_candidates_evaluates_nothing() {
        let train = table(
            "uid,label_date,sleep_quality,note\n\
             1,2025-03-01,2,a\n\
             1,2025-03-02,3,b\n\
             1,2025-03-03,4,c\n",
        );
        let test = table("uid,label_date,sleep_quality,note\n1,2025-03-04,5,d\n");
        assert!(train.feature_columns().is_empty());

        let err = select_best_subset(
            &PairKey::new("1", 0),
            train,
            test,
            &[],
            &SelectionConfig::new(2),
            &RidgeRegression::default(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            SelectionError::NoViableSubset {
                evaluated: 0,
                failed: 0
            }
        ));
    }
}
