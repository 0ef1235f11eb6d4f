//! Time-ordered cross-validation: expanding training prefix, equal-sized
//! validation blocks taken from the end of the sample.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::regression::{DesignMatrix, FitError, Predictor, Regressor};

pub const MAX_CV_FOLDS: usize = 3;
pub const MIN_CV_FOLDS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    pub train: Range<usize>,
    pub validation: Range<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CrossValidationError {
    #[error("{n_splits} folds from {n_samples} samples; at least 2 folds are required")]
    InsufficientFolds { n_samples: usize, n_splits: usize },
    #[error("cannot cut {n_splits} folds from {n_samples} samples")]
    TooFewSamples { n_samples: usize, n_splits: usize },
}

/// Fold count used for a training set: `min(3, n_samples - 1)`.
pub fn fold_count(n_samples: usize) -> usize {
    MAX_CV_FOLDS.min(n_samples.saturating_sub(1))
}

/// Cuts `n_splits` folds. Validation blocks have `n_samples / (n_splits + 1)`
/// rows each; any remainder goes to the first training prefix.
pub fn time_series_folds(
    n_samples: usize,
    n_splits: usize,
) -> Result<Vec<Fold>, CrossValidationError> {
    if n_splits < MIN_CV_FOLDS {
        return Err(CrossValidationError::InsufficientFolds {
            n_samples,
            n_splits,
        });
    }
    if n_splits + 1 > n_samples {
        return Err(CrossValidationError::TooFewSamples {
            n_samples,
            n_splits,
        });
    }

    let block = n_samples / (n_splits + 1);
    let first_start = n_samples - n_splits * block;
    Ok((0..n_splits)
        .map(|i| {
            let start = first_start + i * block;
            Fold {
                train: 0..start,
                validation: start..start + block,
            }
        })
        .collect())
}

/// Mean over folds of the per-fold mean squared error. Any fold that fails
/// to fit or predict fails the whole score.
pub fn cross_validated_mse<R: Regressor>(
    regressor: &R,
    x: &DesignMatrix,
    y: &[f64],
    folds: &[Fold],
) -> Result<f64, FitError> {
    if x.rows() != y.len() {
        return Err(FitError::TargetLength {
            rows: x.rows(),
            targets: y.len(),
        });
    }
    if folds.is_empty() {
        return Err(FitError::EmptyDesign);
    }

    let mut total = 0.0;
    for fold in folds {
        if fold.validation.is_empty() {
            return Err(FitError::EmptyDesign);
        }
        let train_x = x.slice_rows(fold.train.start, fold.train.end);
        let model = regressor.fit(&train_x, &y[fold.train.clone()])?;

        let valid_x = x.slice_rows(fold.validation.start, fold.validation.end);
        let predictions = model.predict(&valid_x)?;
        let actual = &y[fold.validation.clone()];
        let fold_mse = predictions
            .iter()
            .zip(actual)
            .map(|(p, a)| (p - a) * (p - a))
            .sum::<f64>()
            / actual.len() as f64;
        total += fold_mse;
    }

    let mse = total / folds.len() as f64;
    if !mse.is_finite() {
        return Err(FitError::NonFinite("cross-validation score"));
    }
    Ok(mse)
}
