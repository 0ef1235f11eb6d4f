//! Linear scoring models used by the subset search.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const PIVOT_EPSILON: f64 = 1e-12;

pub const DEFAULT_RIDGE_ALPHA: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("design matrix has no rows")]
    EmptyDesign,
    #[error("dimension mismatch: {rows} rows but {targets} targets")]
    TargetLength { rows: usize, targets: usize },
    #[error("model expects {expected} features, got {actual}")]
    FeatureCount { expected: usize, actual: usize },
    #[error("feature '{column}' has a missing value at row {row}")]
    MissingValue { column: String, row: usize },
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
    #[error("normal equations are singular")]
    Singular,
}

/// Row-major `rows x cols` matrix of feature values.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl DesignMatrix {
    /// Builds a matrix from feature columns. Every column must have `rows`
    /// values and no missing entries.
    pub fn from_columns(
        names: &[&str],
        columns: &[&[Option<f64>]],
        rows: Range<usize>,
    ) -> Result<Self, FitError> {
        let n_rows = rows.len();
        let n_cols = columns.len();
        let mut data = Vec::with_capacity(n_rows * n_cols);
        for row in rows {
            for (col, values) in columns.iter().enumerate() {
                match values.get(row).copied().flatten() {
                    Some(value) if value.is_finite() => data.push(value),
                    Some(_) => return Err(FitError::NonFinite("design matrix")),
                    None => {
                        return Err(FitError::MissingValue {
                            column: names.get(col).copied().unwrap_or("?").to_string(),
                            row,
                        })
                    }
                }
            }
        }
        Ok(Self {
            rows: n_rows,
            cols: n_cols,
            data,
        })
    }

    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, FitError> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            if row.len() != cols {
                return Err(FitError::FeatureCount {
                    expected: cols,
                    actual: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, idx: usize) -> &[f64] {
        &self.data[idx * self.cols..(idx + 1) * self.cols]
    }

    /// Copies the contiguous row block `start..end`.
    pub fn slice_rows(&self, start: usize, end: usize) -> Self {
        Self {
            rows: end - start,
            cols: self.cols,
            data: self.data[start * self.cols..end * self.cols].to_vec(),
        }
    }
}

pub trait Regressor {
    type Model: Predictor;

    fn fit(&self, x: &DesignMatrix, y: &[f64]) -> Result<Self::Model, FitError>;
}

pub trait Predictor {
    fn predict(&self, x: &DesignMatrix) -> Result<Vec<f64>, FitError>;
}

/// L2-penalized least squares with an unpenalized intercept.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RidgeRegression {
    pub alpha: f64,
}

impl Default for RidgeRegression {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_RIDGE_ALPHA,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl Regressor for RidgeRegression {
    type Model = LinearModel;

    fn fit(&self, x: &DesignMatrix, y: &[f64]) -> Result<LinearModel, FitError> {
        if x.rows == 0 {
            return Err(FitError::EmptyDesign);
        }
        if x.rows != y.len() {
            return Err(FitError::TargetLength {
                rows: x.rows,
                targets: y.len(),
            });
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(FitError::NonFinite("target"));
        }
        if !self.alpha.is_finite() || self.alpha < 0.0 {
            return Err(FitError::NonFinite("alpha"));
        }

        let n = x.rows as f64;
        let p = x.cols;
        let y_mean = y.iter().sum::<f64>() / n;
        let mut x_mean = vec![0.0; p];
        for i in 0..x.rows {
            for (mean, value) in x_mean.iter_mut().zip(x.row(i)) {
                *mean += value / n;
            }
        }

        // Normal equations on centered data: (Xc'Xc + alpha*I) w = Xc'yc.
        let mut gram = vec![vec![0.0; p]; p];
        let mut rhs = vec![0.0; p];
        for i in 0..x.rows {
            let row = x.row(i);
            let yc = y[i] - y_mean;
            for a in 0..p {
                let xa = row[a] - x_mean[a];
                rhs[a] += xa * yc;
                for b in a..p {
                    gram[a][b] += xa * (row[b] - x_mean[b]);
                }
            }
        }
        for a in 0..p {
            for b in 0..a {
                gram[a][b] = gram[b][a];
            }
            gram[a][a] += self.alpha;
        }

        let coefficients = solve_linear_system(gram, rhs)?;
        let intercept = y_mean
            - x_mean
                .iter()
                .zip(&coefficients)
                .map(|(m, w)| m * w)
                .sum::<f64>();
        if !intercept.is_finite() || coefficients.iter().any(|w| !w.is_finite()) {
            return Err(FitError::NonFinite("coefficients"));
        }

        Ok(LinearModel {
            intercept,
            coefficients,
        })
    }
}

impl Predictor for LinearModel {
    fn predict(&self, x: &DesignMatrix) -> Result<Vec<f64>, FitError> {
        if x.cols != self.coefficients.len() {
            return Err(FitError::FeatureCount {
                expected: self.coefficients.len(),
                actual: x.cols,
            });
        }
        Ok((0..x.rows)
            .map(|i| {
                self.intercept
                    + x.row(i)
                        .iter()
                        .zip(&self.coefficients)
                        .map(|(v, w)| v * w)
                        .sum::<f64>()
            })
            .collect())
    }
}

/// Gaussian elimination with partial pivoting.
fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>, FitError> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < PIVOT_EPSILON {
            return Err(FitError::Singular);
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let tail = (i + 1..n).map(|j| a[i][j] * x[j]).sum::<f64>();
        x[i] = (b[i] - tail) / a[i][i];
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn zero_alpha_recovers_exact_linear_relation() {
        let x = DesignMatrix::from_rows(&[vec![1.0], vec![2.0], vec![3.0], vec![4.0]]).unwrap();
        let y = [3.0, 5.0, 7.0, 9.0];
        let model = RidgeRegression { alpha: 0.0 }.fit(&x, &y).unwrap();

        assert_close(model.coefficients[0], 2.0);
        assert_close(model.intercept, 1.0);
    }

    #[test]
    fn ridge_shrinks_the_slope() {
        // Centered x = [-1, 0, 1], sum x^2 = 2, sum xy = 4 -> w = 4 / (2 + 1).
        let x = DesignMatrix::from_rows(&[vec![1.0], vec![2.0], vec![3.0]]).unwrap();
        let y = [1.0, 3.0, 5.0];
        let model = RidgeRegression::default().fit(&x, &y).unwrap();

        assert_close(model.coefficients[0], 4.0 / 3.0);
        assert_close(model.intercept, 3.0 - 2.0 * 4.0 / 3.0);
    }

    #[test]
    fn single_row_fit_predicts_the_mean() {
        let x = DesignMatrix::from_rows(&[vec![5.0, -2.0]]).unwrap();
        let model = RidgeRegression::default().fit(&x, &[4.0]).unwrap();
        let probe = DesignMatrix::from_rows(&[vec![100.0, 7.0]]).unwrap();

        assert_eq!(model.predict(&probe).unwrap(), vec![4.0]);
    }

    #[test]
    fn collinear_columns_without_penalty_are_singular() {
        let x = DesignMatrix::from_rows(&[vec![1.0, 2.0], vec![2.0, 4.0], vec![3.0, 6.0]])
            .unwrap();
        let err = RidgeRegression { alpha: 0.0 }
            .fit(&x, &[1.0, 2.0, 3.0])
            .unwrap_err();
        assert_eq!(err, FitError::Singular);
    }

    #[test]
    fn missing_feature_value_is_reported() {
        let a = [Some(1.0), None, Some(3.0)];
        let err = DesignMatrix::from_columns(&["steps"], &[&a], 0..3)
            .unwrap_err();
        assert_eq!(
            err,
            FitError::MissingValue {
                column: "steps".to_string(),
                row: 1
            }
        );
    }
}
