//! Ordinary least squares on standardized columns.
//!
//! Columns are centered and scaled by their sample standard deviation; the
//! target is centered, so the intercept is the target mean and only the
//! slope system (ZᵀZ)β = Zᵀ(y − ȳ) is solved, by Gaussian elimination with
//! partial pivoting.

use super::{FitFailure, TrainingRow};

/// Relative threshold below which a column is treated as constant.
const DEGENERATE_TOL: f64 = 1e-12;
/// Relative pivot threshold for declaring the system singular.
const PIVOT_TOL: f64 = 1e-10;

/// A fitted least-squares model.
#[derive(Debug, Clone, PartialEq)]
pub struct OlsFit {
    y_mean: f64,
    means: Vec<f64>,
    stds: Vec<f64>,
    /// Slopes in standardized units.
    beta: Vec<f64>,
    rss: f64,
    n: usize,
}

impl OlsFit {
    /// Fit `y ~ 1 + x`. Each row of `x` must have the same width.
    ///
    /// Requires at least `k + 2` observations so the residual variance has
    /// one degree of freedom.
    pub fn fit(x: &[Vec<f64>], y: &[f64]) -> Result<Self, FitFailure> {
        let n = y.len();
        let k = x.first().map_or(0, Vec::len);
        if n != x.len() {
            return Err(FitFailure::Other {
                message: format!("{} design rows for {n} targets", x.len()),
            });
        }
        if n < k + 2 {
            return Err(FitFailure::InsufficientRows { have: n, need: k + 2 });
        }
        if y.iter().chain(x.iter().flatten()).any(|v| !v.is_finite()) {
            return Err(FitFailure::NonFinite);
        }

        let nf = n as f64;
        let y_mean = y.iter().sum::<f64>() / nf;
        let mut means = Vec::with_capacity(k);
        let mut stds = Vec::with_capacity(k);
        for j in 0..k {
            let (mean, std) = column_moments(x, j);
            if std <= DEGENERATE_TOL * mean.abs().max(1.0) {
                return Err(FitFailure::DegenerateFeature { index: j });
            }
            means.push(mean);
            stds.push(std);
        }

        let z: Vec<Vec<f64>> = x
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(j, v)| (v - means[j]) / stds[j])
                    .collect()
            })
            .collect();
        let yc: Vec<f64> = y.iter().map(|v| v - y_mean).collect();

        let mut a = vec![vec![0.0; k]; k];
        let mut b = vec![0.0; k];
        for (zi, yi) in z.iter().zip(&yc) {
            for r in 0..k {
                b[r] += zi[r] * yi;
                for c in r..k {
                    a[r][c] += zi[r] * zi[c];
                }
            }
        }
        for r in 0..k {
            for c in 0..r {
                a[r][c] = a[c][r];
            }
        }

        let beta = solve(a, b, PIVOT_TOL * nf).ok_or(FitFailure::Singular)?;

        let rss = z
            .iter()
            .zip(&yc)
            .map(|(zi, yi)| {
                let fitted: f64 = zi.iter().zip(&beta).map(|(a, b)| a * b).sum();
                (yi - fitted).powi(2)
            })
            .sum();

        Ok(Self {
            y_mean,
            means,
            stds,
            beta,
            rss,
            n,
        })
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        self.y_mean
            + x.iter()
                .zip(&self.means)
                .zip(&self.stds)
                .zip(&self.beta)
                .map(|(((v, m), s), b)| (v - m) / s * b)
                .sum::<f64>()
    }

    /// Number of regressors, excluding the intercept.
    pub fn width(&self) -> usize {
        self.beta.len()
    }

    pub fn rss(&self) -> f64 {
        self.rss
    }

    /// AIC = n·ln(RSS/n) + 2k, k counting the intercept.
    pub fn aic(&self) -> f64 {
        let n = self.n as f64;
        n * (self.rss / n).max(f64::MIN_POSITIVE).ln() + 2.0 * (self.width() + 1) as f64
    }

    /// Intercept and slopes in original units.
    pub fn coefficients(&self) -> (f64, Vec<f64>) {
        let slopes: Vec<f64> = self
            .beta
            .iter()
            .zip(&self.stds)
            .map(|(b, s)| b / s)
            .collect();
        let intercept = self.y_mean
            - slopes
                .iter()
                .zip(&self.means)
                .map(|(c, m)| c * m)
                .sum::<f64>();
        (intercept, slopes)
    }
}

/// Mean and sample standard deviation of column `j`.
fn column_moments(x: &[Vec<f64>], j: usize) -> (f64, f64) {
    let n = x.len() as f64;
    let mean = x.iter().map(|r| r[j]).sum::<f64>() / n;
    let var = x.iter().map(|r| (r[j] - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

/// Columns of the training features whose values are not constant.
pub(crate) fn informative_columns(rows: &[TrainingRow]) -> Vec<usize> {
    let k = rows.first().map_or(0, |r| r.features.len());
    if rows.len() < 2 {
        return Vec::new();
    }
    let x: Vec<Vec<f64>> = rows.iter().map(|r| r.features.clone()).collect();
    (0..k)
        .filter(|&j| {
            let (mean, std) = column_moments(&x, j);
            std > DEGENERATE_TOL * mean.abs().max(1.0)
        })
        .collect()
}

/// Design matrix restricted to `cols`.
pub(crate) fn design(rows: &[TrainingRow], cols: &[usize]) -> Vec<Vec<f64>> {
    rows.iter()
        .map(|r| cols.iter().map(|&j| r.features[j]).collect())
        .collect()
}

/// Solve `a·x = b` in place by Gaussian elimination with partial pivoting.
/// Returns `None` when a pivot falls below `tol`.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>, tol: f64) -> Option<Vec<f64>> {
    let k = b.len();
    for col in 0..k {
        let pivot = (col..k).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < tol {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..k {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for c in col..k {
                a[row][c] -= factor * a[col][c];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; k];
    for row in (0..k).rev() {
        let tail: f64 = (row + 1..k).map(|c| a[row][c] * x[c]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}
