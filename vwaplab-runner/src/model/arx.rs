//! ARX: the target regressed on its own recent values plus the day's
//! features, with the lag order chosen by AIC.
//!
//! All candidate orders are scored on the same sample (the rows after the
//! largest feasible lag) so their AICs are comparable. The chosen order is
//! then refitted on every row it can use. Lagged targets come only from
//! the training window: the forecast for the test day uses the last `p`
//! training targets.

use tracing::trace;

use super::ols::{informative_columns, OlsFit};
use super::{
    check_test, check_training, finite, FitFailure, FittedModel, ForecastModel,
    ModelDiagnostics, PredictionFailure, TestRow, TrainingRow,
};

#[derive(Debug, Clone, Copy)]
pub struct Arx {
    max_lags: usize,
}

impl Arx {
    pub fn new(max_lags: usize) -> Self {
        Self {
            max_lags: max_lags.max(1),
        }
    }

    pub fn max_lags(&self) -> usize {
        self.max_lags
    }
}

impl Default for Arx {
    fn default() -> Self {
        Self::new(3)
    }
}

struct FittedArx {
    width: usize,
    columns: Vec<usize>,
    /// Most recent first: y_{t-1}, y_{t-2}, …
    lags: Vec<f64>,
    fit: OlsFit,
}

/// Restate a design-column failure in terms of the configured features.
/// Design columns are the `p` lags followed by `columns`.
fn feature_failure(err: FitFailure, p: usize, columns: &[usize]) -> FitFailure {
    match err {
        FitFailure::DegenerateFeature { index } if index < p => FitFailure::Other {
            message: format!("target lag {} has no variance", index + 1),
        },
        FitFailure::DegenerateFeature { index } => FitFailure::DegenerateFeature {
            index: columns[index - p],
        },
        other => other,
    }
}

/// Regressor rows for lag order `p`, over targets `start..n`.
fn lagged_design(rows: &[TrainingRow], columns: &[usize], p: usize, start: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
    (start..rows.len())
        .map(|t| {
            let x: Vec<f64> = (1..=p)
                .map(|l| rows[t - l].target)
                .chain(columns.iter().map(|&j| rows[t].features[j]))
                .collect();
            (x, rows[t].target)
        })
        .unzip()
}

impl ForecastModel for Arx {
    fn name(&self) -> &'static str {
        "arx"
    }

    fn fit(&self, rows: &[TrainingRow]) -> Result<Box<dyn FittedModel>, FitFailure> {
        let width = check_training(rows)?;
        let n = rows.len();
        let k = informative_columns(rows).len();

        // Order p leaves n - p observations for p + k + 1 parameters, and
        // OlsFit needs one spare degree of freedom.
        let feasible = |p: usize| n >= p && n - p >= p + k + 2;
        let p_hi = (1..=self.max_lags).rev().find(|&p| feasible(p)).ok_or(
            FitFailure::InsufficientRows {
                have: n,
                need: k + 4,
            },
        )?;

        // Columns are judged on the common sample. A column that varies only
        // in the first p_hi rows is constant there and is dropped; the set
        // can only shrink, so p_hi stays feasible.
        let columns = informative_columns(&rows[p_hi..]);

        let mut best: Option<(usize, f64)> = None;
        let mut first_err = None;
        for p in 1..=p_hi {
            let (x, y) = lagged_design(rows, &columns, p, p_hi);
            match OlsFit::fit(&x, &y) {
                Ok(fit) => {
                    let aic = fit.aic();
                    trace!(p, aic, "arx candidate order");
                    if best.map_or(true, |(_, b)| aic < b) {
                        best = Some((p, aic));
                    }
                }
                Err(e) => {
                    first_err.get_or_insert(feature_failure(e, p, &columns));
                }
            }
        }
        let Some((p, _)) = best else {
            return Err(first_err.unwrap_or(FitFailure::Singular));
        };

        let (x, y) = lagged_design(rows, &columns, p, p);
        let fit = OlsFit::fit(&x, &y).map_err(|e| feature_failure(e, p, &columns))?;
        let lags = (1..=p).map(|l| rows[n - l].target).collect();

        Ok(Box::new(FittedArx {
            width,
            columns,
            lags,
            fit,
        }))
    }
}

impl FittedModel for FittedArx {
    fn predict(&self, row: &TestRow) -> Result<f64, PredictionFailure> {
        check_test(row, self.width)?;
        let x: Vec<f64> = self
            .lags
            .iter()
            .copied()
            .chain(self.columns.iter().map(|&j| row.features[j]))
            .collect();
        finite(self.fit.predict(&x))
    }

    fn diagnostics(&self) -> ModelDiagnostics {
        let (intercept, coefficients) = self.fit.coefficients();
        ModelDiagnostics {
            model: "arx".into(),
            selected: self.columns.clone(),
            lag_order: Some(self.lags.len()),
            intercept: Some(intercept),
            coefficients,
            aic: Some(self.fit.aic()),
        }
    }
}
