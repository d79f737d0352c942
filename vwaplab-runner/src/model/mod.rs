//! Model capability — the seam between the walk-forward engine and estimators.
//!
//! The engine only ever sees [`ForecastModel`] and [`FittedModel`]. Every
//! call to `fit` is independent: a model keeps no state between windows, and
//! the engine refits on every test day. Failures are tagged values, never
//! panics, so a bad window yields a record with a null prediction.
//!
//! Reference estimators:
//! - [`Persistence`]: last training target (naive baseline)
//! - [`LinearRegression`]: OLS with intercept on standardized features
//! - [`StepwiseRegression`]: bidirectional AIC-driven feature selection
//! - [`Arx`]: autoregressive with exogenous regressors, lag order by AIC

mod arx;
mod linear;
mod ols;
mod persistence;
mod stepwise;

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use arx::Arx;
pub use linear::LinearRegression;
pub use ols::OlsFit;
pub use persistence::Persistence;
pub use stepwise::StepwiseRegression;

// ─── Rows ────────────────────────────────────────────────────────────

/// One day of the training window: model inputs and the realized target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRow {
    pub date: NaiveDate,
    pub features: Vec<f64>,
    pub target: f64,
}

/// The day being forecast. Carries no target, so a model cannot see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRow {
    pub date: NaiveDate,
    pub features: Vec<f64>,
}

// ─── Failures ────────────────────────────────────────────────────────

/// Why a model could not be fitted on a training window.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FitFailure {
    #[error("insufficient training rows: have {have}, need {need}")]
    InsufficientRows { have: usize, need: usize },
    #[error("feature {index} has no variance in the training window")]
    DegenerateFeature { index: usize },
    #[error("normal equations are singular")]
    Singular,
    #[error("non-finite value in training data")]
    NonFinite,
    #[error("fit did not finish within {deadline_ms} ms")]
    DeadlineExceeded { deadline_ms: u64 },
    #[error("{message}")]
    Other { message: String },
}

impl FitFailure {
    /// Stable label for counting.
    pub fn kind(&self) -> &'static str {
        match self {
            FitFailure::InsufficientRows { .. } => "insufficient_rows",
            FitFailure::DegenerateFeature { .. } => "degenerate_feature",
            FitFailure::Singular => "singular",
            FitFailure::NonFinite => "non_finite",
            FitFailure::DeadlineExceeded { .. } => "deadline_exceeded",
            FitFailure::Other { .. } => "other",
        }
    }
}

/// Why a fitted model could not forecast the test day.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictionFailure {
    #[error("expected {expected} features, got {got}")]
    FeatureCountMismatch { expected: usize, got: usize },
    #[error("non-finite input or forecast")]
    NonFinite,
    #[error("feature {feature} is undefined on the test day")]
    MissingFeature { feature: String },
}

impl PredictionFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            PredictionFailure::FeatureCountMismatch { .. } => "feature_count_mismatch",
            PredictionFailure::NonFinite => "non_finite",
            PredictionFailure::MissingFeature { .. } => "missing_feature",
        }
    }
}

// ─── Capability traits ───────────────────────────────────────────────

/// What a fitted model reports about itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDiagnostics {
    pub model: String,
    /// Indices (into the configured feature list) the model actually uses.
    pub selected: Vec<usize>,
    /// Autoregressive order, for models that have one.
    pub lag_order: Option<usize>,
    /// Intercept in original units.
    pub intercept: Option<f64>,
    /// Coefficients in original units: lags first (if any), then `selected`.
    pub coefficients: Vec<f64>,
    pub aic: Option<f64>,
}

/// An estimator that can be fitted on a training window.
pub trait ForecastModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fit a fresh model on `rows` (chronological, oldest first).
    fn fit(&self, rows: &[TrainingRow]) -> Result<Box<dyn FittedModel>, FitFailure>;
}

/// The product of a successful fit.
pub trait FittedModel: Send + Sync {
    fn predict(&self, row: &TestRow) -> Result<f64, PredictionFailure>;

    fn diagnostics(&self) -> ModelDiagnostics;
}

// ─── Configuration ───────────────────────────────────────────────────

fn default_max_lags() -> usize {
    3
}

/// `[model]` section of the backtest config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelSpec {
    Persistence,
    #[default]
    Linear,
    Stepwise,
    Arx {
        #[serde(default = "default_max_lags")]
        max_lags: usize,
    },
}

impl ModelSpec {
    pub fn build(&self) -> Arc<dyn ForecastModel> {
        match self {
            ModelSpec::Persistence => Arc::new(Persistence),
            ModelSpec::Linear => Arc::new(LinearRegression),
            ModelSpec::Stepwise => Arc::new(StepwiseRegression),
            ModelSpec::Arx { max_lags } => Arc::new(Arx::new(*max_lags)),
        }
    }
}

// ─── Shared helpers ──────────────────────────────────────────────────

/// Check that every row has `k` finite features and a finite target.
pub(crate) fn check_training(rows: &[TrainingRow]) -> Result<usize, FitFailure> {
    let k = rows.first().map_or(0, |r| r.features.len());
    for row in rows {
        if row.features.len() != k {
            return Err(FitFailure::Other {
                message: format!(
                    "row {} has {} features, expected {k}",
                    row.date,
                    row.features.len()
                ),
            });
        }
        if !row.target.is_finite() || row.features.iter().any(|x| !x.is_finite()) {
            return Err(FitFailure::NonFinite);
        }
    }
    Ok(k)
}

/// Check a test row against the fitted feature count.
pub(crate) fn check_test(row: &TestRow, expected: usize) -> Result<(), PredictionFailure> {
    if row.features.len() != expected {
        return Err(PredictionFailure::FeatureCountMismatch {
            expected,
            got: row.features.len(),
        });
    }
    if row.features.iter().any(|x| !x.is_finite()) {
        return Err(PredictionFailure::NonFinite);
    }
    Ok(())
}

pub(crate) fn finite(value: f64) -> Result<f64, PredictionFailure> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PredictionFailure::NonFinite)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_spec_parses_tagged_toml() {
        let spec: ModelSpec = toml::from_str("type = \"arx\"\nmax_lags = 5").unwrap();
        assert_eq!(spec, ModelSpec::Arx { max_lags: 5 });

        let spec: ModelSpec = toml::from_str("type = \"arx\"").unwrap();
        assert_eq!(spec, ModelSpec::Arx { max_lags: 3 });

        let spec: ModelSpec = toml::from_str("type = \"persistence\"").unwrap();
        assert_eq!(spec.build().name(), "persistence");

        assert!(toml::from_str::<ModelSpec>("type = \"arima\"").is_err());
    }

    #[test]
    fn failure_kinds_are_stable() {
        assert_eq!(FitFailure::Singular.kind(), "singular");
        assert_eq!(
            FitFailure::DeadlineExceeded { deadline_ms: 5 }.to_string(),
            "fit did not finish within 5 ms"
        );
        assert_eq!(
            PredictionFailure::FeatureCountMismatch { expected: 2, got: 3 }.kind(),
            "feature_count_mismatch"
        );
    }

    #[test]
    fn check_training_rejects_non_finite() {
        let mut rows = test_rows::linear_rows(4, &[1.0], 0.0);
        assert_eq!(check_training(&rows), Ok(1));
        rows[2].target = f64::NAN;
        assert_eq!(check_training(&rows), Err(FitFailure::NonFinite));
    }
}
