//! Walk-forward backtest — rolling-window refit and one-day-ahead forecast.
//!
//! For each test day i ≥ N the model is fitted from scratch on days
//! [i−N, i−1] and asked to forecast day i from day i's features alone.
//! Every test day yields exactly one [`ForecastRecord`]:
//!
//! ```text
//! WINDOW_READY → FITTING → FIT_OK → PREDICTING → RECORDED
//!                        ↘ FIT_FAILED ───────────→ RECORDED (predicted = null)
//! ```
//!
//! There are no retries. Iterations share nothing, so they may run in
//! parallel; results are always returned in chronological order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use vwaplab_core::domain::{DailyFeatureVector, FeatureName, TargetKind};

use crate::model::{
    FitFailure, FittedModel, ForecastModel, ModelDiagnostics, PredictionFailure, TestRow,
    TrainingRow,
};

// ─── Configuration ───────────────────────────────────────────────────

fn default_window() -> usize {
    21
}

/// `[backtest]` section: window length, target, and model inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    /// Training window length N in days (default 21).
    #[serde(default = "default_window")]
    pub window: usize,
    #[serde(default)]
    pub target: TargetKind,
    /// Model inputs, in the column order the model sees.
    #[serde(default = "FeatureName::default_set")]
    pub features: Vec<FeatureName>,
    /// Evaluate windows on the rayon pool.
    #[serde(default)]
    pub parallel: bool,
    /// Abandon a fit that runs longer than this.
    #[serde(default)]
    pub fit_deadline_ms: Option<u64>,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            target: TargetKind::default(),
            features: FeatureName::default_set(),
            parallel: false,
            fit_deadline_ms: None,
        }
    }
}

// ─── Windows ─────────────────────────────────────────────────────────

/// Index ranges of one iteration: train on `train_start..test_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub train_start: usize,
    /// Exclusive; always equal to `test_index`.
    pub train_end: usize,
    pub test_index: usize,
}

/// All windows for `n_days` daily rows and a window of `window` days.
///
/// Empty when `window` is zero or fewer than `window + 1` days exist.
pub fn window_specs(n_days: usize, window: usize) -> Vec<WindowSpec> {
    if window == 0 {
        return Vec::new();
    }
    (window..n_days)
        .map(|i| WindowSpec {
            train_start: i - window,
            train_end: i,
            test_index: i,
        })
        .collect()
}

// ─── Records ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastStatus {
    Predicted,
    FitFailed,
    PredictionFailed,
}

impl ForecastStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ForecastStatus::Predicted => "predicted",
            ForecastStatus::FitFailed => "fit_failed",
            ForecastStatus::PredictionFailed => "prediction_failed",
        }
    }
}

/// Failure attached to a record with a null prediction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub kind: String,
    pub message: String,
}

impl From<&FitFailure> for FailureInfo {
    fn from(f: &FitFailure) -> Self {
        Self {
            kind: f.kind().to_string(),
            message: f.to_string(),
        }
    }
}

impl From<&PredictionFailure> for FailureInfo {
    fn from(f: &PredictionFailure) -> Self {
        Self {
            kind: f.kind().to_string(),
            message: f.to_string(),
        }
    }
}

/// Model diagnostics with feature indices resolved to names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub model: String,
    pub selected_features: Vec<FeatureName>,
    pub lag_order: Option<usize>,
    pub intercept: Option<f64>,
    pub coefficients: Vec<f64>,
    pub aic: Option<f64>,
    pub failure: Option<FailureInfo>,
}

impl Diagnostics {
    fn from_model(d: ModelDiagnostics, features: &[FeatureName]) -> Self {
        Self {
            selected_features: d
                .selected
                .iter()
                .filter_map(|&i| features.get(i).copied())
                .collect(),
            model: d.model,
            lag_order: d.lag_order,
            intercept: d.intercept,
            coefficients: d.coefficients,
            aic: d.aic,
            failure: None,
        }
    }

    fn failed(model: &str, failure: FailureInfo) -> Self {
        Self {
            model: model.to_string(),
            failure: Some(failure),
            ..Default::default()
        }
    }
}

/// Outcome of one test day. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub symbol: String,
    pub date: NaiveDate,
    pub test_index: usize,
    pub train_first: NaiveDate,
    pub train_last: NaiveDate,
    pub actual: f64,
    pub predicted: Option<f64>,
    pub status: ForecastStatus,
    pub diagnostics: Diagnostics,
    /// Single-day score 1 − (actual − predicted)² / var(training targets).
    /// Not the classic R²; see [`crate::metrics::MetricSummary`] for that.
    pub pseudo_r2: Option<f64>,
}

impl ForecastRecord {
    pub fn error(&self) -> Option<f64> {
        self.predicted.map(|p| self.actual - p)
    }
}

/// Records of one walk-forward run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalkForwardResult {
    /// Chronological. On cancellation, a prefix of the full run.
    pub records: Vec<ForecastRecord>,
    /// Number of windows the full run would evaluate.
    pub windows_total: usize,
    pub cancelled: bool,
}

// ─── Engine ──────────────────────────────────────────────────────────

/// Rolling-window backtest over one symbol's daily rows.
pub struct WalkForward {
    config: WalkForwardConfig,
    model: Arc<dyn ForecastModel>,
}

impl WalkForward {
    pub fn new(config: WalkForwardConfig, model: Arc<dyn ForecastModel>) -> Self {
        Self { config, model }
    }

    pub fn config(&self) -> &WalkForwardConfig {
        &self.config
    }

    pub fn model_name(&self) -> &'static str {
        self.model.name()
    }

    /// Run every window over `days` (chronological, single symbol).
    ///
    /// `cancel` is checked before each iteration. When it is set, the
    /// records completed so far are returned as a chronological prefix with
    /// `cancelled = true`.
    pub fn run(&self, days: &[DailyFeatureVector], cancel: Option<&AtomicBool>) -> WalkForwardResult {
        debug_assert!(
            days.windows(2)
                .all(|w| w[0].symbol == w[1].symbol && w[0].date < w[1].date),
            "walk-forward days must be one symbol in increasing date order"
        );
        let specs = window_specs(days.len(), self.config.window);
        let windows_total = specs.len();
        let is_cancelled = || cancel.is_some_and(|f| f.load(Ordering::Relaxed));

        info!(
            days = days.len(),
            window = self.config.window,
            windows = windows_total,
            model = self.model.name(),
            target = self.config.target.as_str(),
            "starting walk-forward"
        );

        let records: Vec<ForecastRecord> = if self.config.parallel {
            let slots: Vec<Option<ForecastRecord>> = specs
                .par_iter()
                .map(|spec| (!is_cancelled()).then(|| self.evaluate_window(days, *spec)))
                .collect();
            slots.into_iter().map_while(|r| r).collect()
        } else {
            let mut out = Vec::with_capacity(specs.len());
            for spec in &specs {
                if is_cancelled() {
                    break;
                }
                out.push(self.evaluate_window(days, *spec));
            }
            out
        };

        let cancelled = records.len() < windows_total;
        info!(records = records.len(), cancelled, "walk-forward finished");

        WalkForwardResult {
            records,
            windows_total,
            cancelled,
        }
    }

    /// Fit on the window's training range and forecast its test day.
    pub fn evaluate_window(&self, days: &[DailyFeatureVector], spec: WindowSpec) -> ForecastRecord {
        let train = &days[spec.train_start..spec.train_end];
        let test = &days[spec.test_index];
        let target = self.config.target;

        let mut record = ForecastRecord {
            symbol: test.symbol.clone(),
            date: test.date,
            test_index: spec.test_index,
            train_first: train.first().map_or(test.date, |d| d.date),
            train_last: train.last().map_or(test.date, |d| d.date),
            actual: test.target(target),
            predicted: None,
            status: ForecastStatus::FitFailed,
            diagnostics: Diagnostics::default(),
            pseudo_r2: None,
        };

        let fitted = self
            .training_rows(train)
            .and_then(|rows| self.fit(rows));
        let fitted = match fitted {
            Ok(f) => f,
            Err(failure) => {
                debug!(date = %test.date, kind = failure.kind(), "fit failed: {failure}");
                record.diagnostics = Diagnostics::failed(self.model.name(), (&failure).into());
                return record;
            }
        };

        record.diagnostics = Diagnostics::from_model(fitted.diagnostics(), &self.config.features);
        match self.test_row(test).and_then(|row| fitted.predict(&row)) {
            Ok(p) => {
                record.predicted = Some(p);
                record.status = ForecastStatus::Predicted;
                record.pseudo_r2 = pseudo_r2(train, target, record.actual, p);
            }
            Err(failure) => {
                debug!(date = %test.date, kind = failure.kind(), "prediction failed: {failure}");
                record.status = ForecastStatus::PredictionFailed;
                record.diagnostics.failure = Some((&failure).into());
            }
        }
        record
    }

    fn training_rows(&self, train: &[DailyFeatureVector]) -> Result<Vec<TrainingRow>, FitFailure> {
        train
            .iter()
            .map(|d| {
                let features = d.features(&self.config.features).ok_or_else(|| FitFailure::Other {
                    message: format!(
                        "feature {} undefined on training day {}",
                        first_missing(d, &self.config.features),
                        d.date
                    ),
                })?;
                Ok(TrainingRow {
                    date: d.date,
                    features,
                    target: d.target(self.config.target),
                })
            })
            .collect()
    }

    fn test_row(&self, test: &DailyFeatureVector) -> Result<TestRow, PredictionFailure> {
        let features = test
            .features(&self.config.features)
            .ok_or_else(|| PredictionFailure::MissingFeature {
                feature: first_missing(test, &self.config.features),
            })?;
        Ok(TestRow {
            date: test.date,
            features,
        })
    }

    fn fit(&self, rows: Vec<TrainingRow>) -> Result<Box<dyn FittedModel>, FitFailure> {
        match self.config.fit_deadline_ms {
            None => self.model.fit(&rows),
            Some(ms) => fit_with_deadline(Arc::clone(&self.model), rows, ms),
        }
    }
}

fn first_missing(day: &DailyFeatureVector, names: &[FeatureName]) -> String {
    names
        .iter()
        .find(|n| day.feature(**n).is_none())
        .map_or_else(String::new, |n| n.to_string())
}

/// Run the fit on a helper thread and give up after `deadline_ms`.
///
/// An abandoned fit keeps running detached until it returns; its result is
/// dropped.
fn fit_with_deadline(
    model: Arc<dyn ForecastModel>,
    rows: Vec<TrainingRow>,
    deadline_ms: u64,
) -> Result<Box<dyn FittedModel>, FitFailure> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("vwaplab-fit".into())
        .spawn(move || {
            let _ = tx.send(model.fit(&rows));
        })
        .map_err(|e| FitFailure::Other {
            message: format!("failed to spawn fit thread: {e}"),
        })?;

    match rx.recv_timeout(Duration::from_millis(deadline_ms)) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(FitFailure::DeadlineExceeded { deadline_ms }),
        Err(RecvTimeoutError::Disconnected) => Err(FitFailure::Other {
            message: "fit thread exited without a result".into(),
        }),
    }
}

/// 1 − (actual − predicted)² / sample variance of the window's targets.
fn pseudo_r2(train: &[DailyFeatureVector], target: TargetKind, actual: f64, predicted: f64) -> Option<f64> {
    if train.len() < 2 {
        return None;
    }
    let n = train.len() as f64;
    let mean = train.iter().map(|d| d.target(target)).sum::<f64>() / n;
    let var = train
        .iter()
        .map(|d| (d.target(target) - mean).powi(2))
        .sum::<f64>()
        / (n - 1.0);
    (var > 0.0).then(|| 1.0 - (actual - predicted).powi(2) / var)
}
