//! Forecast accuracy metrics and exclusion accounting.
//!
//! Every metric is a pure function of the record stream. Records without a
//! prediction are counted as excluded and never enter an error statistic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use vwaplab_core::data::NormalizedBars;
use vwaplab_core::features::DailyDataset;

use crate::walk_forward::{ForecastRecord, ForecastStatus};

/// Aggregate accuracy over records that have a prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub evaluated: usize,
    pub excluded: usize,
    pub mse: f64,
    pub mae: f64,
    pub rmse: f64,
    /// 1 − Σ(a−p)² / Σ(a−ā)². `None` when every actual is identical.
    pub r2: Option<f64>,
}

impl MetricSummary {
    /// `None` when no record has a prediction.
    pub fn compute(records: &[ForecastRecord]) -> Option<Self> {
        let pairs: Vec<(f64, f64)> = records
            .iter()
            .filter_map(|r| r.predicted.map(|p| (r.actual, p)))
            .collect();
        if pairs.is_empty() {
            return None;
        }

        let n = pairs.len() as f64;
        let sse: f64 = pairs.iter().map(|(a, p)| (a - p).powi(2)).sum();
        let sae: f64 = pairs.iter().map(|(a, p)| (a - p).abs()).sum();
        let mean_actual = pairs.iter().map(|(a, _)| a).sum::<f64>() / n;
        let sst: f64 = pairs.iter().map(|(a, _)| (a - mean_actual).powi(2)).sum();

        let mse = sse / n;
        Some(Self {
            evaluated: pairs.len(),
            excluded: records.len() - pairs.len(),
            mse,
            mae: sae / n,
            rmse: mse.sqrt(),
            r2: (sst > 0.0).then(|| 1.0 - sse / sst),
        })
    }
}

/// The last `k` records in date order.
pub fn recent(records: &[ForecastRecord], k: usize) -> Vec<ForecastRecord> {
    let mut sorted: Vec<&ForecastRecord> = records.iter().collect();
    sorted.sort_by_key(|r| (r.date, r.symbol.clone()));
    let skip = sorted.len().saturating_sub(k);
    sorted.into_iter().skip(skip).cloned().collect()
}

/// Counts of everything that was dropped, skipped, or failed, by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionReport {
    pub malformed_bars: BTreeMap<String, usize>,
    pub duplicates_replaced: usize,
    pub gap_warnings: usize,
    pub excluded_days: BTreeMap<String, usize>,
    pub fit_failures: BTreeMap<String, usize>,
    pub prediction_failures: BTreeMap<String, usize>,
    pub deadline_expiries: usize,
    /// Symbols whose processing was aborted by an ordering violation.
    pub aborted_symbols: Vec<String>,
}

impl ExclusionReport {
    pub fn record_normalized(&mut self, normalized: &NormalizedBars) {
        for m in &normalized.malformed {
            *self.malformed_bars.entry(m.reason.kind().to_string()).or_default() += 1;
        }
        self.duplicates_replaced += normalized.duplicates_replaced;
        self.gap_warnings += normalized.gaps.len();
    }

    pub fn record_dataset(&mut self, dataset: &DailyDataset) {
        for e in &dataset.excluded {
            *self.excluded_days.entry(e.kind().to_string()).or_default() += 1;
        }
    }

    pub fn record_forecasts(&mut self, records: &[ForecastRecord]) {
        for r in records {
            let Some(failure) = &r.diagnostics.failure else {
                continue;
            };
            match r.status {
                ForecastStatus::FitFailed => {
                    *self.fit_failures.entry(failure.kind.clone()).or_default() += 1;
                    if failure.kind == "deadline_exceeded" {
                        self.deadline_expiries += 1;
                    }
                }
                ForecastStatus::PredictionFailed => {
                    *self.prediction_failures.entry(failure.kind.clone()).or_default() += 1;
                }
                ForecastStatus::Predicted => {}
            }
        }
    }

    pub fn record_aborted(&mut self, symbol: &str) {
        self.aborted_symbols.push(symbol.to_string());
    }

    /// Fold another report (for example, another symbol's) into this one.
    pub fn merge(&mut self, other: &ExclusionReport) {
        fn add(into: &mut BTreeMap<String, usize>, from: &BTreeMap<String, usize>) {
            for (k, v) in from {
                *into.entry(k.clone()).or_default() += v;
            }
        }
        add(&mut self.malformed_bars, &other.malformed_bars);
        self.duplicates_replaced += other.duplicates_replaced;
        self.gap_warnings += other.gap_warnings;
        add(&mut self.excluded_days, &other.excluded_days);
        add(&mut self.fit_failures, &other.fit_failures);
        add(&mut self.prediction_failures, &other.prediction_failures);
        self.deadline_expiries += other.deadline_expiries;
        self.aborted_symbols.extend(other.aborted_symbols.iter().cloned());
    }

    pub fn total_malformed(&self) -> usize {
        self.malformed_bars.values().sum()
    }

    pub fn total_excluded_days(&self) -> usize {
        self.excluded_days.values().sum()
    }
}
