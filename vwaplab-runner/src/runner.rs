//! Pipeline runner — wires loading, enrichment, aggregation, walk-forward
//! and metrics together.
//!
//! Entry points:
//! - `run_backtest()`: loads files named by the config, then runs. Used by CLI.
//! - `run_backtest_from_bars()`: takes pre-normalized bars, no I/O.
//! - `run_enrich()`: loading, enrichment and aggregation only.
//!
//! Symbols are independent. An ordering violation in one symbol aborts that
//! symbol only; it is reported and the others complete.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use vwaplab_core::data::{split_symbols, NormalizedBars};
use vwaplab_core::domain::{
    Bar, EnrichedBar, FeatureName, MacroCalendar, NoMacroEvents, TargetKind,
};
use vwaplab_core::features::{
    DailyAggregator, DailyDataset, DayBoundaryError, IntradayEngine,
};

use crate::config::{BacktestConfig, ConfigError, RunId};
use crate::data_loader::{load_bars, load_calendar, LoadError, LoadedBars};
use crate::metrics::{recent, ExclusionReport, MetricSummary};
use crate::walk_forward::{ForecastRecord, WalkForward, WalkForwardResult};

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
    #[error("no valid bars after normalization")]
    NoBars,
}

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

// ─── Per-symbol results ──────────────────────────────────────────────

/// Everything produced for one symbol.
#[derive(Debug, Clone)]
pub struct SymbolOutcome {
    pub symbol: String,
    pub enriched: Vec<EnrichedBar>,
    pub dataset: DailyDataset,
    pub walk_forward: WalkForwardResult,
    pub summary: Option<MetricSummary>,
    pub exclusions: ExclusionReport,
    /// Set when an ordering violation stopped this symbol.
    pub aborted: Option<String>,
}

/// Persisted per-symbol section of a [`BacktestReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolReport {
    pub symbol: String,
    /// Daily rows that reached the backtest.
    pub days: usize,
    pub excluded_days: usize,
    pub windows_total: usize,
    pub forecasts: usize,
    pub summary: Option<MetricSummary>,
    /// Most recent forecasts, oldest first.
    pub recent: Vec<ForecastRecord>,
    pub cancelled: bool,
    pub aborted: Option<String>,
}

/// Complete result of a backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: RunId,
    pub dataset_hash: String,
    pub model: String,
    pub target: TargetKind,
    pub window: usize,
    pub features: Vec<FeatureName>,
    pub symbols: Vec<SymbolReport>,
    /// Pooled over every symbol's forecasts.
    pub overall: Option<MetricSummary>,
    pub exclusions: ExclusionReport,
    pub cancelled: bool,
}

/// Report plus the full per-symbol outputs, for export.
#[derive(Debug, Clone)]
pub struct BacktestRun {
    pub report: BacktestReport,
    pub outcomes: Vec<SymbolOutcome>,
}

// ─── Pipeline ────────────────────────────────────────────────────────

/// Configured stages, shared by every symbol of a run.
pub struct Pipeline {
    engine: IntradayEngine,
    aggregator: DailyAggregator,
    walk_forward: WalkForward,
    calendar: Arc<dyn MacroCalendar>,
    parallel: bool,
}

impl Pipeline {
    pub fn new(config: &BacktestConfig, calendar: Arc<dyn MacroCalendar>) -> Self {
        Self {
            engine: IntradayEngine::new(config.features),
            aggregator: DailyAggregator::new(config.effective_aggregation()),
            walk_forward: WalkForward::new(config.backtest.clone(), config.model.build()),
            calendar,
            parallel: config.backtest.parallel,
        }
    }

    pub fn walk_forward(&self) -> &WalkForward {
        &self.walk_forward
    }

    /// Enrich and aggregate one symbol's sorted bars.
    pub fn prepare_symbol(
        &self,
        bars: &[Bar],
    ) -> Result<(Vec<EnrichedBar>, DailyDataset), DayBoundaryError> {
        let enriched = self.engine.enrich_stream(bars, self.calendar.as_ref())?;
        let dataset = self.aggregator.aggregate_all(&enriched);
        Ok((enriched, dataset))
    }

    /// Full pipeline for one symbol. Never fails; problems are reported in
    /// the outcome.
    pub fn run_symbol(&self, symbol: &str, bars: &[Bar], cancel: Option<&AtomicBool>) -> SymbolOutcome {
        let mut exclusions = ExclusionReport::default();

        let (enriched, dataset) = match self.prepare_symbol(bars) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(symbol, error = %e, "aborting symbol");
                exclusions.record_aborted(symbol);
                return SymbolOutcome {
                    symbol: symbol.to_string(),
                    enriched: Vec::new(),
                    dataset: DailyDataset::default(),
                    walk_forward: WalkForwardResult::default(),
                    summary: None,
                    exclusions,
                    aborted: Some(e.to_string()),
                };
            }
        };
        exclusions.record_dataset(&dataset);

        let walk_forward = self.walk_forward.run(&dataset.vectors, cancel);
        exclusions.record_forecasts(&walk_forward.records);
        let summary = MetricSummary::compute(&walk_forward.records);

        match &summary {
            Some(s) => info!(
                symbol,
                days = dataset.vectors.len(),
                excluded_days = dataset.excluded.len(),
                evaluated = s.evaluated,
                rmse = s.rmse,
                mae = s.mae,
                "symbol complete"
            ),
            None => info!(
                symbol,
                days = dataset.vectors.len(),
                excluded_days = dataset.excluded.len(),
                "symbol complete without forecasts"
            ),
        }

        SymbolOutcome {
            symbol: symbol.to_string(),
            enriched,
            dataset,
            walk_forward,
            summary,
            exclusions,
            aborted: None,
        }
    }

    fn for_each_symbol<T, F>(&self, bars: &[Bar], f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(&str, &[Bar]) -> T + Sync + Send,
    {
        let groups = split_symbols(bars);
        if self.parallel {
            groups.par_iter().map(|g| f(&g[0].symbol, g)).collect()
        } else {
            groups.iter().map(|g| f(&g[0].symbol, g)).collect()
        }
    }
}

fn open_calendar(config: &BacktestConfig) -> Result<Arc<dyn MacroCalendar>, RunError> {
    let calendar: Arc<dyn MacroCalendar> = match &config.data.macro_calendar {
        Some(path) => Arc::new(load_calendar(path)?),
        None => Arc::new(NoMacroEvents),
    };
    Ok(calendar)
}

fn load(config: &BacktestConfig) -> Result<LoadedBars, RunError> {
    let loaded = load_bars(&config.data.files, &config.data.symbols)?;
    if loaded.normalized.bars.is_empty() {
        return Err(RunError::NoBars);
    }
    Ok(loaded)
}

// ─── Entry points ────────────────────────────────────────────────────

/// Load the configured files and run the backtest for every symbol.
pub fn run_backtest(config: &BacktestConfig, cancel: Option<&AtomicBool>) -> Result<BacktestRun, RunError> {
    config.validate()?;
    let calendar = open_calendar(config)?;
    let loaded = load(config)?;
    Ok(run_backtest_from_bars(
        config,
        &loaded.normalized,
        &loaded.dataset_hash,
        calendar,
        cancel,
    ))
}

/// Run a backtest on pre-normalized bars — no I/O.
pub fn run_backtest_from_bars(
    config: &BacktestConfig,
    normalized: &NormalizedBars,
    dataset_hash: &str,
    calendar: Arc<dyn MacroCalendar>,
    cancel: Option<&AtomicBool>,
) -> BacktestRun {
    let pipeline = Pipeline::new(config, calendar);
    let outcomes = pipeline.for_each_symbol(&normalized.bars, |symbol, bars| {
        pipeline.run_symbol(symbol, bars, cancel)
    });

    let mut exclusions = ExclusionReport::default();
    exclusions.record_normalized(normalized);
    for o in &outcomes {
        exclusions.merge(&o.exclusions);
    }

    let all_records: Vec<ForecastRecord> = outcomes
        .iter()
        .flat_map(|o| o.walk_forward.records.iter().cloned())
        .collect();
    let cancelled = outcomes.iter().any(|o| o.walk_forward.cancelled);

    let symbols = outcomes
        .iter()
        .map(|o| SymbolReport {
            symbol: o.symbol.clone(),
            days: o.dataset.vectors.len(),
            excluded_days: o.dataset.excluded.len(),
            windows_total: o.walk_forward.windows_total,
            forecasts: o.walk_forward.records.len(),
            summary: o.summary.clone(),
            recent: recent(&o.walk_forward.records, config.report.recent),
            cancelled: o.walk_forward.cancelled,
            aborted: o.aborted.clone(),
        })
        .collect();

    let report = BacktestReport {
        schema_version: SCHEMA_VERSION,
        run_id: config.run_id(),
        dataset_hash: dataset_hash.to_string(),
        model: pipeline.walk_forward().model_name().to_string(),
        target: config.backtest.target,
        window: config.backtest.window,
        features: config.backtest.features.clone(),
        symbols,
        overall: MetricSummary::compute(&all_records),
        exclusions,
        cancelled,
    };

    if cancelled {
        warn!("backtest cancelled; results are partial");
    }
    info!(
        run_id = %report.run_id,
        symbols = report.symbols.len(),
        forecasts = all_records.len(),
        "backtest complete"
    );

    BacktestRun { report, outcomes }
}

/// Enriched bars and daily rows for every symbol, without a backtest.
#[derive(Debug, Clone)]
pub struct EnrichRun {
    pub dataset_hash: String,
    pub outcomes: Vec<SymbolOutcome>,
    pub exclusions: ExclusionReport,
}

/// Load and enrich the configured files.
pub fn run_enrich(config: &BacktestConfig) -> Result<EnrichRun, RunError> {
    config.validate()?;
    let calendar = open_calendar(config)?;
    let loaded = load(config)?;
    let pipeline = Pipeline::new(config, calendar);

    let outcomes = pipeline.for_each_symbol(&loaded.normalized.bars, |symbol, bars| {
        match pipeline.prepare_symbol(bars) {
            Ok((enriched, dataset)) => {
                let mut exclusions = ExclusionReport::default();
                exclusions.record_dataset(&dataset);
                SymbolOutcome {
                    symbol: symbol.to_string(),
                    enriched,
                    dataset,
                    walk_forward: WalkForwardResult::default(),
                    summary: None,
                    exclusions,
                    aborted: None,
                }
            }
            Err(e) => {
                warn!(symbol, error = %e, "aborting symbol");
                let mut exclusions = ExclusionReport::default();
                exclusions.record_aborted(symbol);
                SymbolOutcome {
                    symbol: symbol.to_string(),
                    enriched: Vec::new(),
                    dataset: DailyDataset::default(),
                    walk_forward: WalkForwardResult::default(),
                    summary: None,
                    exclusions,
                    aborted: Some(e.to_string()),
                }
            }
        }
    });

    let mut exclusions = ExclusionReport::default();
    exclusions.record_normalized(&loaded.normalized);
    for o in &outcomes {
        exclusions.merge(&o.exclusions);
    }

    Ok(EnrichRun {
        dataset_hash: loaded.dataset_hash,
        outcomes,
        exclusions,
    })
}

/// Convenience: read a config file and run the backtest.
pub fn run_backtest_file(path: &Path, cancel: Option<&AtomicBool>) -> Result<BacktestRun, RunError> {
    let config = BacktestConfig::from_file(path)?;
    run_backtest(&config, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{generate, SyntheticConfig};
    use chrono::NaiveDate;
    use vwaplab_core::data::Normalizer;
    use vwaplab_core::domain::EventCalendar;

    fn bars(symbol: &str, days: usize, seed: u64) -> Vec<vwaplab_core::domain::RawBar> {
        generate(&SyntheticConfig::new(
            symbol,
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            days,
            seed,
        ))
    }

    fn config(window: usize) -> BacktestConfig {
        let mut c = BacktestConfig::default();
        c.backtest.window = window;
        c.report.recent = 3;
        c
    }

    #[test]
    fn runs_every_symbol_independently() {
        let mut raw = bars("SPY", 30, 1);
        raw.extend(bars("QQQ", 30, 2));
        let normalized = Normalizer::normalize(raw);

        let run = run_backtest_from_bars(&config(21), &normalized, "hash", Arc::new(NoMacroEvents), None);
        let report = &run.report;
        assert_eq!(report.symbols.len(), 2);
        for s in &report.symbols {
            assert_eq!(s.days, 30);
            assert_eq!(s.windows_total, 9);
            assert_eq!(s.forecasts, 9);
            assert_eq!(s.recent.len(), 3);
            assert!(s.aborted.is_none());
        }
        assert_eq!(report.schema_version, SCHEMA_VERSION);
        assert_eq!(report.dataset_hash, "hash");
        assert_eq!(report.model, "linear");
        assert!(!report.cancelled);
    }

    #[test]
    fn too_few_days_produce_no_forecasts() {
        let normalized = Normalizer::normalize(bars("SPY", 5, 1));
        let run = run_backtest_from_bars(&config(21), &normalized, "h", Arc::new(NoMacroEvents), None);
        let s = &run.report.symbols[0];
        assert_eq!(s.days, 5);
        assert_eq!(s.windows_total, 0);
        assert!(s.summary.is_none());
        assert!(run.report.overall.is_none());
    }

    #[test]
    fn calendar_flags_reach_daily_rows() {
        let normalized = Normalizer::normalize(bars("SPY", 3, 1));
        let day = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let calendar = EventCalendar::new().with_cpi([day]);
        let pipeline = Pipeline::new(&config(21), Arc::new(calendar));
        let (enriched, dataset) = pipeline.prepare_symbol(&normalized.bars).unwrap();
        assert!(enriched
            .iter()
            .filter(|e| e.bar.date() == day)
            .all(|e| e.macro_flags.is_cpi_day));
        let flagged: Vec<_> = dataset
            .vectors
            .iter()
            .filter(|v| v.macro_flags.is_cpi_day)
            .map(|v| v.date)
            .collect();
        assert_eq!(flagged, vec![day]);
    }

    #[test]
    fn unsorted_symbol_is_aborted_alone() {
        let mut spy = Normalizer::normalize(bars("SPY", 3, 1)).bars;
        // Corrupt ordering after normalization: move the last day first
        let last_day: Vec<Bar> = spy.split_off(spy.len() - 78);
        let mut broken = last_day;
        broken.extend(spy);
        let qqq = Normalizer::normalize(bars("QQQ", 25, 2)).bars;

        let mut normalized = Normalizer::normalize(Vec::new());
        normalized.bars = qqq;
        normalized.bars.extend(broken);

        let run = run_backtest_from_bars(&config(21), &normalized, "h", Arc::new(NoMacroEvents), None);
        let spy_report = run.report.symbols.iter().find(|s| s.symbol == "SPY").unwrap();
        let qqq_report = run.report.symbols.iter().find(|s| s.symbol == "QQQ").unwrap();
        assert!(spy_report.aborted.is_some());
        assert_eq!(qqq_report.forecasts, 4);
        assert_eq!(run.report.exclusions.aborted_symbols, vec!["SPY".to_string()]);
    }

    #[test]
    fn cancelled_before_start_yields_no_records() {
        let normalized = Normalizer::normalize(bars("SPY", 25, 1));
        let cancel = AtomicBool::new(true);
        let run = run_backtest_from_bars(&config(21), &normalized, "h", Arc::new(NoMacroEvents), Some(&cancel));
        assert!(run.report.cancelled);
        assert_eq!(run.report.symbols[0].forecasts, 0);
        assert_eq!(run.report.symbols[0].windows_total, 4);
    }
}
