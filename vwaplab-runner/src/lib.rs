//! VwapLab Runner — loading, forecasting models, walk-forward backtest, reporting.
//!
//! This crate builds on `vwaplab-core` to provide:
//! - CSV bar and macro-calendar loading, plus a seeded synthetic generator
//! - The forecasting model capability and reference models
//! - The rolling-window walk-forward engine
//! - Accuracy metrics and exclusion accounting
//! - Pipeline orchestration and CSV/Parquet/JSON/Markdown export

pub mod config;
pub mod data_loader;
pub mod export;
pub mod metrics;
pub mod model;
pub mod runner;
pub mod synthetic;
pub mod walk_forward;

pub use config::{BacktestConfig, ConfigError, DataConfig, ReportConfig, RunId};
pub use data_loader::{compute_dataset_hash, load_bars, load_calendar, LoadError, LoadedBars};
pub use metrics::{ExclusionReport, MetricSummary};
pub use model::{
    FitFailure, FittedModel, ForecastModel, ModelDiagnostics, ModelSpec, PredictionFailure,
    TestRow, TrainingRow,
};
pub use runner::{
    run_backtest, run_backtest_file, run_backtest_from_bars, run_enrich, BacktestReport,
    BacktestRun, EnrichRun, Pipeline, RunError, SymbolOutcome, SymbolReport, SCHEMA_VERSION,
};
pub use synthetic::{generate as generate_synthetic, SyntheticConfig};
pub use walk_forward::{
    window_specs, Diagnostics, ForecastRecord, ForecastStatus, WalkForward, WalkForwardConfig,
    WalkForwardResult, WindowSpec,
};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn report_types_are_send_sync() {
        assert_send::<BacktestReport>();
        assert_sync::<BacktestReport>();
        assert_send::<ForecastRecord>();
        assert_sync::<ForecastRecord>();
    }

    #[test]
    fn pipeline_is_send_sync() {
        assert_send::<Pipeline>();
        assert_sync::<Pipeline>();
        assert_send::<WalkForward>();
        assert_sync::<WalkForward>();
    }

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<BacktestConfig>();
        assert_sync::<BacktestConfig>();
        assert_send::<ModelSpec>();
        assert_sync::<ModelSpec>();
    }
}
