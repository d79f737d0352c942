//! End-to-end: files on disk → config → backtest → artifacts.

use std::path::Path;

use chrono::NaiveDate;
use tempfile::TempDir;

use vwaplab_runner::export::{load_report, save_backtest_artifacts, save_enrich_artifacts, write_bars_csv};
use vwaplab_runner::{
    generate_synthetic, run_backtest_file, run_enrich, BacktestConfig, RunError, SyntheticConfig,
};

fn write_synthetic(dir: &Path, name: &str, symbol: &str, start: NaiveDate, days: usize, seed: u64) {
    let bars = generate_synthetic(&SyntheticConfig::new(symbol, start, days, seed));
    write_bars_csv(&dir.join(name), &bars).unwrap();
}

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("run.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn backtest_from_files_writes_complete_artifacts() {
    let dir = TempDir::new().unwrap();
    let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    write_synthetic(dir.path(), "SPY_2024.csv", "SPY", start, 26, 5);
    write_synthetic(dir.path(), "QQQ_2024.csv", "QQQ", start, 26, 6);
    std::fs::write(
        dir.path().join("macro.csv"),
        "CPI,NFP,month_end\n2024-01-11,2024-01-05,2024-01-31\n",
    )
    .unwrap();

    let path = write_config(
        &dir,
        r#"
[data]
files = ["SPY_2024.csv", "QQQ_2024.csv"]
macro_calendar = "macro.csv"

[backtest]
window = 21
features = ["cutoff_vwap", "cutoff_vwap_deviation", "cutoff_price_trend"]

[model]
type = "stepwise"

[report]
recent = 5
"#,
    );

    let run = run_backtest_file(&path, None).unwrap();
    let report = &run.report;
    assert_eq!(report.model, "stepwise");
    assert_eq!(report.symbols.len(), 2);
    for s in &report.symbols {
        assert_eq!(s.days, 26);
        assert_eq!(s.forecasts, 5);
        assert_eq!(s.recent.len(), 5);
    }
    assert_eq!(report.dataset_hash.len(), 64);
    assert!(report.overall.is_some());

    // Macro flags reach the daily rows
    let spy = run.outcomes.iter().find(|o| o.symbol == "SPY").unwrap();
    let cpi = NaiveDate::from_ymd_opt(2024, 1, 11).unwrap();
    assert!(spy
        .dataset
        .vectors
        .iter()
        .any(|v| v.date == cpi && v.macro_flags.is_cpi_day));

    let out = dir.path().join("out");
    let run_dir = save_backtest_artifacts(&run, &out, false).unwrap();
    let loaded = load_report(&run_dir).unwrap();
    assert_eq!(&loaded, report);
    assert!(run_dir.join("enriched").join("QQQ_2024.csv").exists());
    assert!(run_dir.join("enriched").join("SPY_2024.csv").exists());
}

#[test]
fn identical_inputs_give_identical_reports() {
    let dir = TempDir::new().unwrap();
    write_synthetic(dir.path(), "SPY.csv", "SPY", NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), 24, 9);
    let path = write_config(&dir, "[data]\nfiles = [\"SPY.csv\"]\n");

    let a = run_backtest_file(&path, None).unwrap().report;
    let b = run_backtest_file(&path, None).unwrap().report;
    assert_eq!(a, b);
}

#[test]
fn epoch_millisecond_timestamps_and_zero_volume_day() {
    let dir = TempDir::new().unwrap();
    // 2024-01-02 09:30 and 09:35 EST, then 2024-01-03 09:30 and 09:35 EST with no volume
    let csv = "\
symbol,timestamp,open,high,low,close,volume
SPY,1704205800000,100,101,99,100.5,1000
SPY,1704206100000,100.5,101,100,100.8,500
SPY,1704292200000,101,102,100,101.5,0
SPY,1704292500000,101.5,102,101,101.8,0
SPY,1704292800000,abc,102,101,101.8,10
";
    std::fs::write(dir.path().join("spy.csv"), csv).unwrap();
    let path = write_config(
        &dir,
        "[data]\nfiles = [\"spy.csv\"]\n[backtest]\nwindow = 1\nfeatures = [\"cutoff_price_trend\"]\n",
    );
    let config = BacktestConfig::from_file(&path).unwrap();
    let run = run_enrich(&config).unwrap();

    let outcome = &run.outcomes[0];
    assert_eq!(outcome.enriched.len(), 4);
    assert_eq!(outcome.enriched[0].bar.timestamp.to_string(), "2024-01-02 09:30:00");

    let zero_day: Vec<_> = outcome
        .enriched
        .iter()
        .filter(|e| e.bar.date() == NaiveDate::from_ymd_opt(2024, 1, 3).unwrap())
        .collect();
    assert_eq!(zero_day.len(), 2);
    assert!(zero_day.iter().all(|e| e.vwap.is_none() && e.vwap_deviation.is_none()));

    // The zero-volume day has no full-day VWAP and is excluded
    assert_eq!(outcome.dataset.vectors.len(), 1);
    assert_eq!(run.exclusions.excluded_days.get("undefined_target"), Some(&1));
    assert_eq!(run.exclusions.malformed_bars.values().sum::<usize>(), 1);

    let out = dir.path().join("enrich_out");
    let files = save_enrich_artifacts(&run, &out, false).unwrap();
    assert!(files.iter().any(|p| p.ends_with("SPY_2024.csv")));
    let written = std::fs::read_to_string(out.join("enriched").join("SPY_2024.csv")).unwrap();
    // Undefined VWAP is an empty cell, never zero
    let row: Vec<&str> = written.lines().nth(3).unwrap().split(',').collect();
    assert_eq!(row[1], "2024-01-03 09:30:00");
    assert_eq!(row[17], "");
    assert_eq!(row[18], "");
}

#[test]
fn missing_file_is_a_data_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[data]\nfiles = [\"nope.csv\"]\n");
    assert!(matches!(run_backtest_file(&path, None), Err(RunError::Data(_))));
}

#[test]
fn empty_after_normalization_is_rejected() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("bad.csv"),
        "symbol,timestamp,open,high,low,close,volume\nSPY,2024-01-02 09:30:00,1,0.5,2,1,10\n",
    )
    .unwrap();
    let path = write_config(&dir, "[data]\nfiles = [\"bad.csv\"]\n");
    assert!(matches!(run_backtest_file(&path, None), Err(RunError::NoBars)));
}
