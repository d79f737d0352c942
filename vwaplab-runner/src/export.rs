//! Reporting and export — JSON, CSV, Parquet and Markdown artifacts.
//!
//! - **JSON**: the full [`BacktestReport`] with schema versioning
//! - **CSV**: enriched bars (one file per symbol and year), daily rows, forecasts
//! - **Parquet**: enriched bars, via polars
//! - **Markdown**: a human-readable run summary
//!
//! Undefined values are written as empty CSV cells, Parquet nulls and JSON
//! `null`. Unknown schema versions are rejected on load.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Datelike;
use polars::prelude::{Column, DataFrame, NamedFrom, ParquetWriter, Series};
use tracing::info;

use vwaplab_core::domain::{DailyFeatureVector, EnrichedBar, RawBar};

use crate::runner::{BacktestReport, BacktestRun, EnrichRun, SCHEMA_VERSION};
use crate::walk_forward::ForecastRecord;

fn opt(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

fn flag(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

// ─── JSON export ────────────────────────────────────────────────────

/// Serialize a `BacktestReport` to pretty JSON.
pub fn export_report_json(report: &BacktestReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize BacktestReport to JSON")
}

/// Deserialize a `BacktestReport` from JSON, rejecting unknown schema versions.
pub fn import_report_json(json: &str) -> Result<BacktestReport> {
    let report: BacktestReport =
        serde_json::from_str(json).context("failed to deserialize BacktestReport from JSON")?;
    if report.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            report.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(report)
}

// ─── CSV export ─────────────────────────────────────────────────────

const ENRICHED_COLUMNS: [&str; 23] = [
    "symbol",
    "timestamp",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "date",
    "time_of_day",
    "day_of_week",
    "is_regular",
    "is_pre_market",
    "is_post_market",
    "cumulative_volume",
    "price_return",
    "intraday_volatility",
    "price_trend",
    "vwap",
    "vwap_deviation",
    "is_cpi_day",
    "is_nfp_day",
    "is_month_end",
    "macro_event_day",
];

/// Enriched bars as CSV, one row per bar.
pub fn export_enriched_csv<'a>(rows: impl IntoIterator<Item = &'a EnrichedBar>) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(ENRICHED_COLUMNS)?;

    for r in rows {
        let b = &r.bar;
        let s = &r.session;
        wtr.write_record([
            b.symbol.clone(),
            b.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            b.open.to_string(),
            b.high.to_string(),
            b.low.to_string(),
            b.close.to_string(),
            b.volume.to_string(),
            s.date.to_string(),
            format!("{:.6}", s.time_of_day),
            s.day_of_week.to_string(),
            flag(s.is_regular).into(),
            flag(s.is_pre_market).into(),
            flag(s.is_post_market).into(),
            r.cumulative_volume.to_string(),
            opt(r.price_return),
            opt(r.intraday_volatility),
            r.price_trend.to_string(),
            opt(r.vwap),
            opt(r.vwap_deviation),
            flag(r.macro_flags.is_cpi_day).into(),
            flag(r.macro_flags.is_nfp_day).into(),
            flag(r.macro_flags.is_month_end).into(),
            flag(r.macro_event_day()).into(),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Daily feature vectors as CSV.
pub fn export_daily_csv(vectors: &[DailyFeatureVector]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "symbol",
        "date",
        "day_of_week",
        "macro_event_day",
        "bar_count",
        "cutoff",
        "cutoff_bar_count",
        "cutoff_open",
        "cutoff_close",
        "cutoff_vwap",
        "cutoff_vwap_deviation",
        "cutoff_price_trend",
        "cutoff_cumulative_volume",
        "cutoff_return",
        "cutoff_volatility",
        "target_vwap",
        "target_close",
        "target_volume",
    ])?;

    for v in vectors {
        let s = &v.snapshot;
        wtr.write_record([
            v.symbol.clone(),
            v.date.to_string(),
            v.day_of_week.to_string(),
            flag(v.macro_flags.any()).into(),
            v.bar_count.to_string(),
            s.cutoff.format("%H:%M").to_string(),
            s.bar_count.to_string(),
            s.open.to_string(),
            s.close.to_string(),
            opt(s.vwap),
            opt(s.vwap_deviation),
            s.price_trend.to_string(),
            s.cumulative_volume.to_string(),
            opt(s.last_return),
            opt(s.volatility),
            v.targets.vwap.to_string(),
            v.targets.close.to_string(),
            v.targets.volume.to_string(),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Forecast records as CSV, one row per test day.
pub fn export_forecasts_csv(records: &[ForecastRecord]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "symbol",
        "date",
        "train_first",
        "train_last",
        "actual",
        "predicted",
        "error",
        "status",
        "failure",
        "model",
        "selected_features",
        "lag_order",
        "aic",
        "pseudo_r2",
    ])?;

    for r in records {
        let d = &r.diagnostics;
        let selected: Vec<&str> = d.selected_features.iter().map(|f| f.as_str()).collect();
        wtr.write_record([
            r.symbol.clone(),
            r.date.to_string(),
            r.train_first.to_string(),
            r.train_last.to_string(),
            r.actual.to_string(),
            opt(r.predicted),
            opt(r.error()),
            r.status.as_str().to_string(),
            d.failure.as_ref().map(|f| f.kind.clone()).unwrap_or_default(),
            d.model.clone(),
            selected.join(";"),
            d.lag_order.map(|p| p.to_string()).unwrap_or_default(),
            opt(d.aic),
            opt(r.pseudo_r2),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Write raw bars in the loader's input format.
pub fn write_bars_csv(path: &Path, bars: &[RawBar]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    wtr.write_record(["symbol", "timestamp", "open", "high", "low", "close", "volume"])?;
    for b in bars {
        wtr.write_record([
            b.symbol.clone(),
            b.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            format!("{:.4}", b.open),
            format!("{:.4}", b.high),
            format!("{:.4}", b.low),
            format!("{:.4}", b.close),
            b.volume.to_string(),
        ])?;
    }
    wtr.flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

// ─── Parquet export ─────────────────────────────────────────────────

/// Enriched bars as a Parquet file, with the same columns as the CSV.
pub fn write_enriched_parquet(path: &Path, rows: &[&EnrichedBar]) -> Result<()> {
    macro_rules! col {
        ($name:expr, $values:expr) => {
            Column::from(Series::new($name.into(), $values))
        };
    }
    let f = |get: fn(&EnrichedBar) -> f64| rows.iter().map(|r| get(r)).collect::<Vec<f64>>();
    let o = |get: fn(&EnrichedBar) -> Option<f64>| {
        rows.iter().map(|r| get(r)).collect::<Vec<Option<f64>>>()
    };
    let b = |get: fn(&EnrichedBar) -> bool| rows.iter().map(|r| get(r)).collect::<Vec<bool>>();

    let symbols: Vec<String> = rows.iter().map(|r| r.bar.symbol.clone()).collect();
    let timestamps: Vec<String> = rows
        .iter()
        .map(|r| r.bar.timestamp.format("%Y-%m-%d %H:%M:%S").to_string())
        .collect();
    let dates: Vec<String> = rows.iter().map(|r| r.session.date.to_string()).collect();
    let days: Vec<u32> = rows.iter().map(|r| r.session.day_of_week).collect();

    let mut df = DataFrame::new(vec![
        col!("symbol", symbols),
        col!("timestamp", timestamps),
        col!("open", f(|r| r.bar.open)),
        col!("high", f(|r| r.bar.high)),
        col!("low", f(|r| r.bar.low)),
        col!("close", f(|r| r.bar.close)),
        col!("volume", f(|r| r.bar.volume)),
        col!("date", dates),
        col!("time_of_day", f(|r| r.session.time_of_day)),
        col!("day_of_week", days),
        col!("is_regular", b(|r| r.session.is_regular)),
        col!("is_pre_market", b(|r| r.session.is_pre_market)),
        col!("is_post_market", b(|r| r.session.is_post_market)),
        col!("cumulative_volume", f(|r| r.cumulative_volume)),
        col!("price_return", o(|r| r.price_return)),
        col!("intraday_volatility", o(|r| r.intraday_volatility)),
        col!("price_trend", f(|r| r.price_trend)),
        col!("vwap", o(|r| r.vwap)),
        col!("vwap_deviation", o(|r| r.vwap_deviation)),
        col!("is_cpi_day", b(|r| r.macro_flags.is_cpi_day)),
        col!("is_nfp_day", b(|r| r.macro_flags.is_nfp_day)),
        col!("is_month_end", b(|r| r.macro_flags.is_month_end)),
        col!("macro_event_day", b(|r| r.macro_event_day())),
    ])
    .context("failed to build enriched dataframe")?;

    let mut file = File::create(path)
        .with_context(|| format!("failed to create parquet {}", path.display()))?;
    ParquetWriter::new(&mut file)
        .finish(&mut df)
        .context("failed to write enriched parquet")?;
    Ok(())
}

/// Write enriched bars as `SYMBOL_YEAR.csv` (and `.parquet`) under `dir`.
///
/// Returns the files written, in (symbol, year) order.
pub fn write_enriched_files(dir: &Path, rows: &[EnrichedBar], parquet: bool) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let mut chunks: BTreeMap<(&str, i32), Vec<&EnrichedBar>> = BTreeMap::new();
    for r in rows {
        chunks
            .entry((r.bar.symbol.as_str(), r.bar.date().year()))
            .or_default()
            .push(r);
    }

    let mut written = Vec::new();
    for ((symbol, year), chunk) in &chunks {
        let stem = format!("{symbol}_{year}");
        let csv_path = dir.join(format!("{stem}.csv"));
        std::fs::write(&csv_path, export_enriched_csv(chunk.iter().copied())?)
            .with_context(|| format!("failed to write {}", csv_path.display()))?;
        written.push(csv_path);

        if parquet {
            let pq_path = dir.join(format!("{stem}.parquet"));
            write_enriched_parquet(&pq_path, chunk)?;
            written.push(pq_path);
        }
    }
    Ok(written)
}

// ─── Artifact bundle ────────────────────────────────────────────────

fn run_dir_name(run_id: &str) -> String {
    format!("run_{}", &run_id[..run_id.len().min(12)])
}

/// Save the full artifact set of a backtest run.
///
/// Creates `run_{id-prefix}/` under `output_dir` containing:
/// - `report.json` — the full `BacktestReport`
/// - `report.md` — Markdown summary
/// - `forecasts.csv` — every forecast record
/// - `daily.csv` — daily feature vectors
/// - `enriched/SYMBOL_YEAR.csv` — enriched bars (plus `.parquet` when asked)
///
/// Returns the path to the created directory.
pub fn save_backtest_artifacts(run: &BacktestRun, output_dir: &Path, parquet: bool) -> Result<PathBuf> {
    let run_dir = output_dir.join(run_dir_name(&run.report.run_id));
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    std::fs::write(run_dir.join("report.json"), export_report_json(&run.report)?)?;
    std::fs::write(run_dir.join("report.md"), generate_report(&run.report))?;

    let records: Vec<ForecastRecord> = run
        .outcomes
        .iter()
        .flat_map(|o| o.walk_forward.records.iter().cloned())
        .collect();
    std::fs::write(run_dir.join("forecasts.csv"), export_forecasts_csv(&records)?)?;

    let vectors: Vec<DailyFeatureVector> = run
        .outcomes
        .iter()
        .flat_map(|o| o.dataset.vectors.iter().cloned())
        .collect();
    std::fs::write(run_dir.join("daily.csv"), export_daily_csv(&vectors)?)?;

    let enriched: Vec<EnrichedBar> = run.outcomes.iter().flat_map(|o| o.enriched.iter().cloned()).collect();
    let files = write_enriched_files(&run_dir.join("enriched"), &enriched, parquet)?;

    info!(dir = %run_dir.display(), enriched_files = files.len(), "saved backtest artifacts");
    Ok(run_dir)
}

/// Save enriched bars, daily rows and the exclusion counts of an enrich run.
pub fn save_enrich_artifacts(run: &EnrichRun, output_dir: &Path, parquet: bool) -> Result<Vec<PathBuf>> {
    let enriched: Vec<EnrichedBar> = run.outcomes.iter().flat_map(|o| o.enriched.iter().cloned()).collect();
    let mut files = write_enriched_files(&output_dir.join("enriched"), &enriched, parquet)?;

    let vectors: Vec<DailyFeatureVector> = run
        .outcomes
        .iter()
        .flat_map(|o| o.dataset.vectors.iter().cloned())
        .collect();
    let daily = output_dir.join("daily.csv");
    std::fs::write(&daily, export_daily_csv(&vectors)?)?;
    files.push(daily);

    let exclusions = output_dir.join("exclusions.json");
    let json = serde_json::to_string_pretty(&run.exclusions).context("failed to serialize exclusions")?;
    std::fs::write(&exclusions, json)?;
    files.push(exclusions);

    info!(dir = %output_dir.display(), files = files.len(), "saved enrich artifacts");
    Ok(files)
}

/// Load a `BacktestReport` from an artifact directory's report.json.
///
/// Rejects unknown schema versions.
pub fn load_report(dir: &Path) -> Result<BacktestReport> {
    let path = dir.join("report.json");
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_report_json(&json)
}

// ─── Markdown report ────────────────────────────────────────────────

fn fmt_opt(v: Option<f64>, digits: usize) -> String {
    v.map(|x| format!("{x:.digits$}")).unwrap_or_else(|| "n/a".into())
}

/// Markdown summary of a backtest run.
pub fn generate_report(report: &BacktestReport) -> String {
    let mut md = String::with_capacity(2048);

    md.push_str("# Forecast Backtest Report\n\n");

    md.push_str("## Metadata\n\n");
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Run ID | {} |\n", report.run_id));
    md.push_str(&format!("| Dataset Hash | {} |\n", report.dataset_hash));
    md.push_str(&format!("| Model | {} |\n", report.model));
    md.push_str(&format!("| Target | {} |\n", report.target.as_str()));
    md.push_str(&format!("| Window | {} days |\n", report.window));
    let features: Vec<&str> = report.features.iter().map(|f| f.as_str()).collect();
    md.push_str(&format!("| Features | {} |\n", features.join(", ")));
    if report.cancelled {
        md.push_str("| Status | **CANCELLED (partial)** |\n");
    }
    md.push('\n');

    md.push_str("## Accuracy\n\n");
    md.push_str("| Symbol | Days | Forecasts | Evaluated | RMSE | MAE | R² |\n");
    md.push_str("| --- | ---: | ---: | ---: | ---: | ---: | ---: |\n");
    for s in &report.symbols {
        match (&s.aborted, &s.summary) {
            (Some(reason), _) => {
                md.push_str(&format!("| {} | aborted: {} | | | | | |\n", s.symbol, reason));
            }
            (None, Some(m)) => md.push_str(&format!(
                "| {} | {} | {} | {} | {:.4} | {:.4} | {} |\n",
                s.symbol,
                s.days,
                s.forecasts,
                m.evaluated,
                m.rmse,
                m.mae,
                fmt_opt(m.r2, 4)
            )),
            (None, None) => md.push_str(&format!(
                "| {} | {} | {} | 0 | n/a | n/a | n/a |\n",
                s.symbol, s.days, s.forecasts
            )),
        }
    }
    if let Some(m) = &report.overall {
        md.push_str(&format!(
            "| **All** | | | {} | {:.4} | {:.4} | {} |\n",
            m.evaluated,
            m.rmse,
            m.mae,
            fmt_opt(m.r2, 4)
        ));
    }
    md.push('\n');

    let e = &report.exclusions;
    md.push_str("## Exclusions\n\n");
    md.push_str("| Kind | Count |\n");
    md.push_str("| --- | ---: |\n");
    for (kind, n) in &e.malformed_bars {
        md.push_str(&format!("| malformed bar: {kind} | {n} |\n"));
    }
    md.push_str(&format!("| duplicate bars replaced | {} |\n", e.duplicates_replaced));
    md.push_str(&format!("| days with gaps | {} |\n", e.gap_warnings));
    for (kind, n) in &e.excluded_days {
        md.push_str(&format!("| excluded day: {kind} | {n} |\n"));
    }
    for (kind, n) in &e.fit_failures {
        md.push_str(&format!("| fit failure: {kind} | {n} |\n"));
    }
    for (kind, n) in &e.prediction_failures {
        md.push_str(&format!("| prediction failure: {kind} | {n} |\n"));
    }
    for symbol in &e.aborted_symbols {
        md.push_str(&format!("| aborted symbol | {symbol} |\n"));
    }
    md.push('\n');

    for s in report.symbols.iter().filter(|s| !s.recent.is_empty()) {
        md.push_str(&format!("## Recent forecasts: {}\n\n", s.symbol));
        md.push_str("| Date | Actual | Predicted | Error | Status |\n");
        md.push_str("| --- | ---: | ---: | ---: | --- |\n");
        for r in &s.recent {
            md.push_str(&format!(
                "| {} | {:.4} | {} | {} | {} |\n",
                r.date,
                r.actual,
                fmt_opt(r.predicted, 4),
                fmt_opt(r.error(), 4),
                r.status.as_str()
            ));
        }
        md.push('\n');
    }

    md
}
