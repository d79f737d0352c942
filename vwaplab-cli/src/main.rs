//! VwapLab CLI — enrichment, backtest, and synthetic data commands.
//!
//! Commands:
//! - `enrich` — enrich bars and write per-symbol/year CSV plus daily rows
//! - `backtest` — run the walk-forward forecast backtest from a TOML config
//! - `synth` — write deterministic synthetic 5-minute bars
//! - `report` — print the Markdown summary of a saved run
//!
//! Logging goes to stderr through `tracing`; set `RUST_LOG` to adjust.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use vwaplab_runner::export::{
    generate_report, load_report, save_backtest_artifacts, save_enrich_artifacts, write_bars_csv,
};
use vwaplab_runner::{
    generate_synthetic, run_backtest, run_enrich, BacktestConfig, BacktestReport, SyntheticConfig,
};

#[derive(Parser)]
#[command(
    name = "vwaplab",
    about = "VwapLab CLI — intraday feature engineering and walk-forward forecasting"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enrich bars and write enriched CSV/Parquet and daily feature rows.
    Enrich {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// Output directory. Defaults to the config's report.output_dir.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Run the walk-forward backtest described by a TOML config.
    Backtest {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// Output directory. Defaults to the config's report.output_dir.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Also write enriched bars as Parquet.
        #[arg(long, default_value_t = false)]
        parquet: bool,
    },
    /// Generate deterministic synthetic 5-minute bars.
    Synth {
        /// Symbol to label the bars with.
        #[arg(long, default_value = "SYN")]
        symbol: String,

        /// First calendar day (YYYY-MM-DD).
        #[arg(long, default_value = "2024-01-02")]
        start: String,

        /// Number of trading days.
        #[arg(long, default_value_t = 60)]
        days: usize,

        /// RNG seed.
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Output CSV path.
        #[arg(long)]
        out: PathBuf,
    },
    /// Print the Markdown summary of a saved run directory.
    Report {
        /// Run directory containing report.json.
        #[arg(long)]
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Enrich { config, output_dir } => run_enrich_cmd(config, output_dir),
        Commands::Backtest {
            config,
            output_dir,
            parquet,
        } => run_backtest_cmd(config, output_dir, parquet),
        Commands::Synth {
            symbol,
            start,
            days,
            seed,
            out,
        } => run_synth(symbol, &start, days, seed, out),
        Commands::Report { dir } => {
            let report = load_report(&dir)?;
            print!("{}", generate_report(&report));
            Ok(())
        }
    }
}

fn run_enrich_cmd(config_path: PathBuf, output_dir: Option<PathBuf>) -> Result<()> {
    let config = BacktestConfig::from_file(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let output_dir = output_dir.unwrap_or_else(|| config.report.output_dir.clone());

    let run = run_enrich(&config)?;
    let files = save_enrich_artifacts(&run, &output_dir, config.report.parquet)?;

    for o in &run.outcomes {
        match &o.aborted {
            Some(reason) => println!("{:<8} aborted: {reason}", o.symbol),
            None => println!(
                "{:<8} {:>8} bars  {:>5} days  {:>4} excluded",
                o.symbol,
                o.enriched.len(),
                o.dataset.vectors.len(),
                o.dataset.excluded.len()
            ),
        }
    }
    println!(
        "Malformed bars: {}  Duplicates replaced: {}  Days with gaps: {}",
        run.exclusions.total_malformed(),
        run.exclusions.duplicates_replaced,
        run.exclusions.gap_warnings
    );
    println!("Wrote {} files to {}", files.len(), output_dir.display());
    Ok(())
}

fn run_backtest_cmd(config_path: PathBuf, output_dir: Option<PathBuf>, parquet: bool) -> Result<()> {
    let config = BacktestConfig::from_file(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let output_dir = output_dir.unwrap_or_else(|| config.report.output_dir.clone());

    let run = run_backtest(&config, None)?;
    print_summary(&run.report);

    let run_dir = save_backtest_artifacts(&run, &output_dir, parquet || config.report.parquet)?;
    println!("Artifacts saved to: {}", run_dir.display());
    Ok(())
}

fn run_synth(symbol: String, start: &str, days: usize, seed: u64, out: PathBuf) -> Result<()> {
    let start = NaiveDate::parse_from_str(start, "%Y-%m-%d")
        .with_context(|| format!("invalid --start '{start}', expected YYYY-MM-DD"))?;
    let bars = generate_synthetic(&SyntheticConfig::new(symbol, start, days, seed));
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    write_bars_csv(&out, &bars)?;
    info!(bars = bars.len(), path = %out.display(), "wrote synthetic bars");
    println!("Wrote {} bars to {}", bars.len(), out.display());
    Ok(())
}

fn print_summary(report: &BacktestReport) {
    println!();
    println!("=== Forecast Backtest ===");
    println!(
        "Model: {}  Target: {}  Window: {} days",
        report.model,
        report.target.as_str(),
        report.window
    );
    println!("Run ID: {}", &report.run_id[..report.run_id.len().min(12)]);
    if report.cancelled {
        println!("Status: CANCELLED (partial results)");
    }
    println!();

    println!(
        "{:<8} {:>6} {:>9} {:>10} {:>10} {:>8}",
        "Symbol", "Days", "Forecasts", "RMSE", "MAE", "R²"
    );
    for s in &report.symbols {
        if let Some(reason) = &s.aborted {
            println!("{:<8} aborted: {reason}", s.symbol);
            continue;
        }
        match &s.summary {
            Some(m) => println!(
                "{:<8} {:>6} {:>9} {:>10.4} {:>10.4} {:>8}",
                s.symbol,
                s.days,
                s.forecasts,
                m.rmse,
                m.mae,
                m.r2.map(|r| format!("{r:.4}")).unwrap_or_else(|| "n/a".into())
            ),
            None => println!("{:<8} {:>6} {:>9} {:>10} {:>10} {:>8}", s.symbol, s.days, s.forecasts, "n/a", "n/a", "n/a"),
        }
    }

    let e = &report.exclusions;
    println!();
    println!(
        "Excluded: {} malformed bars, {} days, {} fit failures, {} prediction failures",
        e.total_malformed(),
        e.total_excluded_days(),
        e.fit_failures.values().sum::<usize>(),
        e.prediction_failures.values().sum::<usize>()
    );

    for s in report.symbols.iter().filter(|s| !s.recent.is_empty()) {
        println!();
        println!("Recent forecasts — {}:", s.symbol);
        for r in &s.recent {
            let predicted = r.predicted.map(|p| format!("{p:.4}")).unwrap_or_else(|| "—".into());
            println!("  {}  actual {:.4}  predicted {}  [{}]", r.date, r.actual, predicted, r.status.as_str());
        }
    }
    println!();
}
