//! Bar and macro-calendar loading for the runner.
//!
//! Bar files are CSV with header `symbol,timestamp,open,high,low,close,volume`
//! (extra columns are ignored). `timestamp` is either an exchange-local
//! date-time or integer epoch milliseconds in UTC, which is converted to
//! America/New_York. Files are concatenated in the order given and then
//! normalized, so a later file overrides an earlier one on duplicate keys.
//!
//! Empty or unparseable price/volume cells load as NaN and are dropped by the
//! normalizer as malformed bars. An unparseable timestamp fails the file.

use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::America::New_York;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use vwaplab_core::data::{NormalizedBars, Normalizer};
use vwaplab_core::domain::{Bar, EventCalendar, RawBar};

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{path}:{line}: unrecognized timestamp '{value}'")]
    BadTimestamp {
        path: PathBuf,
        line: u64,
        value: String,
    },
    #[error("{path}: unrecognized date '{value}'")]
    BadDate { path: PathBuf, value: String },
    #[error("{path}: missing column '{column}'")]
    MissingColumn { path: PathBuf, column: String },
    #[error("no bar files configured")]
    NoFiles,
}

/// Normalized bars plus provenance.
#[derive(Debug)]
pub struct LoadedBars {
    pub normalized: NormalizedBars,
    /// BLAKE3 over the normalized bars.
    pub dataset_hash: String,
    pub files: Vec<PathBuf>,
    /// Rows read across all files, before normalization.
    pub rows_read: usize,
}

// ─── Bars ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BarRow {
    symbol: String,
    timestamp: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    open: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    high: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    low: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    close: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    volume: Option<f64>,
}

/// Parse a bar timestamp: local `YYYY-MM-DD HH:MM[:SS]` (space or `T`), or
/// epoch milliseconds UTC.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        let ms: i64 = value.parse().ok()?;
        return Utc
            .timestamp_millis_opt(ms)
            .single()
            .map(|utc| utc.with_timezone(&New_York).naive_local());
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

/// Read bars from any CSV source. `source` only labels errors.
pub fn read_bars_csv<R: Read>(reader: R, source: &Path) -> Result<Vec<RawBar>, LoadError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let csv_err = |source_err: csv::Error| LoadError::Csv {
        path: source.to_path_buf(),
        source: source_err,
    };

    let mut bars = Vec::new();
    for (i, row) in rdr.deserialize::<BarRow>().enumerate() {
        let row = row.map_err(csv_err)?;
        let timestamp = parse_timestamp(&row.timestamp).ok_or_else(|| LoadError::BadTimestamp {
            path: source.to_path_buf(),
            line: i as u64 + 2,
            value: row.timestamp.clone(),
        })?;
        bars.push(RawBar {
            symbol: row.symbol,
            timestamp,
            open: row.open.unwrap_or(f64::NAN),
            high: row.high.unwrap_or(f64::NAN),
            low: row.low.unwrap_or(f64::NAN),
            close: row.close.unwrap_or(f64::NAN),
            volume: row.volume.unwrap_or(f64::NAN),
        });
    }
    Ok(bars)
}

pub fn read_bars_file(path: &Path) -> Result<Vec<RawBar>, LoadError> {
    let file = std::fs::File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let bars = read_bars_csv(file, path)?;
    debug!(path = %path.display(), rows = bars.len(), "read bar file");
    Ok(bars)
}

/// Load, concatenate, filter and normalize bar files.
///
/// `symbols` restricts the result; empty keeps every symbol.
pub fn load_bars(files: &[PathBuf], symbols: &[String]) -> Result<LoadedBars, LoadError> {
    if files.is_empty() {
        return Err(LoadError::NoFiles);
    }
    let mut raw = Vec::new();
    for path in files {
        raw.extend(read_bars_file(path)?);
    }
    if !symbols.is_empty() {
        raw.retain(|b| symbols.contains(&b.symbol));
    }
    let rows_read = raw.len();
    let normalized = Normalizer::normalize(raw);
    let dataset_hash = compute_dataset_hash(&normalized.bars);

    info!(
        files = files.len(),
        rows_read,
        bars = normalized.bars.len(),
        malformed = normalized.malformed.len(),
        gaps = normalized.gaps.len(),
        "loaded bars"
    );

    Ok(LoadedBars {
        normalized,
        dataset_hash,
        files: files.to_vec(),
        rows_read,
    })
}

/// Deterministic BLAKE3 hash over normalized bars.
///
/// Input is sorted by (symbol, timestamp), so the hash does not depend on
/// file order except through last-write-wins duplicates.
pub fn compute_dataset_hash(bars: &[Bar]) -> String {
    let mut hasher = blake3::Hasher::new();
    for bar in bars {
        hasher.update(bar.symbol.as_bytes());
        hasher.update(&bar.timestamp.and_utc().timestamp().to_le_bytes());
        hasher.update(&bar.open.to_le_bytes());
        hasher.update(&bar.high.to_le_bytes());
        hasher.update(&bar.low.to_le_bytes());
        hasher.update(&bar.close.to_le_bytes());
        hasher.update(&bar.volume.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

// ─── Macro calendar ──────────────────────────────────────────────────

fn parse_date(value: &str) -> Option<NaiveDate> {
    ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .or_else(|| parse_timestamp(value).map(|ts| ts.date()))
}

/// Read a macro calendar with date columns `CPI`, `NFP`, `month_end`
/// (header names are case-insensitive; blank cells are skipped).
pub fn read_calendar_csv<R: Read>(reader: R, source: &Path) -> Result<EventCalendar, LoadError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let csv_err = |e: csv::Error| LoadError::Csv {
        path: source.to_path_buf(),
        source: e,
    };

    let headers = rdr.headers().map_err(csv_err)?.clone();
    let column = |name: &str| -> Result<usize, LoadError> {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| LoadError::MissingColumn {
                path: source.to_path_buf(),
                column: name.to_string(),
            })
    };
    let (cpi, nfp, month_end) = (column("cpi")?, column("nfp")?, column("month_end")?);

    let mut calendar = EventCalendar::new();
    for record in rdr.records() {
        let record = record.map_err(csv_err)?;
        for (idx, set) in [
            (cpi, &mut calendar.cpi),
            (nfp, &mut calendar.nfp),
            (month_end, &mut calendar.month_end),
        ] {
            let Some(cell) = record.get(idx).filter(|c| !c.is_empty()) else {
                continue;
            };
            let date = parse_date(cell).ok_or_else(|| LoadError::BadDate {
                path: source.to_path_buf(),
                value: cell.to_string(),
            })?;
            set.insert(date);
        }
    }
    Ok(calendar)
}

pub fn load_calendar(path: &Path) -> Result<EventCalendar, LoadError> {
    let file = std::fs::File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let calendar = read_calendar_csv(file, path)?;
    info!(
        path = %path.display(),
        cpi = calendar.cpi.len(),
        nfp = calendar.nfp.len(),
        month_end = calendar.month_end.len(),
        "loaded macro calendar"
    );
    Ok(calendar)
}
