//! Bar stream normalization: validate, sort, dedupe, detect session gaps.
//!
//! Input is any concatenation of raw bars (several yearly files for one
//! symbol, or several symbols). Output is a single stream sorted by
//! (symbol, timestamp) with one bar per key.
//!
//! Order of operations matters for duplicates: malformed bars are dropped
//! first, then the last surviving occurrence of each (symbol, timestamp) wins.

use std::collections::{BTreeSet, HashSet};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::session::{regular_session_slots, Session, REGULAR_SESSION_BARS};
use crate::domain::{Bar, RawBar};

/// Why a raw bar was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum MalformedReason {
    NonFinitePrice { field: &'static str, value: f64 },
    NonFiniteVolume(f64),
    NegativeVolume(f64),
    InvertedRange { high: f64, low: f64 },
}

impl MalformedReason {
    /// Stable label for counting.
    pub fn kind(&self) -> &'static str {
        match self {
            MalformedReason::NonFinitePrice { .. } => "non_finite_price",
            MalformedReason::NonFiniteVolume(_) => "non_finite_volume",
            MalformedReason::NegativeVolume(_) => "negative_volume",
            MalformedReason::InvertedRange { .. } => "inverted_range",
        }
    }
}

impl std::fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedReason::NonFinitePrice { field, value } => {
                write!(f, "{field} is not finite ({value})")
            }
            MalformedReason::NonFiniteVolume(v) => write!(f, "volume is not finite ({v})"),
            MalformedReason::NegativeVolume(v) => write!(f, "volume is negative ({v})"),
            MalformedReason::InvertedRange { high, low } => {
                write!(f, "high {high} is below low {low}")
            }
        }
    }
}

/// A raw bar that failed validation. Fatal for that bar only.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("malformed bar {symbol} @ {timestamp}: {reason}")]
pub struct MalformedBar {
    pub symbol: String,
    pub timestamp: NaiveDateTime,
    pub reason: MalformedReason,
}

/// A trading day that is missing expected regular-session bars.
/// Informational; nothing is filled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{symbol} {date}: missing {missing} of {expected} regular-session bars (first gap at {first_missing})")]
pub struct GapWarning {
    pub symbol: String,
    pub date: NaiveDate,
    pub missing: usize,
    pub expected: usize,
    pub first_missing: NaiveTime,
}

/// Output of [`Normalizer::normalize`].
#[derive(Debug, Clone, Default)]
pub struct NormalizedBars {
    /// Sorted by (symbol, timestamp), unique per key.
    pub bars: Vec<Bar>,
    pub malformed: Vec<MalformedBar>,
    /// Number of earlier occurrences overwritten by a later duplicate.
    pub duplicates_replaced: usize,
    pub gaps: Vec<GapWarning>,
}

/// Normalizer for raw bar streams.
pub struct Normalizer;

impl Normalizer {
    /// Validate, sort, dedupe (last write wins) and scan for gaps.
    pub fn normalize(raw: Vec<RawBar>) -> NormalizedBars {
        let mut malformed = Vec::new();
        let mut valid = Vec::with_capacity(raw.len());

        for r in raw {
            match Self::validate(r) {
                Ok(bar) => valid.push(bar),
                Err(err) => {
                    warn!(symbol = %err.symbol, timestamp = %err.timestamp, reason = err.reason.kind(), "dropping malformed bar: {}", err.reason);
                    malformed.push(err);
                }
            }
        }

        // Stable sort keeps input order among equal keys, so the last
        // occurrence in the input is the last one in its run.
        valid.sort_by(|a, b| {
            a.symbol
                .cmp(&b.symbol)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
        });

        let mut bars: Vec<Bar> = Vec::with_capacity(valid.len());
        let mut duplicates_replaced = 0;
        for bar in valid {
            match bars.last_mut() {
                Some(last) if last.symbol == bar.symbol && last.timestamp == bar.timestamp => {
                    *last = bar;
                    duplicates_replaced += 1;
                }
                _ => bars.push(bar),
            }
        }

        let gaps = Self::detect_gaps(&bars);
        for gap in &gaps {
            warn!(symbol = %gap.symbol, date = %gap.date, missing = gap.missing, "session gap: {gap}");
        }

        debug!(
            bars = bars.len(),
            malformed = malformed.len(),
            duplicates_replaced,
            gaps = gaps.len(),
            "normalized bar stream"
        );

        NormalizedBars {
            bars,
            malformed,
            duplicates_replaced,
            gaps,
        }
    }

    /// Check a single raw bar: finite OHLC, finite non-negative volume, high >= low.
    pub fn validate(raw: RawBar) -> Result<Bar, MalformedBar> {
        let reason = [
            ("open", raw.open),
            ("high", raw.high),
            ("low", raw.low),
            ("close", raw.close),
        ]
        .into_iter()
        .find(|(_, v)| !v.is_finite())
        .map(|(field, value)| MalformedReason::NonFinitePrice { field, value })
        .or_else(|| {
            if !raw.volume.is_finite() {
                Some(MalformedReason::NonFiniteVolume(raw.volume))
            } else if raw.volume < 0.0 {
                Some(MalformedReason::NegativeVolume(raw.volume))
            } else if raw.high < raw.low {
                Some(MalformedReason::InvertedRange {
                    high: raw.high,
                    low: raw.low,
                })
            } else {
                None
            }
        });

        match reason {
            Some(reason) => Err(MalformedBar {
                symbol: raw.symbol,
                timestamp: raw.timestamp,
                reason,
            }),
            None => Ok(Bar {
                symbol: raw.symbol,
                timestamp: raw.timestamp,
                open: raw.open,
                high: raw.high,
                low: raw.low,
                close: raw.close,
                volume: raw.volume,
            }),
        }
    }

    /// Report days that have regular-session bars but miss some expected slots.
    ///
    /// Days with no regular-session bars at all (pre/post-market only) are
    /// not reported. Expects `bars` sorted by (symbol, timestamp).
    pub fn detect_gaps(bars: &[Bar]) -> Vec<GapWarning> {
        split_days(bars)
            .into_iter()
            .filter_map(|day| {
                let present: HashSet<NaiveTime> = day
                    .iter()
                    .map(|b| b.time())
                    .filter(|t| Session::classify(*t) == Session::Regular)
                    .collect();
                if present.is_empty() {
                    return None;
                }
                let missing: BTreeSet<NaiveTime> = regular_session_slots()
                    .filter(|slot| !present.contains(slot))
                    .collect();
                let first_missing = *missing.iter().next()?;
                Some(GapWarning {
                    symbol: day[0].symbol.clone(),
                    date: day[0].date(),
                    missing: missing.len(),
                    expected: REGULAR_SESSION_BARS,
                    first_missing,
                })
            })
            .collect()
    }
}

/// Split `items` into maximal contiguous runs whose elements are all
/// `same` as the run's first element.
pub fn split_runs<T>(items: &[T], same: impl Fn(&T, &T) -> bool) -> Vec<&[T]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=items.len() {
        if i == items.len() || !same(&items[start], &items[i]) {
            if i > start {
                runs.push(&items[start..i]);
            }
            start = i;
        }
    }
    runs
}

/// Split a (symbol, timestamp)-sorted stream into contiguous per-day slices.
pub fn split_days(bars: &[Bar]) -> Vec<&[Bar]> {
    split_runs(bars, Bar::same_day)
}

/// Split a (symbol, timestamp)-sorted stream into contiguous per-symbol slices.
pub fn split_symbols(bars: &[Bar]) -> Vec<&[Bar]> {
    split_runs(bars, |a, b| a.symbol == b.symbol)
}
