//! Daily aggregator — reduce one enriched day to a [`DailyFeatureVector`].
//!
//! Leakage boundary: the snapshot is taken from the last bar whose
//! time-of-day is at or before the cutoff. Because every enriched value is
//! day-to-date, that bar already summarizes exactly the bars up to the
//! cutoff. Scanning stops at the first bar past the cutoff.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::domain::{CutoffSnapshot, DailyFeatureVector, DailyTargets, EnrichedBar, FeatureName};

use super::intraday::split_enriched_days;

fn default_cutoff() -> NaiveTime {
    NaiveTime::from_hms_opt(11, 30, 0).unwrap_or(NaiveTime::MIN)
}

fn default_min_bars() -> usize {
    1
}

/// `HH:MM` (seconds optional on input) for cutoff times in config files.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(s: &str) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
            .ok()
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid time '{s}', expected HH:MM")))
    }
}

/// Aggregator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Inclusive feature cutoff (exchange-local time of day).
    #[serde(default = "default_cutoff", with = "hhmm")]
    pub cutoff: NaiveTime,
    /// Days with fewer enriched bars are excluded.
    #[serde(default = "default_min_bars")]
    pub min_bars: usize,
    /// Snapshot features that must be defined for the day to be kept.
    #[serde(default)]
    pub required_features: Vec<FeatureName>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            cutoff: default_cutoff(),
            min_bars: default_min_bars(),
            required_features: Vec::new(),
        }
    }
}

/// Why a day was excluded from the daily dataset. Non-fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum InsufficientData {
    #[error("{symbol} {date}: no bars at or before cutoff {cutoff}")]
    NoBarsBeforeCutoff {
        symbol: String,
        date: NaiveDate,
        cutoff: NaiveTime,
    },
    #[error("{symbol} {date}: {have} bars, need at least {need}")]
    TooFewBars {
        symbol: String,
        date: NaiveDate,
        have: usize,
        need: usize,
    },
    #[error("{symbol} {date}: feature {feature} undefined at cutoff")]
    UndefinedFeature {
        symbol: String,
        date: NaiveDate,
        feature: FeatureName,
    },
    #[error("{symbol} {date}: end-of-day vwap undefined (no volume)")]
    UndefinedTarget { symbol: String, date: NaiveDate },
    /// Only reachable by calling `aggregate` directly; `aggregate_all`
    /// never produces an empty day.
    #[error("empty day: no bars to aggregate")]
    EmptyDay,
}

impl InsufficientData {
    /// Stable label for counting.
    pub fn kind(&self) -> &'static str {
        match self {
            InsufficientData::NoBarsBeforeCutoff { .. } => "no_bars_before_cutoff",
            InsufficientData::TooFewBars { .. } => "too_few_bars",
            InsufficientData::UndefinedFeature { .. } => "undefined_feature",
            InsufficientData::UndefinedTarget { .. } => "undefined_target",
            InsufficientData::EmptyDay => "empty_day",
        }
    }
}

/// Daily vectors plus the days that were excluded.
#[derive(Debug, Clone, Default)]
pub struct DailyDataset {
    /// Chronological (per symbol) daily rows.
    pub vectors: Vec<DailyFeatureVector>,
    pub excluded: Vec<InsufficientData>,
}

/// Reduces enriched days to daily feature vectors.
#[derive(Debug, Clone, Default)]
pub struct DailyAggregator {
    config: AggregationConfig,
}

impl DailyAggregator {
    pub fn new(config: AggregationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Aggregate one (symbol, date). An empty slice yields `EmptyDay`.
    pub fn aggregate(&self, day: &[EnrichedBar]) -> Result<DailyFeatureVector, InsufficientData> {
        let Some(last) = day.last() else {
            return Err(InsufficientData::EmptyDay);
        };
        let symbol = last.bar.symbol.clone();
        let date = last.bar.date();

        if day.len() < self.config.min_bars {
            return Err(InsufficientData::TooFewBars {
                symbol,
                date,
                have: day.len(),
                need: self.config.min_bars,
            });
        }

        let cutoff = self.config.cutoff;
        let (bar_count, at_cutoff) = day
            .iter()
            .take_while(|row| row.bar.time() <= cutoff)
            .fold((0usize, None), |(n, _), row| (n + 1, Some(row)));
        let Some(at_cutoff) = at_cutoff else {
            return Err(InsufficientData::NoBarsBeforeCutoff {
                symbol,
                date,
                cutoff,
            });
        };

        let snapshot = CutoffSnapshot {
            cutoff,
            bar_count,
            open: day[0].bar.open,
            close: at_cutoff.bar.close,
            vwap: at_cutoff.vwap,
            vwap_deviation: at_cutoff.vwap_deviation,
            price_trend: at_cutoff.price_trend,
            cumulative_volume: at_cutoff.cumulative_volume,
            last_return: at_cutoff.price_return,
            volatility: at_cutoff.intraday_volatility,
        };

        let Some(eod_vwap) = last.vwap else {
            return Err(InsufficientData::UndefinedTarget { symbol, date });
        };
        let targets = DailyTargets {
            vwap: eod_vwap,
            close: last.bar.close,
            volume: last.cumulative_volume,
        };

        let vector = DailyFeatureVector {
            symbol,
            date,
            day_of_week: last.session.day_of_week,
            macro_flags: last.macro_flags,
            bar_count: day.len(),
            snapshot,
            targets,
        };

        if let Some(feature) = self
            .config
            .required_features
            .iter()
            .copied()
            .find(|f| vector.feature(*f).is_none())
        {
            return Err(InsufficientData::UndefinedFeature {
                symbol: vector.symbol,
                date: vector.date,
                feature,
            });
        }

        Ok(vector)
    }

    /// Aggregate every day of an enriched stream; excluded days are
    /// collected, never imputed.
    pub fn aggregate_all(&self, enriched: &[EnrichedBar]) -> DailyDataset {
        let mut dataset = DailyDataset::default();
        for day in split_enriched_days(enriched) {
            match self.aggregate(day) {
                Ok(v) => dataset.vectors.push(v),
                Err(e) => {
                    debug!(reason = e.kind(), "excluding day: {e}");
                    dataset.excluded.push(e);
                }
            }
        }
        dataset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bar, MacroFlags, NoMacroEvents, PriceBasis};
    use crate::features::intraday::{FeatureConfig, IntradayEngine};

    fn bar(day: u32, h: u32, m: u32, close: f64, volume: f64) -> Bar {
        Bar {
            symbol: "SPY".into(),
            timestamp: NaiveDate::from_ymd_opt(2024, 1, day)
                .unwrap()
                .and_hms_opt(h, m, 0)
                .unwrap(),
            open: close - 1.0,
            high: close + 0.5,
            low: close - 1.5,
            close,
            volume,
        }
    }

    fn enrich(bars: &[Bar]) -> Vec<EnrichedBar> {
        IntradayEngine::new(FeatureConfig {
            price_basis: PriceBasis::Close,
            ..Default::default()
        })
        .enrich_day(bars, MacroFlags::default())
        .unwrap()
    }

    fn config(cutoff: (u32, u32), required: Vec<FeatureName>) -> AggregationConfig {
        AggregationConfig {
            cutoff: NaiveTime::from_hms_opt(cutoff.0, cutoff.1, 0).unwrap(),
            min_bars: 1,
            required_features: required,
        }
    }

    #[test]
    fn snapshot_uses_bars_up_to_cutoff_inclusive() {
        let day = enrich(&[
            bar(2, 9, 30, 100.0, 10.0),
            bar(2, 9, 35, 102.0, 10.0),
            bar(2, 9, 40, 104.0, 20.0),
        ]);
        let agg = DailyAggregator::new(config((9, 35), vec![FeatureName::CutoffVwap]));
        let v = agg.aggregate(&day).unwrap();

        assert_eq!(v.snapshot.bar_count, 2);
        assert_eq!(v.snapshot.close, 102.0);
        assert_eq!(v.snapshot.vwap, Some(101.0));
        assert_eq!(v.snapshot.cumulative_volume, 20.0);
        assert_eq!(v.snapshot.open, 99.0);
        // Targets use the full day
        assert_eq!(v.targets.close, 104.0);
        assert_eq!(v.targets.volume, 40.0);
        assert!((v.targets.vwap - (1000.0 + 1020.0 + 2080.0) / 40.0).abs() < 1e-12);
        assert_eq!(v.bar_count, 3);
    }

    #[test]
    fn no_bars_before_cutoff_excludes_day() {
        let day = enrich(&[bar(2, 12, 0, 100.0, 10.0)]);
        let agg = DailyAggregator::new(config((11, 30), vec![]));
        let err = agg.aggregate(&day).unwrap_err();
        assert_eq!(err.kind(), "no_bars_before_cutoff");
    }

    #[test]
    fn min_bars_excludes_short_day() {
        let day = enrich(&[bar(2, 9, 30, 100.0, 10.0)]);
        let agg = DailyAggregator::new(AggregationConfig {
            min_bars: 2,
            ..config((11, 30), vec![])
        });
        assert!(matches!(
            agg.aggregate(&day).unwrap_err(),
            InsufficientData::TooFewBars { have: 1, need: 2, .. }
        ));
    }

    #[test]
    fn undefined_required_feature_excludes_day() {
        // Two bars → one return → volatility undefined
        let day = enrich(&[bar(2, 9, 30, 100.0, 10.0), bar(2, 9, 35, 101.0, 10.0)]);
        let agg = DailyAggregator::new(config((11, 30), vec![FeatureName::CutoffVolatility]));
        assert!(matches!(
            agg.aggregate(&day).unwrap_err(),
            InsufficientData::UndefinedFeature {
                feature: FeatureName::CutoffVolatility,
                ..
            }
        ));

        // Not required → kept, with the undefined value preserved as None
        let agg = DailyAggregator::new(config((11, 30), vec![FeatureName::CutoffVwap]));
        let v = agg.aggregate(&day).unwrap();
        assert_eq!(v.snapshot.volatility, None);
    }

    #[test]
    fn zero_volume_day_has_undefined_target() {
        let day = enrich(&[bar(2, 9, 30, 100.0, 0.0), bar(2, 9, 35, 101.0, 0.0)]);
        let agg = DailyAggregator::new(config((11, 30), vec![]));
        assert_eq!(agg.aggregate(&day).unwrap_err().kind(), "undefined_target");
    }

    #[test]
    fn empty_slice_is_an_empty_day() {
        let agg = DailyAggregator::new(config((11, 30), vec![]));
        assert_eq!(agg.aggregate(&[]), Err(InsufficientData::EmptyDay));
        assert_eq!(InsufficientData::EmptyDay.kind(), "empty_day");
    }

    #[test]
    fn cutoff_parses_with_or_without_seconds() {
        assert_eq!(hhmm::parse("11:30"), NaiveTime::from_hms_opt(11, 30, 0));
        assert_eq!(hhmm::parse("09:45:00"), NaiveTime::from_hms_opt(9, 45, 0));
        assert_eq!(hhmm::parse("noon"), None);

        let cfg: AggregationConfig = serde_json::from_str(r#"{"cutoff":"10:15"}"#).unwrap();
        assert_eq!(cfg.cutoff, NaiveTime::from_hms_opt(10, 15, 0).unwrap());
        assert_eq!(cfg.min_bars, 1);
        assert!(cfg.required_features.is_empty());
        assert!(serde_json::to_string(&cfg).unwrap().contains(r#""cutoff":"10:15""#));
    }

    #[test]
    fn aggregate_all_collects_exclusions() {
        let bars = vec![
            bar(2, 9, 30, 100.0, 10.0),
            bar(3, 12, 0, 100.0, 10.0),
            bar(4, 9, 30, 100.0, 10.0),
        ];
        let rows = IntradayEngine::default()
            .enrich_stream(&bars, &NoMacroEvents)
            .unwrap();
        let agg = DailyAggregator::new(config((11, 30), vec![FeatureName::CutoffVwap]));
        let ds = agg.aggregate_all(&rows);
        assert_eq!(ds.vectors.len(), 2);
        assert_eq!(ds.excluded.len(), 1);
        assert_eq!(ds.vectors[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(ds.vectors[1].date, NaiveDate::from_ymd_opt(2024, 1, 4).unwrap());
    }
}
