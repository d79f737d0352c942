//! DailyFeatureVector — one row per (symbol, date) for the forecasting model.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use super::macro_flags::MacroFlags;

/// End-of-day quantity the backtest forecasts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Full-day VWAP.
    #[default]
    Vwap,
    /// Last close of the day.
    Close,
    /// Total day volume.
    Volume,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::Vwap => "vwap",
            TargetKind::Close => "close",
            TargetKind::Volume => "volume",
        }
    }
}

/// Model input columns available from the cutoff snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureName {
    CutoffClose,
    CutoffVwap,
    CutoffVwapDeviation,
    CutoffPriceTrend,
    CutoffCumulativeVolume,
    CutoffReturn,
    CutoffVolatility,
    DayOfWeek,
    MacroEventDay,
}

impl FeatureName {
    pub const ALL: [FeatureName; 9] = [
        FeatureName::CutoffClose,
        FeatureName::CutoffVwap,
        FeatureName::CutoffVwapDeviation,
        FeatureName::CutoffPriceTrend,
        FeatureName::CutoffCumulativeVolume,
        FeatureName::CutoffReturn,
        FeatureName::CutoffVolatility,
        FeatureName::DayOfWeek,
        FeatureName::MacroEventDay,
    ];

    /// Default model inputs. Omits `CutoffClose`, which is an exact linear
    /// combination of `CutoffVwap` and `CutoffVwapDeviation`.
    pub fn default_set() -> Vec<FeatureName> {
        vec![
            FeatureName::CutoffVwap,
            FeatureName::CutoffVwapDeviation,
            FeatureName::CutoffPriceTrend,
            FeatureName::CutoffCumulativeVolume,
            FeatureName::CutoffVolatility,
            FeatureName::MacroEventDay,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FeatureName::CutoffClose => "cutoff_close",
            FeatureName::CutoffVwap => "cutoff_vwap",
            FeatureName::CutoffVwapDeviation => "cutoff_vwap_deviation",
            FeatureName::CutoffPriceTrend => "cutoff_price_trend",
            FeatureName::CutoffCumulativeVolume => "cutoff_cumulative_volume",
            FeatureName::CutoffReturn => "cutoff_return",
            FeatureName::CutoffVolatility => "cutoff_volatility",
            FeatureName::DayOfWeek => "day_of_week",
            FeatureName::MacroEventDay => "macro_event_day",
        }
    }
}

impl std::fmt::Display for FeatureName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of the day as of the cutoff. Every field is computed only from bars
/// at or before the cutoff time; undefined day-to-date values stay `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutoffSnapshot {
    pub cutoff: NaiveTime,
    pub bar_count: usize,
    pub open: f64,
    pub close: f64,
    pub vwap: Option<f64>,
    pub vwap_deviation: Option<f64>,
    pub price_trend: f64,
    pub cumulative_volume: f64,
    pub last_return: Option<f64>,
    pub volatility: Option<f64>,
}

/// Full-day target values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyTargets {
    pub vwap: f64,
    pub close: f64,
    pub volume: f64,
}

/// One row per (symbol, date): cutoff features plus end-of-day targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyFeatureVector {
    pub symbol: String,
    pub date: NaiveDate,
    pub day_of_week: u32,
    pub macro_flags: MacroFlags,
    pub bar_count: usize,
    pub snapshot: CutoffSnapshot,
    pub targets: DailyTargets,
}

impl DailyFeatureVector {
    /// Value of one model input, `None` when it is undefined at the cutoff.
    pub fn feature(&self, name: FeatureName) -> Option<f64> {
        let s = &self.snapshot;
        match name {
            FeatureName::CutoffClose => Some(s.close),
            FeatureName::CutoffVwap => s.vwap,
            FeatureName::CutoffVwapDeviation => s.vwap_deviation,
            FeatureName::CutoffPriceTrend => Some(s.price_trend),
            FeatureName::CutoffCumulativeVolume => Some(s.cumulative_volume),
            FeatureName::CutoffReturn => s.last_return,
            FeatureName::CutoffVolatility => s.volatility,
            FeatureName::DayOfWeek => Some(self.day_of_week as f64),
            FeatureName::MacroEventDay => Some(if self.macro_flags.any() { 1.0 } else { 0.0 }),
        }
    }

    /// Feature values in the order of `names`; `None` if any is undefined.
    pub fn features(&self, names: &[FeatureName]) -> Option<Vec<f64>> {
        names.iter().map(|n| self.feature(*n)).collect()
    }

    pub fn target(&self, kind: TargetKind) -> f64 {
        match kind {
            TargetKind::Vwap => self.targets.vwap,
            TargetKind::Close => self.targets.close,
            TargetKind::Volume => self.targets.volume,
        }
    }
}
