//! Bar — the fundamental market data unit.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Raw 5-minute OHLCV bar as read from a file, before validation.
///
/// Nothing about a `RawBar` is trusted: prices may be NaN, volume may be
/// negative, and the same (symbol, timestamp) may appear more than once.
/// The normalizer turns a stream of these into validated [`Bar`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBar {
    pub symbol: String,
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Validated 5-minute OHLCV bar for a single symbol.
///
/// Timestamps are exchange-local and mark the start of the bar. Volume is a
/// float because consolidated-tape volumes can be fractional after
/// adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    pub fn time(&self) -> NaiveTime {
        self.timestamp.time()
    }

    /// (high + low + close) / 3.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// Returns true if this bar belongs to the same (symbol, date) day as `other`.
    pub fn same_day(&self, other: &Bar) -> bool {
        self.symbol == other.symbol && self.date() == other.date()
    }
}

/// Which price a bar contributes to the running VWAP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceBasis {
    /// (high + low + close) / 3
    #[default]
    Typical,
    /// Close only.
    Close,
}

impl PriceBasis {
    pub fn price(self, bar: &Bar) -> f64 {
        match self {
            PriceBasis::Typical => bar.typical_price(),
            PriceBasis::Close => bar.close,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bar() -> Bar {
        Bar {
            symbol: "SPY".into(),
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
            open: 100.0,
            high: 105.0,
            low: 98.0,
            close: 103.0,
            volume: 50_000.0,
        }
    }

    #[test]
    fn typical_price_is_hlc_mean() {
        let bar = sample_bar();
        assert!((bar.typical_price() - 102.0).abs() < 1e-12);
        assert_eq!(PriceBasis::Typical.price(&bar), bar.typical_price());
        assert_eq!(PriceBasis::Close.price(&bar), 103.0);
    }

    #[test]
    fn same_day_requires_symbol_and_date() {
        let a = sample_bar();
        let mut b = sample_bar();
        b.timestamp = a.timestamp + chrono::Duration::minutes(5);
        assert!(a.same_day(&b));

        b.symbol = "QQQ".into();
        assert!(!a.same_day(&b));

        let mut c = sample_bar();
        c.timestamp = a.timestamp + chrono::Duration::days(1);
        assert!(!a.same_day(&c));
    }

    #[test]
    fn bar_serialization_roundtrip() {
        let bar = sample_bar();
        let json = serde_json::to_string(&bar).unwrap();
        let deser: Bar = serde_json::from_str(&json).unwrap();
        assert_eq!(bar, deser);
    }

    #[test]
    fn price_basis_serde_names() {
        let basis: PriceBasis = serde_json::from_str("\"close\"").unwrap();
        assert_eq!(basis, PriceBasis::Close);
        assert_eq!(PriceBasis::default(), PriceBasis::Typical);
    }
}
