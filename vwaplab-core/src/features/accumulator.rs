//! Day-to-date accumulators.
//!
//! All state the feature engine carries across bars of one trading day lives
//! here, so enrichment is a fold of [`DayAccumulator::push`] over the day's
//! bars. A fresh accumulator is created at every (symbol, date) boundary.

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::domain::{Bar, EnrichedBar, MacroFlags, PriceBasis, SessionContext};

/// Ordering violation inside the feature engine. The normalizer guarantees
/// sorted input, so any of these indicates an upstream bug and aborts
/// processing of the symbol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DayBoundaryError {
    #[error("{symbol}: bar at {timestamp} does not come after previous bar at {previous}")]
    OutOfOrder {
        symbol: String,
        previous: NaiveDateTime,
        timestamp: NaiveDateTime,
    },
    #[error("{symbol}: day {date} follows {previous_date}; stream is not sorted")]
    DayRegression {
        symbol: String,
        previous_date: NaiveDate,
        date: NaiveDate,
    },
    #[error("bar {symbol} @ {timestamp} does not belong to day {day_symbol} {day_date}")]
    ForeignBar {
        symbol: String,
        timestamp: NaiveDateTime,
        day_symbol: String,
        day_date: NaiveDate,
    },
}

/// Welford's online mean/variance.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    pub fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Sample variance (n − 1 denominator); `None` below two samples.
    pub fn sample_variance(&self) -> Option<f64> {
        (self.count >= 2).then(|| (self.m2 / (self.count - 1) as f64).max(0.0))
    }

    pub fn sample_std(&self) -> Option<f64> {
        self.sample_variance().map(f64::sqrt)
    }
}

#[derive(Debug, Clone)]
struct DayKey {
    symbol: String,
    date: NaiveDate,
}

/// Running state for one (symbol, date).
#[derive(Debug, Clone)]
pub struct DayAccumulator {
    basis: PriceBasis,
    key: Option<DayKey>,
    day_open: f64,
    prev_close: Option<f64>,
    last_timestamp: Option<NaiveDateTime>,
    volume_sum: f64,
    pv_sum: f64,
    returns: Welford,
}

impl DayAccumulator {
    pub fn new(basis: PriceBasis) -> Self {
        Self {
            basis,
            key: None,
            day_open: f64::NAN,
            prev_close: None,
            last_timestamp: None,
            volume_sum: 0.0,
            pv_sum: 0.0,
            returns: Welford::default(),
        }
    }

    /// True until the first bar of the day has been pushed.
    pub fn is_empty(&self) -> bool {
        self.key.is_none()
    }

    /// Consume the next bar of the day and emit its enriched row.
    ///
    /// The first bar fixes the day key and the day open. Later bars must
    /// share the key and have strictly increasing timestamps.
    pub fn push(&mut self, bar: &Bar, macro_flags: MacroFlags) -> Result<EnrichedBar, DayBoundaryError> {
        match &self.key {
            None => {
                self.key = Some(DayKey {
                    symbol: bar.symbol.clone(),
                    date: bar.date(),
                });
                self.day_open = bar.open;
            }
            Some(key) => {
                if key.symbol != bar.symbol || key.date != bar.date() {
                    return Err(DayBoundaryError::ForeignBar {
                        symbol: bar.symbol.clone(),
                        timestamp: bar.timestamp,
                        day_symbol: key.symbol.clone(),
                        day_date: key.date,
                    });
                }
                if let Some(previous) = self.last_timestamp {
                    if bar.timestamp <= previous {
                        return Err(DayBoundaryError::OutOfOrder {
                            symbol: bar.symbol.clone(),
                            previous,
                            timestamp: bar.timestamp,
                        });
                    }
                }
            }
        }

        self.volume_sum += bar.volume;
        self.pv_sum += self.basis.price(bar) * bar.volume;

        let price_return = self
            .prev_close
            .filter(|pc| *pc > 0.0)
            .map(|pc| bar.close / pc - 1.0)
            .filter(|r| r.is_finite());
        if let Some(r) = price_return {
            self.returns.push(r);
        }

        let vwap = (self.volume_sum > 0.0).then(|| self.pv_sum / self.volume_sum);

        self.prev_close = Some(bar.close);
        self.last_timestamp = Some(bar.timestamp);

        Ok(EnrichedBar {
            bar: bar.clone(),
            session: SessionContext::from_timestamp(bar.timestamp),
            cumulative_volume: self.volume_sum,
            price_return,
            intraday_volatility: self.returns.sample_std(),
            price_trend: bar.close - self.day_open,
            vwap,
            vwap_deviation: vwap.map(|v| bar.close - v),
            macro_flags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(minute: u32, close: f64, volume: f64) -> Bar {
        Bar {
            symbol: "SPY".into(),
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(9, 30 + minute, 0)
                .unwrap(),
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume,
        }
    }

    #[test]
    fn welford_matches_two_pass_variance() {
        let xs = [0.01, -0.02, 0.005, 0.03, -0.001];
        let mut w = Welford::default();
        for x in xs {
            w.push(x);
        }
        let mean = xs.iter().sum::<f64>() / xs.len() as f64;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
        assert!((w.mean().unwrap() - mean).abs() < 1e-15);
        assert!((w.sample_variance().unwrap() - var).abs() < 1e-15);
    }

    #[test]
    fn welford_undefined_below_two_samples() {
        let mut w = Welford::default();
        assert!(w.mean().is_none());
        assert!(w.sample_std().is_none());
        w.push(1.0);
        assert!(w.sample_std().is_none());
        w.push(1.0);
        assert_eq!(w.sample_std(), Some(0.0));
    }

    #[test]
    fn push_accumulates_day_state() {
        let mut acc = DayAccumulator::new(PriceBasis::Close);
        assert!(acc.is_empty());
        let e0 = acc.push(&bar(0, 100.0, 10.0), MacroFlags::default()).unwrap();
        let e1 = acc.push(&bar(5, 102.0, 30.0), MacroFlags::default()).unwrap();

        assert_eq!(e0.cumulative_volume, 10.0);
        assert_eq!(e0.price_return, None);
        assert_eq!(e0.vwap, Some(100.0));
        assert_eq!(e0.price_trend, 0.5);

        assert_eq!(e1.cumulative_volume, 40.0);
        assert!((e1.price_return.unwrap() - 0.02).abs() < 1e-12);
        assert_eq!(e1.intraday_volatility, None);
        assert!((e1.vwap.unwrap() - (100.0 * 10.0 + 102.0 * 30.0) / 40.0).abs() < 1e-12);
        assert_eq!(e1.price_trend, 102.0 - 99.5);
    }

    #[test]
    fn push_rejects_out_of_order_and_foreign_bars() {
        let mut acc = DayAccumulator::new(PriceBasis::Typical);
        acc.push(&bar(5, 100.0, 1.0), MacroFlags::default()).unwrap();

        let err = acc.push(&bar(5, 100.0, 1.0), MacroFlags::default()).unwrap_err();
        assert!(matches!(err, DayBoundaryError::OutOfOrder { .. }));

        let mut other = bar(10, 100.0, 1.0);
        other.symbol = "QQQ".into();
        let err = acc.push(&other, MacroFlags::default()).unwrap_err();
        assert!(matches!(err, DayBoundaryError::ForeignBar { .. }));
    }

    #[test]
    fn zero_volume_leaves_vwap_undefined() {
        let mut acc = DayAccumulator::new(PriceBasis::Typical);
        let e = acc.push(&bar(0, 100.0, 0.0), MacroFlags::default()).unwrap();
        assert_eq!(e.vwap, None);
        assert_eq!(e.vwap_deviation, None);
    }
}
