//! Intraday feature engine — one forward pass per trading day.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::split_runs;
use crate::domain::{Bar, EnrichedBar, MacroCalendar, MacroFlags, PriceBasis, SessionFilter};

use super::accumulator::{DayAccumulator, DayBoundaryError};

/// Feature engine settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Price each bar contributes to the running VWAP.
    #[serde(default)]
    pub price_basis: PriceBasis,
    /// Bars outside the filter are skipped before enrichment.
    #[serde(default)]
    pub session_filter: SessionFilter,
}

/// Turns ordered bars into [`EnrichedBar`]s.
#[derive(Debug, Clone, Default)]
pub struct IntradayEngine {
    config: FeatureConfig,
}

impl IntradayEngine {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    fn accepts(&self, bar: &Bar) -> bool {
        self.config
            .session_filter
            .accepts(crate::domain::Session::classify(bar.time()))
    }

    /// Enrich the bars of a single (symbol, date).
    ///
    /// Bars outside the session filter are skipped. Returns one row per
    /// accepted bar, in input order.
    pub fn enrich_day(
        &self,
        day: &[Bar],
        macro_flags: MacroFlags,
    ) -> Result<Vec<EnrichedBar>, DayBoundaryError> {
        let mut acc = DayAccumulator::new(self.config.price_basis);
        day.iter()
            .filter(|bar| self.accepts(bar))
            .map(|bar| acc.push(bar, macro_flags))
            .collect()
    }

    /// Enrich a (symbol, timestamp)-sorted stream, resetting all day state
    /// whenever the (symbol, date) key changes.
    ///
    /// The macro calendar is queried once per day. A key that moves backwards
    /// (same symbol, earlier date) is a [`DayBoundaryError::DayRegression`].
    pub fn enrich_stream(
        &self,
        bars: &[Bar],
        calendar: &dyn MacroCalendar,
    ) -> Result<Vec<EnrichedBar>, DayBoundaryError> {
        let mut out = Vec::with_capacity(bars.len());
        let mut current: Option<(&Bar, MacroFlags, DayAccumulator)> = None;

        for bar in bars.iter().filter(|bar| self.accepts(bar)) {
            let starts_new_day = match &current {
                None => true,
                Some((first, _, _)) => !first.same_day(bar),
            };

            if starts_new_day {
                if let Some((first, _, _)) = &current {
                    if first.symbol == bar.symbol && bar.date() < first.date() {
                        return Err(DayBoundaryError::DayRegression {
                            symbol: bar.symbol.clone(),
                            previous_date: first.date(),
                            date: bar.date(),
                        });
                    }
                }
                let flags = calendar.flags(bar.date());
                debug!(symbol = %bar.symbol, date = %bar.date(), macro_event_day = flags.any(), "starting day");
                current = Some((bar, flags, DayAccumulator::new(self.config.price_basis)));
            }

            if let Some((_, flags, acc)) = current.as_mut() {
                out.push(acc.push(bar, *flags)?);
            }
        }

        Ok(out)
    }
}

/// Split an enriched stream into contiguous per-(symbol, date) slices.
pub fn split_enriched_days(rows: &[EnrichedBar]) -> Vec<&[EnrichedBar]> {
    split_runs(rows, |a, b| a.bar.same_day(&b.bar))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventCalendar, NoMacroEvents};
    use chrono::NaiveDate;

    fn bar(day: u32, h: u32, m: u32, close: f64, volume: f64) -> Bar {
        Bar {
            symbol: "SPY".into(),
            timestamp: NaiveDate::from_ymd_opt(2024, 1, day)
                .unwrap()
                .and_hms_opt(h, m, 0)
                .unwrap(),
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume,
        }
    }

    #[test]
    fn day_boundary_resets_all_state() {
        let bars = vec![
            bar(2, 9, 30, 100.0, 10.0),
            bar(2, 9, 35, 110.0, 10.0),
            bar(2, 9, 40, 105.0, 10.0),
            bar(3, 9, 30, 50.0, 4.0),
            bar(3, 9, 35, 51.0, 6.0),
        ];
        let engine = IntradayEngine::new(FeatureConfig {
            price_basis: PriceBasis::Close,
            ..Default::default()
        });
        let rows = engine.enrich_stream(&bars, &NoMacroEvents).unwrap();
        assert_eq!(rows.len(), 5);

        let first_of_day2 = &rows[3];
        assert_eq!(first_of_day2.cumulative_volume, 4.0);
        assert_eq!(first_of_day2.price_return, None);
        assert_eq!(first_of_day2.intraday_volatility, None);
        assert_eq!(first_of_day2.price_trend, 0.0);
        assert_eq!(first_of_day2.vwap, Some(50.0));

        let second_of_day2 = &rows[4];
        assert_eq!(second_of_day2.cumulative_volume, 10.0);
        assert!((second_of_day2.price_return.unwrap() - 0.02).abs() < 1e-12);
        assert!((second_of_day2.vwap.unwrap() - (50.0 * 4.0 + 51.0 * 6.0) / 10.0).abs() < 1e-12);
        // Volatility needs two returns from the same day
        assert_eq!(second_of_day2.intraday_volatility, None);
    }

    #[test]
    fn stream_rejects_unsorted_days() {
        let bars = vec![bar(3, 9, 30, 100.0, 1.0), bar(2, 9, 30, 100.0, 1.0)];
        let err = IntradayEngine::default()
            .enrich_stream(&bars, &NoMacroEvents)
            .unwrap_err();
        assert!(matches!(err, DayBoundaryError::DayRegression { .. }));
    }

    #[test]
    fn stream_rejects_unsorted_bars_within_day() {
        let bars = vec![bar(2, 9, 35, 100.0, 1.0), bar(2, 9, 30, 100.0, 1.0)];
        let err = IntradayEngine::default()
            .enrich_stream(&bars, &NoMacroEvents)
            .unwrap_err();
        assert!(matches!(err, DayBoundaryError::OutOfOrder { .. }));
    }

    #[test]
    fn macro_flags_broadcast_to_every_bar_of_the_day() {
        let cal = EventCalendar::new().with_cpi([NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()]);
        let bars = vec![
            bar(2, 9, 30, 100.0, 1.0),
            bar(3, 9, 30, 100.0, 1.0),
            bar(3, 9, 35, 100.0, 1.0),
        ];
        let rows = IntradayEngine::default().enrich_stream(&bars, &cal).unwrap();
        assert!(!rows[0].macro_event_day());
        assert!(rows[1].macro_event_day() && rows[2].macro_event_day());
        assert!(rows[2].macro_flags.is_cpi_day);
    }

    #[test]
    fn session_filter_skips_extended_hours() {
        let bars = vec![
            bar(2, 8, 0, 99.0, 100.0),
            bar(2, 9, 30, 100.0, 1.0),
            bar(2, 16, 30, 101.0, 100.0),
        ];
        let regular = IntradayEngine::default().enrich_day(&bars, MacroFlags::default()).unwrap();
        assert_eq!(regular.len(), 1);
        assert_eq!(regular[0].cumulative_volume, 1.0);

        let extended = IntradayEngine::new(FeatureConfig {
            session_filter: SessionFilter::Extended,
            ..Default::default()
        })
        .enrich_day(&bars, MacroFlags::default())
        .unwrap();
        assert_eq!(extended.len(), 3);
        assert!(extended[0].session.is_pre_market);
        assert!(extended[2].session.is_post_market);
    }

    #[test]
    fn split_enriched_days_groups_by_day() {
        let bars = vec![
            bar(2, 9, 30, 100.0, 1.0),
            bar(2, 9, 35, 100.0, 1.0),
            bar(3, 9, 30, 100.0, 1.0),
        ];
        let rows = IntradayEngine::default().enrich_stream(&bars, &NoMacroEvents).unwrap();
        let days = split_enriched_days(&rows);
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].len(), 2);
    }
}
