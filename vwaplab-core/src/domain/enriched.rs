//! EnrichedBar — a bar plus its day-to-date engineered features.

use serde::{Deserialize, Serialize};

use super::bar::Bar;
use super::macro_flags::MacroFlags;
use super::session::SessionContext;

/// Output row of the intraday feature engine.
///
/// Undefined quantities are `None`:
/// - `price_return` on the first bar of a day,
/// - `intraday_volatility` until two returns have been seen,
/// - `vwap` / `vwap_deviation` while day-to-date volume is zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedBar {
    pub bar: Bar,
    pub session: SessionContext,
    pub cumulative_volume: f64,
    pub price_return: Option<f64>,
    pub intraday_volatility: Option<f64>,
    pub price_trend: f64,
    pub vwap: Option<f64>,
    pub vwap_deviation: Option<f64>,
    pub macro_flags: MacroFlags,
}

impl EnrichedBar {
    pub fn macro_event_day(&self) -> bool {
        self.macro_flags.any()
    }
}
