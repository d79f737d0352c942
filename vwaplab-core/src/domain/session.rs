//! Session context — calendar and market-hours attributes derived per bar.
//!
//! U.S. equity sessions in exchange-local time:
//! - pre-market  04:00–09:30
//! - regular     09:30–16:00
//! - post-market 16:00–20:00
//!
//! Boundaries are start-inclusive, end-exclusive on the bar's start time.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// Bar length in minutes.
pub const BAR_MINUTES: u32 = 5;

/// Number of 5-minute bars in a full regular session (09:30 … 15:55).
pub const REGULAR_SESSION_BARS: usize = 78;

const fn hm(hour: u32, minute: u32) -> NaiveTime {
    match NaiveTime::from_hms_opt(hour, minute, 0) {
        Some(t) => t,
        None => panic!("invalid session boundary"),
    }
}

pub const PRE_MARKET_OPEN: NaiveTime = hm(4, 0);
pub const REGULAR_OPEN: NaiveTime = hm(9, 30);
pub const REGULAR_CLOSE: NaiveTime = hm(16, 0);
pub const POST_MARKET_CLOSE: NaiveTime = hm(20, 0);

/// Market-hours classification of a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Session {
    PreMarket,
    Regular,
    PostMarket,
    Closed,
}

impl Session {
    pub fn classify(time: NaiveTime) -> Self {
        if (REGULAR_OPEN..REGULAR_CLOSE).contains(&time) {
            Session::Regular
        } else if (PRE_MARKET_OPEN..REGULAR_OPEN).contains(&time) {
            Session::PreMarket
        } else if (REGULAR_CLOSE..POST_MARKET_CLOSE).contains(&time) {
            Session::PostMarket
        } else {
            Session::Closed
        }
    }
}

/// Which bars the feature engine consumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionFilter {
    /// Regular session only.
    #[default]
    Regular,
    /// Pre-market, regular and post-market bars.
    Extended,
}

impl SessionFilter {
    pub fn accepts(self, session: Session) -> bool {
        match self {
            SessionFilter::Regular => session == Session::Regular,
            SessionFilter::Extended => session != Session::Closed,
        }
    }
}

/// Calendar and session attributes of a bar. Always derived from the bar's
/// timestamp, never stored on its own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub date: NaiveDate,
    /// Decimal hour of day, e.g. 10:45 → 10.75.
    pub time_of_day: f64,
    /// 0 = Monday … 4 = Friday (5/6 for weekend bars).
    pub day_of_week: u32,
    pub is_regular: bool,
    pub is_pre_market: bool,
    pub is_post_market: bool,
}

impl SessionContext {
    pub fn from_timestamp(ts: NaiveDateTime) -> Self {
        let time = ts.time();
        let session = Session::classify(time);
        Self {
            date: ts.date(),
            time_of_day: decimal_hour(time),
            day_of_week: ts.weekday().num_days_from_monday(),
            is_regular: session == Session::Regular,
            is_pre_market: session == Session::PreMarket,
            is_post_market: session == Session::PostMarket,
        }
    }

    pub fn session(&self) -> Session {
        if self.is_regular {
            Session::Regular
        } else if self.is_pre_market {
            Session::PreMarket
        } else if self.is_post_market {
            Session::PostMarket
        } else {
            Session::Closed
        }
    }
}

/// Hour + minute/60 (+ second/3600).
pub fn decimal_hour(time: NaiveTime) -> f64 {
    time.hour() as f64 + time.minute() as f64 / 60.0 + time.second() as f64 / 3600.0
}

/// All expected regular-session bar start times for one day.
pub fn regular_session_slots() -> impl Iterator<Item = NaiveTime> {
    (0..REGULAR_SESSION_BARS as i64)
        .map(|i| REGULAR_OPEN + chrono::Duration::minutes(i * BAR_MINUTES as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn session_boundaries() {
        assert_eq!(Session::classify(t(3, 55)), Session::Closed);
        assert_eq!(Session::classify(t(4, 0)), Session::PreMarket);
        assert_eq!(Session::classify(t(9, 25)), Session::PreMarket);
        assert_eq!(Session::classify(t(9, 30)), Session::Regular);
        assert_eq!(Session::classify(t(15, 55)), Session::Regular);
        assert_eq!(Session::classify(t(16, 0)), Session::PostMarket);
        assert_eq!(Session::classify(t(19, 55)), Session::PostMarket);
        assert_eq!(Session::classify(t(20, 0)), Session::Closed);
    }

    #[test]
    fn context_fields() {
        // 2024-01-05 is a Friday
        let ts = NaiveDate::from_ymd_opt(2024, 1, 5)
            .unwrap()
            .and_hms_opt(10, 45, 0)
            .unwrap();
        let ctx = SessionContext::from_timestamp(ts);
        assert_eq!(ctx.day_of_week, 4);
        assert!((ctx.time_of_day - 10.75).abs() < 1e-12);
        assert!(ctx.is_regular);
        assert!(!ctx.is_pre_market && !ctx.is_post_market);
        assert_eq!(ctx.session(), Session::Regular);
    }

    #[test]
    fn regular_slots_cover_session() {
        let slots: Vec<NaiveTime> = regular_session_slots().collect();
        assert_eq!(slots.len(), REGULAR_SESSION_BARS);
        assert_eq!(slots[0], t(9, 30));
        assert_eq!(*slots.last().unwrap(), t(15, 55));
    }

    #[test]
    fn filter_acceptance() {
        assert!(SessionFilter::Regular.accepts(Session::Regular));
        assert!(!SessionFilter::Regular.accepts(Session::PreMarket));
        assert!(SessionFilter::Extended.accepts(Session::PostMarket));
        assert!(!SessionFilter::Extended.accepts(Session::Closed));
    }
}
