//! Macro-event day flags and the calendar collaborator that supplies them.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Day-level macro-event flags, broadcast to every bar of the day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroFlags {
    pub is_cpi_day: bool,
    pub is_nfp_day: bool,
    pub is_month_end: bool,
}

impl MacroFlags {
    /// CPI release, non-farm payrolls release, or month end.
    pub fn any(&self) -> bool {
        self.is_cpi_day || self.is_nfp_day || self.is_month_end
    }
}

/// Date → macro flags lookup. Queried once per trading day.
pub trait MacroCalendar: Send + Sync {
    fn flags(&self, date: NaiveDate) -> MacroFlags;

    fn is_event_day(&self, date: NaiveDate) -> bool {
        self.flags(date).any()
    }
}

/// Calendar with no events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMacroEvents;

impl MacroCalendar for NoMacroEvents {
    fn flags(&self, _date: NaiveDate) -> MacroFlags {
        MacroFlags::default()
    }
}

/// In-memory calendar of CPI, NFP and month-end dates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCalendar {
    pub cpi: HashSet<NaiveDate>,
    pub nfp: HashSet<NaiveDate>,
    pub month_end: HashSet<NaiveDate>,
}

impl EventCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cpi(mut self, dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.cpi.extend(dates);
        self
    }

    pub fn with_nfp(mut self, dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.nfp.extend(dates);
        self
    }

    pub fn with_month_end(mut self, dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.month_end.extend(dates);
        self
    }

    pub fn len(&self) -> usize {
        self.cpi.len() + self.nfp.len() + self.month_end.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MacroCalendar for EventCalendar {
    fn flags(&self, date: NaiveDate) -> MacroFlags {
        MacroFlags {
            is_cpi_day: self.cpi.contains(&date),
            is_nfp_day: self.nfp.contains(&date),
            is_month_end: self.month_end.contains(&date),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn event_calendar_flags() {
        let cal = EventCalendar::new()
            .with_cpi([d(2024, 1, 11)])
            .with_nfp([d(2024, 1, 5)])
            .with_month_end([d(2024, 1, 31)]);

        assert!(cal.flags(d(2024, 1, 11)).is_cpi_day);
        assert!(cal.flags(d(2024, 1, 5)).is_nfp_day);
        assert!(cal.flags(d(2024, 1, 31)).is_month_end);
        assert!(cal.is_event_day(d(2024, 1, 31)));
        assert!(!cal.is_event_day(d(2024, 1, 10)));
        assert_eq!(cal.len(), 3);
    }

    #[test]
    fn no_events_is_always_false() {
        assert!(!NoMacroEvents.is_event_day(d(2024, 1, 31)));
    }
}
