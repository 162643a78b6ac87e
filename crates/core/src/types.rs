use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Delivery channel for an outbound communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Sms,
    Push,
}

/// Half-open UTC interval `[from, to)` used to bound evidence queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    /// Window covering `days` whole days starting at midnight of `start`.
    /// The final day is included in full, so a 5-day window starting on the
    /// 1st covers the 1st through the 6th.
    pub fn for_days(start: NaiveDate, days: u32) -> Self {
        let from = Utc.from_utc_datetime(&start.and_hms_opt(0, 0, 0).unwrap_or_default());
        let to = from + Duration::days(i64::from(days) + 1);
        Self { from, to }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.from && at < self.to
    }

    /// Date-granularity membership, for evidence that carries no time of day.
    pub fn contains_date(&self, date: NaiveDate) -> bool {
        date >= self.from.date_naive() && date < self.to.date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_bounds() {
        let start = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let window = TimeWindow::for_days(start, 5);

        let inside = Utc.with_ymd_and_hms(2025, 3, 5, 14, 0, 0).unwrap();
        let last_day = Utc.with_ymd_and_hms(2025, 3, 6, 23, 59, 59).unwrap();
        let outside = Utc.with_ymd_and_hms(2025, 3, 7, 0, 0, 0).unwrap();

        assert!(window.contains(inside));
        assert!(window.contains(last_day));
        assert!(!window.contains(outside));
    }

    #[test]
    fn test_window_date_granularity() {
        let start = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let window = TimeWindow::for_days(start, 5);

        assert!(window.contains_date(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()));
        assert!(window.contains_date(NaiveDate::from_ymd_opt(2025, 3, 6).unwrap()));
        assert!(!window.contains_date(NaiveDate::from_ymd_opt(2025, 3, 7).unwrap()));
    }
}
