//! Timestamp value object for immutable points in time.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Immutable point in time, always UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a timestamp from a DateTime<Utc>.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the inner DateTime.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Checks if this timestamp is before another.
    pub fn is_before(&self, other: &Timestamp) -> bool {
        self.0 < other.0
    }

    /// Checks if this timestamp is after another.
    pub fn is_after(&self, other: &Timestamp) -> bool {
        self.0 > other.0
    }

    /// Creates a new timestamp by adding the specified number of days.
    pub fn add_days(&self, days: i64) -> Self {
        Self(self.0 + Duration::days(days))
    }

    /// Creates a new timestamp by adding calendar months.
    ///
    /// Calendar-aware: Jan 31 + 1 month lands on Feb 28 (or 29), it does
    /// not roll into March. Billing period arithmetic depends on this.
    pub fn add_months(&self, months: u32) -> Self {
        Self(self.0 + Months::new(months))
    }

    /// Creates a new timestamp by adding calendar years (12-month steps,
    /// so Feb 29 + 1 year lands on Feb 28).
    pub fn add_years(&self, years: u32) -> Self {
        self.add_months(years * 12)
    }

    /// Creates a timestamp from Unix seconds.
    ///
    /// Out-of-range values clamp to the epoch; providers send timestamps
    /// they generated, so this only matters for corrupt payloads.
    pub fn from_unix_secs(secs: i64) -> Self {
        Self(
            DateTime::<Utc>::from_timestamp(secs, 0)
                .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap_or_default()),
        )
    }

    /// Returns the timestamp as Unix seconds.
    pub fn as_unix_secs(&self) -> i64 {
        self.0.timestamp()
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(y: i32, m: u32, d: u32) -> Timestamp {
        Timestamp::from_datetime(Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap())
    }

    #[test]
    fn add_months_from_jan_31_clamps_to_feb_end() {
        let end = ts(2025, 1, 31).add_months(1);
        assert_eq!(end, ts(2025, 2, 28));
    }

    #[test]
    fn add_months_from_jan_31_leap_year() {
        let end = ts(2024, 1, 31).add_months(1);
        assert_eq!(end, ts(2024, 2, 29));
    }

    #[test]
    fn add_months_regular_dates_unchanged() {
        assert_eq!(ts(2025, 3, 15).add_months(1), ts(2025, 4, 15));
        assert_eq!(ts(2025, 6, 1).add_months(3), ts(2025, 9, 1));
    }

    #[test]
    fn add_years_from_leap_day_clamps() {
        assert_eq!(ts(2024, 2, 29).add_years(1), ts(2025, 2, 28));
    }

    #[test]
    fn unix_secs_round_trip() {
        let t = Timestamp::from_unix_secs(1_700_000_000);
        assert_eq!(t.as_unix_secs(), 1_700_000_000);
    }

    #[test]
    fn ordering_works() {
        assert!(ts(2025, 1, 1).is_before(&ts(2025, 1, 2)));
        assert!(ts(2025, 1, 2).is_after(&ts(2025, 1, 1)));
    }
}
