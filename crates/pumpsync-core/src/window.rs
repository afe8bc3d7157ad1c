use crate::{Error, Result};
use chrono::{NaiveDateTime, TimeDelta};
use std::time::Duration;

/// Trailing time window a poll looks back over.
///
/// The lower bound is inclusive: a row stamped exactly `now - window` is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    span: Duration,
}

impl TimeWindow {
    fn new(span: Duration) -> Self {
        Self { span }
    }

    /// Window of `hours`, saturating on absurd values. Use [`TimeWindow::try_hours`]
    /// for values that come from configuration.
    pub fn hours(hours: u64) -> Self {
        Self::new(Duration::from_secs(hours.saturating_mul(3600)))
    }

    /// Window of `hours`; zero or a span the clock cannot represent is a
    /// configuration error
    pub fn try_hours(hours: u64) -> Result<Self> {
        if hours == 0 {
            return Err(Error::Configuration(
                "window_hours must be at least 1".to_string(),
            ));
        }
        hours
            .checked_mul(3600)
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(TimeDelta::try_seconds)
            .map(|_| Self::hours(hours))
            .ok_or_else(|| {
                Error::Configuration(format!("window_hours {} is out of range", hours))
            })
    }

    pub fn as_secs(&self) -> i64 {
        i64::try_from(self.span.as_secs()).unwrap_or(i64::MAX)
    }

    pub fn lower_bound(&self, now: NaiveDateTime) -> NaiveDateTime {
        TimeDelta::try_seconds(self.as_secs())
            .and_then(|delta| now.checked_sub_signed(delta))
            .unwrap_or(NaiveDateTime::MIN)
    }

    pub fn contains(&self, ts: NaiveDateTime, now: NaiveDateTime) -> bool {
        ts >= self.lower_bound(now)
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self::hours(12)
    }
}

/// What a single poll asks the source for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    pub window: TimeWindow,

    /// Drop rows whose processed flag is set. Some back offices set the
    /// flag before the row is reported, so it can be turned off.
    pub exclude_processed: bool,
}

impl Default for FetchRequest {
    fn default() -> Self {
        Self {
            window: TimeWindow::default(),
            exclude_processed: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn boundary_is_inclusive() {
        let window = TimeWindow::hours(1);
        let boundary = noon() - chrono::Duration::hours(1);
        assert!(window.contains(boundary, noon()));
    }

    #[test]
    fn one_second_past_the_boundary_is_excluded() {
        for hours in [1, 12] {
            let window = TimeWindow::hours(hours);
            let stale = window.lower_bound(noon()) - chrono::Duration::seconds(1);
            assert!(!window.contains(stale, noon()), "window {hours}h");
        }
    }

    #[test]
    fn configured_hours_are_range_checked() {
        assert_eq!(TimeWindow::try_hours(12).unwrap(), TimeWindow::default());
        assert!(matches!(TimeWindow::try_hours(0), Err(Error::Configuration(_))));
        assert!(matches!(
            TimeWindow::try_hours(u64::MAX / 1000),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn huge_window_contains_everything_without_panicking() {
        let window = TimeWindow::hours(u64::MAX);
        assert_eq!(window.lower_bound(noon()), NaiveDateTime::MIN);
        assert!(window.contains(NaiveDateTime::MIN, noon()));
    }

    #[test]
    fn recent_rows_are_inside() {
        let window = TimeWindow::default();
        assert!(window.contains(noon() - chrono::Duration::minutes(5), noon()));
        assert!(window.contains(noon(), noon()));
        assert_eq!(window.as_secs(), 12 * 3600);
    }
}
