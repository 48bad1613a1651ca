//! Day-boundary helpers for "as of date" queries.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// First instant of a UTC calendar day.
pub fn beginning_of_day(date: NaiveDate) -> Timestamp {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

/// Last representable instant of a UTC calendar day (inclusive bound).
pub fn end_of_day(date: NaiveDate) -> Timestamp {
    beginning_of_day(date) + Duration::days(1) - Duration::nanoseconds(1)
}

/// Time left until the end of the day containing `at`.
pub fn until_end_of_day(at: Timestamp) -> Duration {
    let remaining = end_of_day(at.date_naive()) - at;
    if remaining < Duration::zero() {
        Duration::zero()
    } else {
        remaining
    }
}

/// `count` consecutive calendar days ending at `last`, oldest first.
pub fn trailing_days(last: NaiveDate, count: usize) -> Vec<NaiveDate> {
    (0..count)
        .rev()
        .map(|back| last - Duration::days(back as i64))
        .collect()
}

/// Duration extensions for convenient construction.
pub trait DurationExt {
    fn as_std(&self) -> std::time::Duration;
}

impl DurationExt for Duration {
    fn as_std(&self) -> std::time::Duration {
        self.to_std().unwrap_or(std::time::Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_day_bounds() {
        let eod = end_of_day(day(5));
        assert_eq!(eod.date_naive(), day(5));
        assert_eq!((eod + Duration::nanoseconds(1)).date_naive(), day(6));
        assert_eq!(beginning_of_day(day(6)) - eod, Duration::nanoseconds(1));
    }

    #[test]
    fn test_until_end_of_day() {
        let noon = beginning_of_day(day(5)) + Duration::hours(12);
        let left = until_end_of_day(noon);
        assert!(left > Duration::hours(11) && left < Duration::hours(12));
        assert_eq!(until_end_of_day(end_of_day(day(5))), Duration::zero());
    }

    #[test]
    fn test_trailing_days() {
        let days = trailing_days(day(10), 3);
        assert_eq!(days, vec![day(8), day(9), day(10)]);
        assert!(trailing_days(day(10), 0).is_empty());
    }
}
