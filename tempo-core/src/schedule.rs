//! Interval and run-at grammar
//!
//! Two explicit grammars are accepted:
//!
//! - Interval expressions: `<integer> <unit>`, e.g. `15 sec`, `2 hours`,
//!   `1 month`. Whitespace between the amount and the unit is optional and
//!   matching is case-insensitive.
//! - Run-at expressions: an absolute RFC 3339 timestamp, or an interval
//!   expression interpreted relative to "now". An empty run-at means "now".

use chrono::{DateTime, Months, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ScheduleError;

/// Unit of an interval expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl IntervalUnit {
    fn parse(s: &str) -> Option<Self> {
        let unit = match s {
            "s" | "sec" | "secs" | "second" | "seconds" => IntervalUnit::Second,
            "m" | "min" | "mins" | "minute" | "minutes" => IntervalUnit::Minute,
            "h" | "hr" | "hrs" | "hour" | "hours" => IntervalUnit::Hour,
            "d" | "day" | "days" => IntervalUnit::Day,
            "w" | "week" | "weeks" => IntervalUnit::Week,
            "month" | "months" => IntervalUnit::Month,
            _ => return None,
        };
        Some(unit)
    }

    fn seconds(self) -> Option<i64> {
        match self {
            IntervalUnit::Second => Some(1),
            IntervalUnit::Minute => Some(60),
            IntervalUnit::Hour => Some(3_600),
            IntervalUnit::Day => Some(86_400),
            IntervalUnit::Week => Some(604_800),
            // Calendar months have no fixed length
            IntervalUnit::Month => None,
        }
    }
}

impl fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntervalUnit::Second => "sec",
            IntervalUnit::Minute => "min",
            IntervalUnit::Hour => "hour",
            IntervalUnit::Day => "day",
            IntervalUnit::Week => "week",
            IntervalUnit::Month => "month",
        };
        write!(f, "{s}")
    }
}

/// A parsed interval expression such as `15 sec`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub amount: u32,
    pub unit: IntervalUnit,
}

impl Interval {
    pub fn new(amount: u32, unit: IntervalUnit) -> Self {
        Self { amount, unit }
    }

    /// Returns `from` moved forward by this interval.
    ///
    /// Month arithmetic follows the calendar and clamps to the last day of
    /// the target month (Jan 31 + 1 month = Feb 28/29).
    pub fn adjust(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        let next = match self.unit.seconds() {
            Some(secs) => TimeDelta::try_seconds(secs * i64::from(self.amount))
                .and_then(|delta| from.checked_add_signed(delta)),
            None => from.checked_add_months(Months::new(self.amount)),
        };
        next.ok_or_else(|| ScheduleError::OutOfRange(self.to_string()))
    }
}

impl FromStr for Interval {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let split = normalized
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(normalized.len());
        let (amount, unit) = normalized.split_at(split);

        let amount: u32 = amount
            .parse()
            .map_err(|_| ScheduleError::InvalidInterval(s.to_string()))?;
        if amount == 0 {
            return Err(ScheduleError::InvalidInterval(s.to_string()));
        }
        let unit = IntervalUnit::parse(unit.trim())
            .ok_or_else(|| ScheduleError::InvalidInterval(s.to_string()))?;

        Ok(Interval { amount, unit })
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.unit)
    }
}

/// Resolves a run-at expression against `now`.
///
/// Returns `None` for an empty expression, which callers treat as "run now".
pub fn parse_run_at(
    expression: &str,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    if let Ok(absolute) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(Some(absolute.with_timezone(&Utc)));
    }

    let interval: Interval = trimmed
        .parse()
        .map_err(|_| ScheduleError::InvalidRunAt(expression.to_string()))?;
    interval.adjust(now).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_interval_variants() {
        assert_eq!(
            "15 sec".parse::<Interval>().unwrap(),
            Interval::new(15, IntervalUnit::Second)
        );
        assert_eq!(
            "2Hours".parse::<Interval>().unwrap(),
            Interval::new(2, IntervalUnit::Hour)
        );
        assert_eq!(
            " 1 month ".parse::<Interval>().unwrap(),
            Interval::new(1, IntervalUnit::Month)
        );
        assert_eq!(
            "30m".parse::<Interval>().unwrap(),
            Interval::new(30, IntervalUnit::Minute)
        );
    }

    #[test]
    fn test_parse_interval_rejects_garbage() {
        assert!("".parse::<Interval>().is_err());
        assert!("sec".parse::<Interval>().is_err());
        assert!("0 sec".parse::<Interval>().is_err());
        assert!("15 fortnights".parse::<Interval>().is_err());
        assert!("-1 day".parse::<Interval>().is_err());
    }

    #[test]
    fn test_adjust_seconds() {
        let from = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let next = Interval::new(15, IntervalUnit::Second).adjust(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 15).unwrap());
    }

    #[test]
    fn test_adjust_month_clamps_to_month_end() {
        let from = Utc.with_ymd_and_hms(2024, 1, 31, 8, 30, 0).unwrap();
        let next = Interval::new(1, IntervalUnit::Month).adjust(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 2, 29, 8, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_run_at() {
        let now = Utc.with_ymd_and_hms(2024, 6, 4, 2, 23, 0).unwrap();

        assert_eq!(parse_run_at("", now).unwrap(), None);

        let absolute = parse_run_at("2024-06-05T10:00:00+02:00", now).unwrap();
        assert_eq!(
            absolute,
            Some(Utc.with_ymd_and_hms(2024, 6, 5, 8, 0, 0).unwrap())
        );

        let relative = parse_run_at("1 day", now).unwrap();
        assert_eq!(
            relative,
            Some(Utc.with_ymd_and_hms(2024, 6, 5, 2, 23, 0).unwrap())
        );

        assert!(matches!(
            parse_run_at("tomorrow-ish", now),
            Err(ScheduleError::InvalidRunAt(_))
        ));
    }
}
