// src/cron/mod.rs

//! Five-field cron expressions.
//!
//! Fields are `minute hour day-of-month month day-of-week`; each is `*`, a
//! single value, a comma list, a `start-end` range, or a stride
//! (`start-end/step`, `*/step`). A timestamp matches when **all five** fields
//! match. Day-of-week is `0 = Sunday .. 6 = Saturday`.
//!
//! [`CronExpression`] is immutable once parsed and can be shared freely
//! across tasks.

pub mod field;

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};

use crate::errors::{PlugvisorError, Result};
use field::{FieldKind, FieldSet, parse_field};

/// Upper bound on the search window of [`CronExpression::next`]: one leap
/// year of minutes.
pub const MAX_SEARCH_MINUTES: i64 = 366 * 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
}

impl CronExpression {
    pub fn parse(expression: &str) -> Result<Self> {
        let invalid = |reason: String| PlugvisorError::InvalidExpression {
            expression: expression.to_string(),
            reason,
        };

        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!(
                "expected 5 fields (minute hour day month weekday), got {}",
                fields.len()
            )));
        }

        let mut sets = [FieldSet::default(); 5];
        for (slot, (kind, text)) in sets.iter_mut().zip(FieldKind::ALL.iter().zip(&fields)) {
            *slot = parse_field(*kind, text).map_err(invalid)?;
        }

        Ok(Self {
            source: fields.join(" "),
            minutes: sets[0],
            hours: sets[1],
            days_of_month: sets[2],
            months: sets[3],
            days_of_week: sets[4],
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the whole minute containing `at` matches every field.
    pub fn matches(&self, at: NaiveDateTime) -> bool {
        self.date_matches(at.date())
            && self.hours.contains(at.hour())
            && self.minutes.contains(at.minute())
    }

    /// The first matching minute strictly after the minute containing `from`.
    ///
    /// Fails if nothing matches within [`MAX_SEARCH_MINUTES`] (e.g. `0 0 30 2 *`).
    pub fn next(&self, from: NaiveDateTime) -> Result<NaiveDateTime> {
        let start = truncate_to_minute(from) + TimeDelta::minutes(1);
        let limit = start + TimeDelta::minutes(MAX_SEARCH_MINUTES);
        let mut candidate = start;

        while candidate < limit {
            if !self.date_matches(candidate.date()) {
                candidate = candidate.date().and_time(NaiveTime::MIN) + TimeDelta::days(1);
                continue;
            }
            if !self.hours.contains(candidate.hour()) {
                candidate = candidate - TimeDelta::minutes(i64::from(candidate.minute()))
                    + TimeDelta::hours(1);
                continue;
            }
            if !self.minutes.contains(candidate.minute()) {
                candidate += TimeDelta::minutes(1);
                continue;
            }
            return Ok(candidate);
        }

        Err(PlugvisorError::InvalidExpression {
            expression: self.source.clone(),
            reason: "no matching time within one year".to_string(),
        })
    }

    fn date_matches(&self, date: NaiveDate) -> bool {
        // chrono weeks start on Monday; cron counts from Sunday.
        let weekday = date.weekday().num_days_from_sunday();
        self.months.contains(date.month())
            && self.days_of_month.contains(date.day())
            && self.days_of_week.contains(weekday)
    }
}

impl FromStr for CronExpression {
    type Err = PlugvisorError;

    fn from_str(s: &str) -> Result<Self> {
        CronExpression::parse(s)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Drop seconds and sub-seconds, keeping the whole-minute bucket.
pub fn truncate_to_minute(at: NaiveDateTime) -> NaiveDateTime {
    let time = NaiveTime::from_hms_opt(at.hour(), at.minute(), 0).unwrap_or(NaiveTime::MIN);
    at.date().and_time(time)
}
