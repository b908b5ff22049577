//! Five-field cron expressions.
//!
//! Grammar: `minute hour day-of-month month day-of-week`, fields separated
//! by runs of whitespace. Each field is a comma-separated list of atoms;
//! an atom is `*`, a value, a range `a-b`, or a stepped form `base/step`
//! where `base` is `*`, `a` (meaning `a` to the field maximum), or `a-b`.
//! Day-of-week runs 0-6 with Sunday as 0. Evaluation is in local wall-clock
//! time; day-of-month and day-of-week are combined with AND.

use crate::error::SchedulerError;
use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Search cap for [`CronExpression::next_execution`]: roughly four years of
/// minutes, far more iterations than the jump-based search ever needs.
const MAX_SEARCH_STEPS: u32 = 4 * 365 * 24 * 60;

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    expression: String,
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    days_of_month: BTreeSet<u32>,
    months: BTreeSet<u32>,
    days_of_week: BTreeSet<u32>,
}

impl CronExpression {
    /// Parses a five-field cron expression.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidCronExpression`] for a wrong field
    /// count, non-numeric atoms, or out-of-bounds values.
    pub fn parse(expression: &str) -> Result<Self, SchedulerError> {
        let invalid = |reason: String| SchedulerError::InvalidCronExpression {
            expression: expression.to_string(),
            reason,
        };

        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!("expected 5 fields, got {}", fields.len())));
        }

        Ok(Self {
            expression: expression.to_string(),
            minutes: parse_field(fields[0], 0, 59).map_err(&invalid)?,
            hours: parse_field(fields[1], 0, 23).map_err(&invalid)?,
            days_of_month: parse_field(fields[2], 1, 31).map_err(&invalid)?,
            months: parse_field(fields[3], 1, 12).map_err(&invalid)?,
            days_of_week: parse_field(fields[4], 0, 6).map_err(&invalid)?,
        })
    }

    /// The original expression text.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Returns whether the expression matches the given local time.
    ///
    /// Seconds are ignored; day-of-month and day-of-week must both match.
    #[must_use]
    pub fn matches(&self, at: NaiveDateTime) -> bool {
        self.minutes.contains(&at.minute())
            && self.hours.contains(&at.hour())
            && self.days_of_month.contains(&at.day())
            && self.months.contains(&at.month())
            && self
                .days_of_week
                .contains(&at.weekday().num_days_from_sunday())
    }

    /// Computes the first matching time strictly after `after`.
    ///
    /// The search clears seconds, steps to the next minute, then jumps
    /// month-, day-, hour-, and minute-wise toward the next occurrence.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::SearchExhausted`] if no occurrence exists
    /// within the search cap (e.g. `0 0 30 2 *`).
    pub fn next_execution(&self, after: NaiveDateTime) -> Result<NaiveDateTime, SchedulerError> {
        let exhausted = || SchedulerError::SearchExhausted {
            expression: self.expression.clone(),
        };

        let mut current = truncate_to_minute(after) + Duration::minutes(1);

        for _ in 0..MAX_SEARCH_STEPS {
            if !self.months.contains(&current.month()) {
                let (month, carry) = next_at_or_above(&self.months, current.month() + 1);
                let year = current.year() + i32::from(carry);
                current = chrono::NaiveDate::from_ymd_opt(year, month, 1)
                    .ok_or_else(exhausted)?
                    .and_time(NaiveTime::MIN);
                continue;
            }

            let day_matches = self.days_of_month.contains(&current.day())
                && self
                    .days_of_week
                    .contains(&current.weekday().num_days_from_sunday());
            if !day_matches {
                current = current
                    .date()
                    .succ_opt()
                    .ok_or_else(exhausted)?
                    .and_time(NaiveTime::MIN);
                continue;
            }

            let (hour, carry) = next_at_or_above(&self.hours, current.hour());
            if carry {
                current = current
                    .date()
                    .succ_opt()
                    .ok_or_else(exhausted)?
                    .and_time(NaiveTime::MIN);
                continue;
            }
            if hour != current.hour() {
                current = current
                    .date()
                    .and_hms_opt(hour, 0, 0)
                    .ok_or_else(exhausted)?;
            }

            let (minute, carry) = next_at_or_above(&self.minutes, current.minute());
            if carry {
                current = current
                    .date()
                    .and_hms_opt(current.hour(), 0, 0)
                    .ok_or_else(exhausted)?
                    + Duration::hours(1);
                continue;
            }
            return current
                .date()
                .and_hms_opt(current.hour(), minute, 0)
                .ok_or_else(exhausted);
        }

        Err(exhausted())
    }
}

impl FromStr for CronExpression {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression)
    }
}

impl Serialize for CronExpression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.expression)
    }
}

impl<'de> Deserialize<'de> for CronExpression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Clears seconds and sub-second precision.
pub(crate) fn truncate_to_minute(at: NaiveDateTime) -> NaiveDateTime {
    at.date()
        .and_hms_opt(at.hour(), at.minute(), 0)
        .unwrap_or_else(|| at.date().and_time(NaiveTime::MIN))
}

/// Smallest allowed value at or above `value`, with a carry flag when the
/// set wraps around. The set is never empty.
fn next_at_or_above(allowed: &BTreeSet<u32>, value: u32) -> (u32, bool) {
    match allowed.range(value..).next() {
        Some(&next) => (next, false),
        None => (allowed.first().copied().unwrap_or(value), true),
    }
}

/// Parses one field into its allowed-value set.
fn parse_field(field: &str, min: u32, max: u32) -> Result<BTreeSet<u32>, String> {
    let mut allowed = BTreeSet::new();
    for atom in field.split(',') {
        parse_atom(atom, min, max, &mut allowed)?;
    }
    if allowed.is_empty() {
        return Err(format!("empty field '{field}'"));
    }
    Ok(allowed)
}

fn parse_atom(atom: &str, min: u32, max: u32, allowed: &mut BTreeSet<u32>) -> Result<(), String> {
    let (base, step) = match atom.split_once('/') {
        Some((base, step)) => {
            let step: u32 = step
                .parse()
                .map_err(|_| format!("invalid step '{step}'"))?;
            if step == 0 {
                return Err(format!("step must be positive in '{atom}'"));
            }
            (base, Some(step))
        }
        None => (atom, None),
    };

    let (start, end) = if base == "*" {
        (min, max)
    } else if let Some((low, high)) = base.split_once('-') {
        let low = parse_value(low, min, max)?;
        let high = parse_value(high, min, max)?;
        if low > high {
            return Err(format!("reversed range '{base}'"));
        }
        (low, high)
    } else {
        let value = parse_value(base, min, max)?;
        // A bare value with a step means "value to max".
        if step.is_some() {
            (value, max)
        } else {
            (value, value)
        }
    };

    let step = step.unwrap_or(1);
    let mut value = start;
    while value <= end {
        allowed.insert(value);
        value += step;
    }
    Ok(())
}

fn parse_value(text: &str, min: u32, max: u32) -> Result<u32, String> {
    let value: u32 = text
        .parse()
        .map_err(|_| format!("non-numeric value '{text}'"))?;
    if value < min || value > max {
        return Err(format!("value {value} out of range {min}-{max}"));
    }
    Ok(value)
}
