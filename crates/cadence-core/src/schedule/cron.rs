//! Six-field cron expressions: `second minute hour day month day_of_week`.
//!
//! Fields accept `*`, integers, lists (`a,b`), inclusive ranges (`a-b`) and
//! steps (`*/n`, `a/n`, `a-b/n`); `*/n` is shorthand for `0/n` anchored at the
//! field minimum. `day_of_week` uses 0=Sunday through 6=Saturday. When both
//! day-of-month and day-of-week are restricted a date must satisfy both.
//!
//! Evaluation happens in a declared time zone. A wall-clock candidate that
//! falls inside a spring-forward gap does not exist and is skipped; a
//! candidate repeated by a fall-back transition resolves to its earliest
//! mapping so the same wall-clock instant never fires twice.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::fmt;

/// How far ahead the evaluator searches before declaring a schedule
/// unsatisfiable (covers the four-year wait for February 29th).
const SEARCH_HORIZON_DAYS: i64 = 366 * 5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronParseError {
    #[error("cron expression must have 6 fields (second minute hour day month day_of_week), got {0}")]
    FieldCount(usize),

    #[error("invalid value '{value}' in {field} field")]
    InvalidValue { field: &'static str, value: String },

    #[error("{field} value {value} out of range {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("invalid step '{value}' in {field} field")]
    InvalidStep { field: &'static str, value: String },

    #[error("empty {field} field")]
    EmptyField { field: &'static str },
}

/// Set of permitted values for one cron field, as a bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        value < 64 && self.0 & (1u64 << value) != 0
    }

    fn parse(spec: &str, field: &'static str, min: u32, max: u32) -> Result<Self, CronParseError> {
        if spec.is_empty() {
            return Err(CronParseError::EmptyField { field });
        }

        let mut mask = 0u64;
        for term in spec.split(',') {
            if term.is_empty() {
                return Err(CronParseError::EmptyField { field });
            }

            let (range_part, step) = match term.split_once('/') {
                Some((range, step_str)) => {
                    let step: u32 = step_str.parse().map_err(|_| CronParseError::InvalidStep {
                        field,
                        value: term.to_string(),
                    })?;
                    if step == 0 {
                        return Err(CronParseError::InvalidStep {
                            field,
                            value: term.to_string(),
                        });
                    }
                    (range, step)
                }
                None => (term, 1),
            };

            let (start, end) = if range_part == "*" {
                (min, max)
            } else if let Some((a, b)) = range_part.split_once('-') {
                let a = parse_int(a, field)?;
                let b = parse_int(b, field)?;
                (a, b)
            } else {
                let a = parse_int(range_part, field)?;
                // A bare base with a step runs to the end of the field range
                if term.contains('/') {
                    (a, max)
                } else {
                    (a, a)
                }
            };

            for bound in [start, end] {
                if bound < min || bound > max {
                    return Err(CronParseError::OutOfRange {
                        field,
                        value: bound,
                        min,
                        max,
                    });
                }
            }
            if start > end {
                return Err(CronParseError::InvalidValue {
                    field,
                    value: term.to_string(),
                });
            }

            let mut v = start;
            while v <= end {
                mask |= 1u64 << v;
                v += step;
            }
        }

        Ok(FieldSet(mask))
    }
}

fn parse_int(s: &str, field: &'static str) -> Result<u32, CronParseError> {
    s.parse().map_err(|_| CronParseError::InvalidValue {
        field,
        value: s.to_string(),
    })
}

/// A parsed six-field cron expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    seconds: FieldSet,
    minutes: FieldSet,
    hours: FieldSet,
    days: FieldSet,
    months: FieldSet,
    weekdays: FieldSet,
    source: String,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(CronParseError::FieldCount(fields.len()));
        }

        Ok(Self {
            seconds: FieldSet::parse(fields[0], "second", 0, 59)?,
            minutes: FieldSet::parse(fields[1], "minute", 0, 59)?,
            hours: FieldSet::parse(fields[2], "hour", 0, 23)?,
            days: FieldSet::parse(fields[3], "day", 1, 31)?,
            months: FieldSet::parse(fields[4], "month", 1, 12)?,
            weekdays: FieldSet::parse(fields[5], "day_of_week", 0, 6)?,
            source: expr.trim().to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn date_matches(&self, date: NaiveDate) -> bool {
        self.months.contains(date.month())
            && self.days.contains(date.day())
            && self.weekdays.contains(date.weekday().num_days_from_sunday())
    }

    /// First matching time-of-day at or after `from`, if any remains today
    fn next_time_matching(&self, from: NaiveTime) -> Option<NaiveTime> {
        for h in from.hour()..24 {
            if !self.hours.contains(h) {
                continue;
            }
            let min_start = if h == from.hour() { from.minute() } else { 0 };
            for m in min_start..60 {
                if !self.minutes.contains(m) {
                    continue;
                }
                let sec_start = if h == from.hour() && m == from.minute() {
                    from.second()
                } else {
                    0
                };
                for s in sec_start..60 {
                    if self.seconds.contains(s) {
                        return NaiveTime::from_hms_opt(h, m, s);
                    }
                }
            }
        }
        None
    }

    /// Smallest instant strictly greater than `now` satisfying every field,
    /// interpreted in `tz`. `None` when the expression never matches within
    /// the search horizon.
    pub fn next_after(&self, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let local_now = now.with_timezone(&tz).naive_local();
        // Strictly greater, at second granularity
        let start = local_now
            .with_nanosecond(0)
            .unwrap_or(local_now)
            .checked_add_signed(Duration::seconds(1))?;

        let horizon = start.date() + Duration::days(SEARCH_HORIZON_DAYS);
        let mut date = start.date();
        let mut floor = start.time();

        while date <= horizon {
            if self.date_matches(date) {
                let mut cursor = Some(floor);
                while let Some(from) = cursor {
                    let Some(time) = self.next_time_matching(from) else {
                        break;
                    };
                    let naive = date.and_time(time);
                    match tz.from_local_datetime(&naive) {
                        chrono::LocalResult::Single(dt) => {
                            let utc = dt.with_timezone(&Utc);
                            if utc > now {
                                return Some(utc);
                            }
                        }
                        chrono::LocalResult::Ambiguous(earliest, _latest) => {
                            // Fall-back repetition: one fire per wall clock
                            let utc = earliest.with_timezone(&Utc);
                            if utc > now {
                                return Some(utc);
                            }
                        }
                        chrono::LocalResult::None => {
                            // Spring-forward gap: this wall clock never exists
                        }
                    }
                    let (bumped, wrapped) = time.overflowing_add_signed(Duration::seconds(1));
                    if wrapped != 0 {
                        // Wrapped past midnight; move on to the next day
                        break;
                    }
                    cursor = Some(bumped);
                }
            }
            date = date.succ_opt()?;
            floor = NaiveTime::from_hms_opt(0, 0, 0)?;
        }

        None
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
