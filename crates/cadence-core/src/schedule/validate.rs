//! Standalone schedule validation, independent of evaluation.
//!
//! Returns a graded report rather than an error: FAILED specs can never be
//! scheduled, WARNING specs are usable but flagged (sub-minute intervals,
//! DST-observing zones, recently past one-time dates).

use chrono::{DateTime, Datelike, Duration, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use super::{CronExpr, ScheduleConfig};

/// Grace window within which a past one-time schedule is only a warning
const PAST_DUE_GRACE_SECS: i64 = 60;

/// Sub-minute intervals are accepted but flagged as a load risk
const INTERVAL_WARNING_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationStatus {
    Passed,
    Warning,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub status: ValidationStatus,
    pub messages: Vec<String>,
}

impl ValidationReport {
    fn new() -> Self {
        Self {
            status: ValidationStatus::Passed,
            messages: Vec::new(),
        }
    }

    fn warn(&mut self, message: impl Into<String>) {
        if self.status == ValidationStatus::Passed {
            self.status = ValidationStatus::Warning;
        }
        self.messages.push(message.into());
    }

    fn fail(&mut self, message: impl Into<String>) {
        self.status = ValidationStatus::Failed;
        self.messages.push(message.into());
    }

    pub fn is_usable(&self) -> bool {
        self.status != ValidationStatus::Failed
    }
}

/// Validate a raw schedule block against `now`
pub fn validate_schedule(config: &ScheduleConfig, now: DateTime<Utc>) -> ValidationReport {
    let mut report = ValidationReport::new();

    let timezone: Option<Tz> = match config.timezone.parse() {
        Ok(tz) => Some(tz),
        Err(_) => {
            report.fail(format!("Unknown time zone: {}", config.timezone));
            None
        }
    };

    if let Some(tz) = timezone {
        if observes_dst(tz, now.year()) {
            report.warn(format!(
                "Time zone {} observes DST transitions; fires near a transition may shift",
                tz.name()
            ));
        }
    }

    match config.schedule_type.as_str() {
        "cron" => match config.expression() {
            Some(expression) => {
                if let Err(e) = CronExpr::parse(&expression) {
                    report.fail(e.to_string());
                }
            }
            None => report.fail("Cron schedule is missing an expression"),
        },
        "interval" => match &config.interval {
            Some(interval) => {
                let total = interval.total_seconds();
                if total == 0 {
                    report.fail("Interval must sum to a positive duration");
                } else if total < INTERVAL_WARNING_SECS {
                    report.warn(format!(
                        "Interval of {}s is below one minute and may load the system",
                        total
                    ));
                }
            }
            None => report.fail("Interval schedule is missing components"),
        },
        "date" => match config.run_date.as_deref() {
            Some(raw) => {
                let parsed = timezone.and_then(|tz| super::parse_run_date(raw, tz).ok());
                match parsed {
                    Some(run_date) => {
                        let lateness = now - run_date;
                        if lateness > Duration::seconds(PAST_DUE_GRACE_SECS) {
                            report.fail(format!("One-time schedule {} is past due", raw));
                        } else if lateness > Duration::zero() {
                            report.warn(format!(
                                "One-time schedule {} is in the near past and will not fire",
                                raw
                            ));
                        }
                    }
                    None => report.fail(format!("Unparseable run_date: {}", raw)),
                }
            }
            None => report.fail("One-time schedule is missing run_date"),
        },
        other => report.fail(format!("Unknown schedule type: {}", other)),
    }

    report
}

/// A zone observes DST in a year when its midwinter and midsummer offsets
/// differ.
fn observes_dst(tz: Tz, year: i32) -> bool {
    let jan = tz.with_ymd_and_hms(year, 1, 15, 12, 0, 0).single();
    let jul = tz.with_ymd_and_hms(year, 7, 15, 12, 0, 0).single();
    match (jan, jul) {
        (Some(a), Some(b)) => a.offset().fix() != b.offset().fix(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::IntervalSpec;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn base(schedule_type: &str) -> ScheduleConfig {
        ScheduleConfig {
            schedule_type: schedule_type.into(),
            expression: None,
            cron: None,
            interval: None,
            run_date: None,
            timezone: "UTC".into(),
        }
    }

    const NOW: &str = "2024-06-01T12:00:00Z";

    #[test]
    fn test_valid_cron_passes() {
        let mut config = base("cron");
        config.expression = Some("0 */5 * * * *".into());
        let report = validate_schedule(&config, utc(NOW));
        assert_eq!(report.status, ValidationStatus::Passed);
        assert!(report.messages.is_empty());
    }

    #[test]
    fn test_five_field_cron_fails() {
        let mut config = base("cron");
        config.expression = Some("*/5 * * * *".into());
        let report = validate_schedule(&config, utc(NOW));
        assert_eq!(report.status, ValidationStatus::Failed);
        assert!(report.messages[0].contains("6 fields"));
    }

    #[test]
    fn test_out_of_range_cron_fails() {
        let mut config = base("cron");
        config.expression = Some("0 61 * * * *".into());
        let report = validate_schedule(&config, utc(NOW));
        assert_eq!(report.status, ValidationStatus::Failed);
    }

    #[test]
    fn test_unknown_zone_fails() {
        let mut config = base("cron");
        config.expression = Some("0 * * * * *".into());
        config.timezone = "Nowhere/Special".into();
        let report = validate_schedule(&config, utc(NOW));
        assert_eq!(report.status, ValidationStatus::Failed);
    }

    #[test]
    fn test_dst_zone_warns() {
        let mut config = base("cron");
        config.expression = Some("0 0 2 * * *".into());
        config.timezone = "America/New_York".into();
        let report = validate_schedule(&config, utc(NOW));
        assert_eq!(report.status, ValidationStatus::Warning);
        assert!(report.messages[0].contains("DST"));
        assert!(report.is_usable());
    }

    #[test]
    fn test_zero_interval_fails() {
        let mut config = base("interval");
        config.interval = Some(IntervalSpec::default());
        let report = validate_schedule(&config, utc(NOW));
        assert_eq!(report.status, ValidationStatus::Failed);
    }

    #[test]
    fn test_sub_minute_interval_warns() {
        let mut config = base("interval");
        config.interval = Some(IntervalSpec {
            seconds: 1,
            ..Default::default()
        });
        let report = validate_schedule(&config, utc(NOW));
        assert_eq!(report.status, ValidationStatus::Warning);
        assert!(report.is_usable());
    }

    #[test]
    fn test_minute_interval_passes() {
        let mut config = base("interval");
        config.interval = Some(IntervalSpec {
            minutes: 1,
            ..Default::default()
        });
        let report = validate_schedule(&config, utc(NOW));
        assert_eq!(report.status, ValidationStatus::Passed);
    }

    #[test]
    fn test_past_due_once_fails() {
        let mut config = base("date");
        config.run_date = Some("2024-06-01T10:00:00+00:00".into());
        let report = validate_schedule(&config, utc(NOW));
        assert_eq!(report.status, ValidationStatus::Failed);
        assert!(report.messages[0].contains("past due"));
    }

    #[test]
    fn test_near_past_once_warns() {
        let mut config = base("date");
        config.run_date = Some("2024-06-01T11:59:30+00:00".into());
        let report = validate_schedule(&config, utc(NOW));
        assert_eq!(report.status, ValidationStatus::Warning);
    }

    #[test]
    fn test_future_once_passes() {
        let mut config = base("date");
        config.run_date = Some("2024-06-02T00:00:00+00:00".into());
        let report = validate_schedule(&config, utc(NOW));
        assert_eq!(report.status, ValidationStatus::Passed);
    }

    #[test]
    fn test_unknown_type_fails() {
        let report = validate_schedule(&base("weekly"), utc(NOW));
        assert_eq!(report.status, ValidationStatus::Failed);
    }
}
