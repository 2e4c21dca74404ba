//! Schedule specifications and next-fire evaluation.
//!
//! A schedule is a tagged variant inside the job YAML. The raw YAML shape
//! ([`ScheduleConfig`]) is kept as-written on the job; the resolved form
//! ([`ScheduleSpec`]) is what the scheduler loop evaluates. For a fixed
//! `(schedule, now)` pair the computed fire instant is deterministic.

pub mod cron;
pub mod validate;

pub use cron::{CronExpr, CronParseError};
pub use validate::{validate_schedule, ValidationReport, ValidationStatus};

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Raw `schedule:` block of the job YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// `cron`, `interval` or `date`
    #[serde(rename = "type")]
    pub schedule_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,

    /// Alternate key for the cron expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<IntervalSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_date: Option<String>,

    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl ScheduleConfig {
    /// The cron expression under either accepted key
    pub fn expression(&self) -> Option<String> {
        self.expression.clone().or_else(|| self.cron.clone())
    }
}

/// Interval components; the effective duration is their sum
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSpec {
    #[serde(default)]
    pub days: u64,

    #[serde(default)]
    pub hours: u64,

    #[serde(default)]
    pub minutes: u64,

    #[serde(default)]
    pub seconds: u64,
}

impl IntervalSpec {
    pub fn total_seconds(&self) -> u64 {
        self.days * 86_400 + self.hours * 3_600 + self.minutes * 60 + self.seconds
    }
}

/// A resolved schedule, ready for evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleSpec {
    Cron { expr: CronExpr, timezone: Tz },
    Interval { interval: IntervalSpec, timezone: Tz },
    Once { run_date: DateTime<Utc>, timezone: Tz },
}

impl ScheduleSpec {
    /// Resolve a raw config block. Fails on unknown zones, unparseable cron
    /// expressions, zero intervals and unreadable dates.
    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        let timezone: Tz = config
            .timezone
            .parse()
            .map_err(|_| Error::validation(format!("Unknown time zone: {}", config.timezone)))?;

        match config.schedule_type.as_str() {
            "cron" => {
                let expression = config.expression().ok_or_else(|| {
                    Error::validation("Cron schedule is missing an expression")
                })?;
                let expr = CronExpr::parse(&expression)
                    .map_err(|e| Error::validation(e.to_string()))?;
                Ok(ScheduleSpec::Cron { expr, timezone })
            }
            "interval" => {
                let interval = config
                    .interval
                    .ok_or_else(|| Error::validation("Interval schedule is missing components"))?;
                if interval.total_seconds() == 0 {
                    return Err(Error::validation("Interval must sum to a positive duration"));
                }
                Ok(ScheduleSpec::Interval { interval, timezone })
            }
            "date" => {
                let raw = config
                    .run_date
                    .as_deref()
                    .ok_or_else(|| Error::validation("One-time schedule is missing run_date"))?;
                let run_date = parse_run_date(raw, timezone)?;
                Ok(ScheduleSpec::Once { run_date, timezone })
            }
            other => Err(Error::validation(format!("Unknown schedule type: {}", other))),
        }
    }

    pub fn timezone(&self) -> Tz {
        match self {
            ScheduleSpec::Cron { timezone, .. }
            | ScheduleSpec::Interval { timezone, .. }
            | ScheduleSpec::Once { timezone, .. } => *timezone,
        }
    }

    /// Next firing instant strictly after `now`, or `None` when exhausted
    pub fn next_fire_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ScheduleSpec::Cron { expr, timezone } => expr.next_after(now, *timezone),
            ScheduleSpec::Interval { interval, .. } => {
                let secs = interval.total_seconds().max(1);
                now.checked_add_signed(Duration::seconds(secs as i64))
            }
            ScheduleSpec::Once { run_date, .. } => {
                if *run_date > now {
                    Some(*run_date)
                } else {
                    None
                }
            }
        }
    }

    /// Wall-clock and UTC renderings of a fire instant, for logs
    pub fn describe_fire(&self, utc: DateTime<Utc>) -> NextFire {
        let tz = self.timezone();
        NextFire {
            utc,
            local: utc
                .with_timezone(&tz)
                .format("%Y-%m-%d %H:%M:%S %Z")
                .to_string(),
            timezone: tz.name().to_string(),
        }
    }

    /// One-time schedules retire after firing
    pub fn is_once(&self) -> bool {
        matches!(self, ScheduleSpec::Once { .. })
    }
}

/// Both renderings of a computed fire instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NextFire {
    pub utc: DateTime<Utc>,
    pub local: String,
    pub timezone: String,
}

/// Accepts RFC 3339 instants with an explicit offset, or a bare local
/// datetime interpreted in the schedule's zone.
fn parse_run_date(raw: &str, timezone: Tz) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return timezone
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or_else(|| {
                    Error::validation(format!("run_date {} does not exist in {}", raw, timezone))
                });
        }
    }

    Err(Error::validation(format!("Unparseable run_date: {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn cron_config(expr: &str, tz: &str) -> ScheduleConfig {
        ScheduleConfig {
            schedule_type: "cron".into(),
            expression: Some(expr.into()),
            cron: None,
            interval: None,
            run_date: None,
            timezone: tz.into(),
        }
    }

    #[test]
    fn test_cron_alternate_key() {
        let config = ScheduleConfig {
            schedule_type: "cron".into(),
            expression: None,
            cron: Some("0 0 * * * *".into()),
            interval: None,
            run_date: None,
            timezone: "UTC".into(),
        };
        let spec = ScheduleSpec::from_config(&config).unwrap();
        let fire = spec.next_fire_time(utc("2024-06-01T10:30:00Z")).unwrap();
        assert_eq!(fire, utc("2024-06-01T11:00:00Z"));
    }

    #[test]
    fn test_interval_fire() {
        let config = ScheduleConfig {
            schedule_type: "interval".into(),
            expression: None,
            cron: None,
            interval: Some(IntervalSpec {
                minutes: 5,
                ..Default::default()
            }),
            run_date: None,
            timezone: "UTC".into(),
        };
        let spec = ScheduleSpec::from_config(&config).unwrap();
        let now = utc("2024-06-01T10:00:00Z");
        assert_eq!(spec.next_fire_time(now), Some(utc("2024-06-01T10:05:00Z")));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = ScheduleConfig {
            schedule_type: "interval".into(),
            expression: None,
            cron: None,
            interval: Some(IntervalSpec::default()),
            run_date: None,
            timezone: "UTC".into(),
        };
        assert!(ScheduleSpec::from_config(&config).is_err());
    }

    #[test]
    fn test_once_future_and_past() {
        let config = ScheduleConfig {
            schedule_type: "date".into(),
            expression: None,
            cron: None,
            interval: None,
            run_date: Some("2024-06-01T12:00:00+00:00".into()),
            timezone: "UTC".into(),
        };
        let spec = ScheduleSpec::from_config(&config).unwrap();
        assert_eq!(
            spec.next_fire_time(utc("2024-06-01T10:00:00Z")),
            Some(utc("2024-06-01T12:00:00Z"))
        );
        // At or after the instant the schedule is exhausted
        assert_eq!(spec.next_fire_time(utc("2024-06-01T12:00:00Z")), None);
        assert_eq!(spec.next_fire_time(utc("2024-06-02T00:00:00Z")), None);
    }

    #[test]
    fn test_once_named_zone() {
        let config = ScheduleConfig {
            schedule_type: "date".into(),
            expression: None,
            cron: None,
            interval: None,
            run_date: Some("2024-06-01 07:00:00".into()),
            timezone: "America/New_York".into(),
        };
        let spec = ScheduleSpec::from_config(&config).unwrap();
        // 07:00 EDT == 11:00 UTC
        assert_eq!(
            spec.next_fire_time(utc("2024-06-01T00:00:00Z")),
            Some(utc("2024-06-01T11:00:00Z"))
        );
    }

    #[test]
    fn test_unknown_timezone_rejected() {
        let config = cron_config("0 * * * * *", "Mars/Olympus");
        assert!(ScheduleSpec::from_config(&config).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut config = cron_config("0 * * * * *", "UTC");
        config.schedule_type = "hourly".into();
        assert!(ScheduleSpec::from_config(&config).is_err());
    }

    #[test]
    fn test_next_fire_always_future() {
        let spec = ScheduleSpec::from_config(&cron_config("*/7 * * * * *", "UTC")).unwrap();
        let mut now = utc("2024-06-01T00:00:00Z");
        for _ in 0..50 {
            let fire = spec.next_fire_time(now).unwrap();
            assert!(fire > now);
            now = fire;
        }
    }

    #[test]
    fn test_describe_fire_renders_both_clocks() {
        let spec =
            ScheduleSpec::from_config(&cron_config("0 0 2 * * *", "America/Chicago")).unwrap();
        let fire = spec.next_fire_time(utc("2024-06-01T00:00:00Z")).unwrap();
        let rendering = spec.describe_fire(fire);
        assert_eq!(rendering.utc, utc("2024-06-01T07:00:00Z"));
        assert!(rendering.local.starts_with("2024-06-01 02:00:00"));
        assert_eq!(rendering.timezone, "America/Chicago");
    }

    #[test]
    fn test_config_yaml_round_trip() {
        let yaml = "type: interval\ninterval:\n  minutes: 10\ntimezone: UTC\n";
        let config: ScheduleConfig = serde_yaml::from_str(yaml).unwrap();
        let rendered = serde_yaml::to_string(&config).unwrap();
        let reparsed: ScheduleConfig = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(config, reparsed);
    }
}
