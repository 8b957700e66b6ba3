//! Schedule policies and their cron triggers.
//!
//! The policy names accepted on the wire map to fixed cron expressions:
//! hourly fires on the hour, weekly fires Sunday 03:00, monthly fires on the
//! 28th at midnight. All evaluation is in UTC wall-clock time.

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SendwaveError;

// Six-field expressions (seconds first), cron-crate syntax.
const HOURLY_CRON: &str = "0 0 * * * *";
const WEEKLY_CRON: &str = "0 0 3 * * Sun";
const MONTHLY_CRON: &str = "0 0 0 28 * *";

// ═══════════════════════════════════════════════════════════════════════════════
// Schedule Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Recurrence classification attached to a dispatch job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulePolicy {
    /// Immediate one-shot dispatch
    #[default]
    None,
    /// Every hour on the hour
    Hourly,
    /// Sundays at 03:00
    Weekly,
    /// The 28th of each month at midnight
    Monthly,
}

impl SchedulePolicy {
    /// Resolve this policy to its execution trigger.
    ///
    /// The mapping is total and deterministic: every policy resolves, and the
    /// same policy always resolves to the same trigger.
    pub fn trigger(&self) -> Trigger {
        match self {
            Self::None => Trigger::Immediate,
            Self::Hourly => Trigger::Cron(CronTrigger::new(HOURLY_CRON)),
            Self::Weekly => Trigger::Cron(CronTrigger::new(WEEKLY_CRON)),
            Self::Monthly => Trigger::Cron(CronTrigger::new(MONTHLY_CRON)),
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for SchedulePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Hourly => write!(f, "hourly"),
            Self::Weekly => write!(f, "weekly"),
            Self::Monthly => write!(f, "monthly"),
        }
    }
}

impl FromStr for SchedulePolicy {
    type Err = SendwaveError;

    /// Parse a wire schedule name. Unknown names are rejected rather than
    /// silently treated as immediate dispatch.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "hourly" => Ok(Self::Hourly),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(SendwaveError::validation(format!(
                "Unknown schedule '{}'; expected one of none, hourly, weekly, monthly",
                other
            ))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Triggers
// ═══════════════════════════════════════════════════════════════════════════════

/// How a dispatch job is released for execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Enqueue exactly once, right now
    Immediate,
    /// Enqueue a fresh occurrence at each cron firing
    Cron(CronTrigger),
}

/// A parsed cron expression evaluated in UTC.
#[derive(Debug, Clone)]
pub struct CronTrigger {
    expression: &'static str,
    schedule: Schedule,
}

impl CronTrigger {
    /// Build a trigger from one of the fixed policy expressions.
    fn new(expression: &'static str) -> Self {
        // The expressions are compile-time constants; a parse failure is a
        // programming error, not an input error.
        let schedule = Schedule::from_str(expression).expect("invalid built-in cron expression");
        Self {
            expression,
            schedule,
        }
    }

    pub fn expression(&self) -> &'static str {
        self.expression
    }

    /// Next firing strictly after `after`, in UTC.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

impl PartialEq for CronTrigger {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    #[test]
    fn test_policy_parse() {
        assert_eq!("none".parse::<SchedulePolicy>().unwrap(), SchedulePolicy::None);
        assert_eq!(
            "hourly".parse::<SchedulePolicy>().unwrap(),
            SchedulePolicy::Hourly
        );
        assert_eq!(
            "weekly".parse::<SchedulePolicy>().unwrap(),
            SchedulePolicy::Weekly
        );
        assert_eq!(
            "monthly".parse::<SchedulePolicy>().unwrap(),
            SchedulePolicy::Monthly
        );
        assert!("daily".parse::<SchedulePolicy>().is_err());
        assert!("Hourly".parse::<SchedulePolicy>().is_err());
    }

    #[test]
    fn test_mapping_is_deterministic() {
        for policy in [
            SchedulePolicy::None,
            SchedulePolicy::Hourly,
            SchedulePolicy::Weekly,
            SchedulePolicy::Monthly,
        ] {
            assert_eq!(policy.trigger(), policy.trigger());
        }
        assert_eq!(SchedulePolicy::None.trigger(), Trigger::Immediate);
    }

    #[test]
    fn test_hourly_fires_on_the_hour() {
        let Trigger::Cron(trigger) = SchedulePolicy::Hourly.trigger() else {
            panic!("hourly must be cron-triggered");
        };
        let after = Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 0).unwrap();
        let next = trigger.next_after(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 1, 11, 0, 0).unwrap());
    }

    #[test]
    fn test_weekly_fires_sunday_at_three() {
        let Trigger::Cron(trigger) = SchedulePolicy::Weekly.trigger() else {
            panic!("weekly must be cron-triggered");
        };
        // 2024-06-01 is a Saturday.
        let after = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let next = trigger.next_after(after).unwrap();
        assert_eq!(next.weekday(), Weekday::Sun);
        assert_eq!(next.hour(), 3);
        assert_eq!(next.minute(), 0);
        assert_eq!(next.day(), 2);
    }

    #[test]
    fn test_monthly_fires_on_the_28th() {
        let Trigger::Cron(trigger) = SchedulePolicy::Monthly.trigger() else {
            panic!("monthly must be cron-triggered");
        };
        let after = Utc.with_ymd_and_hms(2024, 6, 29, 0, 0, 0).unwrap();
        let next = trigger.next_after(after).unwrap();
        assert_eq!(next.day(), 28);
        assert_eq!(next.month(), 7);
        assert_eq!(next.hour(), 0);
    }

    #[test]
    fn test_policy_wire_names() {
        assert_eq!(
            serde_json::to_value(SchedulePolicy::Hourly).unwrap(),
            serde_json::json!("hourly")
        );
        let parsed: SchedulePolicy = serde_json::from_value(serde_json::json!("none")).unwrap();
        assert_eq!(parsed, SchedulePolicy::None);
    }
}
