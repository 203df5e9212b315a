use chrono::{DateTime, Utc};
use std::str::FromStr;

use super::ScheduleError;

/// When a schedule entry fires.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Seconds-first cron expression, e.g. `"0 0 9 * * *"`.
    Cron(String),
    Once(DateTime<Utc>),
}

impl Trigger {
    pub fn cron(expression: &str) -> Result<Self, ScheduleError> {
        let expression = expression.trim();
        cron::Schedule::from_str(expression)
            .map_err(|e| ScheduleError::InvalidTrigger(format!("{}: {}", expression, e)))?;
        Ok(Trigger::Cron(expression.to_string()))
    }

    pub fn once(at: DateTime<Utc>) -> Self {
        Trigger::Once(at)
    }

    /// Parse an RFC 3339 timestamp into a one-shot trigger.
    pub fn parse_once(raw: &str) -> Result<Self, ScheduleError> {
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|dt| Trigger::Once(dt.with_timezone(&Utc)))
            .map_err(|e| ScheduleError::InvalidTrigger(format!("{}: {}", raw, e)))
    }

    pub fn from_parts(kind: &str, expression: &str) -> Result<Self, ScheduleError> {
        match kind {
            "cron" => Self::cron(expression),
            "once" => Self::parse_once(expression),
            other => Err(ScheduleError::InvalidTrigger(format!(
                "unknown trigger kind '{}'",
                other
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Cron(_) => "cron",
            Trigger::Once(_) => "once",
        }
    }

    pub fn expression(&self) -> String {
        match self {
            Trigger::Cron(expr) => expr.clone(),
            Trigger::Once(at) => at.to_rfc3339(),
        }
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self, Trigger::Once(_))
    }

    /// First fire time for a freshly registered entry. A one-shot in the past
    /// fires on the next tick.
    pub fn first_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Cron(_) => self.next_after(now),
            Trigger::Once(at) => Some(*at),
        }
    }

    /// Next fire time strictly after `after`; one-shots never repeat.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Cron(expr) => cron::Schedule::from_str(expr)
                .ok()
                .and_then(|s| s.after(&after).next()),
            Trigger::Once(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn cron_next_after() {
        let trigger = Trigger::cron("0 0 9 * * *").unwrap();
        let next = trigger.next_after(at("2026-03-01T10:00:00Z")).unwrap();
        assert_eq!(next.day(), 2);
        assert_eq!(next.hour(), 9);
        assert_eq!(next.minute(), 0);

        let same_day = trigger.next_after(at("2026-03-01T08:59:59Z")).unwrap();
        assert_eq!(same_day, at("2026-03-01T09:00:00Z"));
    }

    #[test]
    fn invalid_cron_is_rejected() {
        assert!(matches!(
            Trigger::cron("every day at nine"),
            Err(ScheduleError::InvalidTrigger(_))
        ));
    }

    #[test]
    fn one_shot_fires_once() {
        let trigger = Trigger::parse_once("2026-03-01T12:00:00+02:00").unwrap();
        assert_eq!(
            trigger.first_run(at("2026-03-01T00:00:00Z")),
            Some(at("2026-03-01T10:00:00Z"))
        );
        assert_eq!(trigger.next_after(at("2026-03-01T10:00:00Z")), None);
        assert!(trigger.is_one_shot());
    }

    #[test]
    fn parts_round_trip() {
        let cron = Trigger::cron("0 */5 * * * *").unwrap();
        assert_eq!(
            Trigger::from_parts(cron.kind(), &cron.expression()).unwrap(),
            cron
        );
        let once = Trigger::once(at("2026-05-05T05:05:05Z"));
        assert_eq!(
            Trigger::from_parts(once.kind(), &once.expression()).unwrap(),
            once
        );
        assert!(Trigger::from_parts("hourly", "x").is_err());
    }
}
