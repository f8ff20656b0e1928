//! Cron expression parsing and next fire time calculation.
//!
//! Supports standard 5-field cron, extended 6-field cron (with seconds),
//! shortcuts (@daily, @hourly, etc.), and interval expressions (@every).

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing or evaluating a cron expression.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Invalid cron expression.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    /// Invalid interval expression.
    #[error("invalid interval expression: {0}")]
    InvalidInterval(String),

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// The expression can never fire again.
    #[error("no more occurrences")]
    NoMoreOccurrences,
}

/// A parsed cron expression that can compute its next fire time.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    /// The original expression string.
    expression: String,
    /// The timezone the expression is evaluated in.
    timezone: Tz,
    /// Parsed schedule type.
    kind: ScheduleKind,
}

#[derive(Debug, Clone)]
enum ScheduleKind {
    /// Calendar-based cron schedule.
    Cron(Box<Schedule>),
    /// Interval-based schedule (e.g. @every 5m).
    Interval(std::time::Duration),
}

impl CronSchedule {
    /// Parse a cron expression, evaluated in UTC.
    ///
    /// Supports:
    /// - Standard 5-field cron: `minute hour day month weekday`
    /// - Extended 6-field cron: `second minute hour day month weekday`
    /// - Shortcuts: `@yearly`, `@monthly`, `@weekly`, `@daily`, `@hourly`
    /// - Intervals: `@every 5m`, `@every 1h30m`
    pub fn new(expression: impl Into<String>) -> Result<Self, ScheduleError> {
        Self::with_timezone(expression, "UTC")
    }

    /// Parse a cron expression evaluated in a specific IANA timezone.
    pub fn with_timezone(
        expression: impl Into<String>,
        timezone: impl AsRef<str>,
    ) -> Result<Self, ScheduleError> {
        let expression = expression.into();
        let timezone = timezone
            .as_ref()
            .parse::<Tz>()
            .map_err(|_| ScheduleError::InvalidTimezone(timezone.as_ref().to_string()))?;

        let kind = Self::parse_expression(&expression)?;

        Ok(Self {
            expression,
            timezone,
            kind,
        })
    }

    fn parse_expression(expression: &str) -> Result<ScheduleKind, ScheduleError> {
        let trimmed = expression.trim();

        if trimmed.starts_with('@') {
            return Self::parse_shortcut(trimmed);
        }

        Self::parse_cron(trimmed)
    }

    fn parse_shortcut(expression: &str) -> Result<ScheduleKind, ScheduleError> {
        match expression.to_lowercase().as_str() {
            "@yearly" | "@annually" => Self::parse_cron("0 0 1 1 *"),
            "@monthly" => Self::parse_cron("0 0 1 * *"),
            "@weekly" => Self::parse_cron("0 0 * * SUN"),
            "@daily" | "@midnight" => Self::parse_cron("0 0 * * *"),
            "@hourly" => Self::parse_cron("0 * * * *"),
            s if s.starts_with("@every ") => Self::parse_interval(&s[7..]),
            _ => Err(ScheduleError::InvalidCron(format!(
                "unknown shortcut: {}",
                expression
            ))),
        }
    }

    fn parse_interval(interval: &str) -> Result<ScheduleKind, ScheduleError> {
        let duration = Self::parse_duration(interval.trim())?;
        Ok(ScheduleKind::Interval(duration))
    }

    /// Parse a duration string like "5m", "1h", "1h30m", "30s".
    fn parse_duration(s: &str) -> Result<std::time::Duration, ScheduleError> {
        let mut total_secs: u64 = 0;
        let mut current_num = String::new();

        for c in s.chars() {
            if c.is_ascii_digit() {
                current_num.push(c);
            } else {
                let num: u64 = current_num
                    .parse()
                    .map_err(|_| ScheduleError::InvalidInterval(s.to_string()))?;
                current_num.clear();

                match c {
                    's' => total_secs += num,
                    'm' => total_secs += num * 60,
                    'h' => total_secs += num * 3600,
                    'd' => total_secs += num * 86400,
                    _ => return Err(ScheduleError::InvalidInterval(s.to_string())),
                }
            }
        }

        if total_secs == 0 || !current_num.is_empty() {
            return Err(ScheduleError::InvalidInterval(s.to_string()));
        }

        Ok(std::time::Duration::from_secs(total_secs))
    }

    fn parse_cron(expression: &str) -> Result<ScheduleKind, ScheduleError> {
        // Field count decides whether a seconds column must be prepended.
        let fields: Vec<&str> = expression.split_whitespace().collect();

        let cron_expr = match fields.len() {
            5 => format!("0 {}", expression),
            6 => expression.to_string(),
            _ => {
                return Err(ScheduleError::InvalidCron(format!(
                    "expected 5 or 6 fields, got {}",
                    fields.len()
                )));
            }
        };

        let schedule = Schedule::from_str(&cron_expr)
            .map_err(|e| ScheduleError::InvalidCron(e.to_string()))?;

        Ok(ScheduleKind::Cron(Box::new(schedule)))
    }

    /// Get the next fire time strictly after the given instant.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        match &self.kind {
            ScheduleKind::Cron(schedule) => {
                let local_time = after.with_timezone(&self.timezone);
                schedule
                    .after(&local_time)
                    .next()
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok_or(ScheduleError::NoMoreOccurrences)
            }
            ScheduleKind::Interval(duration) => {
                let step = chrono::Duration::from_std(*duration)
                    .map_err(|_| ScheduleError::InvalidInterval(self.expression.clone()))?;
                Ok(after + step)
            }
        }
    }

    /// Get the original expression string.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Get the timezone the expression is evaluated in.
    pub fn timezone(&self) -> &Tz {
        &self.timezone
    }
}
