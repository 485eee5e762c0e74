//! Cron expression parsing and next-fire calculation.
//!
//! Supports standard 5-field cron, extended 6-field cron (with seconds),
//! shortcuts (@daily, @hourly, etc.), and interval expressions (@every 5m).

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing or evaluating a cron expression.
#[derive(Debug, Error)]
pub enum CronError {
    /// Invalid cron expression.
    #[error("invalid cron expression: {0}")]
    InvalidExpression(String),

    /// Invalid interval expression.
    #[error("invalid interval expression: {0}")]
    InvalidInterval(String),

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// No more occurrences.
    #[error("no more occurrences")]
    NoMoreOccurrences,
}

/// A parsed cron expression with an associated timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronExpr {
    /// The original expression string.
    expression: String,
    /// The timezone the expression is evaluated in.
    timezone: String,
    /// Parsed form.
    #[serde(skip)]
    parsed: Parsed,
}

#[derive(Debug, Clone, Default)]
enum Parsed {
    /// Standard cron schedule.
    Cron(Box<CronSchedule>),
    /// Interval-based schedule (e.g., @every 5m).
    Interval(std::time::Duration),
    /// Not yet parsed (after deserialization).
    #[default]
    Unparsed,
}

impl CronExpr {
    /// Parse a cron expression evaluated in UTC.
    ///
    /// Supports:
    /// - Standard 5-field cron: `minute hour day month weekday`
    /// - Extended 6-field cron: `second minute hour day month weekday`
    /// - Shortcuts: `@yearly`, `@monthly`, `@weekly`, `@daily`, `@hourly`
    /// - Intervals: `@every 5m`, `@every 1h30m`
    pub fn parse(expression: impl Into<String>) -> Result<Self, CronError> {
        Self::parse_in_timezone(expression, "UTC")
    }

    /// Parse a cron expression evaluated in a specific timezone.
    pub fn parse_in_timezone(
        expression: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Result<Self, CronError> {
        let expression = expression.into();
        let timezone = timezone.into();

        timezone
            .parse::<Tz>()
            .map_err(|_| CronError::InvalidTimezone(timezone.clone()))?;

        let parsed = Self::parse_expression(&expression)?;

        Ok(Self {
            expression,
            timezone,
            parsed,
        })
    }

    fn parse_expression(expression: &str) -> Result<Parsed, CronError> {
        let trimmed = expression.trim();

        if trimmed.starts_with('@') {
            return Self::parse_shortcut(trimmed);
        }

        Self::parse_cron(trimmed)
    }

    /// Parse a shortcut expression (@daily, @every, etc.).
    fn parse_shortcut(expression: &str) -> Result<Parsed, CronError> {
        match expression.to_lowercase().as_str() {
            "@yearly" | "@annually" => Self::parse_cron("0 0 1 1 *"),
            "@monthly" => Self::parse_cron("0 0 1 * *"),
            "@weekly" => Self::parse_cron("0 0 * * SUN"),
            "@daily" | "@midnight" => Self::parse_cron("0 0 * * *"),
            "@hourly" => Self::parse_cron("0 * * * *"),
            s if s.starts_with("@every ") => Self::parse_interval(&s[7..]),
            _ => Err(CronError::InvalidExpression(format!(
                "unknown shortcut: {}",
                expression
            ))),
        }
    }

    /// Parse an interval expression (e.g., "5m", "1h30m").
    fn parse_interval(interval: &str) -> Result<Parsed, CronError> {
        let duration = Self::parse_duration(interval.trim())?;
        Ok(Parsed::Interval(duration))
    }

    /// Parse a duration string like "5m", "1h", "1h30m", "30s".
    fn parse_duration(s: &str) -> Result<std::time::Duration, CronError> {
        let mut total_secs: u64 = 0;
        let mut current_num = String::new();

        for c in s.chars() {
            if c.is_ascii_digit() {
                current_num.push(c);
            } else {
                let num: u64 = current_num
                    .parse()
                    .map_err(|_| CronError::InvalidInterval(s.to_string()))?;
                current_num.clear();

                match c {
                    's' => total_secs += num,
                    'm' => total_secs += num * 60,
                    'h' => total_secs += num * 3600,
                    'd' => total_secs += num * 86400,
                    _ => return Err(CronError::InvalidInterval(s.to_string())),
                }
            }
        }

        // Trailing digits without a unit would be silently lost otherwise.
        if !current_num.is_empty() || total_secs == 0 {
            return Err(CronError::InvalidInterval(s.to_string()));
        }

        Ok(std::time::Duration::from_secs(total_secs))
    }

    /// Parse a cron expression, normalizing 5-field form to 6-field.
    fn parse_cron(expression: &str) -> Result<Parsed, CronError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();

        let cron_expr = match fields.len() {
            5 => {
                // Standard 5-field cron, add seconds field
                format!("0 {}", expression)
            }
            6 => expression.to_string(),
            _ => {
                return Err(CronError::InvalidExpression(format!(
                    "expected 5 or 6 fields, got {}",
                    fields.len()
                )));
            }
        };

        let schedule = CronSchedule::from_str(&cron_expr)
            .map_err(|e| CronError::InvalidExpression(e.to_string()))?;

        Ok(Parsed::Cron(Box::new(schedule)))
    }

    /// Get the next occurrence strictly after the given time.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
        let tz: Tz = self
            .timezone
            .parse()
            .map_err(|_| CronError::InvalidTimezone(self.timezone.clone()))?;

        match &self.parsed {
            Parsed::Cron(schedule) => {
                // Evaluate in the schedule's timezone, report in UTC
                let local_time = after.with_timezone(&tz);
                schedule
                    .after(&local_time)
                    .next()
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok_or(CronError::NoMoreOccurrences)
            }
            Parsed::Interval(duration) => {
                let step = chrono::Duration::from_std(*duration)
                    .map_err(|_| CronError::InvalidInterval(self.expression.clone()))?;
                Ok(after + step)
            }
            Parsed::Unparsed => Err(CronError::InvalidExpression(
                "expression not parsed".into(),
            )),
        }
    }

    /// Get the next occurrence from now.
    pub fn next(&self) -> Result<DateTime<Utc>, CronError> {
        self.next_after(Utc::now())
    }

    /// Get the next `n` occurrences after the given time.
    pub fn upcoming_after(
        &self,
        after: DateTime<Utc>,
        n: usize,
    ) -> Result<Vec<DateTime<Utc>>, CronError> {
        let mut occurrences = Vec::with_capacity(n);
        let mut cursor = after;
        for _ in 0..n {
            cursor = self.next_after(cursor)?;
            occurrences.push(cursor);
        }
        Ok(occurrences)
    }

    /// Get the original expression string.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Get the timezone.
    pub fn timezone(&self) -> &str {
        &self.timezone
    }
}

impl std::fmt::Display for CronExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.expression)
    }
}
