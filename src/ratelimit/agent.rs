//! Per-agent (user-agent) cron-scheduled blackout windows.
//!
//! A cron expression `S` with duration `D` defines, for each firing time
//! `t = next(S)`, a blackout interval `[t, t+D)`. A request at `now` is
//! limited iff `now` falls in `[next(S, now-D), next(S, now-D)+D)`.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::{str::FromStr, time::Duration};

#[derive(Debug, thiserror::Error)]
pub enum AgentLimitError {
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),
}

#[derive(Clone)]
pub struct AgentCronLimiter {
    pub agent: String,
    schedule: Schedule,
    duration: Duration,
}

impl AgentCronLimiter {
    pub fn new(agent: impl Into<String>, cron_expr: &str, duration: Duration) -> Result<Self, AgentLimitError> {
        let schedule = Schedule::from_str(cron_expr).map_err(|e| AgentLimitError::InvalidCron(e.to_string()))?;
        Ok(Self {
            agent: agent.into(),
            schedule,
            duration,
        })
    }

    /// `D=0` means "never limited" regardless of the schedule.
    pub fn is_limited(&self, now: DateTime<Utc>) -> bool {
        if self.duration.is_zero() {
            return false;
        }
        let window_start = now - chrono::Duration::from_std(self.duration).unwrap_or_default();
        let Some(fire) = self.schedule.after(&window_start).next() else {
            return false;
        };
        let fire_end = fire + chrono::Duration::from_std(self.duration).unwrap_or_default();
        now >= fire && now < fire_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn never_limited_when_duration_zero() {
        let limiter = AgentCronLimiter::new("bot", "0 0 * * * *", Duration::ZERO).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert!(!limiter.is_limited(now));
    }

    #[test]
    fn limited_inside_blackout_window() {
        // Fires on the hour; a 5-minute blackout after each firing.
        let limiter = AgentCronLimiter::new("bot", "0 0 * * * *", Duration::from_secs(300)).unwrap();
        let inside = Utc.with_ymd_and_hms(2026, 1, 1, 12, 2, 0).unwrap();
        assert!(limiter.is_limited(inside));
    }

    #[test]
    fn not_limited_outside_blackout_window() {
        let limiter = AgentCronLimiter::new("bot", "0 0 * * * *", Duration::from_secs(300)).unwrap();
        let outside = Utc.with_ymd_and_hms(2026, 1, 1, 12, 30, 0).unwrap();
        assert!(!limiter.is_limited(outside));
    }

    #[test]
    fn rejects_invalid_cron() {
        assert!(AgentCronLimiter::new("bot", "not a cron", Duration::from_secs(1)).is_err());
    }
}
