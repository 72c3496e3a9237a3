//! Per-channel blackout windows.

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

const TIME_FORMAT: &str = "%H:%M";

/// A local-time range during which a channel must not dispatch jobs.
///
/// The range is `[start, end)`. If `end < start` the window wraps past
/// midnight, so `22:00`-`06:00` covers late evening and early morning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackoutWindow {
    pub channel: String,
    /// Local start time, `HH:MM`.
    pub start: String,
    /// Local end time, `HH:MM`.
    pub end: String,
    /// IANA timezone name, e.g. `Europe/Berlin`.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl BlackoutWindow {
    pub fn new(
        channel: impl Into<String>,
        start: impl Into<String>,
        end: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            start: start.into(),
            end: end.into(),
            timezone: timezone.into(),
        }
    }

    /// Rejects malformed `HH:MM` values.
    ///
    /// The timezone is not checked here: an unknown zone only disables the
    /// window at evaluation time.
    pub fn validate(&self) -> Result<()> {
        if self.channel.trim().is_empty() {
            return Err(Error::config("blackout window channel must not be empty"));
        }
        parse_time(&self.start).ok_or_else(|| {
            Error::config(format!(
                "blackout window for '{}' has invalid start '{}', expected HH:MM",
                self.channel, self.start
            ))
        })?;
        parse_time(&self.end).ok_or_else(|| {
            Error::config(format!(
                "blackout window for '{}' has invalid end '{}', expected HH:MM",
                self.channel, self.end
            ))
        })?;
        Ok(())
    }

    pub fn applies_to(&self, channel: &str) -> bool {
        self.channel == channel
    }

    /// Whether `now` falls inside this window.
    ///
    /// Never errors: an unparseable time or timezone makes the window
    /// inactive and is logged.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let tz: Tz = match self.timezone.parse() {
            Ok(tz) => tz,
            Err(_) => {
                warn!(
                    channel = %self.channel,
                    timezone = %self.timezone,
                    "Ignoring blackout window with invalid timezone"
                );
                return false;
            }
        };

        let (Some(start), Some(end)) = (parse_time(&self.start), parse_time(&self.end)) else {
            warn!(
                channel = %self.channel,
                start = %self.start,
                end = %self.end,
                "Ignoring blackout window with invalid time"
            );
            return false;
        };

        let local = now.with_timezone(&tz).time();
        if start <= end {
            start <= local && local < end
        } else {
            // Overnight range
            local >= start || local < end
        }
    }
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), TIME_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, m, 0).unwrap()
    }

    #[test]
    fn test_same_day_window() {
        let window = BlackoutWindow::new("meta_facebook", "09:00", "11:00", "UTC");
        assert!(!window.contains(at(8, 59)));
        assert!(window.contains(at(9, 0)));
        assert!(window.contains(at(10, 0)));
        assert!(window.contains(at(10, 59)));
        assert!(!window.contains(at(11, 0)));
        assert!(!window.contains(at(11, 1)));
    }

    #[test]
    fn test_overnight_window() {
        let window = BlackoutWindow::new("c", "22:00", "06:00", "UTC");
        assert!(window.contains(at(23, 30)));
        assert!(window.contains(at(0, 0)));
        assert!(window.contains(at(5, 59)));
        assert!(!window.contains(at(6, 0)));
        assert!(!window.contains(at(12, 0)));
        assert!(!window.contains(at(21, 59)));
    }

    #[test]
    fn test_equal_bounds_is_empty() {
        let window = BlackoutWindow::new("c", "10:00", "10:00", "UTC");
        assert!(!window.contains(at(10, 0)));
        assert!(!window.contains(at(3, 0)));
    }

    #[test]
    fn test_timezone_is_applied() {
        // 08:30 UTC is 09:30 in Berlin (CET, UTC+1 in March before DST).
        let window = BlackoutWindow::new("c", "09:00", "10:00", "Europe/Berlin");
        assert!(window.contains(at(8, 30)));
        assert!(!window.contains(at(9, 30)));
    }

    #[test]
    fn test_invalid_timezone_is_inactive() {
        let window = BlackoutWindow::new("c", "00:00", "23:59", "Mars/Olympus_Mons");
        assert!(!window.contains(at(12, 0)));
        assert!(window.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_times() {
        assert!(BlackoutWindow::new("c", "9am", "11:00", "UTC").validate().is_err());
        assert!(BlackoutWindow::new("c", "09:00", "25:00", "UTC").validate().is_err());
        assert!(BlackoutWindow::new("", "09:00", "10:00", "UTC").validate().is_err());
    }

    #[test]
    fn test_deserialize_defaults_timezone() {
        let window: BlackoutWindow =
            serde_json::from_str(r#"{"channel":"c","start":"01:00","end":"02:00"}"#).unwrap();
        assert_eq!(window.timezone, "UTC");
    }
}
