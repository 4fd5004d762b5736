//! Calendar attribute values.
//!
//! Calendar uploaders store each event as a shared attribute whose key is the
//! event label and whose value is
//!
//! ```text
//! Start: 2024-01-01 09:00
//! End: 2024-01-01 10:00
//! ```
//!
//! The timestamps carry no offset; they are read in the configured zone.

use crate::config::{CalendarZone, ScheduleConfig};
use crate::error::CalendarError;
use chrono::{Local, NaiveDateTime, TimeZone};

/// Whether `value` has the calendar shape at all. A value with this shape is
/// never treated as a one-shot message, even if its timestamps fail to parse.
pub fn looks_like_calendar(value: &str) -> bool {
    value.starts_with("Start:") && value.contains("\nEnd:")
}

#[derive(Debug, Clone)]
pub struct CalendarParser {
    format: String,
    zone: CalendarZone,
}

impl CalendarParser {
    pub fn new(format: impl Into<String>, zone: CalendarZone) -> Self {
        Self {
            format: format.into(),
            zone,
        }
    }

    pub fn from_config(config: &ScheduleConfig) -> Self {
        Self::new(config.time_format.clone(), config.timezone)
    }

    /// Parse a calendar value into `(start_epoch, end_epoch)` seconds.
    pub fn parse(&self, value: &str) -> Result<(i64, i64), CalendarError> {
        let mut lines = value.lines().map(str::trim).filter(|l| !l.is_empty());
        let start_raw = lines
            .next()
            .and_then(|l| l.strip_prefix("Start:"))
            .ok_or(CalendarError::Shape)?
            .trim();
        let end_raw = lines
            .next()
            .and_then(|l| l.strip_prefix("End:"))
            .ok_or(CalendarError::Shape)?
            .trim();

        let start = self.epoch("start", start_raw)?;
        let end = self.epoch("end", end_raw)?;
        if end < start {
            return Err(CalendarError::Inverted { start, end });
        }
        Ok((start, end))
    }

    fn epoch(&self, field: &'static str, raw: &str) -> Result<i64, CalendarError> {
        let bad = || CalendarError::Timestamp {
            field,
            value: raw.to_string(),
        };
        let naive = NaiveDateTime::parse_from_str(raw, &self.format).map_err(|_| bad())?;
        match self.zone {
            CalendarZone::Utc => Ok(naive.and_utc().timestamp()),
            // Ambiguous local times (DST fall-back) take the earlier instant;
            // nonexistent ones (spring-forward gap) are rejected.
            CalendarZone::Local => Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.timestamp())
                .ok_or_else(bad),
        }
    }
}
