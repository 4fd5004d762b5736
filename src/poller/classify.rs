//! Shared-attribute classification.
//!
//! Each remote attribute is one of:
//!
//! - **reserved**: bookkeeping keys written by the gateway itself (`battery`,
//!   `id`, `mac_address`, `data`), never touched;
//! - **calendar**: a `Start:`/`End:` value, cached and dispatched when due;
//! - **one-shot**: any other non-empty string, written to the link at once and
//!   then deleted remotely;
//! - **ignored**: empty strings and non-string JSON values.

use crate::config::ScheduleConfig;
use crate::error::CalendarError;
use crate::schedule::calendar::{looks_like_calendar, CalendarParser};
use serde_json::Value;

#[derive(Debug, PartialEq, Eq)]
pub enum AttributeClass<'a> {
    Reserved,
    Calendar { start: i64, end: i64 },
    MalformedCalendar(CalendarError),
    OneShot(&'a str),
    Ignored,
}

/// What to do with a well-formed calendar event at time `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarAction {
    /// Already over: delete remotely and forget locally.
    Expire,
    /// Active or starting within the horizon: keep in the cache.
    Cache,
    /// Starts beyond the horizon: not cached yet.
    BeyondHorizon,
}

pub fn calendar_action(start: i64, end: i64, now: i64, horizon: i64) -> CalendarAction {
    if end < now {
        CalendarAction::Expire
    } else if start <= now.saturating_add(horizon) {
        CalendarAction::Cache
    } else {
        CalendarAction::BeyondHorizon
    }
}

#[derive(Debug, Clone)]
pub struct Classifier {
    reserved: Vec<String>,
    parser: CalendarParser,
}

impl Classifier {
    pub fn new(reserved: &[String], parser: CalendarParser) -> Self {
        Self {
            reserved: reserved.iter().map(|k| k.to_lowercase()).collect(),
            parser,
        }
    }

    pub fn from_config(config: &ScheduleConfig) -> Self {
        Self::new(&config.reserved_keys, CalendarParser::from_config(config))
    }

    pub fn is_reserved(&self, key: &str) -> bool {
        let lower = key.to_lowercase();
        self.reserved.iter().any(|r| *r == lower)
    }

    pub fn classify<'a>(&self, key: &str, value: &'a Value) -> AttributeClass<'a> {
        if self.is_reserved(key) {
            return AttributeClass::Reserved;
        }
        let Some(text) = value.as_str() else {
            return AttributeClass::Ignored;
        };
        if looks_like_calendar(text) {
            return match self.parser.parse(text) {
                Ok((start, end)) => AttributeClass::Calendar { start, end },
                Err(e) => AttributeClass::MalformedCalendar(e),
            };
        }
        if text.is_empty() {
            return AttributeClass::Ignored;
        }
        AttributeClass::OneShot(text)
    }
}
