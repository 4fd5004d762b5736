//! # Schedule Cache
//!
//! Pending calendar events per device, kept in memory and snapshotted to disk
//! after every device processed in a poll cycle.
//!
//! Snapshot format (`scheduled_events.json`):
//!
//! ```json
//! {
//!   "24:6F:28:AA:BB:CC": {
//!     "weekly_sync": { "start": 1704099600, "end": 1704103200, "sent": false }
//!   }
//! }
//! ```
//!
//! Recovery is crash-only: at startup the last snapshot is loaded as-is.
//!
//! ## Invariants
//!
//! - `start <= end` for every cached event (violating entries are dropped on load).
//! - `sent` only ever goes from `false` to `true` while the entry exists;
//!   refreshing an event's times never clears it.

pub mod calendar;

use crate::storage::{read_optional, write_json_atomic};
use anyhow::Result;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One calendar event awaiting (or past) delivery. The label is its key in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub start: i64,
    pub end: i64,
    #[serde(default)]
    pub sent: bool,
}

impl ScheduledEvent {
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            sent: false,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.end < now
    }

    /// Active window contains `now` (both ends inclusive) and not yet delivered.
    pub fn is_due(&self, now: i64) -> bool {
        !self.sent && self.start <= now && now <= self.end
    }
}

/// Outcome of [`ScheduleCache::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Refreshed,
}

pub type DeviceEvents = BTreeMap<String, ScheduledEvent>;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleCache {
    devices: BTreeMap<String, DeviceEvents>,
}

impl ScheduleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot. A missing file is an empty cache; a corrupt one is
    /// logged and replaced by an empty cache.
    pub fn load_from_file(path: &Path) -> Self {
        let text = match read_optional(path) {
            Ok(Some(text)) => text,
            Ok(None) => return Self::new(),
            Err(e) => {
                warn!("{} - starting with an empty schedule", e);
                return Self::new();
            }
        };
        if text.trim().is_empty() {
            return Self::new();
        }
        let mut cache: ScheduleCache = match serde_json::from_str(&text) {
            Ok(c) => c,
            Err(e) => {
                warn!(
                    "Corrupt schedule snapshot {}: {} - starting with an empty schedule",
                    path.display(),
                    e
                );
                return Self::new();
            }
        };
        for (mac, events) in cache.devices.iter_mut() {
            events.retain(|label, ev| {
                let ok = ev.start <= ev.end;
                if !ok {
                    warn!(
                        "Dropping cached event {}/{} with start {} after end {}",
                        mac, label, ev.start, ev.end
                    );
                }
                ok
            });
        }
        debug!(
            "Loaded {} scheduled event(s) from {}",
            cache.len(),
            path.display()
        );
        cache
    }

    /// Rewrite the whole snapshot. Empty buckets are left out.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let populated: BTreeMap<&String, &DeviceEvents> = self
            .devices
            .iter()
            .filter(|(_, events)| !events.is_empty())
            .collect();
        write_json_atomic(path, &populated)
    }

    /// Events of one device, creating the (empty) bucket if needed.
    pub fn device_mut(&mut self, mac: &str) -> &mut DeviceEvents {
        self.devices.entry(mac.to_string()).or_default()
    }

    /// Events of one device, without creating a bucket.
    pub fn existing_device_mut(&mut self, mac: &str) -> Option<&mut DeviceEvents> {
        self.devices.get_mut(mac)
    }

    /// Drop empty buckets and buckets of devices `keep` rejects.
    pub fn prune<F: Fn(&str) -> bool>(&mut self, keep: F) {
        self.devices.retain(|mac, events| {
            let known = keep(mac);
            if !known && !events.is_empty() {
                warn!(
                    "Discarding {} cached event(s) of unknown device {}",
                    events.len(),
                    mac
                );
            }
            known && !events.is_empty()
        });
    }

    pub fn device(&self, mac: &str) -> Option<&DeviceEvents> {
        self.devices.get(mac)
    }

    pub fn get(&self, mac: &str, label: &str) -> Option<&ScheduledEvent> {
        self.devices.get(mac)?.get(label)
    }

    /// Insert or refresh an event's interval. An existing `sent` flag is kept.
    pub fn upsert(&mut self, mac: &str, label: &str, start: i64, end: i64) -> Upsert {
        let events = self.device_mut(mac);
        match events.get_mut(label) {
            Some(existing) => {
                existing.start = start;
                existing.end = end;
                Upsert::Refreshed
            }
            None => {
                events.insert(label.to_string(), ScheduledEvent::new(start, end));
                Upsert::Created
            }
        }
    }

    pub fn remove(&mut self, mac: &str, label: &str) -> Option<ScheduledEvent> {
        self.devices.get_mut(mac)?.remove(label)
    }

    /// Total number of cached events.
    pub fn len(&self) -> usize {
        self.devices.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &DeviceEvents)> {
        self.devices.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn upsert_preserves_sent() {
        let mut cache = ScheduleCache::new();
        assert_eq!(cache.upsert("AA", "ev", 10, 20), Upsert::Created);
        cache.device_mut("AA").get_mut("ev").unwrap().sent = true;
        assert_eq!(cache.upsert("AA", "ev", 12, 25), Upsert::Refreshed);
        let ev = cache.get("AA", "ev").unwrap();
        assert_eq!((ev.start, ev.end, ev.sent), (12, 25, true));
    }

    #[test]
    fn due_and_expiry_boundaries() {
        let ev = ScheduledEvent::new(100, 200);
        assert!(!ev.is_due(99));
        assert!(ev.is_due(100));
        assert!(ev.is_due(200));
        assert!(!ev.is_due(201));
        assert!(!ev.is_expired(200));
        assert!(ev.is_expired(201));
        let sent = ScheduledEvent { sent: true, ..ev };
        assert!(!sent.is_due(150));
    }

    #[test]
    fn snapshot_round_trip_uses_flat_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scheduled_events.json");
        let mut cache = ScheduleCache::new();
        cache.upsert("AA", "weekly_sync", 1, 2);
        cache.save_to_file(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            raw,
            serde_json::json!({"AA": {"weekly_sync": {"start": 1, "end": 2, "sent": false}}})
        );
        assert_eq!(ScheduleCache::load_from_file(&path), cache);
    }

    #[test]
    fn load_tolerates_missing_corrupt_and_inverted() {
        let dir = tempdir().unwrap();
        assert!(ScheduleCache::load_from_file(&dir.path().join("none.json")).is_empty());

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, "{\"AA\": [").unwrap();
        assert!(ScheduleCache::load_from_file(&corrupt).is_empty());

        let inverted = dir.path().join("inverted.json");
        std::fs::write(
            &inverted,
            r#"{"AA":{"bad":{"start":5,"end":1,"sent":false},"ok":{"start":1,"end":5}}}"#,
        )
        .unwrap();
        let cache = ScheduleCache::load_from_file(&inverted);
        assert_eq!(cache.len(), 1);
        assert!(!cache.get("AA", "ok").unwrap().sent);
    }

    #[test]
    fn snapshot_omits_empty_buckets_and_prune_drops_unknown() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scheduled_events.json");
        let mut cache = ScheduleCache::new();
        cache.device_mut("EMPTY");
        cache.upsert("AA", "ev", 1, 2);
        cache.upsert("GONE", "ev", 1, 2);
        cache.save_to_file(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let macs: Vec<_> = raw.as_object().unwrap().keys().cloned().collect();
        assert_eq!(macs, vec!["AA", "GONE"]);

        cache.prune(|mac| mac != "GONE");
        assert!(cache.device("EMPTY").is_none());
        assert!(cache.device("GONE").is_none());
        assert_eq!(cache.len(), 1);
        assert!(cache.existing_device_mut("AA").is_some());
        assert!(cache.existing_device_mut("BB").is_none());
    }

    #[test]
    fn remove_missing_is_none() {
        let mut cache = ScheduleCache::new();
        assert!(cache.remove("AA", "x").is_none());
        cache.upsert("AA", "x", 1, 1);
        assert!(cache.remove("AA", "x").is_some());
        assert!(cache.is_empty());
    }
}
