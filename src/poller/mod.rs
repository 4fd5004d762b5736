//! # Attribute Poller
//!
//! Background half of the bridge. Each time the gateway asks for messages the
//! poller walks every registered device in registry order:
//!
//! 1. fetch the device's shared attributes;
//! 2. classify each attribute ([`classify`]) and act on it: cache or expire
//!    calendar events, forward one-shot messages and delete them remotely;
//! 3. dispatch the device's due events ([`dispatch`]);
//! 4. snapshot the schedule cache to disk.
//!
//! After the last device a single `time:<now>` line is written. Failures are
//! contained at the smallest granularity: a key, then a device. Nothing in a
//! cycle aborts the cycle.
//!
//! Cycles are started through a [`PollTrigger`] and never overlap.

pub mod classify;
pub mod dispatch;

use crate::cloud::CloudApi;
use crate::config::Config;
use crate::link::protocol::OutboundLine;
use crate::link::LineSink;
use crate::logutil::escape_log;
use crate::metrics;
use crate::registry::{DeviceIdentity, SharedRegistry};
use crate::schedule::{ScheduleCache, Upsert};
use chrono::Utc;
use classify::{calendar_action, AttributeClass, CalendarAction, Classifier};
use log::{debug, error, info, trace, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Single-slot wake-up signal from the foreground reader to the poller.
///
/// Any number of [`fire`](Self::fire) calls made before the poller wakes
/// collapse into one cycle; there is no backlog.
#[derive(Debug, Default)]
pub struct PollTrigger {
    pending: AtomicBool,
    notify: Notify,
}

impl PollTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        self.pending.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Wait until fired, clearing the flag on wake.
    pub async fn wait(&self) {
        loop {
            if self.pending.swap(false, Ordering::AcqRel) {
                return;
            }
            self.notify.notified().await;
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

/// Summary of one poll cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub devices: usize,
    pub fetch_failures: usize,
    pub calendar_sent: usize,
    pub one_shots_sent: usize,
    pub remote_deletes: usize,
    pub expired: usize,
}

pub struct Poller {
    registry: SharedRegistry,
    cloud: Arc<dyn CloudApi>,
    sink: Arc<dyn LineSink>,
    cache: ScheduleCache,
    classifier: Classifier,
    horizon_seconds: i64,
    schedule_path: PathBuf,
}

impl Poller {
    /// Build a poller, loading the last schedule snapshot from the configured path.
    pub fn new(
        config: &Config,
        registry: SharedRegistry,
        cloud: Arc<dyn CloudApi>,
        sink: Arc<dyn LineSink>,
    ) -> Self {
        let schedule_path = config.storage.schedule_path();
        let cache = ScheduleCache::load_from_file(&schedule_path);
        if !cache.is_empty() {
            info!(
                "Restored {} scheduled event(s) from {}",
                cache.len(),
                schedule_path.display()
            );
        }
        Self {
            registry,
            cloud,
            sink,
            cache,
            classifier: Classifier::from_config(&config.schedule),
            horizon_seconds: config.schedule.horizon_seconds,
            schedule_path,
        }
    }

    pub fn cache(&self) -> &ScheduleCache {
        &self.cache
    }

    /// Background loop: one full cycle per trigger, forever.
    pub async fn run(mut self, trigger: Arc<PollTrigger>) {
        info!("Attribute poller waiting for triggers");
        loop {
            trigger.wait().await;
            let now = Utc::now().timestamp();
            let report = self.run_cycle(now).await;
            debug!("Cycle done: {:?}", report);
            debug!("Counters: {}", metrics::snapshot());
        }
    }

    /// Run one complete poll cycle at time `now` (epoch seconds).
    pub async fn run_cycle(&mut self, now: i64) -> CycleReport {
        metrics::inc_poll_cycles();
        let devices: Vec<(DeviceIdentity, String)> = {
            let registry = self.registry.lock().await;
            registry
                .snapshot()
                .into_iter()
                .map(|d| {
                    let name = registry
                        .positional_display_name(&d.mac_address)
                        .unwrap_or_else(|| d.display_name.clone());
                    (d, name)
                })
                .collect()
        };

        let mut report = CycleReport {
            devices: devices.len(),
            ..Default::default()
        };
        debug!("Poll cycle at {} over {} device(s)", now, devices.len());
        self.cache
            .prune(|mac| devices.iter().any(|(d, _)| d.mac_address == mac));

        for (device, display_name) in &devices {
            self.process_device(device, display_name, now, &mut report)
                .await;
        }

        match self.sink.send_line(&OutboundLine::Time(now)) {
            Ok(()) => debug!("Time sync sent ({})", now),
            Err(e) => {
                metrics::inc_serial_write_failures();
                warn!("Could not send time sync: {}", e);
            }
        }
        report
    }

    async fn process_device(
        &mut self,
        device: &DeviceIdentity,
        display_name: &str,
        now: i64,
        report: &mut CycleReport,
    ) {
        let mac = device.mac_address.as_str();
        match self.cloud.fetch_shared_attributes(&device.access_token).await {
            Ok(attributes) => {
                trace!("{} shared attribute(s) for {}", attributes.len(), mac);
                for (key, value) in &attributes {
                    self.apply_attribute(mac, display_name, key, value, now, report)
                        .await;
                }
            }
            Err(e) => {
                metrics::inc_fetch_failures();
                report.fetch_failures += 1;
                warn!("Fetching attributes of {} failed: {}", mac, e);
            }
        }

        if let Some(events) = self.cache.existing_device_mut(mac) {
            let outcome = dispatch::dispatch_due(events, now, self.sink.as_ref());
            report.calendar_sent += outcome.sent.len();
            report.expired += outcome.expired.len();
        }

        if let Err(e) = self.cache.save_to_file(&self.schedule_path) {
            error!("Failed to persist schedule after {}: {}", mac, e);
        }
    }

    async fn apply_attribute(
        &mut self,
        mac: &str,
        display_name: &str,
        key: &str,
        value: &serde_json::Value,
        now: i64,
        report: &mut CycleReport,
    ) {
        match self.classifier.classify(key, value) {
            AttributeClass::Reserved => {}
            AttributeClass::Ignored => {
                debug!("Ignoring attribute '{}' of {}: {}", key, mac, value);
            }
            AttributeClass::MalformedCalendar(e) => {
                warn!(
                    "Skipping calendar attribute '{}' of {} ({}): {}",
                    key,
                    mac,
                    e,
                    escape_log(value.as_str().unwrap_or_default())
                );
            }
            AttributeClass::Calendar { start, end } => {
                match calendar_action(start, end, now, self.horizon_seconds) {
                    CalendarAction::Expire => {
                        self.cache.remove(mac, key);
                        info!("Calendar event '{}' of {} is over, deleting", key, mac);
                        if self.delete_remote(key).await {
                            report.remote_deletes += 1;
                        }
                    }
                    CalendarAction::Cache => {
                        if self.cache.upsert(mac, key, start, end) == Upsert::Created {
                            info!(
                                "Scheduled '{}' for {} ({} - {})",
                                key, mac, start, end
                            );
                        }
                    }
                    CalendarAction::BeyondHorizon => {
                        if self.cache.remove(mac, key).is_some() {
                            debug!("'{}' of {} moved beyond the horizon, uncached", key, mac);
                        }
                    }
                }
            }
            AttributeClass::OneShot(body) => {
                let line = OutboundLine::Message {
                    display_name: display_name.to_string(),
                    body: body.to_string(),
                };
                match self.sink.send_line(&line) {
                    Ok(()) => {
                        metrics::inc_one_shots_sent();
                        report.one_shots_sent += 1;
                        info!("Forwarded '{}' to {}: {}", key, display_name, escape_log(body));
                        if self.delete_remote(key).await {
                            report.remote_deletes += 1;
                        }
                    }
                    Err(e) => {
                        metrics::inc_serial_write_failures();
                        warn!(
                            "Could not forward '{}' to {}: {} (kept remotely)",
                            key, display_name, e
                        );
                    }
                }
            }
        }
    }

    async fn delete_remote(&self, key: &str) -> bool {
        match self.cloud.delete_shared_attribute(key).await {
            Ok(()) => {
                metrics::inc_remote_deletes();
                true
            }
            Err(e) => {
                metrics::inc_remote_delete_failures();
                warn!("Remote delete of '{}' failed: {}", key, e);
                false
            }
        }
    }
}
