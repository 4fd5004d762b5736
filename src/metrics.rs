//! Process-local counters for the bridge.
//!
//! Counters only grow; [`snapshot`] reads them all at once for the per-cycle
//! debug summary.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static POLL_CYCLES: AtomicU64 = AtomicU64::new(0);
static TRIGGERS_RECEIVED: AtomicU64 = AtomicU64::new(0);
static FETCH_FAILURES: AtomicU64 = AtomicU64::new(0);
static CALENDAR_DISPATCHED: AtomicU64 = AtomicU64::new(0);
static ONE_SHOTS_SENT: AtomicU64 = AtomicU64::new(0);
static REMOTE_DELETES: AtomicU64 = AtomicU64::new(0);
static REMOTE_DELETE_FAILURES: AtomicU64 = AtomicU64::new(0);
static MEASUREMENTS_UPLOADED: AtomicU64 = AtomicU64::new(0);
static UPLOAD_FAILURES: AtomicU64 = AtomicU64::new(0);
static SERIAL_WRITE_FAILURES: AtomicU64 = AtomicU64::new(0);

pub fn inc_poll_cycles() {
    POLL_CYCLES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_triggers_received() {
    TRIGGERS_RECEIVED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_fetch_failures() {
    FETCH_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_calendar_dispatched() {
    CALENDAR_DISPATCHED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_one_shots_sent() {
    ONE_SHOTS_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_remote_deletes() {
    REMOTE_DELETES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_remote_delete_failures() {
    REMOTE_DELETE_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_measurements_uploaded() {
    MEASUREMENTS_UPLOADED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_upload_failures() {
    UPLOAD_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_serial_write_failures() {
    SERIAL_WRITE_FAILURES.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub poll_cycles: u64,
    pub triggers_received: u64,
    pub fetch_failures: u64,
    pub calendar_dispatched: u64,
    pub one_shots_sent: u64,
    pub remote_deletes: u64,
    pub remote_delete_failures: u64,
    pub measurements_uploaded: u64,
    pub upload_failures: u64,
    pub serial_write_failures: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        poll_cycles: POLL_CYCLES.load(Ordering::Relaxed),
        triggers_received: TRIGGERS_RECEIVED.load(Ordering::Relaxed),
        fetch_failures: FETCH_FAILURES.load(Ordering::Relaxed),
        calendar_dispatched: CALENDAR_DISPATCHED.load(Ordering::Relaxed),
        one_shots_sent: ONE_SHOTS_SENT.load(Ordering::Relaxed),
        remote_deletes: REMOTE_DELETES.load(Ordering::Relaxed),
        remote_delete_failures: REMOTE_DELETE_FAILURES.load(Ordering::Relaxed),
        measurements_uploaded: MEASUREMENTS_UPLOADED.load(Ordering::Relaxed),
        upload_failures: UPLOAD_FAILURES.load(Ordering::Relaxed),
        serial_write_failures: SERIAL_WRITE_FAILURES.load(Ordering::Relaxed),
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycles={} triggers={} fetch_fail={} calendar_sent={} one_shot_sent={} deletes={} delete_fail={} uploads={} upload_fail={} tx_fail={}",
            self.poll_cycles,
            self.triggers_received,
            self.fetch_failures,
            self.calendar_dispatched,
            self.one_shots_sent,
            self.remote_deletes,
            self.remote_delete_failures,
            self.measurements_uploaded,
            self.upload_failures,
            self.serial_write_failures
        )
    }
}
