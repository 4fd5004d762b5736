//! Due-event dispatch for one device's cached events.
//!
//! Expired events (`end < now`) are removed whether or not they were sent.
//! Due events (`start <= now <= end`, not yet sent) are written to the link and
//! marked sent; an event is delivered at most once per activation. A failed
//! write leaves the event unsent so the next cycle retries it.

use crate::link::protocol::OutboundLine;
use crate::link::LineSink;
use crate::metrics;
use crate::schedule::DeviceEvents;
use log::{debug, info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub expired: Vec<String>,
    pub sent: Vec<String>,
    pub failed: Vec<String>,
}

pub fn dispatch_due(events: &mut DeviceEvents, now: i64, sink: &dyn LineSink) -> DispatchReport {
    let mut report = DispatchReport::default();

    events.retain(|label, ev| {
        if ev.is_expired(now) {
            debug!("Expired cached event '{}' (end {} < now {})", label, ev.end, now);
            report.expired.push(label.clone());
            false
        } else {
            true
        }
    });

    for (label, ev) in events.iter_mut() {
        if !ev.is_due(now) {
            continue;
        }
        let line = OutboundLine::Calendar {
            label: label.clone(),
            start: ev.start,
            end: ev.end,
        };
        match sink.send_line(&line) {
            Ok(()) => {
                ev.sent = true;
                metrics::inc_calendar_dispatched();
                info!("Sent due event: {}", line);
                report.sent.push(label.clone());
            }
            Err(e) => {
                metrics::inc_serial_write_failures();
                warn!("Could not send due event '{}': {}", label, e);
                report.failed.push(label.clone());
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;
    use crate::schedule::ScheduledEvent;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl LineSink for Recorder {
        fn send_line(&self, line: &OutboundLine) -> Result<(), LinkError> {
            self.0.lock().unwrap().push(line.to_string());
            Ok(())
        }
    }

    struct Broken;

    impl LineSink for Broken {
        fn send_line(&self, _line: &OutboundLine) -> Result<(), LinkError> {
            Err(LinkError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "unplugged",
            )))
        }
    }

    fn events(list: &[(&str, i64, i64, bool)]) -> DeviceEvents {
        list.iter()
            .map(|(l, s, e, sent)| {
                (
                    l.to_string(),
                    ScheduledEvent {
                        start: *s,
                        end: *e,
                        sent: *sent,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn sends_due_once_and_marks_sent() {
        let sink = Recorder::default();
        let mut evs = events(&[("a", 100, 200, false), ("later", 101, 300, false)]);
        let report = dispatch_due(&mut evs, 100, &sink);
        assert_eq!(report.sent, vec!["a"]);
        assert!(evs["a"].sent);
        assert!(!evs["later"].sent);

        let again = dispatch_due(&mut evs, 150, &sink);
        assert_eq!(again.sent, vec!["later"]);
        assert_eq!(
            *sink.0.lock().unwrap(),
            vec![
                "calendar:a:Start=100:End=200".to_string(),
                "calendar:later:Start=101:End=300".to_string()
            ]
        );
        assert!(dispatch_due(&mut evs, 160, &sink).sent.is_empty());
    }

    #[test]
    fn end_boundary_is_inclusive() {
        let sink = Recorder::default();
        let mut evs = events(&[("a", 100, 200, false)]);
        assert_eq!(dispatch_due(&mut evs, 200, &sink).sent, vec!["a"]);
    }

    #[test]
    fn expired_events_are_removed_without_dispatch() {
        let sink = Recorder::default();
        let mut evs = events(&[("old", 10, 20, false), ("done", 10, 20, true)]);
        let report = dispatch_due(&mut evs, 21, &sink);
        assert_eq!(report.expired.len(), 2);
        assert!(evs.is_empty());
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn failed_write_keeps_event_unsent() {
        let mut evs = events(&[("a", 100, 200, false)]);
        let report = dispatch_due(&mut evs, 150, &Broken);
        assert_eq!(report.failed, vec!["a"]);
        assert!(!evs["a"].sent);
    }
}
