//! Gateway wire protocol.
//!
//! Inbound lines (one field per line):
//!
//! ```text
//! MAC:<mac>
//! ID:<numeric>
//! Battery:<numeric>%
//! <poll sentinel>            e.g. GET_MSG
//! ```
//!
//! Outbound lines:
//!
//! ```text
//! <displayName>:<message>
//! calendar:<label>:Start=<epoch>:End=<epoch>
//! time:<epoch>
//! ```
use std::fmt;

/// One classified inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundLine {
    MacField(String),
    IdField(String),
    BatteryField(String),
    PollTrigger,
    Unrecognized,
}

/// Classify a trimmed line. The sentinel must match exactly (case-sensitive);
/// field lines with an empty value are unrecognized.
pub fn parse_inbound(line: &str, sentinel: &str) -> InboundLine {
    if line == sentinel {
        return InboundLine::PollTrigger;
    }
    let field = |prefix: &str| {
        line.strip_prefix(prefix)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    if let Some(v) = field("MAC:") {
        return InboundLine::MacField(v);
    }
    if let Some(v) = field("ID:") {
        return InboundLine::IdField(v);
    }
    if let Some(v) = field("Battery:") {
        let v = v.trim_end_matches('%').trim();
        if v.is_empty() {
            return InboundLine::Unrecognized;
        }
        return InboundLine::BatteryField(v.to_string());
    }
    InboundLine::Unrecognized
}

/// A complete MAC/ID/Battery triplet ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurement {
    pub mac: String,
    pub raw_id: String,
    /// Battery level without the trailing `%`.
    pub battery_percent: String,
}

impl Measurement {
    /// Numeric `(data, battery)` pair for the telemetry payload.
    pub fn telemetry_values(&self) -> Option<(f64, f64)> {
        let data = self.raw_id.parse::<f64>().ok()?;
        let battery = self.battery_percent.parse::<f64>().ok()?;
        Some((data, battery))
    }
}

/// Line-by-line accumulator for measurement triplets.
///
/// Fields may arrive in any order; a repeated field overwrites the earlier
/// value. Once all three are present the triplet is emitted and the
/// accumulator starts empty again.
#[derive(Debug, Default, Clone)]
pub struct PendingMeasurement {
    mac: Option<String>,
    raw_id: Option<String>,
    battery_percent: Option<String>,
}

impl PendingMeasurement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one parsed line. Poll triggers and unrecognized lines leave the
    /// accumulator untouched.
    pub fn apply(&mut self, line: &InboundLine) -> Option<Measurement> {
        match line {
            InboundLine::MacField(v) => self.mac = Some(v.clone()),
            InboundLine::IdField(v) => self.raw_id = Some(v.clone()),
            InboundLine::BatteryField(v) => self.battery_percent = Some(v.clone()),
            InboundLine::PollTrigger | InboundLine::Unrecognized => return None,
        }
        if self.mac.is_some() && self.raw_id.is_some() && self.battery_percent.is_some() {
            let taken = std::mem::take(self);
            return Some(Measurement {
                mac: taken.mac?,
                raw_id: taken.raw_id?,
                battery_percent: taken.battery_percent?,
            });
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.mac.is_none() && self.raw_id.is_none() && self.battery_percent.is_none()
    }
}

/// Line written to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundLine {
    /// One-shot message addressed by display name.
    Message { display_name: String, body: String },
    /// Due calendar event.
    Calendar { label: String, start: i64, end: i64 },
    /// Clock sync.
    Time(i64),
}

impl OutboundLine {
    /// Wire form including the terminating newline.
    pub fn encode(&self) -> String {
        format!("{}\n", self)
    }
}

impl fmt::Display for OutboundLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboundLine::Message { display_name, body } => write!(f, "{}:{}", display_name, body),
            OutboundLine::Calendar { label, start, end } => {
                write!(f, "calendar:{}:Start={}:End={}", label, start, end)
            }
            OutboundLine::Time(epoch) => write!(f, "time:{}", epoch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENTINEL: &str = "GET_MSG";

    #[test]
    fn parses_field_lines() {
        assert_eq!(
            parse_inbound("MAC:24:6F:28:AA:BB:CC", SENTINEL),
            InboundLine::MacField("24:6F:28:AA:BB:CC".into())
        );
        assert_eq!(
            parse_inbound("ID: 1234", SENTINEL),
            InboundLine::IdField("1234".into())
        );
        assert_eq!(
            parse_inbound("Battery:87%", SENTINEL),
            InboundLine::BatteryField("87".into())
        );
        assert_eq!(
            parse_inbound("Battery:55", SENTINEL),
            InboundLine::BatteryField("55".into())
        );
    }

    #[test]
    fn sentinel_is_exact_and_case_sensitive() {
        assert_eq!(parse_inbound("GET_MSG", SENTINEL), InboundLine::PollTrigger);
        assert_eq!(parse_inbound("get_msg", SENTINEL), InboundLine::Unrecognized);
        assert_eq!(parse_inbound("GET_MSG!", SENTINEL), InboundLine::Unrecognized);
    }

    #[test]
    fn empty_or_unknown_lines_are_unrecognized() {
        for line in ["MAC:", "ID:  ", "Battery:%", "hello", "mac:AA", "RSSI:-80"] {
            assert_eq!(parse_inbound(line, SENTINEL), InboundLine::Unrecognized, "{line}");
        }
    }

    #[test]
    fn accumulator_emits_once_complete_then_resets() {
        let mut acc = PendingMeasurement::new();
        assert!(acc.apply(&parse_inbound("ID:7", SENTINEL)).is_none());
        assert!(acc.apply(&parse_inbound("GET_MSG", SENTINEL)).is_none());
        assert!(acc.apply(&parse_inbound("noise", SENTINEL)).is_none());
        assert!(acc.apply(&parse_inbound("MAC:AA", SENTINEL)).is_none());
        let m = acc.apply(&parse_inbound("Battery:90%", SENTINEL)).unwrap();
        assert_eq!(
            m,
            Measurement {
                mac: "AA".into(),
                raw_id: "7".into(),
                battery_percent: "90".into()
            }
        );
        assert!(acc.is_empty());
    }

    #[test]
    fn repeated_field_overwrites() {
        let mut acc = PendingMeasurement::new();
        acc.apply(&InboundLine::MacField("AA".into()));
        acc.apply(&InboundLine::MacField("BB".into()));
        acc.apply(&InboundLine::IdField("1".into()));
        let m = acc.apply(&InboundLine::BatteryField("5".into())).unwrap();
        assert_eq!(m.mac, "BB");
    }

    #[test]
    fn telemetry_values_require_numbers() {
        let mut m = Measurement {
            mac: "AA".into(),
            raw_id: "12".into(),
            battery_percent: "87.5".into(),
        };
        assert_eq!(m.telemetry_values(), Some((12.0, 87.5)));
        m.raw_id = "x12".into();
        assert_eq!(m.telemetry_values(), None);
    }

    #[test]
    fn encodes_outbound_lines() {
        let msg = OutboundLine::Message {
            display_name: "lora_2".into(),
            body: "reboot_now".into(),
        };
        assert_eq!(msg.encode(), "lora_2:reboot_now\n");
        let cal = OutboundLine::Calendar {
            label: "weekly_sync".into(),
            start: 100,
            end: 200,
        };
        assert_eq!(cal.encode(), "calendar:weekly_sync:Start=100:End=200\n");
        assert_eq!(OutboundLine::Time(1700000000).encode(), "time:1700000000\n");
    }
}
