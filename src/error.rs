use thiserror::Error;

/// Errors raised by the cloud collaborator.
#[derive(Debug, Error)]
pub enum CloudError {
    /// Transport-level failure (connect, timeout, body decode).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("{url} returned status {status}")]
    Status { status: u16, url: String },

    /// A response was missing a field the bridge depends on.
    #[error("response missing field '{0}'")]
    MissingField(&'static str),

    /// A tenant call was attempted before `login` succeeded.
    #[error("not logged in")]
    NotLoggedIn,
}

/// Reasons a calendar-shaped attribute value could not be turned into an event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CalendarError {
    #[error("value is not of the form 'Start: <ts>\\nEnd: <ts>'")]
    Shape,

    #[error("cannot parse {field} timestamp '{value}'")]
    Timestamp { field: &'static str, value: String },

    #[error("end {end} is before start {start}")]
    Inverted { start: i64, end: i64 },
}

/// Serial link failures.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to open serial port {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("serial io error: {0}")]
    Io(#[from] std::io::Error),

    /// The writer mutex was poisoned by a panicking writer.
    #[error("serial writer lock poisoned")]
    Poisoned,

    #[error("serial support not compiled in (enable the 'serial' feature)")]
    Unsupported,
}
