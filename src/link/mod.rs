//! # Serial Link Module
//!
//! Connection to the LoRa gateway board over USB/UART.
//!
//! The port is split in two halves after opening:
//!
//! - a [`SerialReader`] that owns a cloned handle and runs on a blocking thread,
//!   framing bytes into lines and forwarding them over an `mpsc` channel;
//! - a [`SharedWriter`] that wraps the original handle in a mutex. It is cloned
//!   into every component that writes (foreground handler, poller) and every
//!   line is written and flushed while holding the lock, so lines from
//!   different writers never interleave on the wire.
//!
//! Writes are fire-and-forget: the gateway sends no acknowledgement.
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! ```

pub mod framer;
pub mod protocol;

use crate::error::LinkError;
use crate::logutil::escape_log;
use log::{debug, trace};
use protocol::OutboundLine;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

#[cfg(feature = "serial")]
use crate::logutil::preview_bytes;
#[cfg(feature = "serial")]
use log::{error, info, warn};
#[cfg(feature = "serial")]
use serialport::SerialPort;
#[cfg(feature = "serial")]
use std::time::Duration;
#[cfg(feature = "serial")]
use tokio::sync::mpsc;

/// Destination for outbound protocol lines.
pub trait LineSink: Send + Sync {
    fn send_line(&self, line: &OutboundLine) -> Result<(), LinkError>;
}

/// Mutex-guarded writer shared by every component that talks to the gateway.
pub struct SharedWriter<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> Clone for SharedWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: Write + Send> SharedWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Direct access to the wrapped writer (inspection in tests, port control).
    pub fn lock(&self) -> Result<MutexGuard<'_, W>, LinkError> {
        self.inner.lock().map_err(|_| LinkError::Poisoned)
    }
}

impl<W: Write + Send> LineSink for SharedWriter<W> {
    fn send_line(&self, line: &OutboundLine) -> Result<(), LinkError> {
        let encoded = line.encode();
        let mut guard = self.lock()?;
        guard.write_all(encoded.as_bytes())?;
        guard.flush()?;
        drop(guard);
        trace!("TX {}", escape_log(&encoded));
        Ok(())
    }
}

#[cfg(feature = "serial")]
pub type SerialWriter = SharedWriter<Box<dyn SerialPort>>;

/// Reading half of the gateway link.
#[cfg(feature = "serial")]
pub struct SerialReader {
    port_name: String,
    port: Box<dyn SerialPort>,
    framer: framer::LineFramer,
}

/// Open the gateway port and split it into reader and writer halves.
#[cfg(feature = "serial")]
pub fn open(
    port_name: &str,
    baud_rate: u32,
    read_timeout_ms: u64,
    max_line_len: usize,
) -> Result<(SerialReader, SerialWriter), LinkError> {
    info!("Opening gateway link on {} at {} baud", port_name, baud_rate);
    let mut builder =
        serialport::new(port_name, baud_rate).timeout(Duration::from_millis(read_timeout_ms));
    // Some USB serial adapters need explicit settings
    #[cfg(unix)]
    {
        builder = builder
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None);
    }
    let mut port = builder.open().map_err(|e| LinkError::Open {
        port: port_name.to_string(),
        reason: e.to_string(),
    })?;
    // Toggle DTR/RTS so ESP32 boards come out of reset
    let _ = port.write_data_terminal_ready(true);
    let _ = port.write_request_to_send(true);
    std::thread::sleep(Duration::from_millis(150));
    // Clear buffered boot chatter
    let _ = port.clear(serialport::ClearBuffer::Input);

    let read_half = port.try_clone().map_err(|e| LinkError::Open {
        port: port_name.to_string(),
        reason: format!("cannot clone handle: {}", e),
    })?;
    debug!("Gateway link on {} initialized", port_name);
    Ok((
        SerialReader {
            port_name: port_name.to_string(),
            port: read_half,
            framer: framer::LineFramer::new(max_line_len),
        },
        SharedWriter::new(port),
    ))
}

#[cfg(feature = "serial")]
impl SerialReader {
    const MAX_CONSECUTIVE_ERRORS: u32 = 50;

    /// Blocking read loop. Returns when the receiving side is dropped or the
    /// port keeps failing.
    pub fn run(mut self, lines: mpsc::UnboundedSender<String>) -> Result<(), LinkError> {
        info!("Gateway reader started on {}", self.port_name);
        let mut buffer = [0u8; 1024];
        let mut consecutive_errors = 0u32;
        loop {
            if lines.is_closed() {
                debug!("Line consumer gone, stopping reader");
                return Ok(());
            }
            match self.port.read(&mut buffer) {
                Ok(n) if n > 0 => {
                    consecutive_errors = 0;
                    trace!("RX {} bytes: {}", n, preview_bytes(&buffer[..n]));
                    self.framer.push(&buffer[..n]);
                    while let Some(line) = self.framer.next_line() {
                        if lines.send(line).is_err() {
                            return Ok(());
                        }
                    }
                    if self.framer.pending() > 0 {
                        trace!("{} byte(s) held for the next newline", self.framer.pending());
                    }
                }
                Ok(_) => {}
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {
                    debug!("Serial read interrupted (EINTR)");
                }
                Err(e) => {
                    consecutive_errors += 1;
                    if consecutive_errors >= Self::MAX_CONSECUTIVE_ERRORS {
                        error!(
                            "Serial read on {} failed {} times in a row, giving up: {}",
                            self.port_name, consecutive_errors, e
                        );
                        return Err(LinkError::Io(e));
                    }
                    warn!("Serial read error on {}: {} - retrying", self.port_name, e);
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }
    }
}
