//! Incremental newline framer for the gateway's ASCII serial stream.
//!
//! Serial reads return arbitrary chunks; a line may arrive split across several
//! reads or several lines may arrive in one. The framer buffers bytes and yields
//! complete lines with surrounding whitespace (including `\r`) trimmed. Lines
//! longer than the configured maximum are dropped up to the next newline so a
//! noisy link cannot grow the buffer without bound.
use bytes::{Buf, BytesMut};

pub struct LineFramer {
    buf: BytesMut,
    max_line: usize,
    /// Set while skipping the tail of an over-long line.
    discarding: bool,
}

impl LineFramer {
    pub fn new(max_line: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(max_line.min(4096)),
            max_line: max_line.max(1),
            discarding: false,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete, non-empty line if one is buffered.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                if self.buf.len() > self.max_line {
                    log::debug!(
                        "Dropping {} bytes of over-long serial line",
                        self.buf.len()
                    );
                    self.buf.clear();
                    self.discarding = true;
                }
                return None;
            };
            let raw = self.buf.split_to(pos);
            self.buf.advance(1);
            if self.discarding {
                self.discarding = false;
                continue;
            }
            if raw.len() > self.max_line {
                continue;
            }
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if line.is_empty() {
                continue;
            }
            return Some(line);
        }
    }

    /// Bytes currently buffered without a terminating newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
