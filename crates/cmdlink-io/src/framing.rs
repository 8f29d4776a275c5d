//! Stream framing: turning raw transport bytes into discrete messages.
//!
//! Two framers exist and exactly one is active at a time:
//!
//! - [`LineFramer`] splits on a fixed delimiter and yields text lines.
//! - [`BinaryFramer`] accumulates raw bytes and flushes them as one chunk
//!   once the line has been quiet for an interval, or once a size limit is
//!   reached.
//!
//! [`Framing`] holds both and tracks which one is active. The line framer is
//! long-lived (a partial line survives a binary excursion); each binary
//! excursion gets a fresh [`BinaryFramer`].

use std::time::Duration;

use tokio::time::Instant;

use cmdlink_core::events::Inbound;

/// Default line delimiter.
pub const DEFAULT_DELIMITER: &[u8] = b"\n";

/// Default maximum line length before a forced split.
pub const DEFAULT_MAX_LINE: usize = 8192;

/// Default maximum binary chunk size.
pub const DEFAULT_MAX_CHUNK: usize = 65_536;

/// Which framer is currently attached to the inbound stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingMode {
    Line,
    Binary,
}

// ---------------------------------------------------------------------------
// Line framer
// ---------------------------------------------------------------------------

/// Delimiter-based line framer.
#[derive(Debug)]
pub struct LineFramer {
    delimiter: Vec<u8>,
    max_length: usize,
    buf: Vec<u8>,
}

impl LineFramer {
    /// Create a line framer. An empty delimiter falls back to `"\n"`.
    pub fn new(delimiter: &[u8], max_length: usize) -> Self {
        let delimiter = if delimiter.is_empty() {
            DEFAULT_DELIMITER.to_vec()
        } else {
            delimiter.to_vec()
        };
        LineFramer {
            delimiter,
            max_length: max_length.max(1),
            buf: Vec::new(),
        }
    }

    /// Consume bytes up to and including the first line boundary.
    ///
    /// Returns the completed line (if any) and how many bytes of `data` were
    /// consumed. Bytes after the boundary are left for the caller.
    pub fn next_line(&mut self, data: &[u8]) -> (Option<String>, usize) {
        for (i, &byte) in data.iter().enumerate() {
            self.buf.push(byte);

            if self.buf.ends_with(&self.delimiter) {
                let body_len = self.buf.len() - self.delimiter.len();
                self.buf.truncate(body_len);
                return (Some(self.take_line()), i + 1);
            }

            if self.buf.len() >= self.max_length {
                tracing::warn!(len = self.buf.len(), "line exceeds maximum length, splitting");
                return (Some(self.take_line()), i + 1);
            }
        }
        (None, data.len())
    }

    /// Bytes of an unterminated line currently held.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn take_line(&mut self) -> String {
        let mut line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        if line.ends_with('\r') {
            line.pop();
        }
        line
    }
}

// ---------------------------------------------------------------------------
// Binary framer
// ---------------------------------------------------------------------------

/// Inter-byte-timeout framer.
///
/// A chunk is complete when `interval` passes without a new byte, or as
/// soon as `max_size` bytes have accumulated.
#[derive(Debug)]
pub struct BinaryFramer {
    interval: Duration,
    max_size: usize,
    buf: Vec<u8>,
    last_byte: Option<Instant>,
}

impl BinaryFramer {
    pub fn new(interval: Duration, max_size: usize) -> Self {
        BinaryFramer {
            interval,
            max_size: max_size.max(1),
            buf: Vec::new(),
            last_byte: None,
        }
    }

    /// Consume bytes until the size limit is hit.
    ///
    /// Returns a chunk only when `max_size` was reached; quiet-interval
    /// flushes happen through [`BinaryFramer::flush_due`].
    pub fn next_chunk(&mut self, data: &[u8], now: Instant) -> (Option<Vec<u8>>, usize) {
        if data.is_empty() {
            return (None, 0);
        }
        self.last_byte = Some(now);
        let room = self.max_size - self.buf.len();
        let take = room.min(data.len());
        self.buf.extend_from_slice(&data[..take]);
        if self.buf.len() >= self.max_size {
            (Some(self.take_chunk()), take)
        } else {
            (None, take)
        }
    }

    /// When the accumulated bytes become due, if any are held.
    pub fn deadline(&self) -> Option<Instant> {
        match self.last_byte {
            Some(last) if !self.buf.is_empty() => Some(last + self.interval),
            _ => None,
        }
    }

    /// Flush the accumulated chunk if the quiet interval has elapsed.
    pub fn flush_due(&mut self, now: Instant) -> Option<Vec<u8>> {
        match self.deadline() {
            Some(deadline) if now >= deadline => Some(self.take_chunk()),
            _ => None,
        }
    }

    fn take_chunk(&mut self) -> Vec<u8> {
        self.last_byte = None;
        std::mem::take(&mut self.buf)
    }
}

// ---------------------------------------------------------------------------
// Framing (mode switch)
// ---------------------------------------------------------------------------

/// The active framing strategy for the inbound stream.
#[derive(Debug)]
pub struct Framing {
    line: LineFramer,
    /// `Some` while in binary mode.
    binary: Option<BinaryFramer>,
}

impl Framing {
    pub fn new(delimiter: &[u8], max_line_length: usize) -> Self {
        Framing {
            line: LineFramer::new(delimiter, max_line_length),
            binary: None,
        }
    }

    pub fn mode(&self) -> FramingMode {
        if self.binary.is_some() {
            FramingMode::Binary
        } else {
            FramingMode::Line
        }
    }

    /// Detach the line framer and attach a fresh binary framer.
    ///
    /// A no-op when binary mode is already active.
    pub fn enter_binary(&mut self, interval: Duration, max_size: usize) {
        if self.binary.is_none() {
            self.binary = Some(BinaryFramer::new(interval, max_size));
        }
    }

    /// Drop the binary framer and re-attach the line framer.
    ///
    /// A no-op when line mode is already active.
    pub fn enter_line(&mut self) {
        self.binary = None;
    }

    /// Feed bytes through the active framer, stopping at the first complete
    /// message.
    ///
    /// Returns the message (if any) and the number of bytes consumed, so the
    /// caller can dispatch the message (which may switch modes) before
    /// feeding the remainder.
    pub fn next_frame(&mut self, data: &[u8], now: Instant) -> (Option<Inbound>, usize) {
        match self.binary.as_mut() {
            Some(binary) => {
                let (chunk, used) = binary.next_chunk(data, now);
                (chunk.map(Inbound::Chunk), used)
            }
            None => {
                let (line, used) = self.line.next_line(data);
                (line.map(Inbound::Line), used)
            }
        }
    }

    /// Flush instant of the binary framer, if one is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.binary.as_ref().and_then(BinaryFramer::deadline)
    }

    /// Flush a binary chunk whose quiet interval has elapsed.
    pub fn flush_due(&mut self, now: Instant) -> Option<Inbound> {
        self.binary
            .as_mut()
            .and_then(|b| b.flush_due(now))
            .map(Inbound::Chunk)
    }
}
