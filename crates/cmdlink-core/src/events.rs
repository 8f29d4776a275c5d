//! Asynchronous link event types.
//!
//! Events are emitted by the IO task through a `tokio::sync::broadcast`
//! channel. Subscribers see every log line the task writes plus any inbound
//! data nobody asked for.

use std::fmt;
use std::time::SystemTime;

use crate::helpers::format_hex;

/// Severity of a [`LogRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// One structured log line published on the event stream.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: SystemTime,
}

impl LogRecord {
    /// Create a record stamped with the current wall-clock time.
    pub fn now(level: LogLevel, message: impl Into<String>) -> Self {
        LogRecord {
            level,
            message: message.into(),
            timestamp: SystemTime::now(),
        }
    }
}

/// A framed inbound message, as produced by the active framer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text line from the line framer (delimiter stripped).
    Line(String),
    /// A raw chunk flushed by the binary framer.
    Chunk(Vec<u8>),
}

impl fmt::Display for Inbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inbound::Line(line) => write!(f, "{line:?}"),
            Inbound::Chunk(bytes) => write!(f, "[{}]", format_hex(bytes)),
        }
    }
}

/// An event emitted by the IO task.
///
/// Subscribe via `LinkIo::subscribe()`. Delivery is best-effort through a
/// bounded broadcast channel; slow consumers may miss events.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A log line written by the IO task.
    Log(LogRecord),

    /// Inbound data that matched no unsolicited handler and arrived while no
    /// request was in flight.
    UnexpectedData(Inbound),

    /// The transport was opened.
    Opened,

    /// The transport was closed or the connection was lost.
    Closed,
}
