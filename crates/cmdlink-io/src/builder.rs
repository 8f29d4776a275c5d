//! LinkBuilder -- fluent builder for constructing [`LinkIo`] instances.
//!
//! Separates configuration from construction so that callers can set up
//! serial port parameters, framing, timeouts and unsolicited handlers
//! before the IO task is spawned.
//!
//! # Example
//!
//! ```no_run
//! use cmdlink_io::builder::LinkBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> cmdlink_core::Result<()> {
//! let link = LinkBuilder::new()
//!     .serial_port("/dev/ttyUSB0")
//!     .baud_rate(115_200)
//!     .command_timeout(Duration::from_millis(300))
//!     .on_unsolicited(r"^BOOT", |line: &str| println!("device rebooted: {line}"))
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use tokio::sync::broadcast;

use cmdlink_core::error::{Error, Result};
use cmdlink_core::transport::Transport;
use cmdlink_transport::{SerialConfig, SerialTransport};

use crate::handler::{MessageHandler, Unsolicited};
use crate::io::{spawn_io_task, IoConfig, LinkIo};

/// Default capacity of the link event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Fluent builder for [`LinkIo`].
///
/// Everything has a default, so the simplest usage is:
///
/// ```ignore
/// let link = LinkBuilder::new()
///     .serial_port("/dev/ttyUSB0")
///     .build()
///     .await?;
/// ```
pub struct LinkBuilder {
    serial_port: Option<String>,
    baud_rate: Option<u32>,
    serial_config: SerialConfig,
    io: IoConfig,
    event_capacity: usize,
    handlers: Vec<Unsolicited>,
    /// First pattern that failed to compile; reported by `build`.
    pattern_error: Option<Error>,
}

impl LinkBuilder {
    pub fn new() -> Self {
        LinkBuilder {
            serial_port: None,
            baud_rate: None,
            serial_config: SerialConfig::default(),
            io: IoConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            handlers: Vec::new(),
            pattern_error: None,
        }
    }

    /// Set the serial port path (e.g. `/dev/ttyUSB0` or `COM3`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Override the baud rate from [`serial_config`](Self::serial_config).
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = Some(baud);
        self
    }

    /// Full serial line settings (default: 9600 8N1, no flow control).
    pub fn serial_config(mut self, config: SerialConfig) -> Self {
        self.serial_config = config;
        self
    }

    /// Inbound line delimiter (default: `"\n"`).
    pub fn delimiter(mut self, delimiter: impl AsRef<[u8]>) -> Self {
        self.io.delimiter = delimiter.as_ref().to_vec();
        self
    }

    /// Terminator appended to text payloads (default: `"\n"`).
    pub fn line_terminator(mut self, terminator: impl AsRef<[u8]>) -> Self {
        self.io.line_terminator = terminator.as_ref().to_vec();
        self
    }

    /// Timeout for command requests that do not set their own
    /// (default: 1s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.io.command_timeout = timeout;
        self
    }

    pub fn max_line_length(mut self, max: usize) -> Self {
        self.io.max_line_length = max;
        self
    }

    /// Capacity of the broadcast channel behind [`LinkIo::subscribe`].
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Register an unsolicited handler. Handlers are consulted in
    /// registration order; the first match consumes the line.
    ///
    /// An invalid pattern is reported when the link is built.
    pub fn on_unsolicited(mut self, pattern: &str, handler: impl MessageHandler) -> Self {
        match Unsolicited::new(pattern, handler) {
            Ok(entry) => self.handlers.push(entry),
            Err(e) => {
                if self.pattern_error.is_none() {
                    self.pattern_error = Some(e);
                }
            }
        }
        self
    }

    /// Build a [`LinkIo`] with a caller-provided transport.
    ///
    /// This is the primary entry point for testing (pass a
    /// `MockTransport` from `cmdlink-test-harness`) and for callers that
    /// manage the transport themselves.
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<LinkIo> {
        if let Some(e) = self.pattern_error {
            return Err(e);
        }
        if self.io.line_terminator.is_empty() {
            return Err(Error::InvalidParameter(
                "line_terminator must not be empty".into(),
            ));
        }

        let (event_tx, _) = broadcast::channel(self.event_capacity);
        Ok(spawn_io_task(transport, self.io, self.handlers, event_tx))
    }

    /// Build a [`LinkIo`] over a serial port.
    ///
    /// Requires that [`serial_port()`](Self::serial_port) has been called.
    pub async fn build(mut self) -> Result<LinkIo> {
        let port = self
            .serial_port
            .take()
            .ok_or_else(|| Error::InvalidParameter("serial_port is required for build()".into()))?;
        let mut config = self.serial_config.clone();
        if let Some(baud) = self.baud_rate {
            config.baud_rate = baud;
        }

        let transport = SerialTransport::open_with_config(&port, config).await?;
        self.build_with_transport(Box::new(transport)).await
    }
}

impl Default for LinkBuilder {
    fn default() -> Self {
        Self::new()
    }
}
