//! Transport implementations for cmdlink.
//!
//! This crate provides concrete implementations of the
//! [`Transport`](cmdlink_core::Transport) trait from `cmdlink-core`:
//!
//! - [`SerialTransport`]: USB virtual COM ports and RS-232 serial connections
//!
//! # Example
//!
//! ```no_run
//! use cmdlink_transport::SerialTransport;
//! use cmdlink_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> cmdlink_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB0", 115_200).await?;
//! transport.send(b"version\n").await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

pub mod serial;

pub use serial::{DataBits, FlowControl, Parity, SerialConfig, SerialTransport, StopBits};
