//! cmdlink-core: Core traits, events, and error definitions for cmdlink.
//!
//! This crate defines the transport-agnostic pieces every other cmdlink
//! crate builds on. Applications that only need to name the types (for
//! example to store a `Box<dyn Transport>`) can depend on it alone.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level duplex channel to a device
//! - [`LinkEvent`] -- log lines and unexpected inbound data
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod helpers;
pub mod transport;

pub use error::{Error, Result};
pub use events::{Inbound, LinkEvent, LogLevel, LogRecord};
pub use helpers::{format_hex, parse_hex};
pub use transport::Transport;
