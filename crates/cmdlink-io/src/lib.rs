//! Request/response orchestration over a serial byte stream.
//!
//! This crate turns an unframed, uncorrelated byte stream into a
//! request/response primitive. One tokio task owns the transport
//! exclusively, serializes callers into a FIFO queue, and settles each
//! request against the inbound lines (or binary chunks) that follow its
//! write.
//!
//! # Architecture
//!
//! - [`request`] -- command and capture requests, payloads, line classification
//! - [`framing`] -- line and inter-byte-timeout binary framers, mode switch
//! - [`handler`] -- unsolicited message handler table
//! - [`io`] -- IO task types, spawn, and the select loop
//! - [`pending`] -- the caller's future for a submitted request
//! - [`builder`] -- fluent construction over a serial port or any transport

pub mod builder;
pub mod framing;
pub mod handler;
pub mod io;
mod journal;
pub mod pending;
pub mod request;

pub use builder::LinkBuilder;
pub use framing::FramingMode;
pub use handler::{MessageHandler, NullHandler, Unsolicited};
pub use io::{spawn_io_task, IoConfig, LinkIo};
pub use pending::Pending;
pub use request::{CaptureRequest, CommandRequest, Payload};
