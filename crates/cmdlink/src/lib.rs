//! # cmdlink -- Request/Response over a Serial Stream
//!
//! `cmdlink` is an asynchronous Rust library that turns a stream-oriented
//! serial link into correlated request/response calls. A caller writes a
//! command and awaits exactly one outcome: a matched success response, a
//! device-reported error, or a timeout. That holds even though the device
//! answers with an unframed stream that has no built-in correlation.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cmdlink::{CommandRequest, LinkBuilder};
//! use cmdlink::regex::Regex;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let link = LinkBuilder::new()
//!         .serial_port("/dev/ttyUSB0")
//!         .baud_rate(115_200)
//!         .build()
//!         .await?;
//!
//!     let reply = link
//!         .submit(CommandRequest::text("getTemp", Regex::new(r"^Temp: .+$")?))
//!         .await?;
//!     println!("{reply}");
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                   | Purpose                                              |
//! |-------------------------|------------------------------------------------------|
//! | `cmdlink-core`          | [`Transport`] trait, [`LinkEvent`], errors           |
//! | `cmdlink-transport`     | Serial transport over tokio-serial                   |
//! | `cmdlink-io`            | Requests, framers, handlers, the IO task             |
//! | `cmdlink-test-harness`  | Mock transport for tests                             |
//! | **`cmdlink`**           | This facade crate -- re-exports everything           |
//!
//! ## Requests
//!
//! Every request goes through one FIFO queue, and only one is in flight at
//! a time:
//!
//! - [`CommandRequest`] writes text or bytes, then matches inbound lines
//!   against its success, error and buffer patterns. It settles with the
//!   buffered response text.
//! - [`CaptureRequest`] writes raw bytes verbatim, switches the inbound stream to
//!   binary framing and settles with the first chunk flushed after a quiet
//!   interval.
//!
//! ## Events
//!
//! Log lines and data nobody asked for are published on a broadcast
//! channel:
//!
//! ```no_run
//! use cmdlink::{LinkEvent, LinkIo};
//! # async fn example(link: &LinkIo) {
//! let mut events = link.subscribe();
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         LinkEvent::UnexpectedData(data) => println!("unexpected: {data}"),
//!         LinkEvent::Log(record) => println!("[{}] {}", record.level, record.message),
//!         other => println!("{other:?}"),
//!     }
//! }
//! # }
//! ```

pub use cmdlink_core::*;
pub use cmdlink_io::*;

/// Regular expressions used for request and handler patterns.
pub use regex;

/// Serial port transport.
///
/// Provides [`SerialTransport`](serial::SerialTransport) and its line
/// settings for USB virtual COM ports and RS-232 devices.
pub mod serial {
    pub use cmdlink_transport::*;
}
