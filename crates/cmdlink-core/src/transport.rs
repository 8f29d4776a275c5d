//! Transport trait for device communication.
//!
//! The [`Transport`] trait abstracts over the physical link to a device.
//! The IO task in `cmdlink-io` owns exactly one `Transport` and is the only
//! thing that ever writes to it. Implementations exist for serial ports
//! (`cmdlink-transport`) and for deterministic tests (`MockTransport` from
//! the `cmdlink-test-harness` crate).

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level duplex stream to a device.
///
/// Implementations deliver raw, unframed bytes. Splitting them into lines or
/// chunks is the job of the framers in `cmdlink-io`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// (Re)open the underlying connection.
    ///
    /// Opening an already open transport is a no-op.
    async fn open(&mut self) -> Result<()>;

    /// Send raw bytes to the device.
    ///
    /// Implementations should not return until all bytes have been handed
    /// to the underlying transport.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the device into the provided buffer.
    ///
    /// Returns the number of bytes read. Waits up to `timeout` for data to
    /// arrive and returns [`Error::Timeout`](crate::error::Error::Timeout)
    /// if nothing was received within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the connection.
    ///
    /// After `close()`, `send()` and `receive()` return
    /// [`Error::NotConnected`](crate::error::Error::NotConnected) until the
    /// transport is opened again.
    async fn close(&mut self) -> Result<()>;

    /// Whether the transport is currently open.
    fn is_connected(&self) -> bool;
}
