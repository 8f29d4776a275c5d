//! cmdlink-test-harness: Test utilities and mock transports for cmdlink.
//!
//! This crate provides [`MockTransport`] for deterministic testing of the
//! IO task without a real serial device, and [`MockHandle`] for steering it
//! after the transport has been handed over.

pub mod mock_serial;

pub use mock_serial::{MockHandle, MockTransport};
