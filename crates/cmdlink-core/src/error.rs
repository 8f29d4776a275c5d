//! Error types for cmdlink.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport failures, request outcomes
//! (timeouts, device-reported errors) and configuration mistakes are all
//! captured here.

/// The error type for all cmdlink operations.
///
/// A rejected request always carries exactly one of these. Rejections are
/// local to the request that failed; the IO task keeps servicing the queue.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport was not open when the request reached the head of the
    /// queue.
    #[error("connection not open")]
    NotConnected,

    /// No qualifying response arrived within the request's timeout.
    #[error("timeout waiting for response")]
    Timeout,

    /// An inbound line matched the request's error pattern.
    ///
    /// Carries whatever response text had been buffered before the error
    /// line arrived (possibly empty).
    #[error("device reported error: {0}")]
    DeviceError(String),

    /// A transport-level error (open failure, port busy, bad path).
    #[error("transport error: {0}")]
    Transport(String),

    /// The connection to the device was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An invalid parameter was passed to a builder or request.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A match pattern failed to compile.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// The IO task has shut down, so the request can never settle.
    #[error("IO task is not running")]
    TaskClosed,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
