//! Request model: what a caller asks the IO task to do.
//!
//! Two kinds of request share the IO task's queue:
//!
//! - [`CommandRequest`]: write a text or binary payload, then correlate
//!   inbound lines against success / error / buffer patterns until one
//!   settles it.
//! - [`CaptureRequest`]: write raw bytes, switch the inbound stream to
//!   binary framing, and settle with the first flushed chunk. It has no
//!   text form, so no line terminator is ever appended.

use std::fmt;
use std::time::Duration;

use regex::Regex;

use cmdlink_core::helpers::format_hex;

use crate::framing::DEFAULT_MAX_CHUNK;

/// Pattern used when a command request does not set a buffer pattern:
/// any non-empty line.
pub const DEFAULT_BUFFER_PATTERN: &str = ".+";

/// Outbound data for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Text, written followed by the configured line terminator.
    Text(String),
    /// Raw bytes, written verbatim.
    Binary(Vec<u8>),
}

impl Payload {
    /// Bytes to put on the wire for this payload.
    pub fn wire_bytes(&self, line_terminator: &[u8]) -> Vec<u8> {
        match self {
            Payload::Text(text) => {
                let mut bytes = Vec::with_capacity(text.len() + line_terminator.len());
                bytes.extend_from_slice(text.as_bytes());
                bytes.extend_from_slice(line_terminator);
                bytes
            }
            Payload::Binary(bytes) => bytes.clone(),
        }
    }

    /// Whether `line` is a verbatim echo of this payload.
    pub fn is_echo(&self, line: &str) -> bool {
        match self {
            Payload::Text(text) => line == text,
            Payload::Binary(bytes) => line.as_bytes() == bytes.as_slice(),
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Text(text) => write!(f, "{text:?}"),
            Payload::Binary(bytes) => write!(f, "[{}]", format_hex(bytes)),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::Binary(bytes.to_vec())
    }
}

/// How an inbound line relates to a command request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineVerdict {
    /// The error pattern matched; nothing else was evaluated.
    pub error: bool,
    /// The line belongs in the response buffer.
    pub buffer: bool,
    /// The success pattern matched.
    pub success: bool,
}

/// A correlated request: write, then match inbound lines.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub payload: Payload,
    pub success: Regex,
    pub error: Option<Regex>,
    pub buffer: Regex,
    /// `None` uses the IO task's `command_timeout`; `Some(Duration::ZERO)`
    /// disables the timer.
    pub timeout: Option<Duration>,
    pub description: Option<String>,
}

impl CommandRequest {
    /// A request that writes `payload` and succeeds on a line matching
    /// `success`.
    pub fn new(payload: impl Into<Payload>, success: Regex) -> Self {
        CommandRequest {
            payload: payload.into(),
            success,
            error: None,
            buffer: default_buffer_pattern(),
            timeout: None,
            description: None,
        }
    }

    /// Text request, written with the line terminator appended.
    ///
    /// ```
    /// use cmdlink_io::request::CommandRequest;
    /// use regex::Regex;
    /// use std::time::Duration;
    ///
    /// let req = CommandRequest::text("getTemp", Regex::new(r"^Temp: .+$").unwrap())
    ///     .with_error(Regex::new("^ERROR$").unwrap())
    ///     .with_timeout(Duration::from_millis(500))
    ///     .with_description("read temperature");
    /// assert_eq!(req.label(), "read temperature");
    /// ```
    pub fn text(text: impl Into<String>, success: Regex) -> Self {
        Self::new(Payload::Text(text.into()), success)
    }

    /// Binary request, written verbatim; responses are still matched as
    /// text lines.
    pub fn binary(bytes: impl Into<Vec<u8>>, success: Regex) -> Self {
        Self::new(Payload::Binary(bytes.into()), success)
    }

    pub fn with_error(mut self, pattern: Regex) -> Self {
        self.error = Some(pattern);
        self
    }

    pub fn with_buffer(mut self, pattern: Regex) -> Self {
        self.buffer = pattern;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Name used in log lines.
    pub fn label(&self) -> &str {
        self.description.as_deref().unwrap_or("write")
    }

    /// Classify one inbound line.
    ///
    /// The error pattern is checked first and pre-empts everything else.
    /// Otherwise buffering and success are independent: a line can both
    /// join the buffer and complete the request.
    pub fn classify(&self, line: &str) -> LineVerdict {
        if self.error.as_ref().is_some_and(|re| re.is_match(line)) {
            return LineVerdict {
                error: true,
                buffer: false,
                success: false,
            };
        }
        LineVerdict {
            error: false,
            buffer: self.buffer.is_match(line) && !self.payload.is_echo(line),
            success: self.success.is_match(line),
        }
    }
}

/// A binary capture: write raw bytes, then settle with the next flushed
/// chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Written verbatim.
    pub payload: Vec<u8>,
    /// Quiet interval after which accumulated bytes are flushed.
    pub interval: Duration,
    /// Flush as soon as this many bytes have accumulated.
    pub max_size: usize,
    pub description: Option<String>,
}

impl CaptureRequest {
    pub fn new(bytes: impl Into<Vec<u8>>, interval: Duration) -> Self {
        CaptureRequest {
            payload: bytes.into(),
            interval,
            max_size: DEFAULT_MAX_CHUNK,
            description: None,
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn label(&self) -> &str {
        self.description.as_deref().unwrap_or("write")
    }
}

fn default_buffer_pattern() -> Regex {
    // The literal is known-good; `Regex::new` cannot fail on it.
    match Regex::new(DEFAULT_BUFFER_PATTERN) {
        Ok(re) => re,
        Err(_) => unreachable!("default buffer pattern is valid"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn re(s: &str) -> Regex {
        Regex::new(s).unwrap()
    }

    #[test]
    fn text_payload_wire_bytes_append_terminator() {
        let p = Payload::from("getTemp");
        assert_eq!(p.wire_bytes(b"\n"), b"getTemp\n".to_vec());
        assert_eq!(p.wire_bytes(b"\r\n"), b"getTemp\r\n".to_vec());
    }

    #[test]
    fn binary_payload_wire_bytes_verbatim() {
        let p = Payload::from(vec![0xFE, 0x00, 0x0A]);
        assert_eq!(p.wire_bytes(b"\n"), vec![0xFE, 0x00, 0x0A]);
    }

    #[test]
    fn payload_echo_detection() {
        assert!(Payload::from("getTemp").is_echo("getTemp"));
        assert!(!Payload::from("getTemp").is_echo("Received: getTemp"));
        assert!(Payload::from(b"AT".as_slice()).is_echo("AT"));
    }

    #[test]
    fn payload_display() {
        assert_eq!(Payload::from("hi").to_string(), "\"hi\"");
        assert_eq!(Payload::from(vec![0x0A, 0xFF]).to_string(), "[0AFF]");
    }

    #[test]
    fn command_defaults() {
        let req = CommandRequest::text("getTemp", re("^Temp:"));
        assert!(req.error.is_none());
        assert_eq!(req.buffer.as_str(), DEFAULT_BUFFER_PATTERN);
        assert!(req.timeout.is_none());
        assert_eq!(req.label(), "write");
    }

    #[test]
    fn classify_error_pre_empts_success() {
        let req = CommandRequest::text("x", re("ERR|OK")).with_error(re("^ERR"));
        let v = req.classify("ERR 5");
        assert!(v.error);
        assert!(!v.success);
        assert!(!v.buffer);
    }

    #[test]
    fn classify_buffer_and_success_together() {
        let req = CommandRequest::text("getTemp", re(r"^Temp: .+$"));
        let v = req.classify("Temp: 23.22");
        assert!(!v.error);
        assert!(v.buffer);
        assert!(v.success);
    }

    #[test]
    fn classify_suppresses_echo() {
        let req = CommandRequest::text("getTemp", re("^getTemp$"));
        let v = req.classify("getTemp");
        assert!(!v.buffer);
        assert!(v.success);
    }

    #[test]
    fn classify_empty_line_not_buffered() {
        let req = CommandRequest::text("x", re("^OK$"));
        let v = req.classify("");
        assert!(!v.buffer);
        assert!(!v.success);
    }

    #[test]
    fn classify_custom_buffer_pattern() {
        let req = CommandRequest::text("dump", re("^END$")).with_buffer(re(r"^\d+$"));
        assert!(req.classify("42").buffer);
        assert!(!req.classify("noise").buffer);
        assert!(!req.classify("END").buffer);
    }

    #[test]
    fn capture_defaults() {
        let req = CaptureRequest::new(vec![0x01], Duration::from_millis(20));
        assert_eq!(req.max_size, DEFAULT_MAX_CHUNK);
        assert_eq!(req.label(), "write");
        let req = req.with_max_size(4).with_description("dump flash");
        assert_eq!(req.max_size, 4);
        assert_eq!(req.label(), "dump flash");
    }

    #[test]
    fn capture_payload_is_raw_bytes() {
        let req = CaptureRequest::new(b"dump".as_slice(), Duration::from_millis(20));
        assert_eq!(req.payload, b"dump".to_vec());
    }
}
