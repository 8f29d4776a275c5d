//! Unsolicited message handlers.
//!
//! Devices talk without being asked: boot banners, periodic status lines,
//! asynchronous alarms. Before any inbound line is correlated with the
//! in-flight request, the IO task offers it to an ordered table of
//! [`Unsolicited`] entries. The first entry whose pattern matches consumes
//! the line.

use std::fmt;

use regex::Regex;

use cmdlink_core::error::Result;

/// Callback trait for consuming unsolicited lines.
///
/// Implemented for any `Fn(&str)` closure, so simple cases need no type:
///
/// ```
/// use cmdlink_io::handler::Unsolicited;
///
/// let banner = Unsolicited::new(r"^BOOT v\d+", |line: &str| {
///     println!("device rebooted: {line}");
/// })
/// .unwrap();
/// assert!(banner.matches("BOOT v2 ready"));
/// ```
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, message: &str);
}

impl<F> MessageHandler for F
where
    F: Fn(&str) + Send + Sync + 'static,
{
    fn handle(&self, message: &str) {
        self(message)
    }
}

/// No-op handler; swallows matching lines so they never reach correlation.
pub struct NullHandler;

impl MessageHandler for NullHandler {
    fn handle(&self, _message: &str) {}
}

/// An immutable (pattern, handler) pair.
pub struct Unsolicited {
    pattern: Regex,
    handler: Box<dyn MessageHandler>,
}

impl Unsolicited {
    /// Compile `pattern` and pair it with `handler`.
    pub fn new(pattern: &str, handler: impl MessageHandler) -> Result<Self> {
        Ok(Self::with_regex(Regex::new(pattern)?, handler))
    }

    /// Pair an already compiled pattern with `handler`.
    pub fn with_regex(pattern: Regex, handler: impl MessageHandler) -> Self {
        Unsolicited {
            pattern,
            handler: Box::new(handler),
        }
    }

    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    pub fn matches(&self, message: &str) -> bool {
        self.pattern.is_match(message)
    }

    pub fn handle(&self, message: &str) {
        self.handler.handle(message);
    }
}

impl fmt::Debug for Unsolicited {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsolicited")
            .field("pattern", &self.pattern.as_str())
            .finish_non_exhaustive()
    }
}

/// Offer `message` to the table in registration order.
///
/// Returns `true` if a handler consumed it.
pub fn dispatch(table: &[Unsolicited], message: &str) -> bool {
    match table.iter().find(|entry| entry.matches(message)) {
        Some(entry) => {
            entry.handle(message);
            true
        }
        None => false,
    }
}
