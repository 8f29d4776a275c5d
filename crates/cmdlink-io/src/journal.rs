//! Log lines that go to both `tracing` and the link event stream.

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use cmdlink_core::events::{LinkEvent, LogLevel, LogRecord};

/// Writes every log line through `tracing` and republishes it as a
/// [`LinkEvent::Log`] so subscribers can reconstruct the transaction
/// sequence without a tracing subscriber.
#[derive(Debug, Clone)]
pub(crate) struct Journal {
    event_tx: broadcast::Sender<LinkEvent>,
}

impl Journal {
    pub(crate) fn new(event_tx: broadcast::Sender<LinkEvent>) -> Self {
        Journal { event_tx }
    }

    pub(crate) fn debug(&self, message: String) {
        self.record(LogLevel::Debug, message);
    }

    pub(crate) fn info(&self, message: String) {
        self.record(LogLevel::Info, message);
    }

    pub(crate) fn warn(&self, message: String) {
        self.record(LogLevel::Warn, message);
    }

    pub(crate) fn error(&self, message: String) {
        self.record(LogLevel::Error, message);
    }

    /// Publish a non-log event. No subscribers is not an error.
    pub(crate) fn emit(&self, event: LinkEvent) {
        let _ = self.event_tx.send(event);
    }

    fn record(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Debug => debug!(target: "cmdlink::io", "{message}"),
            LogLevel::Info => info!(target: "cmdlink::io", "{message}"),
            LogLevel::Warn => warn!(target: "cmdlink::io", "{message}"),
            LogLevel::Error => error!(target: "cmdlink::io", "{message}"),
        }
        self.emit(LinkEvent::Log(LogRecord::now(level, message)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_publishes_log_records() {
        let (tx, mut rx) = broadcast::channel(8);
        let journal = Journal::new(tx);

        journal.warn("timeout".into());

        match rx.try_recv().unwrap() {
            LinkEvent::Log(record) => {
                assert_eq!(record.level, LogLevel::Warn);
                assert_eq!(record.message, "timeout");
            }
            other => panic!("expected Log, got {other:?}"),
        }
    }

    #[test]
    fn journal_without_subscribers_does_not_panic() {
        let (tx, rx) = broadcast::channel(8);
        drop(rx);
        let journal = Journal::new(tx);
        journal.info("nobody listening".into());
        journal.emit(LinkEvent::Opened);
    }
}
