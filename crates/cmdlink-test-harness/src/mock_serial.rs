//! Mock transport for deterministic testing of the IO task.
//!
//! [`MockTransport`] implements the [`Transport`] trait on top of shared
//! in-memory state. Because the IO task takes ownership of its transport,
//! tests drive and inspect the mock through a cloneable [`MockHandle`]:
//!
//! - push inbound bytes as if the device had sent them,
//! - pre-load request/response pairs that are answered automatically when
//!   the matching bytes are written,
//! - read back everything that was written,
//! - flip the connected state.
//!
//! # Example
//!
//! ```
//! use cmdlink_test_harness::MockTransport;
//!
//! let mock = MockTransport::new();
//! let handle = mock.handle();
//! // When the IO task writes "getTemp\n", the device answers.
//! handle.expect(b"getTemp\n", b"Temp: 23.22\n");
//! // Something the device says on its own.
//! handle.push_inbound(b"READY\n");
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

use cmdlink_core::error::{Error, Result};
use cmdlink_core::transport::Transport;

/// A pre-loaded request/response pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// The bytes the "device" answers with.
    response: Vec<u8>,
}

#[derive(Debug)]
struct MockState {
    /// Scripted replies, matched against writes in order.
    expectations: VecDeque<Expectation>,
    /// Bytes waiting to be returned by `receive()`, one entry per delivery.
    inbound: VecDeque<Vec<u8>>,
    connected: bool,
    /// Log of all bytes sent through this transport.
    sent_log: Vec<Vec<u8>>,
    /// Number of `open()` calls that succeeded.
    open_count: usize,
    /// When set, the next `send()` fails with a transport error.
    fail_next_send: bool,
    /// When set, the next `send()` drops the connection.
    lose_next_send: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<MockState>,
    inbound_ready: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panic while holding the lock only happens inside a failing test.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// A mock [`Transport`] for testing the IO task without hardware.
///
/// Writes are recorded and, if they match the next pre-loaded expectation,
/// the expectation's response is queued as inbound data. Writes that do not
/// match any expectation are still accepted; a real device ignores commands
/// it does not understand, and tests can feed any reply through
/// [`MockHandle::push_inbound`].
#[derive(Debug, Clone)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

/// Cloneable control handle for a [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockHandle {
    shared: Arc<Shared>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            shared: Arc::new(Shared {
                state: Mutex::new(MockState {
                    expectations: VecDeque::new(),
                    inbound: VecDeque::new(),
                    connected: true,
                    sent_log: Vec::new(),
                    open_count: 0,
                    fail_next_send: false,
                    lose_next_send: false,
                }),
                inbound_ready: Notify::new(),
            }),
        }
    }

    /// Create a new mock transport in the closed state.
    pub fn disconnected() -> Self {
        let mock = Self::new();
        mock.handle().set_connected(false);
        mock
    }

    /// Get a control handle that stays valid after the mock is moved into
    /// the IO task.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Shorthand for [`MockHandle::expect`].
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        self.handle().expect(request, response);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandle {
    /// Add an expected request/response pair.
    ///
    /// When `send()` is called with data equal to `request`, `response` is
    /// queued as inbound data. An empty `response` queues nothing.
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        self.shared.lock().expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Queue bytes as if the device had sent them.
    pub fn push_inbound(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.shared.lock().inbound.push_back(data.to_vec());
        self.shared.inbound_ready.notify_one();
    }

    /// All writes so far, one element per `send()` call.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.shared.lock().sent_log.clone()
    }

    /// All writes so far, decoded as lossy UTF-8.
    pub fn sent_text(&self) -> Vec<String> {
        self.shared
            .lock()
            .sent_log
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }

    /// Number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.shared.lock().expectations.len()
    }

    /// Number of successful `open()` calls.
    pub fn open_count(&self) -> usize {
        self.shared.lock().open_count
    }

    /// Whether the mock is currently "connected".
    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    /// Set the connected state.
    ///
    /// When `false`, `send()` and `receive()` return [`Error::NotConnected`].
    pub fn set_connected(&self, connected: bool) {
        self.shared.lock().connected = connected;
        // Wake a blocked receive so it observes the change.
        self.shared.inbound_ready.notify_one();
    }

    /// Make the next `send()` fail with [`Error::Transport`].
    pub fn fail_next_send(&self) {
        self.shared.lock().fail_next_send = true;
    }

    /// Make the next `send()` behave like an unplugged device: the mock
    /// goes to the closed state and the write fails with
    /// [`Error::ConnectionLost`].
    pub fn lose_connection_on_next_send(&self) {
        self.shared.lock().lose_next_send = true;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self) -> Result<()> {
        let mut state = self.shared.lock();
        state.connected = true;
        state.open_count += 1;
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.shared.lock();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        if state.fail_next_send {
            state.fail_next_send = false;
            return Err(Error::Transport("mock write failure".into()));
        }
        if state.lose_next_send {
            state.lose_next_send = false;
            state.connected = false;
            state.inbound.clear();
            return Err(Error::ConnectionLost);
        }

        state.sent_log.push(data.to_vec());

        let matches_next = state
            .expectations
            .front()
            .is_some_and(|e| e.request.as_slice() == data);
        let reply = if matches_next {
            state.expectations.pop_front().map(|e| e.response)
        } else {
            None
        };
        if let Some(response) = reply.filter(|r| !r.is_empty()) {
            state.inbound.push_back(response);
            drop(state);
            self.shared.inbound_ready.notify_one();
        }
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut state = self.shared.lock();
                if !state.connected {
                    return Err(Error::NotConnected);
                }
                if let Some(mut chunk) = state.inbound.pop_front() {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        // Put back what did not fit.
                        state.inbound.push_front(chunk.split_off(n));
                    }
                    return Ok(n);
                }
            }

            if tokio::time::timeout_at(deadline, self.shared.inbound_ready.notified())
                .await
                .is_err()
            {
                return Err(Error::Timeout);
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.shared.lock();
        state.connected = false;
        state.inbound.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_transport_expectation_queues_response() {
        let mut mock = MockTransport::new();
        mock.expect(b"getTemp\n", b"Temp: 23.22\n");

        mock.send(b"getTemp\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = mock
            .receive(&mut buf, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"Temp: 23.22\n");
        assert_eq!(mock.handle().remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn mock_transport_tracks_sent_data() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();

        mock.send(&[0x01, 0x02]).await.unwrap();
        mock.send(b"hello\n").await.unwrap();

        let sent = handle.sent_data();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], vec![0x01, 0x02]);
        assert_eq!(handle.sent_text()[1], "hello\n");
    }

    #[tokio::test]
    async fn mock_transport_unmatched_send_is_accepted() {
        let mut mock = MockTransport::new();
        mock.expect(b"a\n", b"A\n");

        mock.send(b"b\n").await.unwrap();
        assert_eq!(mock.handle().remaining_expectations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn mock_transport_receive_without_data_times_out() {
        let mut mock = MockTransport::new();
        let mut buf = [0u8; 64];

        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn mock_transport_receive_wakes_on_push() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            handle.push_inbound(b"late");
        });

        let mut buf = [0u8; 64];
        let n = mock.receive(&mut buf, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&buf[..n], b"late");
    }

    #[tokio::test]
    async fn mock_transport_partial_receive() {
        let mut mock = MockTransport::new();
        mock.handle().push_inbound(&[0xAA, 0xBB, 0xCC, 0xDD]);

        let mut buf = [0u8; 2];
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], &[0xAA, 0xBB]);

        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], &[0xCC, 0xDD]);
    }

    #[tokio::test]
    async fn mock_transport_close_and_reopen() {
        let mut mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.close().await.unwrap();
        assert!(!mock.is_connected());
        assert!(matches!(mock.send(&[0x01]).await, Err(Error::NotConnected)));

        mock.open().await.unwrap();
        assert!(mock.is_connected());
        assert_eq!(mock.handle().open_count(), 1);
    }

    #[tokio::test]
    async fn mock_transport_disconnected_constructor() {
        let mut mock = MockTransport::disconnected();
        assert!(!mock.is_connected());

        let mut buf = [0u8; 8];
        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn mock_transport_fail_next_send() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        handle.fail_next_send();

        assert!(matches!(mock.send(b"x").await, Err(Error::Transport(_))));
        assert!(mock.send(b"x").await.is_ok());
        assert_eq!(handle.sent_data().len(), 1);
    }

    #[tokio::test]
    async fn mock_transport_lose_connection_on_send() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        handle.lose_connection_on_next_send();

        assert!(matches!(mock.send(b"x").await, Err(Error::ConnectionLost)));
        assert!(!mock.is_connected());
        assert!(handle.sent_data().is_empty());
    }
}
