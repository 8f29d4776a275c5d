//! IO task types and implementation: the request orchestrator.
//!
//! One tokio task owns the transport exclusively. Callers never touch the
//! transport; they hand requests to the task through [`LinkIo`] and await
//! the returned [`Pending`]. Inside the task:
//!
//! - requests wait in a FIFO queue; exactly one is *current* at a time,
//! - the current request's payload is written, then every framed inbound
//!   message is classified against it until it settles (success, device
//!   error, or timeout),
//! - settling advances to the next queued request.
//!
//! Everything runs on the task's single thread of control, so the queue,
//! the current context and the framing mode need no locking.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use cmdlink_core::error::{Error, Result};
use cmdlink_core::events::{Inbound, LinkEvent};
use cmdlink_core::helpers::format_hex;
use cmdlink_core::transport::Transport;

use crate::framing::{Framing, DEFAULT_DELIMITER, DEFAULT_MAX_LINE};
use crate::handler::{self, Unsolicited};
use crate::journal::Journal;
use crate::pending::Pending;
use crate::request::{CaptureRequest, CommandRequest};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Configuration for the IO task.
#[derive(Debug, Clone)]
pub struct IoConfig {
    /// Inbound line delimiter for the line framer.
    pub delimiter: Vec<u8>,
    /// Appended to text payloads when they are written.
    pub line_terminator: Vec<u8>,
    /// Force a line split after this many bytes without a delimiter.
    pub max_line_length: usize,
    /// Timeout for command requests that do not set their own.
    pub command_timeout: Duration,
    /// How long a single transport read waits before the loop re-checks
    /// commands and deadlines.
    pub read_poll: Duration,
}

impl Default for IoConfig {
    fn default() -> Self {
        IoConfig {
            delimiter: DEFAULT_DELIMITER.to_vec(),
            line_terminator: DEFAULT_DELIMITER.to_vec(),
            max_line_length: DEFAULT_MAX_LINE,
            command_timeout: Duration::from_secs(1),
            read_poll: Duration::from_millis(100),
        }
    }
}

/// A command request plus its settlement channel and runtime state.
struct CommandContext {
    request: CommandRequest,
    /// Lines accumulated so far, newline-joined.
    buffer: String,
    /// Armed at activation when the timeout is non-zero.
    deadline: Option<Instant>,
    reply: oneshot::Sender<Result<String>>,
}

impl CommandContext {
    fn append(&mut self, line: &str) {
        if !self.buffer.is_empty() {
            self.buffer.push('\n');
        }
        self.buffer.push_str(line);
    }

    fn resolve(self) {
        let _ = self.reply.send(Ok(self.buffer));
    }

    fn reject_with_buffer(self) {
        let _ = self.reply.send(Err(Error::DeviceError(self.buffer)));
    }
}

/// A capture request plus its settlement channel.
struct CaptureContext {
    request: CaptureRequest,
    reply: oneshot::Sender<Result<Vec<u8>>>,
}

impl CaptureContext {
    fn resolve(self, chunk: Vec<u8>) {
        let _ = self.reply.send(Ok(chunk));
    }
}

/// An execution context: one queued or in-flight request.
///
/// Settling consumes the context, so it can settle at most once and its
/// timer goes with it.
enum Context {
    Command(CommandContext),
    Capture(CaptureContext),
}

impl Context {
    fn label(&self) -> &str {
        match self {
            Context::Command(ctx) => ctx.request.label(),
            Context::Capture(ctx) => ctx.request.label(),
        }
    }

    fn deadline(&self) -> Option<Instant> {
        match self {
            Context::Command(ctx) => ctx.deadline,
            Context::Capture(_) => None,
        }
    }

    fn reject(self, err: Error) {
        match self {
            Context::Command(ctx) => {
                let _ = ctx.reply.send(Err(err));
            }
            Context::Capture(ctx) => {
                let _ = ctx.reply.send(Err(err));
            }
        }
    }
}

/// A message sent from [`LinkIo`] to the IO task.
enum Command {
    /// Append a request to the queue.
    Submit(Context),
    /// Open the transport.
    Open { reply: oneshot::Sender<Result<()>> },
    /// Close the transport.
    Close { reply: oneshot::Sender<Result<()>> },
    /// Graceful shutdown; returns the transport for recovery.
    Shutdown {
        reply: oneshot::Sender<Box<dyn Transport>>,
    },
}

/// Handle to the IO task.
pub struct LinkIo {
    cmd_tx: mpsc::UnboundedSender<Command>,
    event_tx: broadcast::Sender<LinkEvent>,
    open: Arc<AtomicBool>,
    /// Cancellation token for abrupt shutdown.
    pub cancel: CancellationToken,
    /// Join handle for the IO task.
    pub task: JoinHandle<()>,
}

impl LinkIo {
    /// Queue a command request.
    ///
    /// Returns immediately. The [`Pending`] resolves with the accumulated
    /// response buffer, or fails with [`Error::DeviceError`],
    /// [`Error::Timeout`] or [`Error::NotConnected`].
    pub fn submit(&self, request: CommandRequest) -> Pending<String> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit(Context::Command(CommandContext {
            request,
            buffer: String::new(),
            deadline: None,
            reply,
        })));
        Pending::new(rx)
    }

    /// Queue a binary capture request.
    ///
    /// The [`Pending`] resolves with the first chunk the binary framer
    /// flushes after the payload is written.
    pub fn submit_capture(&self, request: CaptureRequest) -> Pending<Vec<u8>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit(Context::Capture(CaptureContext {
            request,
            reply,
        })));
        Pending::new(rx)
    }

    /// Whether the transport is open, as last observed by the IO task.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Open the transport.
    pub async fn open(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Open { reply });
        rx.await.map_err(|_| Error::TaskClosed)?
    }

    /// Close the transport. Queued requests reject with
    /// [`Error::NotConnected`] as they reach the head of the queue.
    pub async fn close(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Close { reply });
        rx.await.map_err(|_| Error::TaskClosed)?
    }

    /// Subscribe to log lines and unexpected-data notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.event_tx.subscribe()
    }

    /// Shut down the IO task and recover the transport.
    ///
    /// Requests still queued or in flight fail with [`Error::TaskClosed`].
    pub async fn shutdown(self) -> Result<Box<dyn Transport>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply });
        let transport = rx.await.map_err(|_| Error::TaskClosed)?;
        let _ = self.task.await;
        Ok(transport)
    }

    fn send(&self, command: Command) {
        // If the task is gone the command is dropped, which drops its reply
        // sender and fails the caller's receiver with TaskClosed.
        if self.cmd_tx.send(command).is_err() {
            debug!("IO task not running, dropping command");
        }
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Spawn the IO task. Returns the handle for submitting requests.
///
/// `handlers` is the unsolicited handler table, consulted in order for
/// every inbound line. It is fixed for the lifetime of the task.
pub fn spawn_io_task(
    transport: Box<dyn Transport>,
    config: IoConfig,
    handlers: Vec<Unsolicited>,
    event_tx: broadcast::Sender<LinkEvent>,
) -> LinkIo {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
    let cancel = CancellationToken::new();
    let open = Arc::new(AtomicBool::new(transport.is_connected()));

    let orchestrator = Orchestrator {
        framing: Framing::new(&config.delimiter, config.max_line_length),
        config,
        handlers,
        journal: Journal::new(event_tx.clone()),
        queue: VecDeque::new(),
        current: None,
        open: Arc::clone(&open),
    };

    let task = tokio::spawn(io_loop(transport, orchestrator, cmd_rx, cancel.clone()));

    LinkIo {
        cmd_tx,
        event_tx,
        open,
        cancel,
        task,
    }
}

// ---------------------------------------------------------------------------
// IO Loop
// ---------------------------------------------------------------------------

/// Read buffer size for a single transport read.
const READ_BUF: usize = 1024;

/// Back-off after a transport read error.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// The result of one read attempt.
enum ReadOutcome {
    Data(usize),
    Idle,
    Failed(Error),
}

/// The main IO loop. Runs as a spawned tokio task.
///
/// Uses `tokio::select! { biased; }` to prioritize:
/// 1. Cancellation
/// 2. Commands from the handle (submit, open, close, shutdown)
/// 3. The earliest deadline (request timeout or binary flush)
/// 4. Reading from the transport
async fn io_loop(
    mut transport: Box<dyn Transport>,
    mut orchestrator: Orchestrator,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
) {
    let mut buf = [0u8; READ_BUF];
    let read_poll = orchestrator.config.read_poll;

    loop {
        let deadline = orchestrator.next_deadline();

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("IO task cancelled");
                break;
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Submit(ctx)) => {
                        orchestrator.submit(ctx, &mut *transport).await;
                    }
                    Some(Command::Open { reply }) => {
                        let result = orchestrator.open(&mut *transport).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Close { reply }) => {
                        let result = orchestrator.close(&mut *transport).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Shutdown { reply }) => {
                        debug!("IO task shutdown requested");
                        let _ = reply.send(transport);
                        return;
                    }
                    None => {
                        debug!("command channel closed, exiting IO task");
                        break;
                    }
                }
            }

            _ = sleep_until(deadline) => {
                orchestrator.on_deadline(Instant::now(), &mut *transport).await;
            }

            read = read_once(&mut *transport, &mut buf, read_poll) => {
                match read {
                    ReadOutcome::Data(n) => {
                        orchestrator.on_bytes(&buf[..n], &mut *transport).await;
                    }
                    ReadOutcome::Idle => {}
                    ReadOutcome::Failed(e) => {
                        orchestrator.on_read_error(e, &*transport);
                        tokio::time::sleep(READ_ERROR_BACKOFF).await;
                    }
                }
            }
        }
    }
}

/// Sleep until `deadline`, or forever when there is none.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

/// One transport read. While the transport is closed this idles for
/// `poll` instead of spinning.
async fn read_once(transport: &mut dyn Transport, buf: &mut [u8], poll: Duration) -> ReadOutcome {
    if !transport.is_connected() {
        tokio::time::sleep(poll).await;
        return ReadOutcome::Idle;
    }
    match transport.receive(buf, poll).await {
        Ok(0) | Err(Error::Timeout) => ReadOutcome::Idle,
        Ok(n) => ReadOutcome::Data(n),
        Err(Error::NotConnected) => {
            tokio::time::sleep(poll).await;
            ReadOutcome::Idle
        }
        Err(e) => ReadOutcome::Failed(e),
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// State owned by the IO task.
struct Orchestrator {
    config: IoConfig,
    handlers: Vec<Unsolicited>,
    journal: Journal,
    /// Requests waiting their turn. Never contains the current context.
    queue: VecDeque<Context>,
    /// The request that owns the transport right now.
    current: Option<Context>,
    framing: Framing,
    /// Mirror of the transport's open state for [`LinkIo::is_open`].
    open: Arc<AtomicBool>,
}

impl Orchestrator {
    /// Append to the queue and start it if idle.
    async fn submit(&mut self, ctx: Context, transport: &mut dyn Transport) {
        self.queue.push_back(ctx);
        if self.current.is_none() {
            self.activate(transport).await;
        }
    }

    /// Dequeue and run requests until one is in flight or the queue is
    /// empty.
    async fn activate(&mut self, transport: &mut dyn Transport) {
        // Dropping the old context drops its deadline with it.
        self.current = None;

        while let Some(mut ctx) = self.queue.pop_front() {
            if !transport.is_connected() {
                self.journal
                    .warn(format!("{}: connection not open, rejecting", ctx.label()));
                ctx.reject(Error::NotConnected);
                continue;
            }

            let (wire, shown) = match &mut ctx {
                Context::Command(cmd) => {
                    let timeout = cmd.request.timeout.unwrap_or(self.config.command_timeout);
                    if !timeout.is_zero() {
                        cmd.deadline = Some(Instant::now() + timeout);
                    }
                    (
                        cmd.request.payload.wire_bytes(&self.config.line_terminator),
                        cmd.request.payload.to_string(),
                    )
                }
                Context::Capture(cap) => {
                    self.framing
                        .enter_binary(cap.request.interval, cap.request.max_size);
                    // Raw bytes only: captures never take the line terminator.
                    (
                        cap.request.payload.clone(),
                        format!("[{}]", format_hex(&cap.request.payload)),
                    )
                }
            };
            self.journal.info(format!("{}: {}", ctx.label(), shown));

            let label = ctx.label().to_string();
            self.current = Some(ctx);

            match transport.send(&wire).await {
                Ok(()) => return,
                Err(e) => {
                    self.journal.error(format!("{label}: write failed: {e}"));
                    self.framing.enter_line();
                    if let Some(failed) = self.current.take() {
                        failed.reject(e);
                    }
                    self.refresh_open(transport);
                }
            }
        }

        debug!("request queue empty, IO task idle");
    }

    /// Earliest pending deadline: request timeout or binary flush.
    fn next_deadline(&self) -> Option<Instant> {
        let timeout = self.current.as_ref().and_then(Context::deadline);
        match (timeout, self.framing.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    async fn on_deadline(&mut self, now: Instant, transport: &mut dyn Transport) {
        if let Some(frame) = self.framing.flush_due(now) {
            self.on_frame(frame, transport).await;
        }

        let expired = self
            .current
            .as_ref()
            .and_then(Context::deadline)
            .is_some_and(|deadline| now >= deadline);
        if expired {
            if let Some(ctx) = self.current.take() {
                self.journal.warn(format!("{}: timeout", ctx.label()));
                ctx.reject(Error::Timeout);
            }
            self.activate(transport).await;
        }
    }

    /// Route freshly read bytes through the active framer, one message at
    /// a time, so a mode switch caused by one message applies to the bytes
    /// after it.
    async fn on_bytes(&mut self, data: &[u8], transport: &mut dyn Transport) {
        let now = Instant::now();
        let mut rest = data;
        while !rest.is_empty() {
            let (frame, used) = self.framing.next_frame(rest, now);
            rest = &rest[used..];
            if let Some(frame) = frame {
                self.on_frame(frame, transport).await;
            }
        }
    }

    async fn on_frame(&mut self, frame: Inbound, transport: &mut dyn Transport) {
        match frame {
            Inbound::Line(line) => self.on_line(line, transport).await,
            Inbound::Chunk(chunk) => self.on_chunk(chunk, transport).await,
        }
    }

    /// Classify one text line.
    async fn on_line(&mut self, line: String, transport: &mut dyn Transport) {
        self.journal.debug(format!("received {line:?}"));

        if handler::dispatch(&self.handlers, &line) {
            return;
        }

        let verdict = match self.current.as_ref() {
            Some(Context::Command(cmd)) => cmd.request.classify(&line),
            _ => {
                self.unexpected(Inbound::Line(line));
                return;
            }
        };

        if verdict.error {
            if let Some(Context::Command(cmd)) = self.current.take() {
                self.journal
                    .warn(format!("{}: device error {line:?}", cmd.request.label()));
                cmd.reject_with_buffer();
            }
            self.activate(transport).await;
            return;
        }

        if verdict.buffer {
            if let Some(Context::Command(cmd)) = self.current.as_mut() {
                cmd.append(&line);
            }
        }

        if verdict.success {
            if let Some(Context::Command(cmd)) = self.current.take() {
                debug!(label = cmd.request.label(), "request resolved");
                cmd.resolve();
            }
            self.activate(transport).await;
        }
    }

    /// Settle the current capture with a flushed chunk.
    async fn on_chunk(&mut self, chunk: Vec<u8>, transport: &mut dyn Transport) {
        self.journal
            .debug(format!("received chunk [{}]", format_hex(&chunk)));

        match self.current.take() {
            Some(Context::Capture(cap)) => {
                cap.resolve(chunk);
                self.framing.enter_line();
                self.activate(transport).await;
            }
            other => {
                self.current = other;
                self.unexpected(Inbound::Chunk(chunk));
            }
        }
    }

    fn unexpected(&self, message: Inbound) {
        self.journal
            .warn(format!("unexpected data with no request in flight: {message}"));
        self.journal.emit(LinkEvent::UnexpectedData(message));
    }

    fn on_read_error(&mut self, err: Error, transport: &dyn Transport) {
        self.journal.warn(format!("transport read error: {err}"));
        self.refresh_open(transport);
    }

    /// Clear the open flag and announce it if the transport dropped.
    fn refresh_open(&self, transport: &dyn Transport) {
        if !transport.is_connected() && self.open.swap(false, Ordering::AcqRel) {
            self.journal.emit(LinkEvent::Closed);
        }
    }

    async fn open(&mut self, transport: &mut dyn Transport) -> Result<()> {
        if let Err(e) = transport.open().await {
            self.journal.error(format!("open failed: {e}"));
            return Err(e);
        }
        self.open.store(true, Ordering::Release);
        self.journal.info("transport opened".to_string());
        self.journal.emit(LinkEvent::Opened);
        Ok(())
    }

    async fn close(&mut self, transport: &mut dyn Transport) -> Result<()> {
        let result = transport.close().await;
        self.open.store(transport.is_connected(), Ordering::Release);
        match &result {
            Ok(()) => {
                self.journal.info("transport closed".to_string());
                self.journal.emit(LinkEvent::Closed);
            }
            Err(e) => self.journal.error(format!("close failed: {e}")),
        }
        result
    }

    #[cfg(test)]
    fn mode(&self) -> crate::framing::FramingMode {
        self.framing.mode()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::FramingMode;
    use cmdlink_test_harness::MockTransport;
    use regex::Regex;

    fn re(s: &str) -> Regex {
        Regex::new(s).unwrap()
    }

    fn test_orchestrator() -> (Orchestrator, broadcast::Receiver<LinkEvent>) {
        let (event_tx, event_rx) = broadcast::channel(64);
        let config = IoConfig::default();
        let orchestrator = Orchestrator {
            framing: Framing::new(&config.delimiter, config.max_line_length),
            config,
            handlers: Vec::new(),
            journal: Journal::new(event_tx),
            queue: VecDeque::new(),
            current: None,
            open: Arc::new(AtomicBool::new(true)),
        };
        (orchestrator, event_rx)
    }

    fn command(request: CommandRequest) -> (Context, oneshot::Receiver<Result<String>>) {
        let (reply, rx) = oneshot::channel();
        let ctx = Context::Command(CommandContext {
            request,
            buffer: String::new(),
            deadline: None,
            reply,
        });
        (ctx, rx)
    }

    fn capture(request: CaptureRequest) -> (Context, oneshot::Receiver<Result<Vec<u8>>>) {
        let (reply, rx) = oneshot::channel();
        (Context::Capture(CaptureContext { request, reply }), rx)
    }

    // =======================================================================
    // Type construction tests
    // =======================================================================

    #[test]
    fn io_config_defaults() {
        let config = IoConfig::default();
        assert_eq!(config.delimiter, b"\n");
        assert_eq!(config.line_terminator, b"\n");
        assert_eq!(config.max_line_length, DEFAULT_MAX_LINE);
        assert_eq!(config.command_timeout, Duration::from_secs(1));
        assert_eq!(config.read_poll, Duration::from_millis(100));
    }

    #[test]
    fn command_context_append_joins_with_newline() {
        let (ctx, _rx) = command(CommandRequest::text("x", re("OK")));
        let Context::Command(mut cmd) = ctx else {
            panic!("expected command context");
        };
        cmd.append("first");
        assert_eq!(cmd.buffer, "first");
        cmd.append("second");
        assert_eq!(cmd.buffer, "first\nsecond");
    }

    // =======================================================================
    // Orchestrator -- direct state machine tests
    // =======================================================================

    #[tokio::test]
    async fn activation_writes_text_with_terminator() {
        let (mut orch, _events) = test_orchestrator();
        let mut mock = MockTransport::new();
        let handle = mock.handle();

        let (ctx, _rx) = command(CommandRequest::text("getTemp", re("^Temp:")));
        orch.submit(ctx, &mut mock).await;

        assert_eq!(handle.sent_text(), vec!["getTemp\n"]);
        assert!(orch.current.is_some());
        assert!(orch.queue.is_empty());
    }

    #[tokio::test]
    async fn activation_arms_default_timeout() {
        let (mut orch, _events) = test_orchestrator();
        let mut mock = MockTransport::new();

        let before = Instant::now();
        let (ctx, _rx) = command(CommandRequest::text("x", re("OK")));
        orch.submit(ctx, &mut mock).await;

        let deadline = orch.next_deadline().unwrap();
        assert!(deadline >= before + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn zero_timeout_arms_no_timer() {
        let (mut orch, _events) = test_orchestrator();
        let mut mock = MockTransport::new();

        let req = CommandRequest::text("x", re("OK")).with_timeout(Duration::ZERO);
        let (ctx, _rx) = command(req);
        orch.submit(ctx, &mut mock).await;

        assert!(orch.current.is_some());
        assert_eq!(orch.next_deadline(), None);
    }

    #[tokio::test]
    async fn second_submit_waits_in_queue() {
        let (mut orch, _events) = test_orchestrator();
        let mut mock = MockTransport::new();
        let handle = mock.handle();

        let (a, _ra) = command(CommandRequest::text("a", re("OK")));
        let (b, _rb) = command(CommandRequest::text("b", re("OK")));
        orch.submit(a, &mut mock).await;
        orch.submit(b, &mut mock).await;

        assert_eq!(handle.sent_text(), vec!["a\n"]);
        assert_eq!(orch.queue.len(), 1);

        orch.on_bytes(b"OK\n", &mut mock).await;
        assert_eq!(handle.sent_text(), vec!["a\n", "b\n"]);
        assert!(orch.queue.is_empty());
    }

    #[tokio::test]
    async fn success_resolves_with_buffer() {
        let (mut orch, _events) = test_orchestrator();
        let mut mock = MockTransport::new();

        let (ctx, rx) = command(CommandRequest::text("getTemp", re(r"^Temp: .+$")));
        orch.submit(ctx, &mut mock).await;
        orch.on_bytes(b"Received: getTemp\nTemp: 23.22\n", &mut mock)
            .await;

        assert_eq!(
            rx.await.unwrap().unwrap(),
            "Received: getTemp\nTemp: 23.22"
        );
        assert!(orch.current.is_none());
    }

    #[tokio::test]
    async fn error_rejects_with_buffer_so_far() {
        let (mut orch, _events) = test_orchestrator();
        let mut mock = MockTransport::new();

        let req = CommandRequest::text("getTemp", re("^Temp:")).with_error(re("^ERROR"));
        let (ctx, rx) = command(req);
        orch.submit(ctx, &mut mock).await;
        orch.on_bytes(b"partial\nERROR 3\n", &mut mock).await;

        match rx.await.unwrap() {
            Err(Error::DeviceError(buffer)) => assert_eq!(buffer, "partial"),
            other => panic!("expected DeviceError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn echo_is_not_buffered() {
        let (mut orch, _events) = test_orchestrator();
        let mut mock = MockTransport::new();

        let (ctx, rx) = command(CommandRequest::text("getTemp", re("^Temp:")));
        orch.submit(ctx, &mut mock).await;
        orch.on_bytes(b"getTemp\nTemp: 1\n", &mut mock).await;

        assert_eq!(rx.await.unwrap().unwrap(), "Temp: 1");
    }

    #[tokio::test]
    async fn unsolicited_handler_consumes_line() {
        let (mut orch, mut events) = test_orchestrator();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        orch.handlers.push(
            Unsolicited::new("^BOOT", move |line: &str| {
                sink.lock().unwrap().push(line.to_string())
            })
            .unwrap(),
        );
        let mut mock = MockTransport::new();

        // Matches the success pattern too, but the handler wins.
        let (ctx, mut rx) = command(CommandRequest::text("x", re("BOOT|OK")));
        orch.submit(ctx, &mut mock).await;
        orch.on_bytes(b"BOOT v2\n", &mut mock).await;

        assert_eq!(*seen.lock().unwrap(), vec!["BOOT v2"]);
        assert!(rx.try_recv().is_err());
        assert!(orch.current.is_some());

        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, LinkEvent::UnexpectedData(_)));
        }
    }

    #[tokio::test]
    async fn line_without_request_is_unexpected() {
        let (mut orch, mut events) = test_orchestrator();
        let mut mock = MockTransport::new();

        orch.on_bytes(b"spontaneous\n", &mut mock).await;

        let mut found = false;
        while let Ok(event) = events.try_recv() {
            if let LinkEvent::UnexpectedData(Inbound::Line(line)) = event {
                assert_eq!(line, "spontaneous");
                found = true;
            }
        }
        assert!(found);
    }

    #[tokio::test]
    async fn closed_transport_rejects_and_advances() {
        let (mut orch, _events) = test_orchestrator();
        let mut mock = MockTransport::disconnected();
        let handle = mock.handle();

        let (a, ra) = command(CommandRequest::text("a", re("OK")));
        let (b, rb) = command(CommandRequest::text("b", re("OK")));
        orch.queue.push_back(a);
        orch.submit(b, &mut mock).await;

        assert!(matches!(ra.await.unwrap(), Err(Error::NotConnected)));
        assert!(matches!(rb.await.unwrap(), Err(Error::NotConnected)));
        assert!(orch.current.is_none());
        assert!(handle.sent_data().is_empty());
    }

    #[tokio::test]
    async fn write_failure_rejects_and_advances() {
        let (mut orch, _events) = test_orchestrator();
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        handle.fail_next_send();

        let (a, ra) = command(CommandRequest::text("a", re("OK")));
        let (b, _rb) = command(CommandRequest::text("b", re("OK")));
        orch.queue.push_back(a);
        orch.submit(b, &mut mock).await;

        assert!(matches!(ra.await.unwrap(), Err(Error::Transport(_))));
        assert_eq!(handle.sent_text(), vec!["b\n"]);
        assert!(orch.current.is_some());
    }

    #[tokio::test]
    async fn connection_lost_on_write_marks_link_closed() {
        let (mut orch, mut events) = test_orchestrator();
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        handle.lose_connection_on_next_send();

        let (a, ra) = command(CommandRequest::text("a", re("OK")));
        let (b, rb) = command(CommandRequest::text("b", re("OK")));
        orch.queue.push_back(a);
        orch.submit(b, &mut mock).await;

        assert!(matches!(ra.await.unwrap(), Err(Error::ConnectionLost)));
        assert!(matches!(rb.await.unwrap(), Err(Error::NotConnected)));
        assert!(!orch.open.load(Ordering::Acquire));

        let mut closed = false;
        while let Ok(event) = events.try_recv() {
            closed |= matches!(event, LinkEvent::Closed);
        }
        assert!(closed);
    }

    #[tokio::test]
    async fn capture_write_never_appends_terminator() {
        let (mut orch, _events) = test_orchestrator();
        orch.config.line_terminator = b"\r\n".to_vec();
        let mut mock = MockTransport::new();
        let handle = mock.handle();

        let req = CaptureRequest::new(b"dump".as_slice(), Duration::from_millis(20));
        let (ctx, _rx) = capture(req);
        orch.submit(ctx, &mut mock).await;

        assert_eq!(handle.sent_data(), vec![b"dump".to_vec()]);
    }

    #[tokio::test]
    async fn capture_switches_mode_and_back() {
        let (mut orch, _events) = test_orchestrator();
        let mut mock = MockTransport::new();
        let handle = mock.handle();

        let req = CaptureRequest::new(vec![0x01, 0x02], Duration::from_millis(20));
        let (ctx, rx) = capture(req);
        orch.submit(ctx, &mut mock).await;

        assert_eq!(orch.mode(), FramingMode::Binary);
        assert_eq!(handle.sent_data(), vec![vec![0x01, 0x02]]);
        // Captures never arm a request timeout.
        assert_eq!(orch.next_deadline(), None);

        orch.on_bytes(&[0xAA, 0x0A, 0xBB], &mut mock).await;
        let flush_at = orch.next_deadline().unwrap();
        orch.on_deadline(flush_at, &mut mock).await;

        assert_eq!(rx.await.unwrap().unwrap(), vec![0xAA, 0x0A, 0xBB]);
        assert_eq!(orch.mode(), FramingMode::Line);
    }

    #[tokio::test]
    async fn capture_max_size_routes_rest_to_line_mode() {
        let (mut orch, _events) = test_orchestrator();
        let mut mock = MockTransport::new();

        let cap = CaptureRequest::new(vec![0x05], Duration::from_millis(20)).with_max_size(2);
        let (cap_ctx, cap_rx) = capture(cap);
        let (cmd_ctx, cmd_rx) = command(CommandRequest::text("next", re("^OK$")));
        orch.submit(cap_ctx, &mut mock).await;
        orch.submit(cmd_ctx, &mut mock).await;

        // Two bytes fill the chunk; the rest of the read is line data for
        // the next request.
        orch.on_bytes(b"\x01\x02OK\n", &mut mock).await;

        assert_eq!(cap_rx.await.unwrap().unwrap(), vec![0x01, 0x02]);
        assert_eq!(cmd_rx.await.unwrap().unwrap(), "OK");
        assert_eq!(orch.mode(), FramingMode::Line);
    }

    #[tokio::test]
    async fn timeout_rejects_and_advances() {
        let (mut orch, _events) = test_orchestrator();
        let mut mock = MockTransport::new();
        let handle = mock.handle();

        let req = CommandRequest::text("slow", re("OK")).with_timeout(Duration::from_millis(50));
        let (a, ra) = command(req);
        let (b, _rb) = command(CommandRequest::text("fast", re("OK")));
        orch.submit(a, &mut mock).await;
        orch.submit(b, &mut mock).await;

        let deadline = orch.next_deadline().unwrap();
        orch.on_deadline(deadline, &mut mock).await;

        assert!(matches!(ra.await.unwrap(), Err(Error::Timeout)));
        assert_eq!(handle.sent_text(), vec!["slow\n", "fast\n"]);
    }

    #[tokio::test]
    async fn deadline_before_expiry_is_noop() {
        let (mut orch, _events) = test_orchestrator();
        let mut mock = MockTransport::new();

        let req = CommandRequest::text("x", re("OK")).with_timeout(Duration::from_secs(5));
        let (ctx, mut rx) = command(req);
        orch.submit(ctx, &mut mock).await;

        orch.on_deadline(Instant::now(), &mut mock).await;
        assert!(orch.current.is_some());
        assert!(rx.try_recv().is_err());
    }
}
