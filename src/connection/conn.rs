//! Core connection type
//!
//! A `Connection` is created in `Connecting`, driven to `Open` by
//! [`Connection::connect`], and from then on owned by a background I/O
//! task that reads frames, answers pings, and runs the close handshake.
//! Public methods communicate with the task over a command channel, so
//! callers never block on network I/O and per-connection events come out
//! in generation order.

use super::state::ReadyState;
use super::tls;
use super::transport::Transport;
use crate::config::{ConnectOptions, SslConfig};
use crate::event::{Event, EventSink};
use crate::pinning::ValidationResult;
use crate::protocol::constants::close_codes;
use crate::protocol::{self, handshake, Frame, OpCode};
use crate::url::WsUrl;
use crate::{Error, Result};
use bytes::{Buf, Bytes, BytesMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::Instrument;

/// Requests forwarded to the connection's I/O task
enum Command {
    Send {
        payload: Bytes,
        is_text: bool,
        done: oneshot::Sender<Result<()>>,
    },
    Close {
        code: u16,
        reason: String,
        done: oneshot::Sender<Result<()>>,
    },
}

/// State shared between the public handle, the connect future, and the
/// I/O task. The mutexes guard single assignments and are never held
/// across an await.
struct Shared {
    id: String,
    state: Mutex<ReadyState>,
    validation: tls::ValidationSlot,
    delegate: Mutex<Option<Arc<dyn EventSink>>>,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    selected_protocol: Mutex<Option<String>>,
    cancelled: AtomicBool,
    abort: Notify,
}

impl Shared {
    fn ready_state(&self) -> ReadyState {
        *self.state.lock().expect("state lock poisoned")
    }

    fn try_transition(&self, next: ReadyState) -> Result<()> {
        self.state.lock().expect("state lock poisoned").transition(next)
    }

    /// Force the terminal state. Returns true for the single caller that
    /// actually performed the transition; everyone else sees false and
    /// must not emit a second close event.
    fn force_closed(&self) -> bool {
        let mut state = self.state.lock().expect("state lock poisoned");
        if *state == ReadyState::Closed {
            false
        } else {
            *state = ReadyState::Closed;
            true
        }
    }

    fn emit(&self, event: Event) {
        let delegate = self
            .delegate
            .lock()
            .expect("delegate lock poisoned")
            .clone();
        if let Some(delegate) = delegate {
            delegate.on_event(event);
        }
    }

    fn clear_delegate(&self) {
        *self.delegate.lock().expect("delegate lock poisoned") = None;
    }

    fn command_sender(&self) -> Option<mpsc::UnboundedSender<Command>> {
        self.commands.lock().expect("commands lock poisoned").clone()
    }

    /// Resolves once `cancelled` is set, surviving the set-then-notify
    /// racing ahead of our registration.
    async fn aborted(&self) {
        loop {
            let notified = self.abort.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.cancelled.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

/// A single pinned WebSocket connection.
///
/// Create through [`Registry::create`](crate::Registry::create); the
/// registry enforces id uniqueness and removes the connection when it
/// reaches `Closed`.
pub struct Connection {
    url: WsUrl,
    protocols: Vec<String>,
    ssl_config: SslConfig,
    options: ConnectOptions,
    connect_started: AtomicBool,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("state", &self.shared.ready_state())
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub(crate) fn new(
        id: String,
        url: WsUrl,
        protocols: Vec<String>,
        ssl_config: SslConfig,
        options: ConnectOptions,
        delegate: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            url,
            protocols,
            ssl_config,
            options,
            connect_started: AtomicBool::new(false),
            shared: Arc::new(Shared {
                id,
                state: Mutex::new(ReadyState::Connecting),
                validation: tls::validation_slot(),
                delegate: Mutex::new(Some(delegate)),
                commands: Mutex::new(None),
                selected_protocol: Mutex::new(None),
                cancelled: AtomicBool::new(false),
                abort: Notify::new(),
            }),
        }
    }

    /// The caller-supplied connection id.
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// The endpoint this connection targets.
    pub fn url(&self) -> &WsUrl {
        &self.url
    }

    /// Current lifecycle phase; pure read, always succeeds.
    pub fn ready_state(&self) -> ReadyState {
        self.shared.ready_state()
    }

    /// The pinning decision made during the TLS handshake, or `None` if
    /// the handshake never reached certificate evaluation.
    pub fn ssl_validation_result(&self) -> Option<ValidationResult> {
        tls::recorded(&self.shared.validation)
    }

    /// Sub-protocol the server selected during the upgrade, if any.
    pub fn selected_protocol(&self) -> Option<String> {
        self.shared
            .selected_protocol
            .lock()
            .expect("protocol lock poisoned")
            .clone()
    }

    /// Drop the delegate handle; no further events are delivered. The
    /// delegate is a non-owning back-reference, so this must happen
    /// before the delegate itself goes away.
    pub fn unregister_delegate(&self) {
        self.shared.clear_delegate();
    }

    /// Establish the TLS session (pin validation inside the handshake),
    /// perform the WebSocket upgrade, and transition to `Open`.
    ///
    /// Resolves once `Open` is reached. Any failure is terminal: the
    /// connection transitions to `Closed`, one `close` event with a
    /// synthetic code distinguishing the cause is emitted, and the
    /// originating error is returned.
    pub async fn connect(&self) -> Result<()> {
        async {
            if self.connect_started.swap(true, Ordering::SeqCst) {
                return Err(Error::InvalidState {
                    expected: "a connection that has not yet dialed".into(),
                    actual: self.shared.ready_state().to_string(),
                });
            }
            if self.shared.cancelled.load(Ordering::SeqCst)
                || self.shared.ready_state() != ReadyState::Connecting
            {
                return Err(Error::Cancelled);
            }

            match self.drive_handshake().await {
                Ok((transport, response)) => {
                    if self.shared.try_transition(ReadyState::Open).is_err() {
                        // close()/cleanup() won the race during the handshake
                        return Err(Error::Cancelled);
                    }

                    *self
                        .shared
                        .selected_protocol
                        .lock()
                        .expect("protocol lock poisoned") = response.protocol.clone();

                    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
                    *self.shared.commands.lock().expect("commands lock poisoned") = Some(cmd_tx);

                    self.shared.emit(Event::Open {
                        connection_id: self.shared.id.clone(),
                        protocol: response.protocol,
                    });

                    let task = IoTask {
                        shared: self.shared.clone(),
                        transport,
                        read_buf: response.leftover,
                        cmd_rx,
                        max_payload: self.options.max_message_size,
                        close_grace: self.options.close_grace(),
                    };
                    let span = tracing::debug_span!("io", id = %self.shared.id);
                    tokio::spawn(task.run().instrument(span));

                    tracing::info!("connection open");
                    Ok(())
                }
                Err(err) => {
                    if matches!(err, Error::Timeout(_)) {
                        // An evaluation the handshake never finished is
                        // discarded, not reported
                        tls::discard(&self.shared.validation);
                    }
                    if self.shared.force_closed() {
                        self.shared.emit(Event::Close {
                            connection_id: self.shared.id.clone(),
                            code: close_code_for(&err),
                            reason: err.to_string(),
                        });
                    }
                    tracing::warn!(error = %err, "connect failed");
                    Err(err)
                }
            }
        }
        .instrument(tracing::info_span!(
            "connect",
            id = %self.shared.id,
            url = %self.url
        ))
        .await
    }

    /// TLS then upgrade, racing the abort signal from `close`/`cleanup`.
    async fn drive_handshake(&self) -> Result<(Transport, handshake::UpgradeResponse)> {
        let work = async {
            let mut transport = match timeout(
                self.options.connect_timeout(),
                tls::establish(&self.url, &self.ssl_config, &self.shared.validation),
            )
            .await
            {
                Ok(result) => result?,
                Err(_) => return Err(Error::Timeout("connect handshake")),
            };

            let response = match timeout(
                self.options.handshake_timeout(),
                handshake::upgrade(
                    &mut transport,
                    &self.url,
                    &self.protocols,
                    &self.options.headers,
                ),
            )
            .await
            {
                Ok(result) => result?,
                Err(_) => return Err(Error::Timeout("WebSocket upgrade")),
            };

            Ok((transport, response))
        };

        tokio::select! {
            _ = self.shared.aborted() => Err(Error::Cancelled),
            result = work => result,
        }
    }

    /// Send a data frame. Valid only in `Open`.
    pub async fn send(&self, data: Bytes, is_text: bool) -> Result<()> {
        let state = self.shared.ready_state();
        if state != ReadyState::Open {
            return Err(Error::InvalidState {
                expected: "open".into(),
                actual: state.to_string(),
            });
        }

        let Some(sender) = self.shared.command_sender() else {
            return Err(Error::InvalidState {
                expected: "open".into(),
                actual: "closed".into(),
            });
        };

        let (done_tx, done_rx) = oneshot::channel();
        sender
            .send(Command::Send {
                payload: data,
                is_text,
                done: done_tx,
            })
            .map_err(|_| Error::InvalidState {
                expected: "open".into(),
                actual: "closed".into(),
            })?;

        done_rx.await.unwrap_or(Err(Error::Cancelled))
    }

    /// Initiate the close handshake, or abort an in-flight connect.
    ///
    /// Idempotent: closing an already-`Closing`/`Closed` connection is a
    /// no-op.
    pub async fn close(&self, code: u16, reason: &str) -> Result<()> {
        match self.shared.ready_state() {
            ReadyState::Connecting => {
                self.shared.cancelled.store(true, Ordering::SeqCst);
                self.shared.abort.notify_waiters();
                // Never dialed: nobody else will deliver the terminal event
                if !self.connect_started.load(Ordering::SeqCst) && self.shared.force_closed() {
                    self.shared.emit(Event::Close {
                        connection_id: self.shared.id.clone(),
                        code,
                        reason: reason.to_string(),
                    });
                }
                Ok(())
            }
            ReadyState::Open => {
                let Some(sender) = self.shared.command_sender() else {
                    return Ok(());
                };
                let (done_tx, done_rx) = oneshot::channel();
                if sender
                    .send(Command::Close {
                        code,
                        reason: reason.to_string(),
                        done: done_tx,
                    })
                    .is_err()
                {
                    // I/O task already gone; Closed is imminent
                    return Ok(());
                }
                done_rx.await.unwrap_or(Ok(()))
            }
            ReadyState::Closing | ReadyState::Closed => Ok(()),
        }
    }

    /// Forcibly release all resources regardless of state. Clears the
    /// delegate first, so no events are emitted after this returns.
    pub fn cleanup(&self) {
        self.shared.clear_delegate();
        self.shared.cancelled.store(true, Ordering::SeqCst);
        self.shared.abort.notify_waiters();
        *self.shared.commands.lock().expect("commands lock poisoned") = None;
        self.shared.force_closed();
        tracing::debug!(id = %self.shared.id, "connection cleaned up");
    }
}

/// Synthetic close code distinguishing connect-failure causes.
fn close_code_for(err: &Error) -> u16 {
    match err {
        Error::PinningFailed(_) => close_codes::PINNING_FAILED,
        Error::Timeout(_) => close_codes::TIMED_OUT,
        Error::HandshakeFailed(_) => close_codes::HANDSHAKE_FAILED,
        Error::Protocol(_) => close_codes::PROTOCOL_ERROR,
        Error::Cancelled => close_codes::NORMAL,
        _ => close_codes::ABNORMAL,
    }
}

/// How the I/O task's read/command loop ended
enum Terminal {
    /// Close handshake completed (either side initiated)
    CloseHandshake { code: u16, reason: String },
    /// We sent a close frame; the peer never answered within the grace
    GraceExpired,
    /// Peer dropped the transport without a close frame
    Abrupt,
    /// Peer violated the framing protocol
    Protocol(String),
    /// Transport read failed
    ReadFailed(String),
    /// Transport write failed (error already surfaced on the completion path)
    WriteFailed(String),
    /// `cleanup()` fired; tear down silently
    Aborted,
}

enum Step {
    Abort,
    Command(Option<Command>),
    Read(Result<Option<Frame>>),
    Grace,
}

/// Background task owning the transport after the upgrade.
struct IoTask {
    shared: Arc<Shared>,
    transport: Transport,
    read_buf: BytesMut,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    max_payload: usize,
    close_grace: Duration,
}

impl IoTask {
    async fn run(mut self) {
        // Opcode of the fragmented message in progress, if any
        let mut fragment_opcode: Option<OpCode> = None;
        let mut grace_deadline: Option<Instant> = None;

        let terminal = loop {
            let step = {
                let deadline = grace_deadline.unwrap_or_else(Instant::now);
                tokio::select! {
                    _ = self.shared.aborted() => Step::Abort,
                    cmd = self.cmd_rx.recv() => Step::Command(cmd),
                    result = read_one(&mut self.transport, &mut self.read_buf, self.max_payload) => {
                        Step::Read(result)
                    }
                    _ = sleep_until(deadline), if grace_deadline.is_some() => Step::Grace,
                }
            };

            match step {
                Step::Abort | Step::Command(None) => break Terminal::Aborted,
                Step::Grace => break Terminal::GraceExpired,

                Step::Command(Some(Command::Send {
                    payload,
                    is_text,
                    done,
                })) => {
                    if self.shared.ready_state() != ReadyState::Open {
                        let _ = done.send(Err(Error::InvalidState {
                            expected: "open".into(),
                            actual: self.shared.ready_state().to_string(),
                        }));
                        continue;
                    }
                    let frame = if is_text {
                        Frame::text(payload)
                    } else {
                        Frame::binary(payload)
                    };
                    match self.write_frame(&frame).await {
                        Ok(()) => {
                            let _ = done.send(Ok(()));
                        }
                        Err(err) => {
                            let message = err.to_string();
                            let _ = done.send(Err(err));
                            break Terminal::WriteFailed(message);
                        }
                    }
                }

                Step::Command(Some(Command::Close { code, reason, done })) => {
                    if self.shared.ready_state() != ReadyState::Open {
                        let _ = done.send(Ok(()));
                        continue;
                    }
                    match self.write_frame(&Frame::close(code, &reason)).await {
                        Ok(()) => {
                            let _ = self.shared.try_transition(ReadyState::Closing);
                            grace_deadline = Some(Instant::now() + self.close_grace);
                            let _ = done.send(Ok(()));
                            tracing::debug!(code, "close frame sent, awaiting peer close");
                        }
                        Err(err) => {
                            let message = err.to_string();
                            let _ = done.send(Err(err));
                            break Terminal::WriteFailed(message);
                        }
                    }
                }

                Step::Read(Ok(Some(frame))) => match frame.opcode {
                    OpCode::Text | OpCode::Binary => {
                        if fragment_opcode.is_some() {
                            break Terminal::Protocol(
                                "data frame interleaved with a fragmented message".into(),
                            );
                        }
                        if !frame.fin {
                            fragment_opcode = Some(frame.opcode);
                        }
                        self.shared.emit(Event::Message {
                            connection_id: self.shared.id.clone(),
                            is_binary: frame.opcode == OpCode::Binary,
                            data: frame.payload,
                        });
                    }
                    OpCode::Continuation => {
                        let Some(first_opcode) = fragment_opcode else {
                            break Terminal::Protocol(
                                "continuation frame without a message in progress".into(),
                            );
                        };
                        if frame.fin {
                            fragment_opcode = None;
                        }
                        self.shared.emit(Event::Message {
                            connection_id: self.shared.id.clone(),
                            is_binary: first_opcode == OpCode::Binary,
                            data: frame.payload,
                        });
                    }
                    OpCode::Ping => {
                        if let Err(err) = self.write_frame(&Frame::pong(frame.payload)).await {
                            break Terminal::WriteFailed(err.to_string());
                        }
                    }
                    OpCode::Pong => {
                        tracing::trace!("pong received");
                    }
                    OpCode::Close => {
                        let (code, reason) = frame.close_code_reason();
                        if self.shared.ready_state() == ReadyState::Open {
                            // Peer initiated: echo the close before tearing down
                            let echo = if code == close_codes::NO_STATUS {
                                Frame {
                                    fin: true,
                                    opcode: OpCode::Close,
                                    payload: Bytes::new(),
                                }
                            } else {
                                Frame::close(code, "")
                            };
                            let _ = self.write_frame(&echo).await;
                            let _ = self.shared.try_transition(ReadyState::Closing);
                        }
                        break Terminal::CloseHandshake { code, reason };
                    }
                },

                Step::Read(Ok(None)) => {
                    // EOF. After our close frame went out, a dropped
                    // transport counts as the peer's answer.
                    if self.shared.ready_state() == ReadyState::Closing {
                        break Terminal::CloseHandshake {
                            code: close_codes::NORMAL,
                            reason: String::new(),
                        };
                    }
                    break Terminal::Abrupt;
                }

                Step::Read(Err(Error::Protocol(message))) => {
                    // Best-effort close frame before failing the connection
                    let _ = self
                        .write_frame(&Frame::close(close_codes::PROTOCOL_ERROR, "protocol error"))
                        .await;
                    break Terminal::Protocol(message);
                }

                Step::Read(Err(err)) => break Terminal::ReadFailed(err.to_string()),
            }
        };

        let _ = self.transport.shutdown().await;
        self.finish(terminal);
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let wire = protocol::encode_frame(frame, Some(protocol::client_mask()));
        self.transport.write_all(&wire).await?;
        self.transport.flush().await
    }

    /// Exactly one terminating signal: the single force_closed winner
    /// emits the close event (preceded by an error event for read-side
    /// failures, matching how failures surface when no completion path
    /// exists).
    fn finish(self, terminal: Terminal) {
        let id = &self.shared.id;
        let emit_close = |code: u16, reason: String, error: Option<String>| {
            if !self.shared.force_closed() {
                return;
            }
            if let Some(message) = error {
                self.shared.emit(Event::Error {
                    connection_id: id.clone(),
                    message,
                });
            }
            self.shared.emit(Event::Close {
                connection_id: id.clone(),
                code,
                reason,
            });
        };

        match terminal {
            Terminal::Aborted => {
                self.shared.force_closed();
            }
            Terminal::CloseHandshake { code, reason } => {
                tracing::debug!(code, "close handshake complete");
                emit_close(code, reason, None);
            }
            Terminal::GraceExpired => {
                tracing::debug!("peer never answered the close frame");
                emit_close(
                    close_codes::TIMED_OUT,
                    "close handshake timed out".into(),
                    None,
                );
            }
            Terminal::Abrupt => {
                emit_close(
                    close_codes::ABNORMAL,
                    "connection closed abruptly".into(),
                    Some("connection closed abruptly".into()),
                );
            }
            Terminal::Protocol(message) => {
                tracing::warn!(%message, "protocol violation");
                emit_close(close_codes::PROTOCOL_ERROR, message.clone(), Some(message));
            }
            Terminal::ReadFailed(message) => {
                emit_close(close_codes::ABNORMAL, message.clone(), Some(message));
            }
            Terminal::WriteFailed(message) => {
                // The write error already went out via the completion path
                tracing::debug!(%message, "write failure tore down the connection");
                emit_close(close_codes::ABNORMAL, message, None);
            }
        }
    }
}

/// Read frames out of the accumulation buffer, refilling from the
/// transport as needed. `Ok(None)` is EOF; a decode failure is a
/// protocol error.
async fn read_one(
    transport: &mut Transport,
    buf: &mut BytesMut,
    max_payload: usize,
) -> Result<Option<Frame>> {
    loop {
        match protocol::decode_frame(buf, max_payload) {
            Ok(Some((frame, consumed))) => {
                buf.advance(consumed);
                return Ok(Some(frame));
            }
            Ok(None) => {}
            Err(e) => return Err(Error::Protocol(e.to_string())),
        }

        let n = transport.read_buf(buf).await?;
        if n == 0 {
            return Ok(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event;
    use futures::StreamExt;

    fn test_connection(
        url: &str,
        options: ConnectOptions,
    ) -> (Connection, event::EventStream) {
        let (sink, events) = event::channel();
        let conn = Connection::new(
            "test-conn".into(),
            WsUrl::parse(url).unwrap(),
            vec![],
            SslConfig::disabled(),
            options,
            sink,
        );
        (conn, events)
    }

    #[test]
    fn test_initial_state_is_connecting() {
        let (conn, _events) = test_connection("ws://localhost:9/", ConnectOptions::default());
        assert_eq!(conn.ready_state(), ReadyState::Connecting);
        assert!(conn.ssl_validation_result().is_none());
        assert!(conn.selected_protocol().is_none());
    }

    #[tokio::test]
    async fn test_send_before_open_is_invalid_state() {
        let (conn, _events) = test_connection("ws://localhost:9/", ConnectOptions::default());
        let err = conn.send("data".into(), true).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_close_before_connect_emits_single_close() {
        let (conn, mut events) = test_connection("ws://localhost:9/", ConnectOptions::default());

        conn.close(1000, "never mind").await.unwrap();
        assert_eq!(conn.ready_state(), ReadyState::Closed);

        match events.next().await {
            Some(Event::Close { code, reason, .. }) => {
                assert_eq!(code, 1000);
                assert_eq!(reason, "never mind");
            }
            other => panic!("expected close event, got {:?}", other),
        }

        // Second close is a no-op, no further events
        conn.close(1000, "again").await.unwrap();
        drop(conn);
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_connect_refused_transitions_to_closed() {
        // Port 9 (discard) is not listening on loopback
        let (conn, mut events) = test_connection("ws://127.0.0.1:9/", ConnectOptions::default());

        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(conn.ready_state(), ReadyState::Closed);

        match events.next().await {
            Some(Event::Close { code, .. }) => assert_eq!(code, close_codes::ABNORMAL),
            other => panic!("expected close event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_twice_rejected() {
        let (conn, _events) = test_connection("ws://127.0.0.1:9/", ConnectOptions::default());
        let _ = conn.connect().await;
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_send_after_failed_connect_is_invalid_state() {
        let (conn, _events) = test_connection("ws://127.0.0.1:9/", ConnectOptions::default());
        let _ = conn.connect().await;
        let err = conn.send("data".into(), false).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_cleanup_emits_no_events() {
        let (conn, mut events) = test_connection("ws://127.0.0.1:9/", ConnectOptions::default());
        conn.cleanup();
        assert_eq!(conn.ready_state(), ReadyState::Closed);
        drop(conn);
        assert!(events.next().await.is_none());
    }

    #[test]
    fn test_close_codes_distinguish_causes() {
        assert_eq!(
            close_code_for(&Error::PinningFailed("x".into())),
            close_codes::PINNING_FAILED
        );
        assert_eq!(
            close_code_for(&Error::Timeout("connect handshake")),
            close_codes::TIMED_OUT
        );
        assert_eq!(
            close_code_for(&Error::HandshakeFailed("x".into())),
            close_codes::HANDSHAKE_FAILED
        );
        assert_eq!(close_code_for(&Error::Cancelled), close_codes::NORMAL);
    }
}
