//! The [`Connector`]: one logical connection to a tetris server.
//!
//! All connection state lives in a background task. The cloneable
//! [`Connector`] handle only enqueues commands, so every operation is
//! applied in the order it was issued:
//!
//! ```text
//!   Connector ── Command ──▶ ┌──────────────────────┐ ── TransportCommand ─▶ transport
//!   (clones)                 │ ConnectorTask         │
//!   subscribers ◀─ events ── │  codec, pending FIFO, │ ◀─ TransportEvent ─── transport
//!                            │  heartbeat, reconnect │
//!                            └──────────────────────┘
//! ```
//!
//! # Reply correlation
//!
//! Packets carry no request ids. A call is answered by the first inbound
//! packet that is either of the expected kind or the protocol's error
//! packet, scanning pending calls oldest first. This is only correct
//! because the server answers requests in the order it received them. A
//! server that reorders replies would hand them to the wrong callers.

use std::collections::VecDeque;
use std::future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::codec::WireCodec;
use crate::error::{CodingError, TetrisError, ensure};
use crate::heartbeat::{Heartbeat, HeartbeatAction, HeartbeatConfig, Probe};
use crate::network::events::{ConnectorEvent, EventBus};
use crate::network::reply::ReplyFuture;
use crate::protocol::Protocol;
use crate::transport::{TransportEvent, TransportFactory, TransportHandle};

// ── ReconnectPolicy ──────────────────────────────────────────────

/// Exponential backoff between reconnect attempts, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            multiplier: 2,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the reconnect attempt numbered `attempt` (from 0).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.multiplier.max(1)).saturating_pow(attempt);
        let delay = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms.max(self.initial_delay_ms)))
    }
}

// ── Connector ────────────────────────────────────────────────────

enum Command<P: Protocol> {
    Connect(oneshot::Sender<Result<(), TetrisError>>),
    Send(P),
    Call {
        packet: P,
        expect: P::Kind,
        reply: oneshot::Sender<Result<P, TetrisError>>,
    },
    Close,
}

/// Handle to a connection managed by a background task.
///
/// Cheap to clone; all clones drive the same connection. The task stops
/// once every handle is dropped.
pub struct Connector<P: Protocol> {
    commands: mpsc::UnboundedSender<Command<P>>,
    bus: Arc<EventBus<P>>,
    remote: Arc<str>,
}

impl<P: Protocol> Clone for Connector<P> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            bus: Arc::clone(&self.bus),
            remote: Arc::clone(&self.remote),
        }
    }
}

impl<P: Protocol> std::fmt::Debug for Connector<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

impl<P: Protocol> Connector<P> {
    /// Starts configuring a connector for `remote`.
    pub fn builder<C>(
        remote: impl Into<String>,
        codec: C,
        factory: impl TransportFactory,
    ) -> ConnectorBuilder<C>
    where
        C: WireCodec<Packet = P>,
    {
        ConnectorBuilder {
            remote: remote.into(),
            codec,
            factory: Arc::new(factory),
            reconnect: None,
            heartbeat: None,
            handshake: None,
        }
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Opens a transport and waits until it is usable.
    ///
    /// Fails with [`TetrisError::UnexpectedResponse`] when the server
    /// refuses the attempt (e.g. `404` for an offline stream), and with the
    /// transport error when the connection cannot be made.
    pub async fn connect(&self) -> Result<(), TetrisError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Connect(tx))?;
        rx.await.map_err(|_| TetrisError::ChannelClosed)?
    }

    /// Sends a packet without waiting for an answer.
    ///
    /// Encoding and transport failures are published as
    /// [`ConnectorEvent::Error`]; only a stopped connector fails here.
    /// Nothing is published before [`connect`](Self::connect) or after
    /// [`close`](Self::close), so a packet sent then is dropped silently.
    /// Use [`call`](Self::call) to learn about `NotConnected`.
    pub fn send(&self, packet: P) -> Result<(), TetrisError> {
        self.commands.send(Command::Send(packet))?;
        Ok(())
    }

    /// Sends `packet` and resolves with the first reply of kind `expect`
    /// (or the error packet) not claimed by an earlier call.
    ///
    /// The call is queued before this returns, so calls issued one after
    /// another are answered in that order.
    pub fn call(&self, packet: P, expect: P::Kind) -> ReplyFuture<P> {
        let (tx, rx) = oneshot::channel();
        match self.commands.send(Command::Call {
            packet,
            expect,
            reply: tx,
        }) {
            Ok(()) => ReplyFuture::new(rx),
            Err(e) => ReplyFuture::failed(e.into()),
        }
    }

    /// Closes the transport. Pending calls are abandoned and no further
    /// events are published until the next [`connect`](Self::connect).
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    /// Receives every [`ConnectorEvent`] from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectorEvent<P>> {
        self.bus.subscribe()
    }

    /// Receives unsolicited packets of one kind.
    pub fn subscribe_kind(&self, kind: P::Kind) -> mpsc::UnboundedReceiver<P> {
        self.bus.subscribe_kind(kind)
    }
}

// ── ConnectorBuilder ─────────────────────────────────────────────

/// Configures and spawns a [`Connector`].
pub struct ConnectorBuilder<C: WireCodec> {
    remote: String,
    codec: C,
    factory: Arc<dyn TransportFactory>,
    reconnect: Option<ReconnectPolicy>,
    heartbeat: Option<(HeartbeatConfig, Probe<C::Packet>)>,
    handshake: Option<(C::Packet, <C::Packet as Protocol>::Kind)>,
}

impl<C: WireCodec> ConnectorBuilder<C> {
    /// Reconnects with `policy` whenever the transport is lost.
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    /// Watches the connection for silence.
    pub fn heartbeat(mut self, config: HeartbeatConfig, probe: Probe<C::Packet>) -> Self {
        self.heartbeat = Some((config, probe));
        self
    }

    /// Call replayed after every reconnect before
    /// [`ConnectorEvent::Reconnect`] is published.
    pub fn handshake(mut self, packet: C::Packet, expect: <C::Packet as Protocol>::Kind) -> Self {
        self.handshake = Some((packet, expect));
        self
    }

    /// Spawns the connection task on the current tokio runtime. Nothing is
    /// opened until [`Connector::connect`].
    pub fn spawn(self) -> Connector<C::Packet> {
        let (tx, rx) = mpsc::unbounded_channel();
        let bus = Arc::new(EventBus::new());
        let remote: Arc<str> = Arc::from(self.remote);

        let task = ConnectorTask {
            remote: Arc::clone(&remote),
            codec: self.codec,
            factory: self.factory,
            commands: rx,
            bus: Arc::clone(&bus),
            pending: VecDeque::new(),
            transport: None,
            open: false,
            connect_reply: None,
            liveness: self.heartbeat.map(|(config, probe)| Liveness {
                monitor: Heartbeat::new(config),
                probe,
            }),
            reconnect: self.reconnect,
            reconnect_at: None,
            attempt: 0,
            reconnecting: false,
            handshake: self.handshake,
        };
        tokio::spawn(task.run());

        Connector {
            commands: tx,
            bus,
            remote,
        }
    }
}

// ── ConnectorTask ────────────────────────────────────────────────

struct PendingCall<P: Protocol> {
    expect: P::Kind,
    reply: Reply<P>,
}

enum Reply<P> {
    Caller(oneshot::Sender<Result<P, TetrisError>>),
    /// The handshake replayed after a reconnect.
    Handshake,
}

struct Liveness<P> {
    monitor: Heartbeat,
    probe: Probe<P>,
}

struct ConnectorTask<C: WireCodec> {
    remote: Arc<str>,
    codec: C,
    factory: Arc<dyn TransportFactory>,
    commands: mpsc::UnboundedReceiver<Command<C::Packet>>,
    bus: Arc<EventBus<C::Packet>>,
    /// Oldest first.
    pending: VecDeque<PendingCall<C::Packet>>,
    transport: Option<TransportHandle>,
    /// Set by `connect`, cleared by `close`. Nothing is published while unset.
    open: bool,
    connect_reply: Option<oneshot::Sender<Result<(), TetrisError>>>,
    liveness: Option<Liveness<C::Packet>>,
    reconnect: Option<ReconnectPolicy>,
    reconnect_at: Option<Instant>,
    attempt: u32,
    reconnecting: bool,
    handshake: Option<(C::Packet, <C::Packet as Protocol>::Kind)>,
}

async fn next_event(transport: &mut Option<TransportHandle>) -> Option<TransportEvent> {
    match transport {
        Some(transport) => transport.next_event().await,
        None => future::pending().await,
    }
}

async fn next_heartbeat(liveness: &mut Option<Liveness<impl Sized>>) -> HeartbeatAction {
    match liveness {
        Some(liveness) => liveness.monitor.expired().await,
        None => future::pending().await,
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => future::pending().await,
    }
}

impl<C: WireCodec> ConnectorTask<C> {
    async fn run(mut self) {
        loop {
            let heartbeat_armed = self
                .liveness
                .as_ref()
                .is_some_and(|l| l.monitor.is_armed());

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                event = next_event(&mut self.transport), if self.transport.is_some() => {
                    // A transport that vanished without its Close event
                    // is treated as closed.
                    self.handle_transport_event(event.unwrap_or(TransportEvent::Close));
                }
                action = next_heartbeat(&mut self.liveness), if heartbeat_armed => {
                    self.handle_heartbeat(action);
                }
                _ = sleep_until(self.reconnect_at), if self.reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    if self.open {
                        info!(remote = %self.remote, attempt = self.attempt, "reconnecting");
                        self.attach();
                    }
                }
            }
        }

        debug!(remote = %self.remote, "connector dropped, shutting down");
        self.shutdown();
    }

    // ── Commands ─────────────────────────────────────────────────

    fn handle_command(&mut self, command: Command<C::Packet>) {
        match command {
            Command::Connect(reply) => {
                if self.transport.is_some() {
                    let _ = reply.send(Err(TetrisError::AlreadyConnected));
                    return;
                }
                self.open = true;
                self.reconnect_at = None;
                self.reconnecting = false;
                self.attempt = 0;
                self.connect_reply = Some(reply);
                self.attach();
            }
            Command::Send(packet) => {
                if let Err(e) = self.send_packet(&packet) {
                    self.emit_error(e);
                }
            }
            Command::Call {
                packet,
                expect,
                reply,
            } => {
                self.pending.push_back(PendingCall {
                    expect,
                    reply: Reply::Caller(reply),
                });
                if let Err(e) = self.send_packet(&packet) {
                    // The call never reached the wire; nobody will answer it.
                    self.fail_last_call(e);
                }
            }
            Command::Close => {
                info!(remote = %self.remote, "closing");
                self.shutdown();
            }
        }
    }

    fn fail_last_call(&mut self, error: TetrisError) {
        let caller = match self.pending.pop_back() {
            Some(PendingCall {
                reply: Reply::Caller(tx),
                ..
            }) => Some(tx),
            _ => None,
        };
        if let Err(e) = ensure(caller.is_some(), "failed call was not the newest pending entry") {
            error!(remote = %self.remote, error = %e, "pending queue out of order");
        }
        if let Some(tx) = caller {
            let _ = tx.send(Err(error));
        }
    }

    /// Deliberate shutdown: drops the transport, abandons pending calls
    /// and stops publishing.
    fn shutdown(&mut self) {
        self.open = false;
        self.reconnect_at = None;
        self.reconnecting = false;
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        if let Some(liveness) = &mut self.liveness {
            liveness.monitor.close();
        }
        self.abandon_pending();
        if let Some(reply) = self.connect_reply.take() {
            let _ = reply.send(Err(TetrisError::ConnectionClosed));
        }
    }

    fn abandon_pending(&mut self) {
        if !self.pending.is_empty() {
            debug!(
                remote = %self.remote,
                count = self.pending.len(),
                "abandoning pending calls"
            );
            self.pending.clear();
        }
    }

    fn attach(&mut self) {
        self.codec.reset();
        self.transport = Some(self.factory.open(&self.remote));
        debug!(remote = %self.remote, "transport requested");
    }

    fn send_packet(&mut self, packet: &C::Packet) -> Result<(), TetrisError> {
        let transport = self.transport.as_ref().ok_or(TetrisError::NotConnected)?;
        let data = self.codec.encode(packet)?;
        trace!(remote = %self.remote, kind = ?packet.kind(), len = data.len(), "sending");
        self.emit(ConnectorEvent::Sending(data.clone()));
        transport.send(data)
    }

    // ── Transport events ─────────────────────────────────────────

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Data(data) => self.on_data(data),
            TransportEvent::Pong => self.touch(),
            TransportEvent::Error(e) => self.on_failure(TetrisError::Transport(e)),
            TransportEvent::UnexpectedResponse { status } => {
                self.on_failure(TetrisError::UnexpectedResponse { status })
            }
            TransportEvent::Close => self.on_close(),
        }
    }

    fn on_open(&mut self) {
        info!(remote = %self.remote, "connected");
        if let Some(liveness) = &mut self.liveness {
            liveness.monitor.start(Instant::now());
        }
        self.emit(ConnectorEvent::Connect);

        if let Some(reply) = self.connect_reply.take() {
            let _ = reply.send(Ok(()));
        }

        if self.reconnecting {
            match self.handshake.clone() {
                Some((packet, expect)) => {
                    self.pending.push_back(PendingCall {
                        expect,
                        reply: Reply::Handshake,
                    });
                    if let Err(e) = self.send_packet(&packet) {
                        self.pending.pop_back();
                        self.emit_error(e);
                    }
                }
                None => self.on_reconnected(),
            }
        }
    }

    fn on_reconnected(&mut self) {
        info!(remote = %self.remote, "reconnected");
        self.reconnecting = false;
        self.attempt = 0;
        self.emit(ConnectorEvent::Reconnect);
    }

    fn on_data(&mut self, data: Bytes) {
        self.touch();
        self.emit(ConnectorEvent::RawMessage(data.clone()));

        for decoded in self.codec.feed(data) {
            match decoded {
                Ok(packet) => self.handle_incoming(packet),
                Err(CodingError::UnknownPacket { id, data }) => {
                    debug!(remote = %self.remote, %id, len = data.len(), "unrecognized packet");
                    self.emit(ConnectorEvent::Unrecognized(data));
                }
                Err(e) => self.emit_error(e.into()),
            }
        }
    }

    fn touch(&mut self) {
        if let Some(liveness) = &mut self.liveness {
            liveness.monitor.touch(Instant::now());
        }
    }

    /// Transport error or refusal. While `connect` is waiting the error
    /// goes to the caller; otherwise it is published.
    fn on_failure(&mut self, error: TetrisError) {
        match self.connect_reply.take() {
            Some(reply) => {
                warn!(remote = %self.remote, error = %error, "connect failed");
                let _ = reply.send(Err(error));
                // The transport's closing event belongs to the failed attempt.
                self.open = false;
            }
            None => self.emit_error(error),
        }
    }

    fn on_close(&mut self) {
        self.transport = None;
        if let Some(liveness) = &mut self.liveness {
            liveness.monitor.close();
        }
        self.abandon_pending();

        if let Some(reply) = self.connect_reply.take() {
            // The first attempt never opened: report it, don't retry.
            let _ = reply.send(Err(TetrisError::ConnectionClosed));
            self.open = false;
            return;
        }

        if !self.open {
            return;
        }

        info!(remote = %self.remote, "transport closed");
        self.emit(ConnectorEvent::Close);

        if let Some(policy) = &self.reconnect {
            let delay = policy.delay(self.attempt);
            self.attempt = self.attempt.saturating_add(1);
            self.reconnecting = true;
            self.reconnect_at = Some(Instant::now() + delay);
            warn!(remote = %self.remote, ?delay, "connection lost, reconnect scheduled");
            self.emit(ConnectorEvent::Disconnect);
        }
    }

    // ── Correlation ──────────────────────────────────────────────

    fn handle_incoming(&mut self, packet: C::Packet) {
        let kind = packet.kind();
        let error_kind = <C::Packet as Protocol>::error_kind();

        let matched = self
            .pending
            .iter()
            .position(|call| call.expect == kind || kind == error_kind);

        let Some(call) = matched.and_then(|index| self.pending.remove(index)) else {
            trace!(remote = %self.remote, ?kind, "unsolicited packet");
            self.emit(ConnectorEvent::Message(packet.clone()));
            if self.open {
                self.bus.publish_kind(&packet);
            }
            return;
        };

        let result = if kind == error_kind && call.expect != kind {
            Err(TetrisError::Remote(packet.error_message().unwrap_or_default()))
        } else {
            Ok(packet)
        };

        match call.reply {
            Reply::Caller(tx) => {
                let _ = tx.send(result);
            }
            Reply::Handshake => match result {
                Ok(_) => self.on_reconnected(),
                Err(e) => {
                    warn!(remote = %self.remote, error = %e, "handshake rejected after reconnect");
                    self.emit_error(e);
                    if let Some(transport) = &self.transport {
                        transport.close();
                    }
                }
            },
        }
    }

    // ── Heartbeat ────────────────────────────────────────────────

    fn handle_heartbeat(&mut self, action: HeartbeatAction) {
        let Some(liveness) = &self.liveness else {
            return;
        };

        match action {
            HeartbeatAction::Probe => {
                trace!(remote = %self.remote, "liveness probe");
                let sent = match &liveness.probe {
                    Probe::Native => self
                        .transport
                        .as_ref()
                        .map_or(Err(TetrisError::NotConnected), TransportHandle::ping),
                    Probe::Packet(packet) => {
                        let packet = packet.clone();
                        self.send_packet(&packet)
                    }
                    Probe::Passive => Ok(()),
                };
                if let Err(e) = sent {
                    self.emit_error(e);
                }
            }
            HeartbeatAction::TimedOut => {
                let timeout = liveness.monitor.config().timeout();
                warn!(remote = %self.remote, ?timeout, "ping timeout, closing transport");
                self.emit_error(TetrisError::PingTimeout(timeout));
                if let Some(transport) = self.transport.take() {
                    transport.close();
                }
                self.on_close();
            }
        }
    }

    // ── Publishing ───────────────────────────────────────────────

    fn emit(&self, event: ConnectorEvent<C::Packet>) {
        if self.open {
            self.bus.publish(event);
        }
    }

    /// Publishes an error. With nobody subscribed, the error is logged
    /// with the connection settings instead of disappearing.
    fn emit_error(&self, error: TetrisError) {
        if !self.open {
            debug!(remote = %self.remote, error = %error, "error after close ignored");
            return;
        }

        let error = Arc::new(error);
        if self.bus.publish(ConnectorEvent::Error(Arc::clone(&error))) == 0 {
            error!(
                remote = %self.remote,
                reconnect = ?self.reconnect,
                error = %error,
                chain = %crate::error::chain(error.as_ref()),
                "uncaught error in tetris connector"
            );
        }
    }
}
