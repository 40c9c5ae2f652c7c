//! The transport boundary.
//!
//! A transport is anything that can carry payloads to a remote peer: a TCP
//! byte stream, a WebSocket, an in-memory pipe. The
//! [`Connector`](crate::Connector) never touches sockets directly; it asks a
//! [`TransportFactory`] for a [`TransportHandle`] and talks to it through two
//! channels:
//!
//! ```text
//!   Connector ── TransportCommand ──▶ transport task
//!   Connector ◀── TransportEvent ──── transport task
//! ```
//!
//! Every transport ends its event sequence with exactly one
//! [`TransportEvent::Close`], whether the close was requested, caused by an
//! error, or initiated by the remote.

pub mod memory;

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TetrisError;

/// Something that happened on the transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// The connection is established and can carry data.
    Open,
    /// One delivery: a whole message, or an arbitrary chunk of a stream.
    Data(Bytes),
    /// Answer to a transport-native ping.
    Pong,
    /// I/O failure. A `Close` follows.
    Error(io::Error),
    /// The remote refused the connection attempt with an HTTP status.
    /// A `Close` follows.
    UnexpectedResponse { status: u16 },
    /// The transport is finished. Always the last event.
    Close,
}

/// Instructions for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    Send(Bytes),
    /// Send a transport-native ping.
    Ping,
    Close,
}

/// The connector's end of an open transport.
#[derive(Debug)]
pub struct TransportHandle {
    commands: mpsc::UnboundedSender<TransportCommand>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// The transport's end of a [`TransportHandle`].
#[derive(Debug)]
pub struct TransportLink {
    commands: mpsc::UnboundedReceiver<TransportCommand>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportHandle {
    /// Creates a connected handle/link pair.
    pub fn pair() -> (TransportHandle, TransportLink) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            TransportHandle {
                commands: command_tx,
                events: event_rx,
            },
            TransportLink {
                commands: command_rx,
                events: event_tx,
            },
        )
    }

    pub fn send(&self, data: Bytes) -> Result<(), TetrisError> {
        self.commands.send(TransportCommand::Send(data))?;
        Ok(())
    }

    pub fn ping(&self) -> Result<(), TetrisError> {
        self.commands.send(TransportCommand::Ping)?;
        Ok(())
    }

    /// Asks the transport to close. Harmless if it already has.
    pub fn close(&self) {
        let _ = self.commands.send(TransportCommand::Close);
    }

    /// Next event, or `None` once the transport task is gone.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

impl TransportLink {
    /// Emits an event. Returns `false` once the handle has been dropped.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Next command, or `None` once the handle has been dropped.
    pub async fn next_command(&mut self) -> Option<TransportCommand> {
        self.commands.recv().await
    }

    pub fn try_next_command(&mut self) -> Option<TransportCommand> {
        self.commands.try_recv().ok()
    }

    /// Returns `true` once nobody listens for events any more.
    pub fn is_detached(&self) -> bool {
        self.events.is_closed()
    }
}

/// Creates transports for a remote address.
///
/// Each platform provides one implementation, chosen when the connector is
/// built.
pub trait TransportFactory: Send + Sync + 'static {
    /// Starts connecting to `remote`. Progress is reported as events on the
    /// returned handle; a failed attempt is an `Error` (or
    /// `UnexpectedResponse`) followed by `Close`.
    fn open(&self, remote: &str) -> TransportHandle;

    /// Whether the transport answers [`TransportCommand::Ping`] with
    /// [`TransportEvent::Pong`].
    fn native_ping(&self) -> bool {
        false
    }
}

impl<F: TransportFactory + ?Sized> TransportFactory for Arc<F> {
    fn open(&self, remote: &str) -> TransportHandle {
        (**self).open(remote)
    }

    fn native_ping(&self) -> bool {
        (**self).native_ping()
    }
}
