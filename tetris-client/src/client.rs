//! Plumbing shared by [`Robot`](crate::Robot) and
//! [`Frontend`](crate::Frontend): listener fan-out, connection lifecycle
//! events, traffic logging and reporting of errors nobody handled.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tetris_core::{
    Connector, ConnectorEvent, Probe, Protocol, TetrisError, TransportFactory, WireCodec,
};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::config::ClientConfig;

/// Connection state changes, common to both clients.
#[derive(Debug, Clone)]
pub enum Lifecycle {
    Connect,
    /// The connection was lost; a reconnect is scheduled.
    Disconnect,
    /// The connection is back and the handshake was accepted again.
    Reconnect,
    /// The connection closed and will not come back on its own.
    Close,
    Error(Arc<TetrisError>),
}

/// Fan-out of client events to any number of listeners.
pub(crate) struct Listeners<E> {
    senders: Arc<Mutex<Vec<mpsc::UnboundedSender<E>>>>,
}

impl<E> Clone for Listeners<E> {
    fn clone(&self) -> Self {
        Self {
            senders: Arc::clone(&self.senders),
        }
    }
}

impl<E> std::fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("Listeners").field("count", &count).finish()
    }
}

impl<E: Clone> Listeners<E> {
    pub(crate) fn new() -> Self {
        Self {
            senders: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Returns how many listeners received the event.
    pub(crate) fn publish(&self, event: E) -> usize {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders.retain(|tx| tx.send(event.clone()).is_ok());
        senders.len()
    }
}

/// Spawns the connector behind a client.
///
/// Liveness is only watched when the transport can send a probe. A plain
/// TCP stream has no ping, and a quiet but healthy server must not be
/// dropped for its silence.
pub(crate) fn spawn_connector<C: WireCodec>(
    config: &ClientConfig,
    remote: String,
    codec: C,
    factory: impl TransportFactory,
    handshake: (C::Packet, <C::Packet as Protocol>::Kind),
) -> Connector<C::Packet> {
    let native_ping = factory.native_ping();
    let (packet, expect) = handshake;
    let mut builder = Connector::builder(remote, codec, factory).handshake(packet, expect);
    if native_ping {
        builder = builder.heartbeat(config.ping, Probe::Native);
    } else {
        debug!("transport has no ping, liveness monitoring disabled");
    }
    if let Some(policy) = config.reconnect_policy() {
        builder = builder.reconnect(policy);
    }
    builder.spawn()
}

/// Forwards connector events to `listeners` until the connector is gone.
///
/// Packets are handed to `on_packet`, which decides what the client
/// exposes. Lifecycle changes are wrapped with `lifecycle`.
pub(crate) fn spawn_pump<P, E>(
    connector: &Connector<P>,
    config: &ClientConfig,
    listeners: Listeners<E>,
    on_packet: impl Fn(P) -> Option<E> + Send + 'static,
    lifecycle: impl Fn(Lifecycle) -> E + Send + 'static,
) where
    P: Protocol,
    E: Clone + Send + 'static,
{
    let mut events = connector.subscribe();
    let traffic = config.debug;
    let settings = format!("{config:#?}");
    let remote = connector.remote().to_owned();

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let forwarded = match event {
                ConnectorEvent::Connect => Some(lifecycle(Lifecycle::Connect)),
                ConnectorEvent::Disconnect => Some(lifecycle(Lifecycle::Disconnect)),
                ConnectorEvent::Reconnect => Some(lifecycle(Lifecycle::Reconnect)),
                ConnectorEvent::Close => Some(lifecycle(Lifecycle::Close)),
                ConnectorEvent::Message(packet) => on_packet(packet),
                ConnectorEvent::Unrecognized(data) => {
                    debug!(%remote, frame = %render(&data), "ignoring unrecognized packet");
                    None
                }
                ConnectorEvent::Error(e) => {
                    if listeners.publish(lifecycle(Lifecycle::Error(Arc::clone(&e)))) == 0 {
                        error!(
                            %remote,
                            error = %e,
                            chain = %tetris_core::error::chain(e.as_ref()),
                            settings = %settings,
                            "uncaught error in tetris client"
                        );
                    }
                    None
                }
                ConnectorEvent::Sending(data) => {
                    if traffic {
                        debug!(%remote, ">>> {}", render(&data));
                    }
                    None
                }
                ConnectorEvent::RawMessage(data) => {
                    if traffic {
                        debug!(%remote, "<<< {}", render(&data));
                    }
                    None
                }
            };
            if let Some(event) = forwarded {
                listeners.publish(event);
            }
        }
    });
}

/// Frames are shown as text when they are UTF-8, as hex otherwise.
pub(crate) fn render(data: &Bytes) -> String {
    match std::str::from_utf8(data) {
        Ok(text) if !text.chars().any(char::is_control) => text.to_owned(),
        _ => {
            let mut out = String::with_capacity(data.len() * 3);
            for (i, byte) in data.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                let _ = write!(out, "{byte:02x}");
            }
            out
        }
    }
}
