use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TetrisError;
use crate::protocol::Protocol;

/// Everything a [`Connector`](crate::Connector) reports to its subscribers.
///
/// Nothing is published once the connector has been closed.
#[derive(Debug, Clone)]
pub enum ConnectorEvent<P> {
    /// The transport opened.
    Connect,
    /// The transport was lost and a reconnect is scheduled.
    Disconnect,
    /// A reconnect succeeded and the handshake, if any, was acknowledged.
    Reconnect,
    /// A packet that answered no pending call.
    Message(P),
    /// A packet with an unregistered tag or type id; the raw bytes.
    Unrecognized(Bytes),
    Error(Arc<TetrisError>),
    /// The transport closed on its own.
    Close,
    /// An encoded packet about to be handed to the transport.
    Sending(Bytes),
    /// One undecoded transport delivery.
    RawMessage(Bytes),
}

/// Fan-out of connector events to any number of subscribers.
///
/// Subscribers whose receiver was dropped are pruned on the next publish.
pub(crate) struct EventBus<P: Protocol> {
    inner: Mutex<Subscribers<P>>,
}

struct Subscribers<P: Protocol> {
    all: Vec<mpsc::UnboundedSender<ConnectorEvent<P>>>,
    by_kind: HashMap<P::Kind, Vec<mpsc::UnboundedSender<P>>>,
}

impl<P: Protocol> EventBus<P> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Subscribers {
                all: Vec::new(),
                by_kind: HashMap::new(),
            }),
        }
    }

    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectorEvent<P>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().all.push(tx);
        rx
    }

    pub(crate) fn subscribe_kind(&self, kind: P::Kind) -> mpsc::UnboundedReceiver<P> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().by_kind.entry(kind).or_default().push(tx);
        rx
    }

    /// Returns how many subscribers received the event.
    pub(crate) fn publish(&self, event: ConnectorEvent<P>) -> usize {
        let mut subscribers = self.lock();
        subscribers.all.retain(|tx| tx.send(event.clone()).is_ok());
        subscribers.all.len()
    }

    /// Delivers an unsolicited packet to the subscribers of its kind.
    pub(crate) fn publish_kind(&self, packet: &P) -> usize {
        let mut subscribers = self.lock();
        match subscribers.by_kind.get_mut(&packet.kind()) {
            Some(senders) => {
                senders.retain(|tx| tx.send(packet.clone()).is_ok());
                senders.len()
            }
            None => 0,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Subscribers<P>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
