//! In-process transport.
//!
//! [`MemoryFactory`] hands every opened transport to a [`MemoryListener`],
//! which plays the server side by hand. Nothing happens on its own: the
//! peer decides when the connection opens, what arrives, and when it closes.

use std::io;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::transport::{
    TransportCommand, TransportEvent, TransportFactory, TransportHandle, TransportLink,
};

/// Opens in-memory transports.
#[derive(Debug, Clone)]
pub struct MemoryFactory {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    native_ping: bool,
}

/// Receives the server side of every transport the factory opens.
#[derive(Debug)]
pub struct MemoryListener {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryFactory {
    pub fn new() -> (MemoryFactory, MemoryListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            MemoryFactory {
                peers: tx,
                native_ping: false,
            },
            MemoryListener { peers: rx },
        )
    }

    /// Makes transports answer to [`TransportCommand::Ping`].
    pub fn with_native_ping(mut self) -> Self {
        self.native_ping = true;
        self
    }
}

impl TransportFactory for MemoryFactory {
    fn open(&self, remote: &str) -> TransportHandle {
        let (handle, link) = TransportHandle::pair();
        // With no listener the link is dropped here and the handle sees its
        // event stream end.
        let _ = self.peers.send(MemoryPeer {
            remote: remote.to_owned(),
            link,
        });
        handle
    }

    fn native_ping(&self) -> bool {
        self.native_ping
    }
}

impl MemoryListener {
    /// Waits for the next opened transport.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.peers.try_recv().ok()
    }
}

/// Server side of one in-memory transport.
#[derive(Debug)]
pub struct MemoryPeer {
    remote: String,
    link: TransportLink,
}

impl MemoryPeer {
    /// Address the transport was opened for.
    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn open(&self) {
        self.link.emit(TransportEvent::Open);
    }

    pub fn deliver(&self, data: impl Into<Bytes>) {
        self.link.emit(TransportEvent::Data(data.into()));
    }

    pub fn pong(&self) {
        self.link.emit(TransportEvent::Pong);
    }

    /// Reports an I/O error followed by the closing event.
    pub fn fail(&self, error: io::Error) {
        self.link.emit(TransportEvent::Error(error));
        self.link.emit(TransportEvent::Close);
    }

    /// Refuses the connection with an HTTP status.
    pub fn reject(&self, status: u16) {
        self.link.emit(TransportEvent::UnexpectedResponse { status });
        self.link.emit(TransportEvent::Close);
    }

    /// Closes from the remote side.
    pub fn close(&self) {
        self.link.emit(TransportEvent::Close);
    }

    /// Next command from the connector, or `None` once its handle is gone.
    pub async fn next_command(&mut self) -> Option<TransportCommand> {
        self.link.next_command().await
    }

    pub fn try_next_command(&mut self) -> Option<TransportCommand> {
        self.link.try_next_command()
    }

    /// Waits for the next `Send`, skipping pings. `None` on close.
    pub async fn next_sent(&mut self) -> Option<Bytes> {
        loop {
            match self.link.next_command().await? {
                TransportCommand::Send(data) => return Some(data),
                TransportCommand::Ping => continue,
                TransportCommand::Close => return None,
            }
        }
    }

    /// Returns `true` once the connector dropped its handle.
    pub fn is_detached(&self) -> bool {
        self.link.is_detached()
    }
}
