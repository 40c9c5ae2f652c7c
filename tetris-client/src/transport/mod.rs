//! Socket transports.
//!
//! Each factory spawns one task per opened transport. The task owns the
//! socket and translates between it and the [`TransportLink`] the connector
//! talks to.
//!
//! [`TransportLink`]: tetris_core::transport::TransportLink

pub mod tcp;
pub mod ws;

use std::sync::Arc;

use tetris_core::TransportFactory;

pub use tcp::TcpFactory;
pub use ws::{MessageMode, WsFactory};

/// Picks the transport for `remote`: WebSockets for `ws://` and `wss://`
/// addresses, a TCP byte stream otherwise.
pub fn for_remote(remote: &str, mode: MessageMode) -> Arc<dyn TransportFactory> {
    if is_websocket(remote) {
        Arc::new(WsFactory::new(mode))
    } else {
        Arc::new(TcpFactory)
    }
}

pub fn is_websocket(remote: &str) -> bool {
    remote.starts_with("ws://") || remote.starts_with("wss://")
}
