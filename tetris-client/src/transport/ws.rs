//! WebSocket transport.

use std::io;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tetris_core::transport::TransportLink;
use tetris_core::{TransportCommand, TransportEvent, TransportFactory, TransportHandle};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How outgoing payloads are framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageMode {
    /// Text frames; payloads must be UTF-8.
    Text,
    Binary,
}

/// Opens `ws://` and `wss://` connections. Each WebSocket message becomes
/// one data event. Pings are native WebSocket pings.
#[derive(Debug, Clone, Copy)]
pub struct WsFactory {
    mode: MessageMode,
}

impl WsFactory {
    pub fn new(mode: MessageMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> MessageMode {
        self.mode
    }
}

impl TransportFactory for WsFactory {
    fn open(&self, remote: &str) -> TransportHandle {
        let (handle, link) = TransportHandle::pair();
        tokio::spawn(run(remote.to_owned(), self.mode, link));
        handle
    }

    fn native_ping(&self) -> bool {
        true
    }
}

async fn run(remote: String, mode: MessageMode, mut link: TransportLink) {
    match tokio_tungstenite::connect_async(remote.as_str()).await {
        Ok((stream, _response)) => {
            debug!(%remote, "websocket connected");
            link.emit(TransportEvent::Open);
            if let Err(e) = pump(stream, mode, &mut link).await {
                debug!(%remote, error = %e, "websocket failed");
                link.emit(TransportEvent::Error(e));
            }
        }
        Err(tungstenite::Error::Http(response)) => {
            let status = response.status().as_u16();
            debug!(%remote, status, "websocket upgrade refused");
            link.emit(TransportEvent::UnexpectedResponse { status });
        }
        Err(e) => {
            debug!(%remote, error = %e, "websocket connect failed");
            link.emit(TransportEvent::Error(io::Error::other(e)));
        }
    }
    link.emit(TransportEvent::Close);
}

async fn pump(stream: WsStream, mode: MessageMode, link: &mut TransportLink) -> io::Result<()> {
    let (mut tx, mut rx) = stream.split();

    loop {
        tokio::select! {
            message = rx.next() => {
                let event = match message {
                    Some(Ok(Message::Text(text))) => {
                        TransportEvent::Data(Bytes::copy_from_slice(text.as_bytes()))
                    }
                    Some(Ok(Message::Binary(data))) => TransportEvent::Data(data),
                    Some(Ok(Message::Pong(_))) => TransportEvent::Pong,
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "websocket closed by remote");
                        return Ok(());
                    }
                    // Pings are answered by tungstenite.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(io::Error::other(e)),
                    None => return Ok(()),
                };
                if !link.emit(event) {
                    return Ok(());
                }
            }
            command = link.next_command() => match command {
                Some(TransportCommand::Send(data)) => {
                    tx.send(frame(mode, data)?).await.map_err(io::Error::other)?;
                }
                Some(TransportCommand::Ping) => {
                    trace!("websocket ping");
                    tx.send(Message::Ping(Bytes::new())).await.map_err(io::Error::other)?;
                }
                Some(TransportCommand::Close) | None => {
                    let _ = tx.send(Message::Close(None)).await;
                    return Ok(());
                }
            },
        }
    }
}

fn frame(mode: MessageMode, data: Bytes) -> io::Result<Message> {
    match mode {
        MessageMode::Text => {
            let text = String::from_utf8(data.to_vec())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            Ok(Message::Text(text.into()))
        }
        MessageMode::Binary => Ok(Message::Binary(data)),
    }
}
