//! TCP byte-stream transport.

use std::io;

use bytes::BytesMut;
use tetris_core::transport::TransportLink;
use tetris_core::{TransportCommand, TransportEvent, TransportFactory, TransportHandle};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

const READ_CHUNK: usize = 8 * 1024;

/// Dials `host:port` addresses. Data events are arbitrary chunks of the
/// stream; the connector's codec reassembles frames. There is no native
/// ping.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpFactory;

impl TransportFactory for TcpFactory {
    fn open(&self, remote: &str) -> TransportHandle {
        let (handle, link) = TransportHandle::pair();
        tokio::spawn(run(remote.to_owned(), link));
        handle
    }
}

async fn run(remote: String, mut link: TransportLink) {
    match TcpStream::connect(&remote).await {
        Ok(stream) => {
            debug!(%remote, "tcp connected");
            link.emit(TransportEvent::Open);
            if let Err(e) = pump(stream, &mut link).await {
                debug!(%remote, error = %e, "tcp transport failed");
                link.emit(TransportEvent::Error(e));
            }
        }
        Err(e) => {
            debug!(%remote, error = %e, "tcp connect failed");
            link.emit(TransportEvent::Error(e));
        }
    }
    link.emit(TransportEvent::Close);
}

async fn pump(stream: TcpStream, link: &mut TransportLink) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    loop {
        buf.reserve(READ_CHUNK);
        tokio::select! {
            read = reader.read_buf(&mut buf) => {
                if read? == 0 {
                    debug!("tcp remote closed");
                    return Ok(());
                }
                if !link.emit(TransportEvent::Data(buf.split().freeze())) {
                    return Ok(());
                }
            }
            command = link.next_command() => match command {
                Some(TransportCommand::Send(data)) => writer.write_all(&data).await?,
                Some(TransportCommand::Ping) => trace!("tcp has no native ping"),
                Some(TransportCommand::Close) | None => {
                    let _ = writer.shutdown().await;
                    return Ok(());
                }
            },
        }
    }
}
