//! The robot peer: streams video elsewhere and exchanges binary control
//! packets with the server.

use tetris_core::protocol::robot::{Handshake, ProgressUpdate, Report};
use tetris_core::{
    Connector, MessageCodec, RobotKind, RobotPacket, StreamCodec, TetrisError, TransportFactory,
};
use tokio::sync::mpsc;
use tracing::{info, trace, warn};

use crate::client::{self, Lifecycle, Listeners};
use crate::config::ClientConfig;
use crate::transport::{self, MessageMode};

/// What a [`Robot`] tells its listeners.
#[derive(Debug, Clone)]
pub enum RobotEvent {
    /// Aggregated frontend input relayed by the server.
    Report(Report),
    /// An error packet pushed by the server.
    Error(String),
    Lifecycle(Lifecycle),
}

/// A robot connection.
///
/// Over WebSockets each message carries one packet; over TCP packets are
/// length-prefixed frames.
#[derive(Debug, Clone)]
pub struct Robot {
    connector: Connector<RobotPacket>,
    listeners: Listeners<RobotEvent>,
    channel: u32,
    key: String,
}

impl Robot {
    /// Builds a robot for `config.robot_endpoint()`. Must be called from
    /// within a tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self, TetrisError> {
        let factory = transport::for_remote(&config.robot_endpoint(), MessageMode::Binary);
        Self::with_factory(config, factory)
    }

    /// Like [`new`](Self::new), over a caller-supplied transport.
    pub fn with_factory(
        config: ClientConfig,
        factory: impl TransportFactory,
    ) -> Result<Self, TetrisError> {
        config.validate()?;
        let remote = config.robot_endpoint();
        let handshake = (
            handshake_packet(config.channel, &config.key),
            RobotKind::HandshakeAck,
        );
        let connector = if config.is_websocket() {
            client::spawn_connector(&config, remote, MessageCodec::new(), factory, handshake)
        } else {
            client::spawn_connector(&config, remote, StreamCodec::new(), factory, handshake)
        };

        let listeners = Listeners::new();
        client::spawn_pump(
            &connector,
            &config,
            listeners.clone(),
            |packet| match packet {
                RobotPacket::Report(report) => Some(RobotEvent::Report(report)),
                RobotPacket::Error(error) => Some(RobotEvent::Error(error.message)),
                other => {
                    trace!(kind = %other.kind(), "robot ignores packet");
                    None
                }
            },
            RobotEvent::Lifecycle,
        );

        Ok(Self {
            connector,
            listeners,
            channel: config.channel,
            key: config.key,
        })
    }

    /// Connects and authenticates with the channel's stream key.
    ///
    /// A refused handshake closes the connection.
    pub async fn handshake(&self) -> Result<(), TetrisError> {
        self.connector.connect().await?;
        let reply = self
            .connector
            .call(
                handshake_packet(self.channel, &self.key),
                RobotKind::HandshakeAck,
            )
            .await;
        match reply {
            Ok(_) => {
                info!(channel = self.channel, "robot handshake accepted");
                Ok(())
            }
            Err(e) => {
                warn!(channel = self.channel, error = %e, "robot handshake refused");
                self.connector.close();
                Err(e)
            }
        }
    }

    /// Pushes control state to the frontends.
    pub fn send_progress(&self, update: ProgressUpdate) -> Result<(), TetrisError> {
        self.connector.send(RobotPacket::ProgressUpdate(update))
    }

    /// Receives robot events from now on.
    pub fn events(&self) -> mpsc::UnboundedReceiver<RobotEvent> {
        self.listeners.subscribe()
    }

    pub fn connector(&self) -> &Connector<RobotPacket> {
        &self.connector
    }

    pub fn close(&self) {
        self.connector.close();
    }
}

fn handshake_packet(channel: u32, key: &str) -> RobotPacket {
    RobotPacket::Handshake(Handshake {
        channel,
        stream_key: key.to_owned(),
    })
}
