//! The frontend peer: a player (or the playbook editor) sending input
//! and receiving control state as tagged JSON text.

use std::time::Duration;

use serde_json::Value;
use tetris_core::protocol::frontend::{Handshake, Report};
use tetris_core::{
    Connector, FrontendKind, FrontendPacket, Reporter, TetrisError, TextCodec, TransportFactory,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::client::{self, Lifecycle, Listeners};
use crate::config::ClientConfig;
use crate::transport::{self, MessageMode};

/// What a [`Frontend`] tells its listeners.
#[derive(Debug, Clone)]
pub enum FrontendEvent {
    /// A packet that answered no call.
    Message(FrontendPacket),
    Lifecycle(Lifecycle),
}

/// A frontend connection to one channel, or to the playbook.
#[derive(Clone)]
pub struct Frontend {
    connector: Connector<FrontendPacket>,
    listeners: Listeners<FrontendEvent>,
    reporter: Reporter<Connector<FrontendPacket>>,
    user: u64,
    key: String,
}

impl std::fmt::Debug for Frontend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frontend")
            .field("remote", &self.connector.remote())
            .field("user", &self.user)
            .field("report_interval", &self.reporter.interval())
            .finish_non_exhaustive()
    }
}

impl Frontend {
    /// Builds a frontend for `config.frontend_endpoint()`. Must be called
    /// from within a tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self, TetrisError> {
        let factory = transport::for_remote(&config.frontend_endpoint(), MessageMode::Text);
        Self::with_factory(config, factory)
    }

    /// Like [`new`](Self::new), over a caller-supplied transport.
    pub fn with_factory(
        config: ClientConfig,
        factory: impl TransportFactory,
    ) -> Result<Self, TetrisError> {
        config.validate()?;
        let connector = client::spawn_connector(
            &config,
            config.frontend_endpoint(),
            TextCodec::new(),
            factory,
            (
                handshake_packet(config.user, &config.key),
                FrontendKind::HandshakeAck,
            ),
        );

        let listeners = Listeners::new();
        client::spawn_pump(
            &connector,
            &config,
            listeners.clone(),
            |packet| Some(FrontendEvent::Message(packet)),
            FrontendEvent::Lifecycle,
        );

        let reporter = Reporter::new(
            connector.clone(),
            Duration::from_millis(config.report_interval_ms),
        );

        Ok(Self {
            connector,
            listeners,
            reporter,
            user: config.user,
            key: config.key,
        })
    }

    /// Connects and authenticates. Resolves with the server's
    /// acknowledgement body.
    ///
    /// A refused handshake closes the connection.
    pub async fn handshake(&self) -> Result<Value, TetrisError> {
        self.connector.connect().await?;
        let reply = self
            .connector
            .call(
                handshake_packet(self.user, &self.key),
                FrontendKind::HandshakeAck,
            )
            .await;
        match reply {
            Ok(FrontendPacket::HandshakeAck(body)) => {
                info!(user = self.user, "frontend handshake accepted");
                Ok(body)
            }
            Ok(other) => Ok(other.to_value()?),
            Err(e) => {
                warn!(user = self.user, error = %e, "frontend handshake refused");
                self.connector.close();
                Err(e)
            }
        }
    }

    /// Queues input. The receiver completes once the report carrying it
    /// has been sent.
    pub fn report(&self, sample: Report) -> oneshot::Receiver<()> {
        self.reporter.add(sample)
    }

    /// Sends a packet built from its public name, e.g. `"Playbook"`.
    pub fn packet(&self, name: &str, data: Value) -> Result<(), TetrisError> {
        self.connector.send(FrontendPacket::from_name(name, data)?)
    }

    pub fn send(&self, packet: FrontendPacket) -> Result<(), TetrisError> {
        self.connector.send(packet)
    }

    /// Receives every frontend event from now on.
    pub fn events(&self) -> mpsc::UnboundedReceiver<FrontendEvent> {
        self.listeners.subscribe()
    }

    /// Receives unsolicited packets of one kind.
    pub fn on(&self, kind: FrontendKind) -> mpsc::UnboundedReceiver<FrontendPacket> {
        self.connector.subscribe_kind(kind)
    }

    pub fn connector(&self) -> &Connector<FrontendPacket> {
        &self.connector
    }

    pub fn close(&self) {
        self.connector.close();
    }
}

fn handshake_packet(user: u64, key: &str) -> FrontendPacket {
    FrontendPacket::Handshake(Handshake {
        id: user,
        key: key.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tetris_core::TransportCommand;
    use tetris_core::protocol::frontend::{self, TactileSample};
    use tetris_core::transport::memory::{MemoryFactory, MemoryListener, MemoryPeer};

    fn config() -> ClientConfig {
        ClientConfig {
            remote: "ws://127.0.0.1:3443".into(),
            channel: 1337,
            user: 13,
            key: "asdf".into(),
            reconnect: false,
            ..ClientConfig::default()
        }
    }

    fn parse(data: bytes::Bytes) -> FrontendPacket {
        frontend::decode_any(std::str::from_utf8(&data).unwrap()).unwrap()
    }

    async fn start(frontend: &Frontend, listener: &mut MemoryListener) -> (MemoryPeer, Value) {
        let shaking = tokio::spawn({
            let frontend = frontend.clone();
            async move { frontend.handshake().await }
        });
        let mut peer = listener.accept().await.unwrap();
        assert_eq!(peer.remote(), "ws://127.0.0.1:3443/play/1337");
        peer.open();

        assert_eq!(parse(peer.next_sent().await.unwrap()), handshake_packet(13, "asdf"));
        peer.deliver(r#"hack{"channel":1337}"#);
        let ack = shaking.await.unwrap().unwrap();
        (peer, ack)
    }

    #[tokio::test]
    async fn handshake_resolves_with_the_ack_body() {
        let (factory, mut listener) = MemoryFactory::new();
        let frontend = Frontend::with_factory(config(), factory).unwrap();
        let (_peer, ack) = start(&frontend, &mut listener).await;
        assert_eq!(ack, json!({"channel": 1337}));
    }

    #[tokio::test]
    async fn playbook_mode_uses_the_playbook_endpoint() {
        let (factory, mut listener) = MemoryFactory::new();
        let frontend = Frontend::with_factory(
            ClientConfig {
                playbook: true,
                ..config()
            },
            factory,
        )
        .unwrap();
        let _connecting = tokio::spawn({
            let frontend = frontend.clone();
            async move { frontend.handshake().await }
        });
        let peer = listener.accept().await.unwrap();
        assert_eq!(peer.remote(), "ws://127.0.0.1:3443/playbook");
    }

    #[tokio::test]
    async fn refused_handshake_fails() {
        let (factory, mut listener) = MemoryFactory::new();
        let frontend = Frontend::with_factory(config(), factory).unwrap();
        let shaking = tokio::spawn({
            let frontend = frontend.clone();
            async move { frontend.handshake().await }
        });
        let mut peer = listener.accept().await.unwrap();
        peer.open();
        peer.next_sent().await.unwrap();
        peer.deliver(r#"erro{"message":"invalid key"}"#);

        let err = shaking.await.unwrap().unwrap_err();
        assert!(matches!(err, TetrisError::Remote(ref m) if m == "invalid key"));
    }

    #[tokio::test(start_paused = true)]
    async fn reports_are_debounced() {
        let (factory, mut listener) = MemoryFactory::new();
        let frontend = Frontend::with_factory(config(), factory).unwrap();
        let (mut peer, _) = start(&frontend, &mut listener).await;

        let press = |down, up| Report {
            tactile: vec![TactileSample { id: 2, down, up }],
            ..Report::default()
        };
        let first = frontend.report(press(1, 0));
        let second = frontend.report(press(0, 1));
        first.await.unwrap();
        second.await.unwrap();

        match parse(peer.next_sent().await.unwrap()) {
            FrontendPacket::Report(report) => assert_eq!(report, press(1, 1)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_server_is_pinged_natively() {
        let (factory, mut listener) = MemoryFactory::new();
        let frontend = Frontend::with_factory(config(), factory.with_native_ping()).unwrap();
        let (mut peer, _) = start(&frontend, &mut listener).await;

        let before = tokio::time::Instant::now();
        assert_eq!(peer.next_command().await, Some(TransportCommand::Ping));
        assert!(before.elapsed() <= Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn without_native_ping_a_quiet_server_is_kept() {
        let (factory, mut listener) = MemoryFactory::new();
        let frontend = Frontend::with_factory(config(), factory).unwrap();
        let (mut peer, _) = start(&frontend, &mut listener).await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(peer.try_next_command(), None);
    }

    #[tokio::test]
    async fn packets_by_name_and_kind_subscriptions() {
        let (factory, mut listener) = MemoryFactory::new();
        let frontend = Frontend::with_factory(config(), factory).unwrap();
        let mut progress = frontend.on(FrontendKind::Progress);
        let mut events = frontend.events();
        let (mut peer, _) = start(&frontend, &mut listener).await;

        frontend
            .packet("Playbook", json!({"steps": []}))
            .unwrap();
        assert_eq!(
            parse(peer.next_sent().await.unwrap()),
            FrontendPacket::Playbook(json!({"steps": []}))
        );
        assert!(matches!(
            frontend.packet("Nonsense", json!({})),
            Err(TetrisError::Coding(_))
        ));

        peer.deliver(r#"prog{"tactile":[]}"#);
        assert_eq!(
            progress.recv().await.unwrap(),
            FrontendPacket::Progress(json!({"tactile": []}))
        );

        assert!(matches!(
            events.recv().await.unwrap(),
            FrontendEvent::Lifecycle(Lifecycle::Connect)
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            FrontendEvent::Message(FrontendPacket::Progress(_))
        ));
    }
}
