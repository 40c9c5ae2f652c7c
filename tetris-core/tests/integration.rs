//! Integration tests: connector lifecycle, call correlation, reconnects and
//! liveness over the in-memory transport, plus byte-stream framing through
//! `tokio_util`.

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tetris_core::protocol::frontend::{self, ErrorPacket, Handshake};
use tetris_core::transport::memory::{MemoryFactory, MemoryListener, MemoryPeer};
use tetris_core::{
    CodingError, Connector, ConnectorEvent, FrontendKind, FrontendPacket, HeartbeatConfig, Probe,
    ReconnectPolicy, RobotPacket, StreamCodec, TetrisError, TextCodec, TransportCommand,
    WireCodec,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::codec::{FramedRead, FramedWrite};

// ── Helpers ──────────────────────────────────────────────────────

const REMOTE: &str = "mem://tetris/play/1";

fn handshake() -> FrontendPacket {
    FrontendPacket::Handshake(Handshake {
        id: 13,
        key: "asdf".into(),
    })
}

fn wire(packet: &FrontendPacket) -> Bytes {
    Bytes::from(packet.encode().unwrap())
}

fn parse(data: Bytes) -> FrontendPacket {
    frontend::decode_any(std::str::from_utf8(&data).unwrap()).unwrap()
}

/// Connects `connector` and returns the server side of its transport.
async fn accept_connected(
    connector: &Connector<FrontendPacket>,
    listener: &mut MemoryListener,
) -> MemoryPeer {
    let connecting = tokio::spawn({
        let connector = connector.clone();
        async move { connector.connect().await }
    });
    let peer = listener.accept().await.expect("transport opened");
    assert_eq!(peer.remote(), REMOTE);
    peer.open();
    connecting.await.unwrap().expect("connect resolves");
    peer
}

async fn next_event<P>(events: &mut UnboundedReceiver<ConnectorEvent<P>>) -> ConnectorEvent<P> {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timeout waiting for event")
        .expect("event channel closed")
}

/// Text codec that refuses to encode anything.
struct RefusingCodec;

impl WireCodec for RefusingCodec {
    type Packet = FrontendPacket;

    fn encode(&mut self, packet: &FrontendPacket) -> Result<Bytes, CodingError> {
        Err(CodingError::Encode(format!("cannot encode {}", packet.kind())))
    }

    fn feed(&mut self, data: Bytes) -> Vec<Result<FrontendPacket, CodingError>> {
        TextCodec::new().feed(data)
    }
}

/// Next event that is not traffic observability.
async fn next_signal<P>(events: &mut UnboundedReceiver<ConnectorEvent<P>>) -> ConnectorEvent<P> {
    loop {
        match next_event(events).await {
            ConnectorEvent::Sending(_) | ConnectorEvent::RawMessage(_) => continue,
            event => return event,
        }
    }
}

// ── Connection lifecycle ─────────────────────────────────────────

#[tokio::test]
async fn test_connect_emits_event() {
    let (factory, mut listener) = MemoryFactory::new();
    let connector = Connector::builder(REMOTE, TextCodec::new(), factory).spawn();
    let mut events = connector.subscribe();

    let _peer = accept_connected(&connector, &mut listener).await;
    assert!(matches!(next_event(&mut events).await, ConnectorEvent::Connect));
}

#[tokio::test]
async fn test_connect_rejected_as_offline() {
    let (factory, mut listener) = MemoryFactory::new();
    let connector = Connector::builder(REMOTE, TextCodec::new(), factory).spawn();
    let mut events = connector.subscribe();

    let connecting = tokio::spawn({
        let connector = connector.clone();
        async move { connector.connect().await }
    });
    let peer = listener.accept().await.unwrap();
    peer.reject(404);

    let err = connecting.await.unwrap().unwrap_err();
    assert!(err.is_offline(), "unexpected error: {err}");

    // The refusal went to the caller, not to subscribers.
    tokio::task::yield_now().await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_call_before_connect_fails() {
    let (factory, _listener) = MemoryFactory::new();
    let connector = Connector::builder(REMOTE, TextCodec::new(), factory).spawn();

    let err = connector
        .call(handshake(), FrontendKind::HandshakeAck)
        .await
        .unwrap_err();
    assert!(matches!(err, TetrisError::NotConnected));
}

#[tokio::test]
async fn test_send_before_connect_is_dropped() {
    let (factory, mut listener) = MemoryFactory::new();
    let connector = Connector::builder(REMOTE, TextCodec::new(), factory).spawn();
    let mut events = connector.subscribe();

    connector.send(handshake()).unwrap();
    // Commands are applied in order: once the call fails, the send is done.
    let err = connector
        .call(handshake(), FrontendKind::HandshakeAck)
        .await
        .unwrap_err();
    assert!(matches!(err, TetrisError::NotConnected));

    assert!(events.try_recv().is_err());
    assert!(listener.try_accept().is_none());
}

#[tokio::test]
async fn test_encode_failure_aborts_send() {
    let (factory, mut listener) = MemoryFactory::new();
    let connector = Connector::builder(REMOTE, RefusingCodec, factory).spawn();
    let mut events = connector.subscribe();
    let mut peer = accept_connected(&connector, &mut listener).await;
    assert!(matches!(next_event(&mut events).await, ConnectorEvent::Connect));

    connector.send(handshake()).unwrap();
    match next_event(&mut events).await {
        ConnectorEvent::Error(e) => {
            assert!(matches!(e.as_ref(), TetrisError::Coding(CodingError::Encode(_))))
        }
        other => panic!("expected an error event, got {other:?}"),
    }

    let err = connector
        .call(handshake(), FrontendKind::HandshakeAck)
        .await
        .unwrap_err();
    assert!(matches!(err, TetrisError::Coding(CodingError::Encode(_))));

    // No `Sending` event and nothing handed to the transport.
    assert!(events.try_recv().is_err());
    assert_eq!(peer.try_next_command(), None);
}

#[tokio::test]
async fn test_send_reaches_transport() {
    let (factory, mut listener) = MemoryFactory::new();
    let connector = Connector::builder(REMOTE, TextCodec::new(), factory).spawn();
    let mut events = connector.subscribe();
    let mut peer = accept_connected(&connector, &mut listener).await;

    let report = FrontendPacket::Progress(json!({"tactile": [{"id": 1}]}));
    connector.send(report.clone()).unwrap();

    let sent = peer.next_sent().await.unwrap();
    assert_eq!(parse(sent.clone()), report);

    assert!(matches!(next_event(&mut events).await, ConnectorEvent::Connect));
    match next_event(&mut events).await {
        ConnectorEvent::Sending(data) => assert_eq!(data, sent),
        other => panic!("expected sending event, got {other:?}"),
    }
}

// ── Call correlation ─────────────────────────────────────────────

#[tokio::test]
async fn test_fifo_correlation() {
    let (factory, mut listener) = MemoryFactory::new();
    let connector = Connector::builder(REMOTE, TextCodec::new(), factory).spawn();
    let mut events = connector.subscribe();
    let mut progress = connector.subscribe_kind(FrontendKind::Progress);
    let mut peer = accept_connected(&connector, &mut listener).await;

    let first = connector.call(handshake(), FrontendKind::HandshakeAck);
    let second = connector.call(
        FrontendPacket::Playbook(json!({"scene": "intro"})),
        FrontendKind::PlaybookAck,
    );

    assert_eq!(parse(peer.next_sent().await.unwrap()), handshake());
    assert_eq!(
        parse(peer.next_sent().await.unwrap()).kind(),
        FrontendKind::Playbook
    );

    // Unrelated traffic in between does not consume a pending call.
    let pushed = FrontendPacket::Progress(json!({"joystick": []}));
    peer.deliver(wire(&pushed));
    peer.deliver(wire(&FrontendPacket::HandshakeAck(json!({}))));
    peer.deliver(wire(&FrontendPacket::PlaybookAck(json!({"ok": true}))));

    assert_eq!(
        first.await.unwrap(),
        FrontendPacket::HandshakeAck(json!({}))
    );
    assert_eq!(
        second.await.unwrap(),
        FrontendPacket::PlaybookAck(json!({"ok": true}))
    );

    assert!(matches!(next_signal(&mut events).await, ConnectorEvent::Connect));
    match next_signal(&mut events).await {
        ConnectorEvent::Message(packet) => assert_eq!(packet, pushed),
        other => panic!("expected message, got {other:?}"),
    }
    assert_eq!(progress.recv().await.unwrap(), pushed);
}

#[tokio::test]
async fn test_error_packet_fails_oldest_call() {
    let (factory, mut listener) = MemoryFactory::new();
    let connector = Connector::builder(REMOTE, TextCodec::new(), factory).spawn();
    let peer = accept_connected(&connector, &mut listener).await;

    let first = connector.call(handshake(), FrontendKind::HandshakeAck);
    let second = connector.call(FrontendPacket::Playbook(json!({})), FrontendKind::PlaybookAck);

    peer.deliver(wire(&FrontendPacket::Error(ErrorPacket {
        message: "bad key".into(),
    })));
    peer.deliver(wire(&FrontendPacket::PlaybookAck(json!({}))));

    match first.await.unwrap_err() {
        TetrisError::Remote(message) => assert_eq!(message, "bad key"),
        other => panic!("expected remote error, got {other:?}"),
    }
    assert_eq!(second.await.unwrap().kind(), FrontendKind::PlaybookAck);
}

#[tokio::test]
async fn test_unknown_and_malformed_traffic() {
    let (factory, mut listener) = MemoryFactory::new();
    let connector = Connector::builder(REMOTE, TextCodec::new(), factory).spawn();
    let mut events = connector.subscribe();
    let peer = accept_connected(&connector, &mut listener).await;
    assert!(matches!(next_signal(&mut events).await, ConnectorEvent::Connect));

    peer.deliver(Bytes::from_static(br#"wtff{"x":1}"#));
    peer.deliver(Bytes::from_static(b"er"));
    peer.deliver(wire(&FrontendPacket::PlaybookState(json!({"ready": true}))));

    match next_signal(&mut events).await {
        ConnectorEvent::Unrecognized(data) => assert_eq!(&data[..], br#"wtff{"x":1}"#),
        other => panic!("expected unrecognized, got {other:?}"),
    }
    match next_signal(&mut events).await {
        ConnectorEvent::Error(err) => {
            assert!(matches!(*err, TetrisError::Coding(CodingError::Fatal(_))))
        }
        other => panic!("expected error, got {other:?}"),
    }
    // Processing continues after both.
    assert!(matches!(
        next_signal(&mut events).await,
        ConnectorEvent::Message(FrontendPacket::PlaybookState(_))
    ));
}

// ── Close and reconnect ──────────────────────────────────────────

#[tokio::test]
async fn test_close_abandons_calls_and_silences_events() {
    let (factory, mut listener) = MemoryFactory::new();
    let connector = Connector::builder(REMOTE, TextCodec::new(), factory).spawn();
    let mut events = connector.subscribe();
    let mut peer = accept_connected(&connector, &mut listener).await;
    assert!(matches!(next_signal(&mut events).await, ConnectorEvent::Connect));

    let pending = connector.call(handshake(), FrontendKind::HandshakeAck);
    connector.close();

    assert!(matches!(
        pending.await.unwrap_err(),
        TetrisError::CallAbandoned
    ));

    // The transport was told to close; whatever it does next is ignored.
    loop {
        match peer.next_command().await {
            Some(TransportCommand::Close) | None => break,
            Some(_) => continue,
        }
    }
    peer.deliver(wire(&FrontendPacket::HandshakeAck(json!({}))));
    peer.close();

    tokio::task::yield_now().await;
    while let Ok(event) = events.try_recv() {
        assert!(
            matches!(event, ConnectorEvent::Sending(_)),
            "event after close: {event:?}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_replays_handshake() {
    let (factory, mut listener) = MemoryFactory::new();
    let connector = Connector::builder(REMOTE, TextCodec::new(), factory)
        .reconnect(ReconnectPolicy::default())
        .handshake(handshake(), FrontendKind::HandshakeAck)
        .spawn();
    let mut events = connector.subscribe();
    let peer = accept_connected(&connector, &mut listener).await;
    assert!(matches!(next_signal(&mut events).await, ConnectorEvent::Connect));

    let started = tokio::time::Instant::now();
    peer.close();
    assert!(matches!(next_signal(&mut events).await, ConnectorEvent::Close));
    assert!(matches!(
        next_signal(&mut events).await,
        ConnectorEvent::Disconnect
    ));

    let mut peer = listener.accept().await.expect("reconnect attempt");
    assert!(started.elapsed() >= Duration::from_millis(1000));
    peer.open();
    assert!(matches!(next_signal(&mut events).await, ConnectorEvent::Connect));

    assert_eq!(parse(peer.next_sent().await.unwrap()), handshake());
    peer.deliver(wire(&FrontendPacket::HandshakeAck(json!({}))));
    assert!(matches!(
        next_signal(&mut events).await,
        ConnectorEvent::Reconnect
    ));

    // Normal calls work again on the new transport.
    let reply = connector.call(FrontendPacket::Playbook(json!({})), FrontendKind::PlaybookAck);
    peer.next_sent().await.unwrap();
    peer.deliver(wire(&FrontendPacket::PlaybookAck(json!({}))));
    assert_eq!(reply.await.unwrap().kind(), FrontendKind::PlaybookAck);
}

#[tokio::test(start_paused = true)]
async fn test_failed_reconnect_backs_off() {
    let (factory, mut listener) = MemoryFactory::new();
    let connector = Connector::builder(REMOTE, TextCodec::new(), factory)
        .reconnect(ReconnectPolicy::default())
        .spawn();
    let mut events = connector.subscribe();
    let peer = accept_connected(&connector, &mut listener).await;
    assert!(matches!(next_signal(&mut events).await, ConnectorEvent::Connect));

    peer.close();
    let lost = tokio::time::Instant::now();

    let peer = listener.accept().await.unwrap();
    assert_eq!(lost.elapsed(), Duration::from_millis(1000));
    peer.fail(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        "refused",
    ));

    let peer = listener.accept().await.unwrap();
    assert_eq!(lost.elapsed(), Duration::from_millis(3000));
    peer.open();

    let mut saw_reconnect = false;
    while !saw_reconnect {
        saw_reconnect = matches!(next_signal(&mut events).await, ConnectorEvent::Reconnect);
    }
}

// ── Heartbeat ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_heartbeat_timeout_closes_transport() {
    let (factory, mut listener) = MemoryFactory::new();
    let factory = factory.with_native_ping();
    let connector = Connector::builder(REMOTE, TextCodec::new(), factory)
        .heartbeat(
            HeartbeatConfig::new(Duration::from_millis(100), Duration::from_millis(20)),
            Probe::Native,
        )
        .spawn();
    let mut events = connector.subscribe();
    let mut peer = accept_connected(&connector, &mut listener).await;
    let opened = tokio::time::Instant::now();

    assert_eq!(peer.next_command().await, Some(TransportCommand::Ping));
    assert_eq!(opened.elapsed(), Duration::from_millis(100));

    assert_eq!(peer.next_command().await, Some(TransportCommand::Close));
    assert_eq!(opened.elapsed(), Duration::from_millis(120));

    assert!(matches!(next_signal(&mut events).await, ConnectorEvent::Connect));
    match next_signal(&mut events).await {
        ConnectorEvent::Error(err) => assert!(matches!(*err, TetrisError::PingTimeout(_))),
        other => panic!("expected ping timeout, got {other:?}"),
    }
    assert!(matches!(next_signal(&mut events).await, ConnectorEvent::Close));
}

#[tokio::test(start_paused = true)]
async fn test_pong_keeps_connection_alive() {
    let (factory, mut listener) = MemoryFactory::new();
    let connector = Connector::builder(REMOTE, TextCodec::new(), factory.with_native_ping())
        .heartbeat(
            HeartbeatConfig::new(Duration::from_millis(100), Duration::from_millis(20)),
            Probe::Native,
        )
        .spawn();
    let mut peer = accept_connected(&connector, &mut listener).await;
    let opened = tokio::time::Instant::now();

    for round in 1..=3u32 {
        assert_eq!(peer.next_command().await, Some(TransportCommand::Ping));
        assert_eq!(opened.elapsed(), Duration::from_millis(100) * round);
        peer.pong();
    }
}

// ── Byte-stream framing ──────────────────────────────────────────

fn numbered_errors(n: usize) -> Vec<RobotPacket> {
    (0..n).map(|i| RobotPacket::error(format!("asdf{i}"))).collect()
}

fn framed(packets: &[RobotPacket]) -> Vec<u8> {
    let mut codec = StreamCodec::new();
    packets
        .iter()
        .flat_map(|p| tetris_core::WireCodec::encode(&mut codec, p).unwrap().to_vec())
        .collect()
}

#[tokio::test]
async fn test_framed_read_over_chunked_stream() {
    let expected = numbered_errors(50);
    let stream = framed(&expected);

    let mut mock = tokio_test::io::Builder::new();
    for chunk in stream.chunks(3) {
        mock.read(chunk);
    }
    let reader = FramedRead::new(mock.build(), StreamCodec::new());

    let decoded: Vec<RobotPacket> = reader.map(|r| r.unwrap()).collect().await;
    assert_eq!(decoded, expected);
}

#[tokio::test]
async fn test_framed_write_then_close() {
    let packets = numbered_errors(2);
    let first = framed(&packets[..1]);
    let second = framed(&packets[1..]);

    let mock = tokio_test::io::Builder::new()
        .write(&first)
        .write(&second)
        .build();
    let mut writer = FramedWrite::new(mock, StreamCodec::new());

    for packet in packets {
        writer.feed(packet).await.unwrap();
    }
    // Flushes the pending frames and ends the output.
    writer.close().await.unwrap();
}

#[tokio::test]
async fn test_connector_reassembles_split_frames() {
    let (factory, mut listener) = MemoryFactory::new();
    let connector = Connector::builder("mem://tetris/robot", StreamCodec::new(), factory).spawn();
    let mut events = connector.subscribe();

    let connecting = tokio::spawn({
        let connector = connector.clone();
        async move { connector.connect().await }
    });
    let peer = listener.accept().await.unwrap();
    peer.open();
    connecting.await.unwrap().unwrap();

    let expected = numbered_errors(10);
    for byte in framed(&expected) {
        peer.deliver(vec![byte]);
    }

    let mut decoded = Vec::new();
    while decoded.len() < expected.len() {
        if let ConnectorEvent::Message(packet) = next_signal(&mut events).await {
            decoded.push(packet);
        }
    }
    assert_eq!(decoded, expected);
}
