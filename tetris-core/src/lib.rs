//! # tetris-core
//!
//! Client-side protocol engine for the tetris interactive streaming
//! protocol.
//!
//! This crate contains:
//! - **Protocol types**: frontend packets (4-character tags, JSON payloads)
//!   and robot packets (type ids, protobuf payloads)
//! - **Codecs**: `TextCodec`, `StreamCodec` (length-prefixed frames, usable
//!   with `tokio_util`) and `MessageCodec`
//! - **Network**: `Connector` with FIFO call correlation, event fan-out and
//!   reconnects
//! - **Heartbeat**: liveness probes and ping timeouts
//! - **Reporter**: debounced aggregation of frontend input
//! - **Transport**: the boundary to sockets, plus an in-memory transport
//! - **Error**: `TetrisError` and `CodingError`, `thiserror`-based

pub mod codec;
pub mod error;
pub mod heartbeat;
pub mod network;
pub mod protocol;
pub mod reporter;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{MAX_PAYLOAD_SIZE, MessageCodec, StreamCodec, TextCodec, WireCodec};
pub use error::{CodingError, TetrisError};
pub use heartbeat::{Heartbeat, HeartbeatAction, HeartbeatConfig, HeartbeatState, Probe};
pub use network::{Connector, ConnectorBuilder, ConnectorEvent, ReconnectPolicy, ReplyFuture};
pub use protocol::{FrontendKind, FrontendPacket, Protocol, RobotKind, RobotPacket};
pub use reporter::{ReportSink, Reporter};
pub use transport::{TransportCommand, TransportEvent, TransportFactory, TransportHandle};
