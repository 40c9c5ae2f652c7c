//! Domain-specific error types for the tetris protocol engine.
//!
//! Codec failures are reported as [`CodingError`]; everything that reaches
//! application code through a [`Connector`](crate::Connector) is a
//! [`TetrisError`]. No panics on invalid input: every error is typed and
//! recoverable.

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

// ── CodingError ──────────────────────────────────────────────────

/// Failure while encoding or decoding a packet.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodingError {
    /// The input cannot be used at all: truncated tag, malformed JSON,
    /// malformed protobuf body or an unreadable varint header.
    #[error("fatal coding error: {0}")]
    Fatal(String),

    /// A well-formed packet whose tag or type id is not registered.
    ///
    /// `data` holds the raw packet, including its identifier.
    #[error("unknown packet {id}")]
    UnknownPacket { id: String, data: Bytes },

    /// A complete binary frame whose payload failed to decode. The stream
    /// is not aborted; the frame has already been skipped.
    #[error("decode error: {0}")]
    Decode(String),

    /// The packet could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),
}

impl CodingError {
    /// Returns `true` when the input was unusable and nothing could be
    /// recovered from it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CodingError::Fatal(_))
    }

    /// Returns `true` for packets whose identifier is not registered.
    pub fn is_unknown_packet(&self) -> bool {
        matches!(self, CodingError::UnknownPacket { .. })
    }
}

impl From<std::io::Error> for CodingError {
    fn from(e: std::io::Error) -> Self {
        CodingError::Fatal(e.to_string())
    }
}

impl From<serde_json::Error> for CodingError {
    fn from(e: serde_json::Error) -> Self {
        CodingError::Fatal(e.to_string())
    }
}

// ── TetrisError ──────────────────────────────────────────────────

/// The canonical error type for the protocol engine.
#[derive(Debug, Error)]
pub enum TetrisError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// Encoding or decoding a packet failed.
    #[error(transparent)]
    Coding(#[from] CodingError),

    /// The server answered a call with its error packet.
    #[error("{0}")]
    Remote(String),

    /// The server refused the connection attempt with an HTTP status,
    /// e.g. `404` when the stream is offline.
    #[error("unexpected server response ({status})")]
    UnexpectedResponse { status: u16 },

    /// An internal invariant was violated. Always a programming defect.
    #[error("assertion failed: {0}")]
    Assertion(&'static str),

    // ── Connection Errors ────────────────────────────────────────
    /// The transport reported an I/O failure.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// No probe answer and no inbound traffic within the heartbeat window.
    #[error("ping timeout after {0:?}")]
    PingTimeout(Duration),

    /// The operation needs an open transport.
    #[error("not connected")]
    NotConnected,

    /// `connect` was called while a transport is still attached.
    #[error("already connected")]
    AlreadyConnected,

    /// The transport closed before the operation completed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The connection went away while a call was waiting for its reply.
    #[error("call abandoned before a reply arrived")]
    CallAbandoned,

    /// The connector task is gone.
    #[error("channel closed")]
    ChannelClosed,

    // ── Configuration Errors ─────────────────────────────────────
    /// Configuration could not be used.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TetrisError {
    /// Error returned for a `404` connect rejection.
    pub fn is_offline(&self) -> bool {
        matches!(self, TetrisError::UnexpectedResponse { status: 404 })
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for TetrisError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        TetrisError::ChannelClosed
    }
}

/// Returns [`TetrisError::Assertion`] when `condition` does not hold.
pub fn ensure(condition: bool, message: &'static str) -> Result<(), TetrisError> {
    if condition {
        Ok(())
    } else {
        Err(TetrisError::Assertion(message))
    }
}

/// Renders an error followed by each of its sources, outermost first.
pub fn chain(error: &dyn std::error::Error) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
