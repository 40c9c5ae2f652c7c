//! Wire codecs.
//!
//! A [`WireCodec`] turns packets into transport payloads and transport
//! payloads back into packets. Three implementations are provided:
//!
//! - [`TextCodec`]: frontend packets, one text message per packet.
//! - [`StreamCodec`]: robot packets over a byte stream, length-prefixed
//!   frames reassembled across arbitrary chunk boundaries. Also usable with
//!   `tokio_util::codec::{FramedRead, FramedWrite}`.
//! - [`MessageCodec`]: robot packets over a message transport, one packet
//!   per message with no length prefix.

mod binary;
mod text;

pub use binary::{MAX_PAYLOAD_SIZE, MessageCodec, StreamCodec};
pub use text::TextCodec;

use bytes::Bytes;

use crate::error::CodingError;
use crate::protocol::Protocol;

/// Encoding and decoding as seen by a [`Connector`](crate::Connector).
pub trait WireCodec: Send + 'static {
    type Packet: Protocol;

    /// Encodes one packet into a transport payload.
    fn encode(&mut self, packet: &Self::Packet) -> Result<Bytes, CodingError>;

    /// Feeds one transport delivery and returns every outcome it completes,
    /// in wire order.
    ///
    /// Non-fatal errors are interleaved with packets; decoding continues
    /// after them. A fatal error ends the batch and discards whatever was
    /// buffered.
    fn feed(&mut self, data: Bytes) -> Vec<Result<Self::Packet, CodingError>>;

    /// Drops buffered state. Called whenever a new transport is attached.
    fn reset(&mut self) {}
}
