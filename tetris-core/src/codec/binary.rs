use bytes::{Buf, Bytes, BytesMut};
use prost::encoding::{decode_varint, encode_varint, encoded_len_varint};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::WireCodec;
use crate::error::CodingError;
use crate::protocol::robot::{RobotKind, RobotPacket};

/// Largest payload buffered for decoding (16 MiB). Bigger frames are
/// discarded as they stream past.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// A LEB128 varint never spans more than 10 bytes.
const MAX_VARINT_LEN: usize = 10;

// ── StreamCodec ──────────────────────────────────────────────────

/// Robot packets over a byte stream.
///
/// ```text
/// ┌────────────────────┬──────────────┬─────────────────────┐
/// │ varint(payload len)│ varint(type) │ protobuf payload    │
/// └────────────────────┴──────────────┴─────────────────────┘
/// ```
///
/// Frames may arrive split at any byte boundary. Bytes that do not yet make
/// a whole frame stay buffered until the next delivery.
#[derive(Debug, Default)]
pub struct StreamCodec {
    buffer: BytesMut,
    /// Payload bytes of an oversized frame still to be discarded.
    skip_remaining: u64,
}

impl StreamCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Extracts one frame from the front of `src`.
    ///
    /// Fatal errors clear `src`; every other outcome consumes exactly the
    /// frame it reports on, even when the frame is too large to buffer.
    fn decode_frame(&mut self, src: &mut BytesMut) -> Result<Option<RobotPacket>, CodingError> {
        if !self.skip(src) {
            return Ok(None);
        }

        let header = match peek_varint(src, 0) {
            Ok(Some((length, len_size))) => peek_varint(src, len_size)
                .map(|id| id.map(|(id, id_size)| (length, id, len_size + id_size))),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };

        let (length, id, header_len) = match header {
            Ok(Some(header)) => header,
            Ok(None) => return Ok(None),
            Err(e) => {
                src.clear();
                return Err(e);
            }
        };

        if length > MAX_PAYLOAD_SIZE as u64 {
            src.advance(header_len);
            self.skip_remaining = length;
            self.skip(src);
            return Err(CodingError::Decode(format!(
                "frame of type {id} declares {length} payload bytes, \
                 limit is {MAX_PAYLOAD_SIZE}; skipped"
            )));
        }

        let total = header_len + length as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let frame = src.split_to(total).freeze();
        let payload = frame.slice(header_len..);

        match RobotKind::try_from(id) {
            Ok(kind) => RobotPacket::decode_payload(kind, &payload)
                .map(Some)
                .map_err(|e| CodingError::Decode(format!("malformed {kind} payload: {e}"))),
            Err(id) => Err(CodingError::UnknownPacket {
                id: id.to_string(),
                data: frame,
            }),
        }
    }

    /// Discards skipped payload bytes from `src`. Returns `true` once the
    /// skipped frame has been consumed completely.
    fn skip(&mut self, src: &mut BytesMut) -> bool {
        if self.skip_remaining > 0 {
            let pending = usize::try_from(self.skip_remaining).unwrap_or(usize::MAX);
            let available = src.len().min(pending);
            src.advance(available);
            self.skip_remaining -= available as u64;
        }
        self.skip_remaining == 0
    }
}

/// Reads a varint starting at `offset` without consuming it.
///
/// Returns `Ok(None)` while the terminating byte has not arrived yet.
fn peek_varint(buf: &[u8], offset: usize) -> Result<Option<(u64, usize)>, CodingError> {
    let window = buf.get(offset..).unwrap_or_default();
    let window = &window[..window.len().min(MAX_VARINT_LEN)];

    match window.iter().position(|b| b & 0x80 == 0) {
        Some(end) => {
            let mut cursor = &window[..=end];
            let value = decode_varint(&mut cursor)
                .map_err(|e| CodingError::Fatal(format!("invalid varint header: {e}")))?;
            Ok(Some((value, end + 1)))
        }
        None if window.len() < MAX_VARINT_LEN => Ok(None),
        None => Err(CodingError::Fatal(format!(
            "varint header longer than {MAX_VARINT_LEN} bytes"
        ))),
    }
}

/// Writes `varint(len) || varint(id) || payload` into `dst`.
fn encode_frame(packet: &RobotPacket, dst: &mut BytesMut) -> Result<(), CodingError> {
    let length = packet.payload_len();
    let id = packet.kind().id();
    dst.reserve(encoded_len_varint(length as u64) + encoded_len_varint(id) + length);
    encode_varint(length as u64, dst);
    encode_varint(id, dst);
    packet.encode_payload(dst)
}

impl Decoder for StreamCodec {
    type Item = RobotPacket;
    type Error = CodingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RobotPacket>, CodingError> {
        self.decode_frame(src)
    }
}

impl Encoder<RobotPacket> for StreamCodec {
    type Error = CodingError;

    fn encode(&mut self, item: RobotPacket, dst: &mut BytesMut) -> Result<(), CodingError> {
        encode_frame(&item, dst)
    }
}

impl WireCodec for StreamCodec {
    type Packet = RobotPacket;

    fn encode(&mut self, packet: &RobotPacket) -> Result<Bytes, CodingError> {
        let mut dst = BytesMut::new();
        encode_frame(packet, &mut dst)?;
        Ok(dst.freeze())
    }

    fn feed(&mut self, data: Bytes) -> Vec<Result<RobotPacket, CodingError>> {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.extend_from_slice(&data);

        let mut out = Vec::new();
        loop {
            match self.decode_frame(&mut buffer) {
                Ok(Some(packet)) => out.push(Ok(packet)),
                Ok(None) => break,
                Err(e) if e.is_fatal() => {
                    out.push(Err(e));
                    break;
                }
                Err(e) => out.push(Err(e)),
            }
        }
        self.buffer = buffer;
        out
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.skip_remaining = 0;
    }
}

// ── MessageCodec ─────────────────────────────────────────────────

/// Robot packets over a message transport: `varint(type) || payload`,
/// one packet per message.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCodec;

impl MessageCodec {
    pub fn new() -> Self {
        MessageCodec
    }
}

impl WireCodec for MessageCodec {
    type Packet = RobotPacket;

    fn encode(&mut self, packet: &RobotPacket) -> Result<Bytes, CodingError> {
        packet.encode_message()
    }

    fn feed(&mut self, data: Bytes) -> Vec<Result<RobotPacket, CodingError>> {
        vec![RobotPacket::decode_message(&data)]
    }
}
