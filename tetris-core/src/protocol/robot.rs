//! Robot packets: protobuf payloads identified by a small type id.
//!
//! # Wire Format
//!
//! Over a byte stream every packet is framed as
//!
//! ```text
//! varint(payload length) || varint(type id) || protobuf payload
//! ```
//!
//! (see [`StreamCodec`](crate::codec::StreamCodec)). Over a message
//! transport the length is implied by the message boundary and only
//! `varint(type id) || payload` is sent ([`RobotPacket::encode_message`]).
//!
//! | id | packet         |
//! |----|----------------|
//! | 0  | Handshake      |
//! | 1  | HandshakeACK   |
//! | 2  | Report         |
//! | 3  | Error          |
//! | 4  | ProgressUpdate |

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use prost::Message;
use prost::encoding::{decode_varint, encode_varint, encoded_len_varint};

use crate::error::CodingError;
use crate::protocol::Protocol;

// ── RobotKind ────────────────────────────────────────────────────

/// Registered binary packet kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RobotKind {
    Handshake = 0,
    HandshakeAck = 1,
    Report = 2,
    Error = 3,
    ProgressUpdate = 4,
}

impl RobotKind {
    pub const ALL: [RobotKind; 5] = [
        RobotKind::Handshake,
        RobotKind::HandshakeAck,
        RobotKind::Report,
        RobotKind::Error,
        RobotKind::ProgressUpdate,
    ];

    /// Type id on the wire.
    pub fn id(self) -> u64 {
        self as u64
    }

    pub fn name(self) -> &'static str {
        match self {
            RobotKind::Handshake => "Handshake",
            RobotKind::HandshakeAck => "HandshakeACK",
            RobotKind::Report => "Report",
            RobotKind::Error => "Error",
            RobotKind::ProgressUpdate => "ProgressUpdate",
        }
    }
}

impl TryFrom<u64> for RobotKind {
    type Error = u64;

    fn try_from(id: u64) -> Result<Self, u64> {
        RobotKind::ALL
            .into_iter()
            .find(|kind| kind.id() == id)
            .ok_or(id)
    }
}

impl fmt::Display for RobotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Payloads ─────────────────────────────────────────────────────

/// Opens a robot session on a channel.
#[derive(Clone, PartialEq, Message)]
pub struct Handshake {
    #[prost(uint32, tag = "1")]
    pub channel: u32,
    #[prost(string, tag = "2")]
    pub stream_key: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct HandshakeAck {}

#[derive(Clone, PartialEq, Message)]
pub struct ErrorPacket {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, Copy, PartialEq, Message)]
pub struct Coordinate {
    #[prost(double, tag = "1")]
    pub x: f64,
    #[prost(double, tag = "2")]
    pub y: f64,
}

#[derive(Clone, Copy, PartialEq, Message)]
pub struct Users {
    #[prost(uint32, tag = "1")]
    pub connected: u32,
    #[prost(uint32, tag = "2")]
    pub quorum: u32,
    #[prost(uint32, tag = "3")]
    pub active: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct JoystickInfo {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(message, optional, tag = "2")]
    pub coord_mean: Option<Coordinate>,
    #[prost(message, optional, tag = "3")]
    pub coord_std_dev: Option<Coordinate>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TactileInfo {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(double, tag = "2")]
    pub press_frequency: f64,
    #[prost(double, tag = "3")]
    pub release_frequency: f64,
    #[prost(uint32, tag = "4")]
    pub connected: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ScreenInfo {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(message, optional, tag = "2")]
    pub coord_mean: Option<Coordinate>,
    #[prost(uint32, tag = "3")]
    pub clicks: u32,
}

/// Aggregated audience input, pushed by the server to the robot.
#[derive(Clone, PartialEq, Message)]
pub struct Report {
    /// Server time in milliseconds.
    #[prost(uint64, tag = "1")]
    pub time: u64,
    #[prost(message, optional, tag = "2")]
    pub users: Option<Users>,
    #[prost(message, repeated, tag = "3")]
    pub joystick: Vec<JoystickInfo>,
    #[prost(message, repeated, tag = "4")]
    pub tactile: Vec<TactileInfo>,
    #[prost(message, repeated, tag = "5")]
    pub screen: Vec<ScreenInfo>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TactileUpdate {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    /// Cooldown in milliseconds.
    #[prost(uint32, tag = "2")]
    pub cooldown: u32,
    #[prost(bool, tag = "3")]
    pub fired: bool,
    /// Completion between 0 and 1.
    #[prost(double, tag = "4")]
    pub progress: f64,
    #[prost(bool, tag = "5")]
    pub disabled: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct JoystickUpdate {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    /// Radians.
    #[prost(double, tag = "2")]
    pub angle: f64,
    #[prost(double, tag = "3")]
    pub intensity: f64,
    #[prost(bool, tag = "4")]
    pub disabled: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct ScreenUpdate {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(bool, tag = "2")]
    pub disabled: bool,
}

/// Control state pushed by the robot, relayed to frontends.
#[derive(Clone, PartialEq, Message)]
pub struct ProgressUpdate {
    #[prost(message, repeated, tag = "1")]
    pub tactile: Vec<TactileUpdate>,
    #[prost(message, repeated, tag = "2")]
    pub joystick: Vec<JoystickUpdate>,
    #[prost(message, repeated, tag = "3")]
    pub screen: Vec<ScreenUpdate>,
}

// ── RobotPacket ──────────────────────────────────────────────────

/// A packet of the binary protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum RobotPacket {
    Handshake(Handshake),
    HandshakeAck(HandshakeAck),
    Report(Report),
    Error(ErrorPacket),
    ProgressUpdate(ProgressUpdate),
}

impl RobotPacket {
    pub fn kind(&self) -> RobotKind {
        match self {
            RobotPacket::Handshake(_) => RobotKind::Handshake,
            RobotPacket::HandshakeAck(_) => RobotKind::HandshakeAck,
            RobotPacket::Report(_) => RobotKind::Report,
            RobotPacket::Error(_) => RobotKind::Error,
            RobotPacket::ProgressUpdate(_) => RobotKind::ProgressUpdate,
        }
    }

    /// Convenience constructor for an error packet.
    pub fn error(message: impl Into<String>) -> Self {
        RobotPacket::Error(ErrorPacket {
            message: message.into(),
        })
    }

    /// Protobuf length of the payload alone.
    pub fn payload_len(&self) -> usize {
        match self {
            RobotPacket::Handshake(p) => p.encoded_len(),
            RobotPacket::HandshakeAck(p) => p.encoded_len(),
            RobotPacket::Report(p) => p.encoded_len(),
            RobotPacket::Error(p) => p.encoded_len(),
            RobotPacket::ProgressUpdate(p) => p.encoded_len(),
        }
    }

    /// Appends the protobuf payload to `buf`.
    pub fn encode_payload(&self, buf: &mut impl BufMut) -> Result<(), CodingError> {
        let result = match self {
            RobotPacket::Handshake(p) => p.encode(buf),
            RobotPacket::HandshakeAck(p) => p.encode(buf),
            RobotPacket::Report(p) => p.encode(buf),
            RobotPacket::Error(p) => p.encode(buf),
            RobotPacket::ProgressUpdate(p) => p.encode(buf),
        };
        result.map_err(|e| CodingError::Encode(e.to_string()))
    }

    /// Decodes a protobuf payload of the given kind.
    pub fn decode_payload(kind: RobotKind, payload: &[u8]) -> Result<Self, prost::DecodeError> {
        Ok(match kind {
            RobotKind::Handshake => RobotPacket::Handshake(Handshake::decode(payload)?),
            RobotKind::HandshakeAck => RobotPacket::HandshakeAck(HandshakeAck::decode(payload)?),
            RobotKind::Report => RobotPacket::Report(Report::decode(payload)?),
            RobotKind::Error => RobotPacket::Error(ErrorPacket::decode(payload)?),
            RobotKind::ProgressUpdate => {
                RobotPacket::ProgressUpdate(ProgressUpdate::decode(payload)?)
            }
        })
    }

    /// Encodes `varint(type id) || payload`, the form used over message
    /// transports.
    pub fn encode_message(&self) -> Result<Bytes, CodingError> {
        let id = self.kind().id();
        let mut buf = BytesMut::with_capacity(encoded_len_varint(id) + self.payload_len());
        encode_varint(id, &mut buf);
        self.encode_payload(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decodes a whole `varint(type id) || payload` message.
    ///
    /// - unreadable id → [`CodingError::Fatal`]
    /// - unregistered id → [`CodingError::UnknownPacket`] with the full input
    /// - malformed payload → [`CodingError::Fatal`]
    pub fn decode_message(data: &[u8]) -> Result<Self, CodingError> {
        let mut cursor = data;
        let id = decode_varint(&mut cursor)
            .map_err(|e| CodingError::Fatal(format!("incomplete protobuf packet: {e}")))?;

        let kind = RobotKind::try_from(id).map_err(|id| CodingError::UnknownPacket {
            id: id.to_string(),
            data: Bytes::copy_from_slice(data),
        })?;

        RobotPacket::decode_payload(kind, cursor)
            .map_err(|e| CodingError::Fatal(format!("malformed {kind} payload: {e}")))
    }
}

impl Protocol for RobotPacket {
    type Kind = RobotKind;

    fn kind(&self) -> RobotKind {
        RobotPacket::kind(self)
    }

    fn error_kind() -> RobotKind {
        RobotKind::Error
    }

    fn error_message(&self) -> Option<String> {
        match self {
            RobotPacket::Error(p) => Some(p.message.clone()),
            _ => None,
        }
    }
}
