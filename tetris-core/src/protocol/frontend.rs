//! Frontend packets and their text framing.
//!
//! # Wire Format
//!
//! ```text
//! <tag: 4 ASCII chars><payload: JSON, or a pre-serialized body>
//!
//!   hshk  Handshake       {"id":13,"key":"..."}
//!   hack  HandshakeACK    {}
//!   data  Report          {"joystick":[...],"tactile":[...],"screen":[...]}
//!   erro  Error           {"message":"..."}
//!   prog  Progress        any JSON
//!   play  Playbook        any JSON
//!   pack  PlaybookACK     any JSON
//!   prdy  PlaybookState   any JSON
//! ```
//!
//! Kinds whose shape is owned by the server (progress, playbook) keep their
//! payload as a `serde_json::Value`.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::CodingError;
use crate::protocol::Protocol;

/// Width of every tag on the wire.
pub const TAG_LEN: usize = 4;

// ── FrontendKind ─────────────────────────────────────────────────

/// Every packet kind understood by the text protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontendKind {
    Handshake,
    HandshakeAck,
    Report,
    Error,
    Progress,
    Playbook,
    PlaybookAck,
    PlaybookState,
}

impl FrontendKind {
    /// The registry, in lookup order.
    pub const ALL: [FrontendKind; 8] = [
        FrontendKind::Handshake,
        FrontendKind::HandshakeAck,
        FrontendKind::Report,
        FrontendKind::Error,
        FrontendKind::Progress,
        FrontendKind::Playbook,
        FrontendKind::PlaybookAck,
        FrontendKind::PlaybookState,
    ];

    /// The 4-character wire tag.
    pub fn tag(self) -> &'static str {
        match self {
            FrontendKind::Handshake => "hshk",
            FrontendKind::HandshakeAck => "hack",
            FrontendKind::Report => "data",
            FrontendKind::Error => "erro",
            FrontendKind::Progress => "prog",
            FrontendKind::Playbook => "play",
            FrontendKind::PlaybookAck => "pack",
            FrontendKind::PlaybookState => "prdy",
        }
    }

    /// The packet's public name, as used by [`FrontendPacket::from_name`].
    pub fn name(self) -> &'static str {
        match self {
            FrontendKind::Handshake => "Handshake",
            FrontendKind::HandshakeAck => "HandshakeACK",
            FrontendKind::Report => "Report",
            FrontendKind::Error => "Error",
            FrontendKind::Progress => "Progress",
            FrontendKind::Playbook => "Playbook",
            FrontendKind::PlaybookAck => "PlaybookACK",
            FrontendKind::PlaybookState => "PlaybookState",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Returns `true` if `raw` starts with this kind's tag.
    pub fn matches(self, raw: &str) -> bool {
        raw.as_bytes().starts_with(self.tag().as_bytes())
    }

    /// Decodes `raw` as a packet of exactly this kind.
    ///
    /// A packet carrying any other tag is rejected.
    pub fn decode(self, raw: &str) -> Result<FrontendPacket, CodingError> {
        if !self.matches(raw) {
            return Err(CodingError::Fatal(format!(
                "expected packet to be {} (a {} packet)",
                self.tag(),
                self.name()
            )));
        }
        self.decode_body(&raw[TAG_LEN..])
    }

    /// Parses the JSON body that follows the tag.
    fn decode_body(self, body: &str) -> Result<FrontendPacket, CodingError> {
        Ok(match self {
            FrontendKind::Handshake => FrontendPacket::Handshake(serde_json::from_str(body)?),
            FrontendKind::HandshakeAck => FrontendPacket::HandshakeAck(serde_json::from_str(body)?),
            FrontendKind::Report => FrontendPacket::Report(serde_json::from_str(body)?),
            FrontendKind::Error => FrontendPacket::Error(serde_json::from_str(body)?),
            FrontendKind::Progress => FrontendPacket::Progress(serde_json::from_str(body)?),
            FrontendKind::Playbook => FrontendPacket::Playbook(serde_json::from_str(body)?),
            FrontendKind::PlaybookAck => FrontendPacket::PlaybookAck(serde_json::from_str(body)?),
            FrontendKind::PlaybookState => {
                FrontendPacket::PlaybookState(serde_json::from_str(body)?)
            }
        })
    }

    /// Builds a packet of this kind from a plain JSON value.
    pub fn from_value(self, data: Value) -> Result<FrontendPacket, CodingError> {
        let encode = |e: serde_json::Error| CodingError::Encode(e.to_string());
        Ok(match self {
            FrontendKind::Handshake => {
                FrontendPacket::Handshake(serde_json::from_value(data).map_err(encode)?)
            }
            FrontendKind::Report => {
                FrontendPacket::Report(serde_json::from_value(data).map_err(encode)?)
            }
            FrontendKind::Error => FrontendPacket::Error(serde_json::from_value(data).map_err(encode)?),
            FrontendKind::HandshakeAck => FrontendPacket::HandshakeAck(data),
            FrontendKind::Progress => FrontendPacket::Progress(data),
            FrontendKind::Playbook => FrontendPacket::Playbook(data),
            FrontendKind::PlaybookAck => FrontendPacket::PlaybookAck(data),
            FrontendKind::PlaybookState => FrontendPacket::PlaybookState(data),
        })
    }
}

impl fmt::Display for FrontendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Decodes any registered packet from a text message.
///
/// - fewer than [`TAG_LEN`] bytes → [`CodingError::Fatal`]
/// - unregistered tag → [`CodingError::UnknownPacket`] carrying `raw`
/// - malformed JSON body → [`CodingError::Fatal`]
pub fn decode_any(raw: &str) -> Result<FrontendPacket, CodingError> {
    if raw.len() < TAG_LEN {
        return Err(CodingError::Fatal(format!(
            "incomplete packet: {} of {TAG_LEN} tag bytes",
            raw.len()
        )));
    }

    match raw.get(..TAG_LEN).and_then(FrontendKind::from_tag) {
        Some(kind) => kind.decode_body(&raw[TAG_LEN..]),
        None => Err(CodingError::UnknownPacket {
            id: raw.chars().take(TAG_LEN).collect(),
            data: Bytes::copy_from_slice(raw.as_bytes()),
        }),
    }
}

// ── Payloads ─────────────────────────────────────────────────────

/// Sent by a frontend right after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// User id.
    pub id: u64,
    /// Play key obtained from the API.
    pub key: String,
}

/// Error reply or pushed failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPacket {
    pub message: String,
}

/// Aggregated input from one frontend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(default)]
    pub joystick: Vec<JoystickSample>,
    #[serde(default)]
    pub tactile: Vec<TactileSample>,
    #[serde(default)]
    pub screen: Vec<ScreenSample>,
}

impl Report {
    /// Returns `true` when no category holds a sample.
    pub fn is_empty(&self) -> bool {
        self.joystick.is_empty() && self.tactile.is_empty() && self.screen.is_empty()
    }
}

/// Position of one joystick axis pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoystickSample {
    pub id: u32,
    pub x: f64,
    pub y: f64,
}

/// Press and release counts for one button.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TactileSample {
    pub id: u32,
    #[serde(default, deserialize_with = "lenient_count")]
    pub down: u32,
    #[serde(default, deserialize_with = "lenient_count")]
    pub up: u32,
}

/// Pointer position on a screen control, with its click count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenSample {
    pub id: u32,
    pub x: f64,
    pub y: f64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub clicks: u32,
}

/// Counters arrive from loosely typed clients; anything that is not a
/// positive number counts as zero.
fn lenient_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value
        .as_f64()
        .filter(|n| n.is_finite() && *n > 0.0)
        .map_or(0, |n| n as u32))
}

// ── FrontendPacket ───────────────────────────────────────────────

/// A packet of the text protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum FrontendPacket {
    Handshake(Handshake),
    HandshakeAck(Value),
    Report(Report),
    Error(ErrorPacket),
    Progress(Value),
    Playbook(Value),
    PlaybookAck(Value),
    PlaybookState(Value),
    /// A pre-serialized body, written verbatim after the tag.
    Raw { kind: FrontendKind, body: String },
}

impl FrontendPacket {
    pub fn kind(&self) -> FrontendKind {
        match self {
            FrontendPacket::Handshake(_) => FrontendKind::Handshake,
            FrontendPacket::HandshakeAck(_) => FrontendKind::HandshakeAck,
            FrontendPacket::Report(_) => FrontendKind::Report,
            FrontendPacket::Error(_) => FrontendKind::Error,
            FrontendPacket::Progress(_) => FrontendKind::Progress,
            FrontendPacket::Playbook(_) => FrontendKind::Playbook,
            FrontendPacket::PlaybookAck(_) => FrontendKind::PlaybookAck,
            FrontendPacket::PlaybookState(_) => FrontendKind::PlaybookState,
            FrontendPacket::Raw { kind, .. } => *kind,
        }
    }

    /// Builds a packet by its public name, e.g. `"Handshake"`.
    pub fn from_name(name: &str, data: Value) -> Result<Self, CodingError> {
        let kind = FrontendKind::from_name(name).ok_or_else(|| {
            CodingError::Encode(format!("tried to instantiate unknown packet \"{name}\""))
        })?;
        kind.from_value(data)
    }

    /// Encodes the packet for the wire: tag followed by the JSON body.
    pub fn encode(&self) -> Result<String, CodingError> {
        let body = self.to_json()?;
        let mut out = String::with_capacity(TAG_LEN + body.len());
        out.push_str(self.kind().tag());
        out.push_str(&body);
        Ok(out)
    }

    /// The payload alone, serialized as JSON. Not a wire encoding.
    pub fn to_json(&self) -> Result<String, CodingError> {
        let json = match self {
            FrontendPacket::Handshake(p) => serde_json::to_string(p),
            FrontendPacket::Report(p) => serde_json::to_string(p),
            FrontendPacket::Error(p) => serde_json::to_string(p),
            FrontendPacket::HandshakeAck(v)
            | FrontendPacket::Progress(v)
            | FrontendPacket::Playbook(v)
            | FrontendPacket::PlaybookAck(v)
            | FrontendPacket::PlaybookState(v) => serde_json::to_string(v),
            FrontendPacket::Raw { body, .. } => return Ok(body.clone()),
        };
        json.map_err(|e| CodingError::Encode(e.to_string()))
    }

    /// The payload as a plain JSON value.
    ///
    /// A raw body that is not JSON comes back as a string value.
    pub fn to_value(&self) -> Result<Value, CodingError> {
        let json = self.to_json()?;
        match self {
            FrontendPacket::Raw { .. } => {
                Ok(serde_json::from_str(&json).unwrap_or(Value::String(json)))
            }
            _ => serde_json::from_str(&json).map_err(|e| CodingError::Encode(e.to_string())),
        }
    }

    /// Reads a nested payload property by dotted path, e.g.
    /// `"tactile.0.down"`. Array elements are addressed by index.
    pub fn get(&self, path: &str) -> Option<Value> {
        let value = self.to_value().ok()?;
        let mut current = &value;
        for part in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }
}

impl Protocol for FrontendPacket {
    type Kind = FrontendKind;

    fn kind(&self) -> FrontendKind {
        FrontendPacket::kind(self)
    }

    fn error_kind() -> FrontendKind {
        FrontendKind::Error
    }

    fn error_message(&self) -> Option<String> {
        match self {
            FrontendPacket::Error(p) => Some(p.message.clone()),
            FrontendPacket::Raw {
                kind: FrontendKind::Error,
                ..
            } => self
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hello_error() -> FrontendPacket {
        FrontendPacket::Error(ErrorPacket {
            message: "Hello world!".into(),
        })
    }

    fn sample_report() -> Report {
        Report {
            joystick: vec![
                JoystickSample { id: 0, x: 0.5, y: 0.25 },
                JoystickSample { id: 1, x: -0.75, y: 1.0 },
            ],
            tactile: vec![
                TactileSample { id: 0, down: 1, up: 0 },
                TactileSample { id: 38, down: 2, up: 1 },
            ],
            screen: vec![ScreenSample { id: 4, x: 120.5, y: 33.0, clicks: 2 }],
        }
    }

    #[test]
    fn decodes_error_packet() {
        let raw = r#"erro{"message":"Hello world!"}"#;
        assert_eq!(decode_any(raw).unwrap(), hello_error());
        assert_eq!(FrontendKind::Error.decode(raw).unwrap(), hello_error());
    }

    #[test]
    fn decodes_short_message() {
        let decoded = decode_any(r#"erro{"message":"hi"}"#).unwrap();
        assert_eq!(
            decoded,
            FrontendPacket::Error(ErrorPacket { message: "hi".into() })
        );
    }

    #[test]
    fn incomplete_packet_is_fatal() {
        let err = decode_any("er").unwrap_err();
        assert!(err.is_fatal());
        assert!(decode_any("").unwrap_err().is_fatal());
    }

    #[test]
    fn malformed_body_is_fatal() {
        assert!(decode_any("erro{asdfsdf}").unwrap_err().is_fatal());
        // Right tag, wrong payload shape.
        assert!(decode_any(r#"hshk{"id":"nope"}"#).unwrap_err().is_fatal());
    }

    #[test]
    fn unknown_tag_carries_raw_input() {
        let raw = r#"wtff{"x":1}"#;
        match decode_any(raw).unwrap_err() {
            CodingError::UnknownPacket { id, data } => {
                assert_eq!(id, "wtff");
                assert_eq!(&data[..], raw.as_bytes());
            }
            other => panic!("expected unknown packet, got {other:?}"),
        }
    }

    #[test]
    fn kind_decode_rejects_other_tags() {
        let err = FrontendKind::Handshake
            .decode(r#"erro{"message":"x"}"#)
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn encodes_plain_record() {
        assert_eq!(
            hello_error().encode().unwrap(),
            r#"erro{"message":"Hello world!"}"#
        );
    }

    #[test]
    fn encodes_raw_body_verbatim() {
        let wat = FrontendPacket::Raw {
            kind: FrontendKind::Error,
            body: "wat".into(),
        };
        assert_eq!(wat.encode().unwrap(), "errowat");

        let pre = FrontendPacket::Raw {
            kind: FrontendKind::Error,
            body: r#"{"foo":"bar"}"#.into(),
        };
        assert_eq!(pre.encode().unwrap(), r#"erro{"foo":"bar"}"#);
    }

    #[test]
    fn round_trips_every_kind() {
        let packets = [
            FrontendPacket::Handshake(Handshake { id: 13, key: "asdf".into() }),
            FrontendPacket::HandshakeAck(json!({})),
            FrontendPacket::Report(sample_report()),
            hello_error(),
            FrontendPacket::Progress(json!({"tactile": [{"id": 1, "cooldown": 500}]})),
            FrontendPacket::Playbook(json!({"scenes": ["intro", "boss"]})),
            FrontendPacket::PlaybookAck(json!({"ok": true})),
            FrontendPacket::PlaybookState(json!({"ready": false})),
        ];
        for packet in packets {
            let wire = packet.encode().unwrap();
            assert!(wire.starts_with(packet.kind().tag()));
            assert_eq!(decode_any(&wire).unwrap(), packet);
        }
    }

    #[test]
    fn tags_are_unique_and_fixed_width() {
        for kind in FrontendKind::ALL {
            assert_eq!(kind.tag().len(), TAG_LEN);
            assert_eq!(FrontendKind::from_tag(kind.tag()), Some(kind));
            assert_eq!(FrontendKind::from_name(kind.name()), Some(kind));
        }
    }

    #[test]
    fn converts_to_json_and_value() {
        let err = hello_error();
        assert_eq!(err.to_json().unwrap(), r#"{"message":"Hello world!"}"#);
        assert_eq!(err.to_value().unwrap(), json!({"message": "Hello world!"}));
    }

    #[test]
    fn gets_nested_attributes() {
        let report = FrontendPacket::Report(sample_report());
        assert_eq!(report.get("tactile.0.down"), Some(json!(1)));
        assert_eq!(report.get("tactile.1.id"), Some(json!(38)));
        assert_eq!(report.get("tactile.a.b"), None);
        assert!(report.get("tactile").unwrap().is_array());
    }

    #[test]
    fn from_name_builds_packets() {
        let packet =
            FrontendPacket::from_name("Handshake", json!({"id": 13, "key": "asdf"})).unwrap();
        assert_eq!(
            packet,
            FrontendPacket::Handshake(Handshake { id: 13, key: "asdf".into() })
        );
        assert!(FrontendPacket::from_name("Nope", json!({})).is_err());
    }

    #[test]
    fn counters_are_lenient() {
        let report: Report =
            serde_json::from_str(r#"{"tactile":[{"id":1,"down":"x"},{"id":2,"up":2}]}"#).unwrap();
        assert_eq!(report.tactile[0], TactileSample { id: 1, down: 0, up: 0 });
        assert_eq!(report.tactile[1], TactileSample { id: 2, down: 0, up: 2 });
        assert!(report.joystick.is_empty());
    }

    #[test]
    fn error_message_is_exposed() {
        assert_eq!(hello_error().error_message().as_deref(), Some("Hello world!"));
        let raw = FrontendPacket::Raw {
            kind: FrontendKind::Error,
            body: r#"{"message":"offline"}"#.into(),
        };
        assert_eq!(raw.error_message().as_deref(), Some("offline"));
        assert_eq!(FrontendPacket::HandshakeAck(json!({})).error_message(), None);
    }
}
