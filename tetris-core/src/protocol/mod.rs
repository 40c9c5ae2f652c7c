//! Packet definitions for both peers.
//!
//! Each peer has a closed set of packet kinds bound at compile time to a
//! concrete payload type and a wire identifier:
//!
//! - [`frontend`]: 4-character ASCII tags, JSON payloads (text framing).
//! - [`robot`]: small integer type ids, protobuf payloads (binary framing).
//!
//! The [`Protocol`] trait is what the [`Connector`](crate::Connector) needs
//! to correlate replies: the kind of a packet and which kind is the
//! protocol's dedicated error packet.

pub mod frontend;
pub mod robot;

use std::fmt::Debug;
use std::hash::Hash;

pub use frontend::{FrontendKind, FrontendPacket};
pub use robot::{RobotKind, RobotPacket};

/// A closed set of packets exchanged with the server.
pub trait Protocol: Clone + Debug + Send + Sync + 'static {
    /// Identifies a packet kind (tag or type id).
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    /// The kind of this packet.
    fn kind(&self) -> Self::Kind;

    /// The kind the server uses to fail any outstanding call.
    fn error_kind() -> Self::Kind;

    /// The human-readable message carried by an error packet.
    ///
    /// Returns `None` for every other kind.
    fn error_message(&self) -> Option<String>;
}
