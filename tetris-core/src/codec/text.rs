use bytes::Bytes;

use crate::codec::WireCodec;
use crate::error::CodingError;
use crate::protocol::frontend::{self, FrontendPacket};

/// Frontend packets over a message-oriented transport.
///
/// Every delivery is exactly one packet; nothing is buffered.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextCodec;

impl TextCodec {
    pub fn new() -> Self {
        TextCodec
    }
}

impl WireCodec for TextCodec {
    type Packet = FrontendPacket;

    fn encode(&mut self, packet: &FrontendPacket) -> Result<Bytes, CodingError> {
        Ok(Bytes::from(packet.encode()?))
    }

    fn feed(&mut self, data: Bytes) -> Vec<Result<FrontendPacket, CodingError>> {
        let decoded = match std::str::from_utf8(&data) {
            Ok(text) => frontend::decode_any(text),
            Err(e) => Err(CodingError::Fatal(format!("message is not UTF-8: {e}"))),
        };
        vec![decoded]
    }
}
