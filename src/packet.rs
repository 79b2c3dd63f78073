//! Packet framing (C2): 14-byte header plus an AEAD blob carrying one PCM
//! capture-unit. All integers are big-endian, following the teacher's
//! `server.rs`/`client.rs` wire-header convention (`to_be_bytes`/
//! `from_be_bytes` throughout `audio_multicast_loop`).

use crate::error::ProtocolError;

pub const HEADER_LEN: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub sequence_number: u32,
    pub timestamp_ns: i64,
    pub payload_length: u16,
}

/// A full on-wire datagram: header plus its AEAD payload.
#[derive(Debug, Clone)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Encode to exactly `HEADER_LEN + payload.len()` bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.header.sequence_number.to_be_bytes());
        out.extend_from_slice(&self.header.timestamp_ns.to_be_bytes());
        out.extend_from_slice(&self.header.payload_length.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode a received datagram. Rejects anything shorter than the header,
    /// or whose declared `payload_length` doesn't match the remaining bytes.
    pub fn decode(datagram: &[u8]) -> Result<Packet, ProtocolError> {
        if datagram.len() < HEADER_LEN {
            return Err(ProtocolError::HeaderTooShort);
        }
        let sequence_number = u32::from_be_bytes(datagram[0..4].try_into().unwrap());
        let timestamp_ns = i64::from_be_bytes(datagram[4..12].try_into().unwrap());
        let payload_length = u16::from_be_bytes(datagram[12..14].try_into().unwrap());
        let actual = datagram.len() - HEADER_LEN;
        if actual != payload_length as usize {
            return Err(ProtocolError::PayloadLengthMismatch {
                declared: payload_length as usize,
                actual,
            });
        }
        Ok(Packet {
            header: PacketHeader {
                sequence_number,
                timestamp_ns,
                payload_length,
            },
            payload: datagram[HEADER_LEN..].to_vec(),
        })
    }
}
