//! Error taxonomy surfaced across the synchronized audio distribution plane.

use thiserror::Error;

/// Failures from the crypto primitives (C1) and packet AEAD step.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("ciphertext too short to contain nonce and tag")]
    Truncated,
    #[error("AEAD authentication failed")]
    AuthenticationFailed,
}

/// Failures decoding the wire protocol (packet header, control responses).
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("datagram shorter than header (14 bytes)")]
    HeaderTooShort,
    #[error("payload_length field ({declared}) does not match remaining datagram bytes ({actual})")]
    PayloadLengthMismatch { declared: usize, actual: usize },
    #[error("unrecognized control response: {0}")]
    UnknownControlResponse(String),
}

/// Errors surfaced to a session initiator (handshake, bind, transport).
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid PIN")]
    InvalidPin,
    #[error("handshake failed: {0}")]
    Failed(String),
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
