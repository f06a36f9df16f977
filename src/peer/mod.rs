//! Peer wire protocol: handshake, framed messages, and the per-peer session
//! state machine that drives block requests and piece reassembly.
pub mod handshake;
pub mod message;
pub mod session;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake info hash mismatch")]
    HandshakeMismatch,

    #[error("invalid handshake protocol identifier")]
    InvalidProtocol,

    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("frame truncated: expected {expected} bytes, got {got}")]
    FrameTruncated { expected: usize, got: usize },

    #[error("protocol desync: {0}")]
    ProtocolDesync(String),

    #[error(transparent)]
    Piece(#[from] crate::torrent::TorrentError),

    #[error("peer connection timed out")]
    Timeout,
}

pub type PeerResult<T> = std::result::Result<T, PeerError>;

pub use handshake::Handshake;
pub use message::{Message, MessageType};
pub use session::{PeerSession, SessionOutcome};
