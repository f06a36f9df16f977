//! Torrent file parsing and piece-geometry logic.
//!
//! This module provides types and error handling for working with .torrent
//! files: a typed `Meta` projected from the bencoded root dictionary, and
//! the piece/block geometry derived from it.
use thiserror::Error;
pub mod info_hash;
pub mod meta;
pub mod piece;

pub use meta::{InfoDict, Meta};
pub use piece::{pieces, Piece};

#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bencode decoding error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("invalid torrent file format: {0}")]
    InvalidFormat(String),

    #[error("missing or invalid field: {0}")]
    MissingField(String),

    #[error("invalid pieces hash length")]
    InvalidPiecesHashLength,

    #[error("date parse error")]
    DateParseError,

    #[error("piece index {0} out of range")]
    InvalidPieceIndex(usize),

    #[error("piece hash mismatch")]
    HashMismatch,
}

/// Result type for torrent operations derived from `std::result`
pub type TorrentResult<T> = std::result::Result<T, TorrentError>;
