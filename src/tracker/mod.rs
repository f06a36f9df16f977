//! Tracker client logic for the BitTorrent protocol.
//!
//! This module implements communication with BitTorrent trackers:
//! - Announce request URL construction
//! - Compact peer list parsing
//! - URL-encoding helpers
//!
//! Used by the orchestrator to discover peers for a torrent.
use crate::bencode::{self, BencodeError, BencodeValue};
use crate::torrent::Meta;
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("bencode error in tracker response: {0}")]
    Bencode(#[from] BencodeError),

    #[error("invalid announce URL: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("tracker request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tracker response missing or invalid field: {0}")]
    MissingField(String),

    #[error("compact peers field length {0} is not a multiple of 6")]
    InvalidPeersLength(usize),
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// Client communicating with a single BitTorrent tracker.
#[derive(Debug)]
pub struct Client {
    peer_id: [u8; 20],
    port: u16,
}

/// Parameters for a tracker announce request, per spec §4.C.
#[derive(Debug)]
pub struct AnnounceRequest {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: i64,
    pub downloaded: i64,
    pub left: i64,
}

/// A peer endpoint decoded from the tracker's compact peer list: an IPv4
/// address and TCP port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    pub ip: Ipv4Addr,
    pub port: u16,
}

/// Parsed response from a tracker announce request.
#[derive(Debug)]
pub struct AnnounceResponse {
    pub interval: i64,
    pub peers: Vec<Peer>,
}

impl Client {
    pub fn new(peer_id: [u8; 20], port: u16) -> Self {
        Self { peer_id, port }
    }

    pub fn peer_id(&self) -> [u8; 20] {
        self.peer_id
    }

    /// Sends an announce request to the tracker named by `meta.announce`
    /// and returns the peer list it offers.
    #[tracing::instrument(skip(self, meta), level = "debug")]
    pub async fn announce(&self, meta: &Meta, downloaded: i64) -> TrackerResult<AnnounceResponse> {
        let request = AnnounceRequest {
            info_hash: meta.info_hash,
            peer_id: self.peer_id,
            port: self.port,
            uploaded: 0,
            downloaded,
            left: meta.info.length - downloaded,
        };

        let mut url = url::Url::parse(&meta.announce)?;
        let params = [
            ("info_hash", url_encode(&request.info_hash)),
            ("peer_id", url_encode(&request.peer_id)),
            ("port", request.port.to_string()),
            ("uploaded", request.uploaded.to_string()),
            ("downloaded", request.downloaded.to_string()),
            ("left", request.left.to_string()),
            ("compact", "1".to_string()),
        ];
        url.query_pairs_mut().extend_pairs(&params).finish();

        tracing::debug!(%url, "making announce request to tracker");
        let response = reqwest::get(url).await?;
        let response_bytes = response.bytes().await?;
        Self::parse_announce_response(&response_bytes)
    }

    /// Decodes a bencoded tracker response: `interval` (integer) and
    /// `peers` (compact byte string, length divisible by 6).
    fn parse_announce_response(bytes: &[u8]) -> TrackerResult<AnnounceResponse> {
        let value = bencode::decode_exact(bytes)?;
        let dict = value
            .as_dict()
            .ok_or_else(|| TrackerError::MissingField("root is not a dictionary".to_string()))?;

        let interval = dict
            .get(b"interval".as_slice())
            .and_then(BencodeValue::as_integer)
            .ok_or_else(|| TrackerError::MissingField("interval".to_string()))?;

        let peers_bytes = dict
            .get(b"peers".as_slice())
            .and_then(BencodeValue::as_str_bytes)
            .ok_or_else(|| TrackerError::MissingField("peers".to_string()))?;

        if peers_bytes.len() % 6 != 0 {
            return Err(TrackerError::InvalidPeersLength(peers_bytes.len()));
        }

        let peers = peers_bytes
            .chunks_exact(6)
            .map(|chunk| Peer {
                ip: Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]),
                port: u16::from_be_bytes([chunk[4], chunk[5]]),
            })
            .collect();

        Ok(AnnounceResponse { interval, peers })
    }
}

/// Percent-encodes a byte slice per RFC 3986, leaving the unreserved set
/// (`a-z A-Z 0-9 - . _ ~`) untouched.
fn url_encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for &byte in bytes {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_compact_peer() {
        let bytes = [0xC0, 0xA8, 0x00, 0x01, 0x1A, 0xE1];
        let peer = Peer {
            ip: Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]),
            port: u16::from_be_bytes([bytes[4], bytes[5]]),
        };
        assert_eq!(peer.ip, Ipv4Addr::new(192, 168, 0, 1));
        assert_eq!(peer.port, 6881);
    }

    #[test]
    fn parses_tracker_response() {
        let mut root = std::collections::HashMap::new();
        root.insert(b"interval".to_vec(), BencodeValue::Integer(1800));
        root.insert(
            b"peers".to_vec(),
            BencodeValue::String(vec![192, 168, 0, 1, 0x1A, 0xE1, 10, 0, 0, 1, 0x1A, 0xE2]),
        );
        let encoded = bencode::encode(&BencodeValue::Dict(root));

        let response = Client::parse_announce_response(&encoded).unwrap();
        assert_eq!(response.interval, 1800);
        assert_eq!(response.peers.len(), 2);
        assert_eq!(response.peers[0].ip, Ipv4Addr::new(192, 168, 0, 1));
        assert_eq!(response.peers[0].port, 6881);
    }

    #[test]
    fn rejects_peers_length_not_divisible_by_six() {
        let mut root = std::collections::HashMap::new();
        root.insert(b"interval".to_vec(), BencodeValue::Integer(1800));
        root.insert(b"peers".to_vec(), BencodeValue::String(vec![1, 2, 3]));
        let encoded = bencode::encode(&BencodeValue::Dict(root));

        assert!(matches!(
            Client::parse_announce_response(&encoded),
            Err(TrackerError::InvalidPeersLength(3))
        ));
    }

    #[test]
    fn url_encodes_raw_bytes() {
        assert_eq!(url_encode(b"abc"), "abc");
        assert_eq!(url_encode(&[0u8, 1, 255]), "%00%01%FF");
    }

}
