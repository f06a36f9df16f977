//! This module implements the BitTorrent peer handshake protocol.
//!
//! The handshake is the first message exchanged between two peers. It verifies
//! that both peers are participating in the same torrent (via info_hash) and
//! establishes basic protocol compatibility.
use super::{PeerError, PeerResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::instrument;

const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

/** Represents a BitTorrent handshake message as defined in the BitTorrent protocol.

A handshake is the first message exchanged between peers and contains:
- Protocol identifier ("BitTorrent protocol")
- Reserved bytes for protocol extensions
- Info hash identifying the torrent
- Peer ID identifying the client */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_len: u8,
    pub protocol: [u8; 19],
    pub reserved: [u8; 8],
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    /** Creates a new handshake with the specified info hash and peer ID.

    Arguments:
    - info_hash - The SHA-1 hash of the torrent's info dictionary
    - peer_id - A unique identifier for this client

    Returns:
    A new Handshake instance with default protocol settings */
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            protocol_len: 19,
            protocol: *PROTOCOL,
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }

    /// Serializes the handshake into a 68-byte array: 1-byte protocol
    /// length, 19-byte protocol string, 8 reserved bytes, 20-byte
    /// info_hash, 20-byte peer_id.
    #[instrument(level = "trace")]
    pub fn serialize(&self) -> [u8; 68] {
        let mut buf = [0u8; 68];
        buf[0] = self.protocol_len;
        buf[1..20].copy_from_slice(&self.protocol);
        buf[20..28].copy_from_slice(&self.reserved);
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Reads a 68-byte handshake from `stream` using a read-fully
    /// primitive, so a short read never silently truncates the message.
    #[instrument(level = "trace", skip(stream))]
    pub async fn read<R: AsyncRead + Unpin>(stream: &mut R) -> PeerResult<Self> {
        let mut buf = [0u8; 68];
        stream.read_exact(&mut buf).await?;

        let protocol_len = buf[0];
        if protocol_len != 19 {
            return Err(PeerError::InvalidProtocol);
        }

        let mut protocol = [0u8; 19];
        protocol.copy_from_slice(&buf[1..20]);
        if &protocol != PROTOCOL {
            return Err(PeerError::InvalidProtocol);
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&buf[20..28]);

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);

        Ok(Self {
            protocol_len,
            protocol,
            reserved,
            info_hash,
            peer_id,
        })
    }

    /// Writes this handshake's 68-byte frame to `stream`.
    pub async fn write<W: AsyncWrite + Unpin>(&self, stream: &mut W) -> PeerResult<()> {
        stream.write_all(&self.serialize()).await?;
        Ok(())
    }

    /// Validates that this handshake's info hash matches the expected value.
    pub fn validate(&self, expected_info_hash: [u8; 20]) -> PeerResult<()> {
        if self.info_hash != expected_info_hash {
            return Err(PeerError::HandshakeMismatch);
        }
        Ok(())
    }

    /// Performs a complete handshake with a peer over a fresh TCP
    /// connection: connect, send our handshake, read theirs, validate
    /// the info_hash, and return their handshake (which carries their
    /// peer_id).
    #[instrument(level = "debug", skip(info_hash, peer_id))]
    pub async fn do_handshake(
        peer_addr: String,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
    ) -> PeerResult<Handshake> {
        let mut stream = TcpStream::connect(peer_addr).await?;

        let our_handshake = Handshake::new(info_hash, peer_id);
        our_handshake.write(&mut stream).await?;

        let their_handshake = Handshake::read(&mut stream).await?;
        their_handshake.validate(info_hash)?;

        Ok(their_handshake)
    }
}
