//! Per-peer session state machine: INIT -> WAIT_UNCHOKE -> REQUESTING ->
//! REQUESTING_BLOCKED -> DONE/ERROR (spec §4.E).
//!
//! A session downloads one piece at a time with a pipelining depth of 1:
//! at most one block request is outstanding, and the next block is only
//! requested once the previous one has arrived.
use super::message::Message;
use super::{PeerError, PeerResult};
use crate::torrent::piece::{self, Piece};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tracing::instrument;

/// Per-message read timeout (spec §5 recommends 30s). A peer that goes
/// silent mid-session fails its current piece rather than hanging the
/// worker forever.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    WaitUnchoke,
    Requesting,
    RequestingBlocked,
    Done,
}

/// Result of a completed piece download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed(Vec<u8>),
}

/// Drives the post-handshake exchange with a single peer over `stream`.
pub struct PeerSession<S> {
    stream: S,
    state: State,
    peer_choking: bool,
    am_interested: bool,
    bitfield: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> PeerSession<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            state: State::Init,
            peer_choking: true,
            am_interested: false,
            bitfield: Vec::new(),
        }
    }

    /// Whether the peer has advertised piece `index`, per its most recent
    /// Bitfield or Have messages.
    pub fn has_piece(&self, index: u32) -> bool {
        has_bit(&self.bitfield, index)
    }

    fn mark_have(&mut self, index: u32) {
        set_bit(&mut self.bitfield, index);
    }

    async fn send(&mut self, message: &Message) -> PeerResult<()> {
        message.write(&mut self.stream).await
    }

    /// Reads one message, failing with `PeerError::Timeout` if the peer
    /// goes silent for longer than `READ_TIMEOUT`.
    async fn read_message(&mut self) -> PeerResult<Message> {
        match timeout(READ_TIMEOUT, Message::read(&mut self.stream)).await {
            Ok(result) => result,
            Err(_) => Err(PeerError::Timeout),
        }
    }

    /// Reads messages until the peer unchokes us, sending Interested the
    /// first time a Bitfield arrives. A no-op if we're already unchoked.
    #[instrument(level = "debug", skip(self))]
    async fn ensure_unchoked(&mut self) -> PeerResult<()> {
        if !self.peer_choking {
            self.state = State::Requesting;
            return Ok(());
        }
        self.state = State::WaitUnchoke;

        loop {
            match self.read_message().await? {
                Message::Bitfield(bits) => {
                    self.bitfield = bits;
                    if !self.am_interested {
                        self.send(&Message::Interested).await?;
                        self.am_interested = true;
                    }
                }
                Message::Have { index } => self.mark_have(index),
                Message::Unchoke => {
                    self.peer_choking = false;
                    break;
                }
                Message::Choke => self.peer_choking = true,
                _ => {}
            }
        }

        self.state = State::Requesting;
        Ok(())
    }

    /// Requests and assembles one block, reissuing the outstanding
    /// request if the peer chokes and then unchokes us mid-block (the
    /// peer is assumed to forget requests it received while choking us).
    async fn download_block(&mut self, index: u32, begin: u32, length: u32) -> PeerResult<Vec<u8>> {
        self.send(&Message::Request { index, begin, length }).await?;
        self.state = State::Requesting;

        loop {
            match self.read_message().await? {
                Message::Piece { index: got_index, begin: got_begin, block } => {
                    if got_index != index || got_begin != begin {
                        return Err(PeerError::ProtocolDesync(format!(
                            "expected piece {index} begin {begin}, got piece {got_index} begin {got_begin}"
                        )));
                    }
                    if block.len() as u32 != length {
                        return Err(PeerError::FrameTruncated {
                            expected: length as usize,
                            got: block.len(),
                        });
                    }
                    return Ok(block);
                }
                Message::Choke => {
                    self.peer_choking = true;
                    self.state = State::RequestingBlocked;
                }
                Message::Unchoke => {
                    self.peer_choking = false;
                    self.state = State::Requesting;
                    self.send(&Message::Request { index, begin, length }).await?;
                }
                Message::Have { index } => self.mark_have(index),
                Message::Bitfield(bits) => self.bitfield = bits,
                Message::KeepAlive => {}
                other => {
                    return Err(PeerError::ProtocolDesync(format!(
                        "unexpected message while requesting: {other:?}"
                    )));
                }
            }
        }
    }

    /// Downloads and hash-verifies one full piece, requesting its blocks
    /// in order with a pipelining depth of 1.
    #[instrument(level = "debug", skip(self, piece), fields(index = piece.index))]
    pub async fn download_piece(&mut self, piece: &Piece) -> PeerResult<SessionOutcome> {
        self.ensure_unchoked().await?;

        let mut buffer = vec![0u8; piece.length as usize];
        for block_index in 0..piece.block_count() {
            let begin = piece.block_offset(block_index);
            let length = piece.blocks[block_index];
            let block = self.download_block(piece.index, begin, length).await?;
            let start = begin as usize;
            buffer[start..start + block.len()].copy_from_slice(&block);
        }

        piece::check_hash(piece, &buffer)?;
        self.state = State::Done;
        Ok(SessionOutcome::Completed(buffer))
    }
}

fn has_bit(bitfield: &[u8], index: u32) -> bool {
    let byte_index = (index / 8) as usize;
    let bit_index = 7 - (index % 8);
    bitfield
        .get(byte_index)
        .map(|b| (b >> bit_index) & 1 == 1)
        .unwrap_or(false)
}

fn set_bit(bitfield: &mut Vec<u8>, index: u32) {
    let byte_index = (index / 8) as usize;
    if byte_index >= bitfield.len() {
        bitfield.resize(byte_index + 1, 0);
    }
    let bit_index = 7 - (index % 8);
    bitfield[byte_index] |= 1 << bit_index;
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha1::{Digest, Sha1};

    fn hash_of(data: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    #[tokio::test]
    async fn downloads_piece_after_bitfield_and_unchoke() {
        let (client, mut peer) = tokio::io::duplex(4096);
        let mut session = PeerSession::new(client);

        let piece = Piece {
            index: 0,
            length: 4,
            hash: hash_of(b"data"),
            blocks: vec![4],
        };

        let peer_task = tokio::spawn(async move {
            Message::Bitfield(vec![0x80]).write(&mut peer).await.unwrap();

            let msg = Message::read(&mut peer).await.unwrap();
            assert_eq!(msg, Message::Interested);

            Message::Unchoke.write(&mut peer).await.unwrap();

            let msg = Message::read(&mut peer).await.unwrap();
            assert_eq!(msg, Message::Request { index: 0, begin: 0, length: 4 });

            Message::Piece { index: 0, begin: 0, block: b"data".to_vec() }
                .write(&mut peer)
                .await
                .unwrap();
        });

        let outcome = session.download_piece(&piece).await.unwrap();
        peer_task.await.unwrap();

        match outcome {
            SessionOutcome::Completed(bytes) => assert_eq!(bytes, b"data"),
        }
    }

    #[tokio::test]
    async fn reissues_request_after_unchoke_following_mid_piece_choke() {
        let (client, mut peer) = tokio::io::duplex(4096);
        let mut session = PeerSession::new(client);

        let piece = Piece {
            index: 2,
            length: 4,
            hash: hash_of(b"abcd"),
            blocks: vec![4],
        };

        let peer_task = tokio::spawn(async move {
            Message::Bitfield(vec![0xFF]).write(&mut peer).await.unwrap();
            assert_eq!(Message::read(&mut peer).await.unwrap(), Message::Interested);
            Message::Unchoke.write(&mut peer).await.unwrap();

            assert_eq!(
                Message::read(&mut peer).await.unwrap(),
                Message::Request { index: 2, begin: 0, length: 4 }
            );

            // Choke the peer mid-request; it is assumed to drop the
            // outstanding request, so no Piece follows.
            Message::Choke.write(&mut peer).await.unwrap();
            Message::Unchoke.write(&mut peer).await.unwrap();

            // The session must reissue the same request after unchoke.
            assert_eq!(
                Message::read(&mut peer).await.unwrap(),
                Message::Request { index: 2, begin: 0, length: 4 }
            );

            Message::Piece { index: 2, begin: 0, block: b"abcd".to_vec() }
                .write(&mut peer)
                .await
                .unwrap();
        });

        let outcome = session.download_piece(&piece).await.unwrap();
        peer_task.await.unwrap();

        match outcome {
            SessionOutcome::Completed(bytes) => assert_eq!(bytes, b"abcd"),
        }
    }

    #[tokio::test]
    async fn errors_on_piece_index_mismatch() {
        let (client, mut peer) = tokio::io::duplex(4096);
        let mut session = PeerSession::new(client);

        let piece = Piece {
            index: 0,
            length: 4,
            hash: hash_of(b"data"),
            blocks: vec![4],
        };

        let peer_task = tokio::spawn(async move {
            Message::Bitfield(vec![0x80]).write(&mut peer).await.unwrap();
            assert_eq!(Message::read(&mut peer).await.unwrap(), Message::Interested);
            Message::Unchoke.write(&mut peer).await.unwrap();
            assert_eq!(
                Message::read(&mut peer).await.unwrap(),
                Message::Request { index: 0, begin: 0, length: 4 }
            );
            // Wrong index: the session must reject this as a desync.
            Message::Piece { index: 1, begin: 0, block: b"data".to_vec() }
                .write(&mut peer)
                .await
                .unwrap();
        });

        let result = session.download_piece(&piece).await;
        peer_task.await.unwrap();
        assert!(matches!(result, Err(PeerError::ProtocolDesync(_))));
    }

    #[test]
    fn bitfield_bit_order_is_high_bit_first() {
        let mut bitfield = Vec::new();
        set_bit(&mut bitfield, 0);
        assert_eq!(bitfield, vec![0x80]);
        set_bit(&mut bitfield, 7);
        assert_eq!(bitfield, vec![0x81]);
        assert!(has_bit(&bitfield, 0));
        assert!(has_bit(&bitfield, 7));
        assert!(!has_bit(&bitfield, 1));
    }
}
