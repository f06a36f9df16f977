//! Piece dispatch and on-disk assembly: a worker task per peer pulls
//! pieces off a shared work queue, a single writer task assembles
//! completed pieces into the output file (spec §4.F).
use crate::peer::{Handshake, PeerSession, SessionOutcome};
use crate::torrent::Piece;
use crate::tracker::Peer;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::instrument;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no peer made progress; download stalled with {remaining} piece(s) outstanding")]
    NoProgress { remaining: usize },
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

/// A completed, hash-verified piece ready to be written to disk.
struct PieceResult {
    index: u32,
    bytes: Vec<u8>,
}

/// Dispatches `pieces` to connected peers and assembles the result into
/// a single output file.
pub struct Scheduler {
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    piece_length: u64,
    pieces: Vec<Piece>,
}

impl Scheduler {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20], piece_length: i64, pieces: Vec<Piece>) -> Self {
        Self {
            info_hash,
            peer_id,
            piece_length: piece_length as u64,
            pieces,
        }
    }

    /// Downloads every piece from `peers`, writing each to `output_path`
    /// as it arrives. Pieces a peer fails to deliver are re-enqueued for
    /// another peer to pick up; the download fails with `NoProgress` if
    /// every worker has exited and pieces remain outstanding.
    #[instrument(level = "info", skip(self, peers), fields(pieces = self.pieces.len(), peers = peers.len()))]
    pub async fn download(&self, peers: Vec<Peer>, output_path: &Path) -> SchedulerResult<()> {
        let (work_tx, work_rx) = mpsc::unbounded_channel::<Piece>();
        for piece in self.pieces.iter().cloned() {
            // Channel is unbounded and not yet closed; this cannot fail.
            let _ = work_tx.send(piece);
        }
        let work_rx = Arc::new(Mutex::new(work_rx));

        let result_capacity = peers.len().max(1);
        let (result_tx, mut result_rx) = mpsc::channel::<PieceResult>(result_capacity);

        let mut handles = Vec::with_capacity(peers.len());
        for peer in peers {
            let addr = SocketAddr::from((peer.ip, peer.port));
            let info_hash = self.info_hash;
            let peer_id = self.peer_id;
            let work_tx = work_tx.clone();
            let work_rx = Arc::clone(&work_rx);
            let result_tx = result_tx.clone();
            handles.push(tokio::spawn(async move {
                run_peer_worker(addr, info_hash, peer_id, work_tx, work_rx, result_tx).await;
            }));
        }
        drop(work_tx);
        drop(result_tx);

        let total = self.pieces.len();
        let mut remaining = total;
        let mut file = File::create(output_path).await?;

        while remaining > 0 {
            match result_rx.recv().await {
                Some(result) => {
                    self.write_piece(&mut file, &result).await?;
                    remaining -= 1;
                    tracing::debug!(index = result.index, remaining, "wrote piece");
                }
                None => {
                    return Err(SchedulerError::NoProgress { remaining });
                }
            }
        }

        // Every piece has been written; any worker still waiting on the
        // work queue would otherwise block forever (it holds its own
        // sender clone for re-enqueuing, so the queue never closes on its
        // own). Aborting is safe: the output is already complete.
        for handle in handles {
            handle.abort();
        }

        Ok(())
    }

    /// Seeks to the piece's byte offset and fsyncs before the piece is
    /// counted as durably written.
    async fn write_piece(&self, file: &mut File, result: &PieceResult) -> SchedulerResult<()> {
        let offset = result.index as u64 * self.piece_length;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(&result.bytes).await?;
        file.sync_all().await?;
        Ok(())
    }
}

/// Drives one peer connection end to end: handshake, then repeatedly
/// pull a piece from the shared work queue and download it. A piece the
/// peer doesn't have, or any session error, re-enqueues the piece and
/// ends this worker rather than retrying against the same peer.
#[instrument(level = "debug", skip(info_hash, peer_id, work_tx, work_rx, result_tx), fields(%addr))]
async fn run_peer_worker(
    addr: SocketAddr,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    work_tx: mpsc::UnboundedSender<Piece>,
    work_rx: Arc<Mutex<mpsc::UnboundedReceiver<Piece>>>,
    result_tx: mpsc::Sender<PieceResult>,
) {
    let mut stream = match TcpStream::connect(addr).await {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(%err, "connect failed");
            return;
        }
    };

    let our_handshake = Handshake::new(info_hash, peer_id);
    if let Err(err) = our_handshake.write(&mut stream).await {
        tracing::warn!(%err, "failed to send handshake");
        return;
    }
    let their_handshake = match Handshake::read(&mut stream).await {
        Ok(h) => h,
        Err(err) => {
            tracing::warn!(%err, "failed to read handshake");
            return;
        }
    };
    if let Err(err) = their_handshake.validate(info_hash) {
        tracing::warn!(%err, "handshake info hash mismatch");
        return;
    }

    let mut session = PeerSession::new(stream);

    loop {
        let piece = {
            let mut rx = work_rx.lock().await;
            match rx.recv().await {
                Some(piece) => piece,
                None => return,
            }
        };

        // Bitfield is accepted but not consulted for selection: every
        // popped piece is attempted against whatever peer pulled it,
        // and hash/IO failure (not a bitfield check) drives re-enqueue.
        let index = piece.index;
        match session.download_piece(&piece).await {
            Ok(SessionOutcome::Completed(bytes)) => {
                if result_tx.send(PieceResult { index, bytes }).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                tracing::warn!(%err, index, "peer failed to deliver piece, re-enqueuing");
                let _ = work_tx.send(piece);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::piece::BLOCK_SIZE;
    use sha1::{Digest, Sha1};
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    fn hash_of(data: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    /// Spawns a minimal in-process peer that serves exactly the pieces
    /// described by `pieces_data`, for use in place of a real socket.
    async fn spawn_fake_peer(
        info_hash: [u8; 20],
        peer_id: [u8; 20],
        pieces_data: Vec<(u32, Vec<u8>)>,
    ) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            let mut handshake_buf = [0u8; 68];
            socket.read_exact(&mut handshake_buf).await.unwrap();
            let reply = Handshake::new(info_hash, peer_id);
            socket.write_all(&reply.serialize()).await.unwrap();

            let mut bits = vec![0u8; pieces_data.len().div_ceil(8)];
            for (index, _) in &pieces_data {
                let byte = (*index / 8) as usize;
                bits[byte] |= 1 << (7 - (*index % 8));
            }
            crate::peer::Message::Bitfield(bits)
                .write(&mut socket)
                .await
                .unwrap();

            assert_eq!(
                crate::peer::Message::read(&mut socket).await.unwrap(),
                crate::peer::Message::Interested
            );
            crate::peer::Message::Unchoke.write(&mut socket).await.unwrap();

            for (index, data) in pieces_data {
                let mut offset = 0u32;
                while (offset as usize) < data.len() {
                    let request = crate::peer::Message::read(&mut socket).await.unwrap();
                    let crate::peer::Message::Request { index: req_index, begin, length } = request
                    else {
                        panic!("expected Request, got {request:?}");
                    };
                    assert_eq!(req_index, index);
                    assert_eq!(begin, offset);
                    let block = data[begin as usize..(begin + length) as usize].to_vec();
                    crate::peer::Message::Piece { index, begin, block }
                        .write(&mut socket)
                        .await
                        .unwrap();
                    offset += length;
                }
            }
        });

        addr
    }

    #[tokio::test]
    async fn downloads_all_pieces_from_a_single_peer() {
        let info_hash = [1u8; 20];
        let peer_id = [2u8; 20];

        let piece0 = vec![5u8; BLOCK_SIZE as usize * 2];
        let piece1 = vec![9u8; 100];

        let pieces = vec![
            Piece { index: 0, length: piece0.len() as u32, hash: hash_of(&piece0), blocks: vec![BLOCK_SIZE, BLOCK_SIZE] },
            Piece { index: 1, length: piece1.len() as u32, hash: hash_of(&piece1), blocks: vec![100] },
        ];

        let addr = spawn_fake_peer(
            info_hash,
            peer_id,
            vec![(0, piece0.clone()), (1, piece1.clone())],
        )
        .await;

        let scheduler = Scheduler::new(info_hash, peer_id, BLOCK_SIZE as i64 * 2, pieces);
        let dir = tempdir().unwrap();
        let out_path = dir.path().join("out.bin");

        scheduler
            .download(vec![Peer { ip: addr.ip().to_string().parse().unwrap(), port: addr.port() }], &out_path)
            .await
            .unwrap();

        let written = tokio::fs::read(&out_path).await.unwrap();
        assert_eq!(&written[0..piece0.len()], piece0.as_slice());
        assert_eq!(&written[piece0.len()..piece0.len() + piece1.len()], piece1.as_slice());
    }

    #[tokio::test]
    async fn no_progress_when_no_peers_are_given() {
        let pieces = vec![Piece { index: 0, length: 4, hash: [0u8; 20], blocks: vec![4] }];
        let scheduler = Scheduler::new([0u8; 20], [0u8; 20], 4, pieces);
        let dir = tempdir().unwrap();
        let out_path = dir.path().join("out.bin");

        let result = scheduler.download(Vec::new(), &out_path).await;
        assert!(matches!(result, Err(SchedulerError::NoProgress { remaining: 1 })));
    }
}
