//! Piece and block geometry derived from a parsed [`Meta`].
use super::{Meta, TorrentError};
use sha1::{Digest, Sha1};

/// Fixed block size used for all peer-wire requests except possibly the
/// last block of the last piece.
pub const BLOCK_SIZE: u32 = 16384;

/// A single piece of the target file: the unit of hash verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    pub index: u32,
    pub length: u32,
    pub hash: [u8; 20],
    pub blocks: Vec<u32>,
}

impl Piece {
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Byte offset of block `block_index` within this piece.
    pub fn block_offset(&self, block_index: usize) -> u32 {
        block_index as u32 * BLOCK_SIZE
    }
}

/// Splits a piece of `length` bytes into `BLOCK_SIZE` blocks, with the final
/// block holding whatever remains (strictly positive, at most `BLOCK_SIZE`).
fn block_sizes(length: u32) -> Vec<u32> {
    let mut sizes = Vec::with_capacity((length / BLOCK_SIZE + 1) as usize);
    let mut remaining = length;
    while remaining > 0 {
        let block = remaining.min(BLOCK_SIZE);
        sizes.push(block);
        remaining -= block;
    }
    sizes
}

/// Produces one [`Piece`] descriptor per piece in `meta`, with `blocks`
/// pre-computed.
pub fn pieces(meta: &Meta) -> Result<Vec<Piece>, TorrentError> {
    (0..meta.piece_count())
        .map(|index| {
            let length = meta.piece_len(index)?;
            Ok(Piece {
                index: index as u32,
                length,
                hash: meta.pieces_hash[index],
                blocks: block_sizes(length),
            })
        })
        .collect()
}

/// Verifies that `bytes` is the correct length and SHA-1 digest for `piece`.
pub fn check_hash(piece: &Piece, bytes: &[u8]) -> Result<(), TorrentError> {
    if bytes.len() as u32 != piece.length {
        return Err(TorrentError::HashMismatch);
    }
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    let digest: [u8; 20] = hasher.finalize().into();
    if digest != piece.hash {
        return Err(TorrentError::HashMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::meta::InfoDict;
    use sha1::{Digest, Sha1};

    fn meta_with(piece_length: i64, length: i64, hashes: Vec<[u8; 20]>) -> Meta {
        Meta {
            announce: "http://tracker.example.com/announce".to_string(),
            announce_list: Vec::new(),
            creation_date: None,
            comment: String::new(),
            created_by: String::new(),
            encoding: String::new(),
            info: InfoDict {
                name: "file.bin".to_string(),
                length,
                piece_length,
                pieces: hashes.iter().flatten().copied().collect(),
            },
            info_hash: [0u8; 20],
            pieces_hash: hashes,
        }
    }

    #[test]
    fn single_full_piece_has_two_blocks() {
        let meta = meta_with(32768, 32768, vec![[0u8; 20]]);
        let descriptors = pieces(&meta).unwrap();

        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].blocks, vec![16384, 16384]);
    }

    #[test]
    fn last_block_is_the_remainder() {
        // One piece of 20000 bytes: one full 16384 block, one 3616-byte tail.
        let meta = meta_with(20000, 20000, vec![[0u8; 20]]);
        let descriptors = pieces(&meta).unwrap();

        assert_eq!(descriptors[0].blocks, vec![16384, 3616]);
    }

    #[test]
    fn last_piece_shorter_than_piece_length() {
        let meta = meta_with(100, 130, vec![[0u8; 20], [0u8; 20]]);
        let descriptors = pieces(&meta).unwrap();

        assert_eq!(descriptors[0].length, 100);
        assert_eq!(descriptors[1].length, 30);
        assert_eq!(descriptors[1].blocks, vec![30]);
    }

    #[test]
    fn sum_of_piece_lengths_equals_total_length() {
        let meta = meta_with(100, 257, vec![[0u8; 20], [0u8; 20], [0u8; 20]]);
        let descriptors = pieces(&meta).unwrap();

        let total: u32 = descriptors.iter().map(|p| p.length).sum();
        assert_eq!(total as i64, meta.info.length);
    }

    #[test]
    fn check_hash_accepts_matching_bytes() {
        let data = vec![9u8; 50];
        let mut hasher = Sha1::new();
        hasher.update(&data);
        let hash: [u8; 20] = hasher.finalize().into();

        let piece = Piece {
            index: 0,
            length: 50,
            hash,
            blocks: block_sizes(50),
        };

        assert!(check_hash(&piece, &data).is_ok());
    }

    #[test]
    fn check_hash_rejects_wrong_bytes() {
        let piece = Piece {
            index: 0,
            length: 4,
            hash: [0u8; 20],
            blocks: vec![4],
        };

        assert!(matches!(
            check_hash(&piece, b"data"),
            Err(TorrentError::HashMismatch)
        ));
    }

    #[test]
    fn check_hash_rejects_wrong_length() {
        let piece = Piece {
            index: 0,
            length: 10,
            hash: [0u8; 20],
            blocks: vec![10],
        };

        assert!(matches!(
            check_hash(&piece, b"short"),
            Err(TorrentError::HashMismatch)
        ));
    }
}
