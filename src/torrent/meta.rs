//! Typed projection of a parsed `.torrent` file.
//!
//! This module defines `Meta` and its `InfoDict`, and the parsing logic that
//! turns a decoded bencode root dictionary into them. Only single-file
//! torrents are modeled; multi-file torrents are out of scope.
use crate::bencode::BencodeValue;
use crate::torrent::info_hash;

use super::TorrentError;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

#[derive(Debug, PartialEq, Clone)]
pub struct Meta {
    pub announce: String,
    pub announce_list: Vec<Vec<String>>,
    pub creation_date: Option<SystemTime>,
    pub comment: String,
    pub created_by: String,
    pub encoding: String,
    pub info: InfoDict,
    pub info_hash: [u8; 20],
    pub pieces_hash: Vec<[u8; 20]>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct InfoDict {
    pub name: String,
    pub length: i64,
    pub piece_length: i64,
    pub pieces: Vec<u8>,
}

/// Splits the concatenated `pieces` string into one 20-byte SHA-1 hash per
/// piece. The order of these hashes corresponds directly to piece index.
#[tracing::instrument(level = "trace")]
fn parse_pieces(pieces_bytes: &[u8]) -> Result<Vec<[u8; 20]>, TorrentError> {
    if pieces_bytes.len() % 20 != 0 {
        return Err(TorrentError::InvalidPiecesHashLength);
    }
    Ok(pieces_bytes.chunks_exact(20).map(|chunk| {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(chunk);
        hash
    }).collect())
}

/// Parses the `announce-list` tiers of tracker URLs, if present.
fn parse_announce_list(value: BencodeValue) -> Result<Vec<Vec<String>>, TorrentError> {
    let BencodeValue::List(tiers) = value else {
        return Err(TorrentError::InvalidFormat("announce-list not a list".to_string()));
    };

    let mut result = Vec::with_capacity(tiers.len());
    for tier in tiers {
        let BencodeValue::List(trackers) = tier else {
            return Err(TorrentError::InvalidFormat("announce tier not a list".to_string()));
        };
        let mut tier_vec = Vec::with_capacity(trackers.len());
        for tracker in trackers {
            let BencodeValue::String(s) = tracker else {
                return Err(TorrentError::InvalidFormat("tracker URL not a string".to_string()));
            };
            tier_vec.push(String::from_utf8(s).map_err(|e| {
                TorrentError::InvalidFormat(format!("invalid tracker URL (not UTF-8): {e}"))
            })?);
        }
        result.push(tier_vec);
    }
    Ok(result)
}

/// Parses the `info` dictionary's single-file fields: `name`, `length`,
/// `piece length`, and `pieces`. All four are required.
fn parse_info_dict(value: &BencodeValue) -> Result<InfoDict, TorrentError> {
    let dict = value
        .as_dict()
        .ok_or_else(|| TorrentError::InvalidFormat("info is not a dictionary".to_string()))?;

    let piece_length = dict
        .get(b"piece length".as_slice())
        .and_then(BencodeValue::as_integer)
        .ok_or_else(|| TorrentError::MissingField("piece length".to_string()))?;

    let pieces = dict
        .get(b"pieces".as_slice())
        .and_then(BencodeValue::as_str_bytes)
        .ok_or_else(|| TorrentError::MissingField("pieces".to_string()))?
        .to_vec();

    let name = dict
        .get(b"name".as_slice())
        .and_then(BencodeValue::as_str_bytes)
        .ok_or_else(|| TorrentError::MissingField("name".to_string()))?;
    let name = String::from_utf8(name.to_vec())
        .map_err(|e| TorrentError::InvalidFormat(format!("invalid name (not UTF-8): {e}")))?;

    let length = dict
        .get(b"length".as_slice())
        .and_then(BencodeValue::as_integer)
        .ok_or_else(|| TorrentError::MissingField("length".to_string()))?;

    Ok(InfoDict {
        piece_length,
        pieces,
        name,
        length,
    })
}

impl Meta {
    /// Number of pieces, derived from the number of 20-byte hashes in `pieces`.
    pub fn piece_count(&self) -> usize {
        self.pieces_hash.len()
    }

    /// Length in bytes of piece `index`: `info.piece_length` for every piece
    /// but the last, and the exact remainder for the last one.
    pub fn piece_len(&self, index: usize) -> Result<u32, TorrentError> {
        let count = self.piece_count();
        if index >= count {
            return Err(TorrentError::InvalidPieceIndex(index));
        }
        if index < count - 1 {
            return Ok(self.info.piece_length as u32);
        }

        let full_pieces_len = (count - 1) as i64 * self.info.piece_length;
        let last_len = self.info.length - full_pieces_len;
        if last_len <= 0 || last_len > self.info.piece_length {
            return Err(TorrentError::InvalidFormat(
                "last piece length out of range".to_string(),
            ));
        }
        Ok(last_len as u32)
    }

    /// Parses a decoded bencode root dictionary into a `Meta`.
    #[tracing::instrument(level = "debug", skip(data))]
    pub fn parse(data: BencodeValue) -> Result<Meta, TorrentError> {
        let BencodeValue::Dict(mut dict) = data else {
            return Err(TorrentError::InvalidFormat("root is not a dictionary".to_string()));
        };

        let announce_bytes = dict
            .remove(b"announce".as_slice())
            .ok_or_else(|| TorrentError::MissingField("announce".to_string()))?;
        let BencodeValue::String(announce_bytes) = announce_bytes else {
            return Err(TorrentError::MissingField("announce (not string)".to_string()));
        };
        let announce = String::from_utf8(announce_bytes)
            .map_err(|e| TorrentError::InvalidFormat(format!("invalid announce URL (not UTF-8): {e}")))?;

        let info_value = dict
            .remove(b"info".as_slice())
            .ok_or_else(|| TorrentError::MissingField("info".to_string()))?;
        let info_dict_map = info_value
            .as_dict()
            .ok_or_else(|| TorrentError::InvalidFormat("info is not a dict".to_string()))?
            .clone();
        let info = parse_info_dict(&info_value)?;

        let announce_list = match dict.remove(b"announce-list".as_slice()) {
            Some(value) => parse_announce_list(value)?,
            None => Vec::new(),
        };

        let creation_date = match dict.remove(b"creation date".as_slice()) {
            Some(BencodeValue::Integer(timestamp)) => {
                let secs = timestamp.try_into().map_err(|_| TorrentError::DateParseError)?;
                Some(UNIX_EPOCH + std::time::Duration::from_secs(secs))
            }
            Some(_) => return Err(TorrentError::InvalidFormat("creation date not an integer".to_string())),
            None => None,
        };

        let comment = match dict.remove(b"comment".as_slice()) {
            Some(BencodeValue::String(s)) => String::from_utf8(s).unwrap_or_default(),
            _ => String::new(),
        };
        let created_by = match dict.remove(b"created by".as_slice()) {
            Some(BencodeValue::String(s)) => String::from_utf8(s).unwrap_or_default(),
            _ => String::new(),
        };
        let encoding = match dict.remove(b"encoding".as_slice()) {
            Some(BencodeValue::String(s)) => String::from_utf8(s).unwrap_or_default(),
            _ => String::new(),
        };

        let info_hash = info_hash::calculate_info_hash(&info_dict_map);
        let pieces_hash = parse_pieces(&info.pieces)?;

        Ok(Meta {
            announce,
            announce_list,
            creation_date,
            comment,
            created_by,
            encoding,
            info,
            info_hash,
            pieces_hash,
        })
    }
}
