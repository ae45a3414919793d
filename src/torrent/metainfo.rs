use super::{PieceHash, Pieces};
use crate::bencode::{encode, BencodeValue};
use crate::error::{BittorrentError, Result};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;

/// Typed view of a single-file .torrent
#[derive(Debug, Clone)]
pub struct TorrentMetadata {
    /// URL of the tracker
    pub tracker_url: String,
    /// Suggested file name, if present
    pub name: Option<String>,
    /// Total content length in bytes
    pub total_length: u64,
    /// Nominal number of bytes in each piece
    pub piece_length: u64,
    /// SHA1 hashes of all pieces, in order
    pub piece_hashes: Pieces,
    /// SHA1 hash of the canonically re-encoded info dictionary
    pub info_hash: [u8; 20],
}

fn invalid(msg: impl Into<String>) -> BittorrentError {
    BittorrentError::InvalidMetadata(msg.into())
}

fn require<'a>(
    dict: &'a BTreeMap<Vec<u8>, BencodeValue>,
    key: &str,
) -> Result<&'a BencodeValue> {
    dict.get(key.as_bytes())
        .ok_or_else(|| invalid(format!("Missing '{}' field", key)))
}

fn require_length(dict: &BTreeMap<Vec<u8>, BencodeValue>, key: &str) -> Result<u64> {
    let value = require(dict, key)?;
    let n = value.as_integer().ok_or_else(|| {
        invalid(format!("'{}' must be an integer, got {}", key, value.kind()))
    })?;
    u64::try_from(n).map_err(|_| invalid(format!("'{}' must not be negative: {}", key, n)))
}

impl TorrentMetadata {
    pub fn from_bencode(value: &BencodeValue) -> Result<Self> {
        let dict = value
            .as_dict()
            .ok_or_else(|| invalid(format!("Torrent must be a dictionary, got {}", value.kind())))?;

        let announce = require(dict, "announce")?;
        let tracker_url = announce
            .as_bytes()
            .ok_or_else(|| invalid(format!("'announce' must be a byte string, got {}", announce.kind())))?;
        let tracker_url = String::from_utf8(tracker_url.to_vec())
            .map_err(|_| invalid("'announce' is not valid UTF-8"))?;

        let info_value = require(dict, "info")?;
        let info = info_value
            .as_dict()
            .ok_or_else(|| invalid(format!("'info' must be a dictionary, got {}", info_value.kind())))?;

        let total_length = require_length(info, "length")?;
        let piece_length = require_length(info, "piece length")?;
        if piece_length == 0 {
            return Err(invalid("'piece length' must be positive"));
        }

        let pieces_value = require(info, "pieces")?;
        let pieces_bytes = pieces_value
            .as_bytes()
            .ok_or_else(|| invalid(format!("'pieces' must be a byte string, got {}", pieces_value.kind())))?;
        let piece_hashes = Pieces::from_bytes(pieces_bytes)?;

        let expected_count = total_length.div_ceil(piece_length);
        if piece_hashes.len() as u64 != expected_count {
            return Err(invalid(format!(
                "{} piece hashes for {} bytes at piece length {} (expected {})",
                piece_hashes.len(),
                total_length,
                piece_length,
                expected_count
            )));
        }

        let name = info_value
            .dict_get(b"name")
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(TorrentMetadata {
            tracker_url,
            name,
            total_length,
            piece_length,
            piece_hashes,
            info_hash: calculate_info_hash(info_value),
        })
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Length of the piece at `index`: the nominal length for every piece but
    /// the last, which holds whatever remains.
    pub fn piece_len(&self, index: usize) -> Option<u64> {
        let count = self.piece_count();
        if index >= count {
            return None;
        }

        if index == count - 1 {
            let remainder = self.total_length % self.piece_length;
            if remainder != 0 {
                return Some(remainder);
            }
        }

        Some(self.piece_length)
    }

    pub fn piece_hash(&self, index: usize) -> Option<&PieceHash> {
        self.piece_hashes.get(index)
    }

    /// Get the info hash as a hex string
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }
}

/// SHA1 over the canonical encoding of the decoded info dictionary
fn calculate_info_hash(info: &BencodeValue) -> [u8; 20] {
    let encoded = encode(info);
    Sha1::digest(&encoded).into()
}
