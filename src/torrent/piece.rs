use crate::error::{BittorrentError, Result};

/// Length of a SHA-1 digest
pub const HASH_LEN: usize = 20;

/// The SHA-1 checksum of one piece
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PieceHash([u8; HASH_LEN]);

impl PieceHash {
    pub fn new(hash: [u8; HASH_LEN]) -> Self {
        Self(hash)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for PieceHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Ordered piece checksums from the `pieces` field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pieces {
    hashes: Vec<PieceHash>,
}

impl Pieces {
    /// Split the concatenated `pieces` byte string into 20-byte hashes.
    /// A length that is not a multiple of 20 is rejected, never truncated.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() % HASH_LEN != 0 {
            return Err(BittorrentError::InvalidMetadata(format!(
                "'pieces' length {} is not a multiple of {}",
                data.len(),
                HASH_LEN
            )));
        }

        let hashes = data
            .chunks_exact(HASH_LEN)
            .map(|chunk| {
                let mut hash = [0u8; HASH_LEN];
                hash.copy_from_slice(chunk);
                PieceHash::new(hash)
            })
            .collect();

        Ok(Self { hashes })
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn get(&self, index: usize) -> Option<&PieceHash> {
        self.hashes.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PieceHash> {
        self.hashes.iter()
    }
}
