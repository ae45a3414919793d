use super::BLOCK_SIZE;
use crate::error::{BittorrentError, Result};
use crate::peer::BlockInfo;
use crate::torrent::PieceHash;
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

/// Fixed-capacity buffer for one piece, filled block by block in offset
/// order and hash-checked once full
#[derive(Debug)]
pub struct PieceAssemblyBuffer {
    piece_index: u32,
    length: u32,
    expected_hash: PieceHash,
    data: Vec<u8>,
}

impl PieceAssemblyBuffer {
    pub fn new(piece_index: u32, length: u64, expected_hash: PieceHash) -> Result<Self> {
        let length = u32::try_from(length).map_err(|_| {
            BittorrentError::PieceError(format!(
                "piece {} length {} does not fit the wire format",
                piece_index, length
            ))
        })?;

        Ok(Self {
            piece_index,
            length,
            expected_hash,
            data: Vec::new(),
        })
    }

    pub fn piece_index(&self) -> u32 {
        self.piece_index
    }

    pub fn block_count(&self) -> usize {
        self.length.div_ceil(BLOCK_SIZE) as usize
    }

    /// The request for block `block_index`: offset `index * 16 KiB`,
    /// length capped by what remains in the piece
    pub fn block(&self, block_index: usize) -> Option<BlockInfo> {
        let offset = u32::try_from(block_index).ok()?.checked_mul(BLOCK_SIZE)?;
        if offset >= self.length {
            return None;
        }

        let length = BLOCK_SIZE.min(self.length - offset);
        Some(BlockInfo::new(self.piece_index, offset, length))
    }

    /// Bytes written so far
    pub fn filled(&self) -> usize {
        self.data.len()
    }

    pub fn is_complete(&self) -> bool {
        self.filled() == self.length as usize
    }

    /// Append a block; blocks must arrive in offset order
    pub fn append(&mut self, offset: u32, block: &[u8]) -> Result<()> {
        if offset as usize != self.filled() {
            return Err(BittorrentError::PieceError(format!(
                "piece {}: block at offset {} but {} bytes assembled",
                self.piece_index,
                offset,
                self.filled()
            )));
        }

        if self.filled() + block.len() > self.length as usize {
            return Err(BittorrentError::PieceError(format!(
                "piece {}: block at offset {} of {} bytes exceeds piece length {}",
                self.piece_index,
                offset,
                block.len(),
                self.length
            )));
        }

        self.data.extend_from_slice(block);

        debug!(
            "Added block to piece {} at offset {} ({} bytes)",
            self.piece_index,
            offset,
            block.len()
        );
        Ok(())
    }

    /// Check the SHA1 of the full piece, handing back the bytes on a match.
    /// The buffer is consumed either way.
    pub fn verify(self) -> Result<Vec<u8>> {
        if !self.is_complete() {
            return Err(BittorrentError::PieceError(format!(
                "piece {} verified with {} of {} bytes",
                self.piece_index,
                self.data.len(),
                self.length
            )));
        }

        let actual: [u8; 20] = Sha1::digest(&self.data).into();

        if &actual != self.expected_hash.as_bytes() {
            warn!("Piece {} failed verification", self.piece_index);
            return Err(BittorrentError::HashVerificationFailure {
                piece_index: self.piece_index,
                expected: self.expected_hash.to_hex(),
                actual: hex::encode(actual),
            });
        }

        info!("Piece {} verified and complete", self.piece_index);
        Ok(self.data)
    }
}
