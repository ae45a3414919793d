mod metainfo;
mod piece;

pub use metainfo::TorrentMetadata;
pub use piece::{PieceHash, Pieces};

use crate::bencode::decode;
use crate::error::Result;
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Load and parse a .torrent file
pub async fn load_torrent_file<P: AsRef<Path>>(path: P) -> Result<TorrentMetadata> {
    let data = fs::read(path.as_ref()).await?;
    debug!("Read {} bytes from {}", data.len(), path.as_ref().display());
    parse_torrent(&data)
}

/// Parse torrent data from bytes
pub fn parse_torrent(data: &[u8]) -> Result<TorrentMetadata> {
    let value = decode(data)?;
    TorrentMetadata::from_bencode(&value)
}
