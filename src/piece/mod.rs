mod assembly;
mod session;

pub use assembly::PieceAssemblyBuffer;
pub use session::{DownloadState, PieceDownloader};

/// Standard block size (16 KB)
pub const BLOCK_SIZE: u32 = 16 * 1024;

#[cfg(test)]
pub(crate) mod testing;
