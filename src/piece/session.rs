use super::PieceAssemblyBuffer;
use crate::error::{BittorrentError, Result};
use crate::peer::{open_stream, BlockInfo, Handshake, PeerConnection, PeerMessage};
use crate::torrent::TorrentMetadata;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Disconnected,
    Handshaking,
    AwaitingBitfield,
    Interested,
    AwaitingUnchoke,
    Requesting { block_index: usize },
    Verifying,
    Complete,
    Failed,
}

/// Per-connection piece download state machine:
///
/// ```text
/// -> handshake
/// <- handshake
/// <- bitfield
/// -> interested
/// <- unchoke
/// -> request / <- piece, one block at a time
/// ```
///
/// The assembled piece is hash-checked before it is handed out. The handshake, bitfield and unchoke exchange happen once per connection;
/// after a piece completes the next `download_piece` call goes straight back
/// to `Requesting`. Any error moves the machine to `Failed` for good.
pub struct PieceDownloader<S = TcpStream> {
    conn: PeerConnection<S>,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    state: DownloadState,
    buffer: Option<PieceAssemblyBuffer>,
    verified: Option<Vec<u8>>,
}

impl PieceDownloader<TcpStream> {
    /// Open a TCP connection to `addr`; the handshake is sent on the first step
    pub async fn connect(
        addr: SocketAddr,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
        connect_timeout: Duration,
        read_timeout: Option<Duration>,
    ) -> Result<Self> {
        let stream = open_stream(addr, connect_timeout).await?;
        let conn = PeerConnection::new(stream, addr.to_string(), read_timeout);
        Ok(Self::new(conn, info_hash, peer_id))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> PieceDownloader<S> {
    pub fn new(conn: PeerConnection<S>, info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            conn,
            info_hash,
            peer_id,
            state: DownloadState::Disconnected,
            buffer: None,
            verified: None,
        }
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    pub fn peer(&self) -> &str {
        self.conn.peer()
    }

    /// Download and verify one piece over this connection
    pub async fn download_piece(
        &mut self,
        metadata: &TorrentMetadata,
        piece_index: usize,
    ) -> Result<Vec<u8>> {
        match self.state {
            DownloadState::Disconnected | DownloadState::Complete => {}
            state => {
                return Err(BittorrentError::InvalidState(format!(
                    "{}: cannot start piece {} while {:?}",
                    self.peer(),
                    piece_index,
                    state
                )))
            }
        }

        let (length, hash) = metadata
            .piece_len(piece_index)
            .zip(metadata.piece_hash(piece_index))
            .ok_or_else(|| {
                BittorrentError::PieceError(format!(
                    "piece index {} out of range ({} pieces)",
                    piece_index,
                    metadata.piece_count()
                ))
            })?;
        let index = u32::try_from(piece_index).map_err(|_| {
            BittorrentError::PieceError(format!("piece index {} too large", piece_index))
        })?;

        self.buffer = Some(PieceAssemblyBuffer::new(index, length, *hash)?);
        if self.state == DownloadState::Complete {
            // The bitfield was read when this connection was set up
            self.check_advertised(index);
            self.state = DownloadState::Requesting { block_index: 0 };
        }

        info!(
            "Downloading piece {} ({} bytes) from {}",
            piece_index,
            length,
            self.peer()
        );

        while self.step().await? != DownloadState::Complete {}

        self.verified.take().ok_or_else(|| {
            BittorrentError::InvalidState(format!(
                "{}: piece {} complete without data",
                self.peer(),
                piece_index
            ))
        })
    }

    /// Perform exactly one transition, returning the new state.
    /// On error the machine is `Failed`, the in-progress piece is dropped and
    /// the error is tagged with the peer and that piece's index.
    pub async fn step(&mut self) -> Result<DownloadState> {
        let piece_index = self.buffer.as_ref().map(PieceAssemblyBuffer::piece_index);

        match self.advance().await {
            Ok(next) => {
                debug!("{}: {:?} -> {:?}", self.peer(), self.state, next);
                self.state = next;
                Ok(next)
            }
            Err(e) => {
                warn!("{}: failed while {:?}: {}", self.peer(), self.state, e);
                self.state = DownloadState::Failed;
                self.buffer = None;
                self.verified = None;

                Err(match piece_index {
                    Some(piece_index) => BittorrentError::PeerFailure {
                        peer: self.peer().to_string(),
                        piece_index,
                        source: Box::new(e),
                    },
                    None => e,
                })
            }
        }
    }

    async fn advance(&mut self) -> Result<DownloadState> {
        let next = match self.state {
            DownloadState::Disconnected => {
                let handshake = Handshake::new(self.info_hash, self.peer_id);
                self.conn.send_handshake(&handshake).await?;
                DownloadState::Handshaking
            }
            DownloadState::Handshaking => {
                self.conn.receive_handshake(&self.info_hash).await?;
                DownloadState::AwaitingBitfield
            }
            DownloadState::AwaitingBitfield => match self.conn.receive_message().await? {
                PeerMessage::Bitfield { bitfield } => {
                    debug!("{} sent a {}-byte bitfield", self.peer(), bitfield.len());
                    self.check_advertised(self.buffer()?.piece_index());
                    DownloadState::Interested
                }
                other => return Err(self.unexpected("Bitfield", &other)),
            },
            DownloadState::Interested => {
                self.conn.send_message(&PeerMessage::Interested).await?;
                DownloadState::AwaitingUnchoke
            }
            DownloadState::AwaitingUnchoke => match self.conn.receive_message().await? {
                PeerMessage::Unchoke => {
                    debug!("{} unchoked us: {:?}", self.peer(), self.conn.state());
                    DownloadState::Requesting { block_index: 0 }
                }
                other => return Err(self.unexpected("Unchoke", &other)),
            },
            DownloadState::Requesting { block_index } => self.request_block(block_index).await?,
            DownloadState::Verifying => {
                let buffer = self.take_buffer()?;
                self.verified = Some(buffer.verify()?);
                DownloadState::Complete
            }
            state @ (DownloadState::Complete | DownloadState::Failed) => {
                return Err(BittorrentError::InvalidState(format!(
                    "{}: no transition out of {:?}",
                    self.peer(),
                    state
                )))
            }
        };

        Ok(next)
    }

    /// Request one block, wait for its `piece` reply and append it
    async fn request_block(&mut self, block_index: usize) -> Result<DownloadState> {
        let block = match self.buffer()?.block(block_index) {
            Some(block) => block,
            None => return Ok(DownloadState::Verifying),
        };

        self.conn
            .send_message(&PeerMessage::Request { block })
            .await?;
        let response = self.conn.receive_message().await?;

        let buffer = self.buffer_mut()?;
        accept_block(buffer, &block, response)?;

        if block_index + 1 < buffer.block_count() {
            Ok(DownloadState::Requesting {
                block_index: block_index + 1,
            })
        } else {
            Ok(DownloadState::Verifying)
        }
    }

    /// Bitfields are informational; a missing bit is only logged
    fn check_advertised(&self, piece_index: u32) {
        if !self.conn.has_piece(piece_index as usize) {
            debug!(
                "{} has not advertised piece {}, requesting anyway",
                self.peer(),
                piece_index
            );
        }
    }

    fn unexpected(&self, expected: &str, got: &PeerMessage) -> BittorrentError {
        BittorrentError::ProtocolViolation(format!(
            "expected {} while {:?}, got {}",
            expected,
            self.state,
            got.message_type()
        ))
    }

    fn buffer(&self) -> Result<&PieceAssemblyBuffer> {
        self.buffer.as_ref().ok_or_else(|| no_piece(self.conn.peer()))
    }

    fn buffer_mut(&mut self) -> Result<&mut PieceAssemblyBuffer> {
        self.buffer.as_mut().ok_or_else(|| no_piece(self.conn.peer()))
    }

    fn take_buffer(&mut self) -> Result<PieceAssemblyBuffer> {
        self.buffer.take().ok_or_else(|| no_piece(self.conn.peer()))
    }
}

fn no_piece(peer: &str) -> BittorrentError {
    BittorrentError::InvalidState(format!("{}: no piece in progress", peer))
}

/// Validate a reply against the block that was requested and append it.
/// Nothing is written unless index, offset and length all match.
fn accept_block(
    buffer: &mut PieceAssemblyBuffer,
    requested: &BlockInfo,
    response: PeerMessage,
) -> Result<()> {
    let (piece_index, offset, data) = match response {
        PeerMessage::Piece {
            piece_index,
            offset,
            data,
        } => (piece_index, offset, data),
        other => {
            return Err(BittorrentError::ProtocolViolation(format!(
                "expected Piece for piece {} offset {}, got {}",
                requested.piece_index,
                requested.offset,
                other.message_type()
            )))
        }
    };

    if piece_index != requested.piece_index || offset != requested.offset {
        return Err(BittorrentError::ProtocolViolation(format!(
            "requested piece {} offset {}, got piece {} offset {}",
            requested.piece_index, requested.offset, piece_index, offset
        )));
    }

    if data.len() != requested.length as usize {
        return Err(BittorrentError::ProtocolViolation(format!(
            "piece {} offset {}: requested {} bytes, got {}",
            piece_index,
            offset,
            requested.length,
            data.len()
        )));
    }

    buffer.append(offset, &data)
}
