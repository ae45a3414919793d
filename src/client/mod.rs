use crate::error::{BittorrentError, Result};
use crate::peer::PeerConnection;
use crate::piece::{DownloadState, PieceDownloader};
use crate::torrent::TorrentMetadata;
use crate::tracker::{generate_peer_id, Peer, TrackerClient, TrackerEvent, TrackerRequest};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

/// Configuration for the BitTorrent client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Port reported to the tracker
    pub listen_port: u16,
    /// Maximum number of tracker peers to try
    pub max_peers: usize,
    /// Bound on TCP connect and the tracker request
    pub connect_timeout: Duration,
    /// Bound on every individual peer read
    pub read_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            listen_port: 6881,
            max_peers: 50,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
        }
    }
}

/// Single-connection BitTorrent downloader
pub struct TorrentClient {
    config: ClientConfig,
    peer_id: [u8; 20],
    tracker: TrackerClient,
}

impl TorrentClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let peer_id = generate_peer_id();
        info!("Client initialized with peer_id: {}", hex::encode(peer_id));

        let tracker = TrackerClient::new(config.connect_timeout)?;
        Ok(Self {
            config,
            peer_id,
            tracker,
        })
    }

    /// Announce to the tracker and return its peer list
    pub async fn discover_peers(&self, metadata: &TorrentMetadata) -> Result<Vec<Peer>> {
        let request = TrackerRequest::new(
            metadata.info_hash,
            self.peer_id,
            self.config.listen_port,
            metadata.total_length,
        );

        let response = self
            .tracker
            .announce(&metadata.tracker_url, &request)
            .await?;
        Ok(response.peers)
    }

    /// Handshake with one peer and return its peer id
    pub async fn handshake(&self, metadata: &TorrentMetadata, addr: SocketAddr) -> Result<[u8; 20]> {
        let conn = PeerConnection::connect(
            addr,
            metadata.info_hash,
            self.peer_id,
            self.config.connect_timeout,
            Some(self.config.read_timeout),
        )
        .await?;

        conn.peer_id().copied().ok_or_else(|| {
            BittorrentError::HandshakeMismatch(format!("{}: no peer id received", addr))
        })
    }

    /// Download and verify a single piece
    pub async fn download_piece(&self, metadata: &TorrentMetadata, piece_index: usize) -> Result<Vec<u8>> {
        if metadata.piece_len(piece_index).is_none() {
            return Err(BittorrentError::PieceError(format!(
                "piece index {} out of range ({} pieces)",
                piece_index,
                metadata.piece_count()
            )));
        }

        let mut downloader = self.connect_any(metadata).await?;
        downloader.download_piece(metadata, piece_index).await
    }

    /// Download and verify every piece, returning the whole file.
    /// Any piece failure aborts the download.
    pub async fn download(&self, metadata: &TorrentMetadata) -> Result<Vec<u8>> {
        info!(
            "Starting download: {} bytes in {} pieces (info hash {})",
            metadata.total_length,
            metadata.piece_count(),
            metadata.info_hash_hex()
        );

        let mut downloader = self.connect_any(metadata).await?;
        let data = download_all(&mut downloader, metadata).await?;

        self.announce_completed(metadata).await;
        Ok(data)
    }

    /// Connect to the first reachable tracker peer. Only TCP connect failures
    /// move on to the next peer; protocol failures belong to the caller.
    async fn connect_any(&self, metadata: &TorrentMetadata) -> Result<PieceDownloader> {
        let peers = self.discover_peers(metadata).await?;

        for peer in peers.iter().take(self.config.max_peers) {
            match PieceDownloader::connect(
                peer.addr,
                metadata.info_hash,
                self.peer_id,
                self.config.connect_timeout,
                Some(self.config.read_timeout),
            )
            .await
            {
                Ok(downloader) => return Ok(downloader),
                Err(e) => warn!("Skipping peer {}: {}", peer.addr, e),
            }
        }

        Err(BittorrentError::TrackerError(format!(
            "none of {} peers accepted a connection",
            peers.len().min(self.config.max_peers)
        )))
    }

    async fn announce_completed(&self, metadata: &TorrentMetadata) {
        let mut request = TrackerRequest::new(
            metadata.info_hash,
            self.peer_id,
            self.config.listen_port,
            0,
        );
        request.downloaded = metadata.total_length;
        request.event = Some(TrackerEvent::Completed);

        if let Err(e) = self.tracker.announce(&metadata.tracker_url, &request).await {
            warn!("Completed announce failed: {}", e);
        }
    }
}

/// Drive `downloader` over every piece in order, assembling the file.
/// Pieces are hash-checked before they are appended.
pub async fn download_all<S>(
    downloader: &mut PieceDownloader<S>,
    metadata: &TorrentMetadata,
) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Grows piece by piece; `total_length` comes from an untrusted file
    let mut file = Vec::new();

    for piece_index in 0..metadata.piece_count() {
        let piece = match downloader.download_piece(metadata, piece_index).await {
            Ok(piece) => piece,
            Err(e) => {
                if downloader.state() == DownloadState::Failed {
                    warn!(
                        "Aborting download: connection to {} failed on piece {}",
                        downloader.peer(),
                        piece_index
                    );
                }
                return Err(e);
            }
        };
        file.extend_from_slice(&piece);
        info!(
            "Piece {} completed. Progress: {}/{}",
            piece_index,
            piece_index + 1,
            metadata.piece_count()
        );
    }

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerMessage;
    use crate::piece::testing::*;

    #[tokio::test]
    async fn test_download_all_pieces() {
        let piece_length = 20_000;
        let data = content(50_000);
        let meta = metadata_for(&data, piece_length);

        let (client, server) = tokio::io::duplex(1 << 20);
        tokio::spawn(run_peer(
            server,
            meta.info_hash,
            vec![bitfield()],
            vec![unchoke()],
            serve_content(data.clone(), piece_length),
        ));

        let conn = PeerConnection::new(client, "scripted-peer", Some(Duration::from_secs(5)));
        let mut downloader = PieceDownloader::new(conn, meta.info_hash, OUR_ID);

        let file = download_all(&mut downloader, &meta).await.unwrap();
        assert_eq!(file.len() as u64, meta.total_length);
        assert_eq!(file, data);
    }

    #[tokio::test]
    async fn test_single_bad_piece_aborts_download() {
        let piece_length = 20_000;
        let data = content(50_000);
        let meta = metadata_for(&data, piece_length);

        let mut corrupted = data.clone();
        corrupted[45_000] ^= 0x01;

        let (client, server) = tokio::io::duplex(1 << 20);
        tokio::spawn(run_peer(
            server,
            meta.info_hash,
            vec![bitfield()],
            vec![unchoke()],
            serve_content(corrupted, piece_length),
        ));

        let conn = PeerConnection::new(client, "scripted-peer", Some(Duration::from_secs(5)));
        let mut downloader = PieceDownloader::new(conn, meta.info_hash, OUR_ID);

        match peer_failure(download_all(&mut downloader, &meta).await) {
            (_, 2, BittorrentError::HashVerificationFailure { piece_index, .. }) => {
                assert_eq!(piece_index, 2)
            }
            other => panic!("expected hash failure on piece 2, got {:?}", other),
        }
        assert_eq!(downloader.state(), DownloadState::Failed);
    }

    #[tokio::test]
    async fn test_oversized_length_is_rejected_without_allocating() {
        let huge = 1u64 << 62;
        let mut torrent = format!(
            "d8:announce3:url4:infod6:lengthi{}e12:piece lengthi{}e6:pieces20:",
            huge, huge
        )
        .into_bytes();
        torrent.extend_from_slice(&[0u8; 20]);
        torrent.extend_from_slice(b"ee");
        let meta = crate::torrent::parse_torrent(&torrent).unwrap();

        let (client, _server) = tokio::io::duplex(64);
        let conn = PeerConnection::new(client, "scripted-peer", Some(Duration::from_millis(50)));
        let mut downloader = PieceDownloader::new(conn, meta.info_hash, OUR_ID);

        assert!(matches!(
            download_all(&mut downloader, &meta).await,
            Err(BittorrentError::PieceError(_))
        ));
        assert_eq!(downloader.state(), DownloadState::Disconnected);
    }

    #[tokio::test]
    async fn test_unresponsive_peer_times_out() {
        let data = content(100);
        let meta = metadata_for(&data, 64);

        let (client, server) = tokio::io::duplex(1 << 20);
        tokio::spawn(run_peer(
            server,
            meta.info_hash,
            vec![bitfield()],
            vec![],
            |_block| PeerMessage::Choke.to_bytes(),
        ));

        let conn = PeerConnection::new(client, "silent-peer", Some(Duration::from_millis(50)));
        let mut downloader = PieceDownloader::new(conn, meta.info_hash, OUR_ID);

        let (_, piece_index, cause) = peer_failure(download_all(&mut downloader, &meta).await);
        assert_eq!(piece_index, 0);
        assert!(matches!(cause, BittorrentError::Timeout(_)));
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.listen_port, 6881);
        assert_eq!(config.read_timeout, Duration::from_secs(30));
    }
}
