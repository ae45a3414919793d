use thiserror::Error;

#[derive(Error, Debug)]
pub enum BittorrentError {
    #[error("Malformed bencode: {0}")]
    MalformedEncoding(String),

    #[error("Invalid torrent metadata: {0}")]
    InvalidMetadata(String),

    #[error("Tracker error: {0}")]
    TrackerError(String),

    #[error("Tracker refused announce: {0}")]
    AnnounceFailure(String),

    #[error("Handshake mismatch: {0}")]
    HandshakeMismatch(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Truncated message: {0}")]
    TruncatedMessage(String),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("Piece {piece_index} failed hash verification (expected {expected}, got {actual})")]
    HashVerificationFailure {
        piece_index: u32,
        expected: String,
        actual: String,
    },

    #[error("Piece error: {0}")]
    PieceError(String),

    #[error("Invalid download state: {0}")]
    InvalidState(String),

    /// A connection failure, tagged with the peer and the piece in flight
    #[error("{peer}, piece {piece_index}: {source}")]
    PeerFailure {
        peer: String,
        piece_index: u32,
        source: Box<BittorrentError>,
    },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(String),
}

impl From<url::ParseError> for BittorrentError {
    fn from(err: url::ParseError) -> Self {
        BittorrentError::UrlParseError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BittorrentError>;
