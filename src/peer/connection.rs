use super::{Handshake, PeerMessage, PeerState, HANDSHAKE_LEN};
use crate::error::{BittorrentError, Result};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, trace};

/// Largest frame accepted from a peer
pub const MAX_FRAME_LEN: usize = 1 << 21;

/// A framed connection to one peer over any byte stream
pub struct PeerConnection<S = TcpStream> {
    /// Identity used in logs and errors
    peer: String,
    stream: S,
    state: PeerState,
    read_timeout: Option<Duration>,
    peer_id: Option<[u8; 20]>,
    bitfield: Option<Vec<u8>>,
}

impl PeerConnection<TcpStream> {
    /// Open a TCP connection to a peer and exchange handshakes
    pub async fn connect(
        addr: SocketAddr,
        info_hash: [u8; 20],
        our_peer_id: [u8; 20],
        connect_timeout: Duration,
        read_timeout: Option<Duration>,
    ) -> Result<Self> {
        let stream = open_stream(addr, connect_timeout).await?;

        let mut conn = PeerConnection::new(stream, addr.to_string(), read_timeout);
        conn.send_handshake(&Handshake::new(info_hash, our_peer_id))
            .await?;
        conn.receive_handshake(&info_hash).await?;

        info!("Successfully connected to peer: {}", addr);
        Ok(conn)
    }
}

/// Open a TCP stream, bounded by `connect_timeout`
pub async fn open_stream(addr: SocketAddr, connect_timeout: Duration) -> Result<TcpStream> {
    info!("Connecting to peer: {}", addr);

    match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(BittorrentError::IoError(std::io::Error::new(
            e.kind(),
            format!("Failed to connect to {}: {}", addr, e),
        ))),
        Err(_) => Err(BittorrentError::Timeout(format!(
            "connecting to {} after {:?}",
            addr, connect_timeout
        ))),
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> PeerConnection<S> {
    pub fn new(stream: S, peer: impl Into<String>, read_timeout: Option<Duration>) -> Self {
        Self {
            peer: peer.into(),
            stream,
            state: PeerState::default(),
            read_timeout,
            peer_id: None,
            bitfield: None,
        }
    }

    pub async fn send_handshake(&mut self, handshake: &Handshake) -> Result<()> {
        self.stream.write_all(&handshake.to_bytes()).await?;
        self.stream.flush().await?;
        debug!("Sent handshake to {}", self.peer);
        Ok(())
    }

    /// Read the remote handshake and check it names the same torrent
    pub async fn receive_handshake(&mut self, info_hash: &[u8; 20]) -> Result<Handshake> {
        let mut buf = [0u8; HANDSHAKE_LEN];
        self.read_exact(&mut buf, "handshake").await?;

        let handshake = Handshake::from_bytes(&buf).map_err(|e| match e {
            BittorrentError::HandshakeMismatch(reason) => {
                BittorrentError::HandshakeMismatch(format!("{}: {}", self.peer, reason))
            }
            other => other,
        })?;

        if &handshake.info_hash != info_hash {
            return Err(BittorrentError::HandshakeMismatch(format!(
                "{}: info hash {} does not match {}",
                self.peer,
                hex::encode(handshake.info_hash),
                hex::encode(info_hash)
            )));
        }

        debug!(
            "Received handshake from {} (peer id {})",
            self.peer,
            hex::encode(handshake.peer_id)
        );
        self.peer_id = Some(handshake.peer_id);
        Ok(handshake)
    }

    /// Send a message to the peer
    pub async fn send_message(&mut self, message: &PeerMessage) -> Result<()> {
        self.stream.write_all(&message.to_bytes()).await?;
        self.stream.flush().await?;

        match message {
            PeerMessage::Choke => self.state.am_choking = true,
            PeerMessage::Unchoke => self.state.am_choking = false,
            PeerMessage::Interested => self.state.am_interested = true,
            PeerMessage::NotInterested => self.state.am_interested = false,
            _ => {}
        }

        debug!("Sent {} to {}", message.message_type(), self.peer);
        Ok(())
    }

    /// Receive the next message from the peer, skipping keep-alives
    pub async fn receive_message(&mut self) -> Result<PeerMessage> {
        let length = loop {
            let mut length_buf = [0u8; 4];
            self.read_exact(&mut length_buf, "length prefix").await?;

            match u32::from_be_bytes(length_buf) as usize {
                0 => trace!("Keep-alive from {}", self.peer),
                n => break n,
            }
        };

        if length > MAX_FRAME_LEN {
            return Err(BittorrentError::ProtocolViolation(format!(
                "{}: frame of {} bytes exceeds limit of {}",
                self.peer, length, MAX_FRAME_LEN
            )));
        }

        let mut frame = vec![0u8; length];
        self.read_exact(&mut frame, "message body").await?;

        let message = PeerMessage::from_frame(frame[0], &frame[1..])?;
        self.handle_message(&message);

        debug!("Received {} from {}", message.message_type(), self.peer);
        Ok(message)
    }

    /// `read_exact` with the read deadline applied; a stream that ends early
    /// is reported as a truncated message
    async fn read_exact(&mut self, buf: &mut [u8], what: &str) -> Result<()> {
        let read = self.stream.read_exact(buf);
        let outcome = match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, read).await.map_err(|_| {
                BittorrentError::Timeout(format!(
                    "{}: no {} within {:?}",
                    self.peer, what, limit
                ))
            })?,
            None => read.await,
        };

        match outcome {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(
                BittorrentError::TruncatedMessage(format!(
                    "{}: stream ended while reading {} ({} bytes expected)",
                    self.peer,
                    what,
                    buf.len()
                )),
            ),
            Err(e) => Err(e.into()),
        }
    }

    fn handle_message(&mut self, message: &PeerMessage) {
        match message {
            PeerMessage::Choke => self.state.peer_choking = true,
            PeerMessage::Unchoke => self.state.peer_choking = false,
            PeerMessage::Interested => self.state.peer_interested = true,
            PeerMessage::NotInterested => self.state.peer_interested = false,
            PeerMessage::Bitfield { bitfield } => {
                self.bitfield = Some(bitfield.clone());
            }
            _ => {}
        }
    }

    /// Check if the peer advertised a specific piece
    pub fn has_piece(&self, piece_index: usize) -> bool {
        if let Some(bitfield) = &self.bitfield {
            let byte_index = piece_index / 8;
            let bit_index = 7 - (piece_index % 8);

            if byte_index < bitfield.len() {
                return (bitfield[byte_index] >> bit_index) & 1 == 1;
            }
        }
        false
    }

    pub fn state(&self) -> &PeerState {
        &self.state
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn peer_id(&self) -> Option<&[u8; 20]> {
        self.peer_id.as_ref()
    }
}
