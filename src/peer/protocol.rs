use crate::error::{BittorrentError, Result};

pub const PROTOCOL_STRING: &[u8] = b"BitTorrent protocol";

/// Total size of a handshake on the wire: 1 + 19 + 8 + 20 + 20
pub const HANDSHAKE_LEN: usize = 68;

/// Handshake message for peer wire protocol
/// Format: <pstrlen><pstr><reserved><info_hash><peer_id>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    /// Serialize handshake to bytes. Reserved bytes are always zero.
    pub fn to_bytes(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PROTOCOL_STRING.len() as u8;
        buf[1..20].copy_from_slice(PROTOCOL_STRING);
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Deserialize a handshake, rejecting any other protocol.
    /// Reserved bytes from the remote side are ignored.
    pub fn from_bytes(data: &[u8; HANDSHAKE_LEN]) -> Result<Self> {
        let pstrlen = data[0] as usize;
        if pstrlen != PROTOCOL_STRING.len() {
            return Err(BittorrentError::HandshakeMismatch(format!(
                "protocol string length {}, expected {}",
                pstrlen,
                PROTOCOL_STRING.len()
            )));
        }

        if &data[1..20] != PROTOCOL_STRING {
            return Err(BittorrentError::HandshakeMismatch(format!(
                "unexpected protocol {:?}",
                String::from_utf8_lossy(&data[1..20])
            )));
        }

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        Ok(Handshake { info_hash, peer_id })
    }
}
