use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Size of one compact peer record: 4 bytes IPv4 + 2 bytes port
pub const COMPACT_PEER_LEN: usize = 6;

/// A candidate peer returned by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Peer {
    pub addr: SocketAddr,
}

impl Peer {
    /// Parse a peer from compact format (6 bytes: big-endian IP then port)
    pub fn from_compact(data: &[u8; COMPACT_PEER_LEN]) -> Self {
        let ip = Ipv4Addr::new(data[0], data[1], data[2], data[3]);
        let port = u16::from_be_bytes([data[4], data[5]]);

        Self {
            addr: SocketAddr::V4(SocketAddrV4::new(ip, port)),
        }
    }

    /// Parse a flat concatenation of compact peer records.
    /// Returns `None` if the length is not a multiple of 6.
    pub fn from_compact_list(data: &[u8]) -> Option<Vec<Self>> {
        if data.len() % COMPACT_PEER_LEN != 0 {
            return None;
        }

        Some(
            data.chunks_exact(COMPACT_PEER_LEN)
                .map(|chunk| {
                    let mut record = [0u8; COMPACT_PEER_LEN];
                    record.copy_from_slice(chunk);
                    Self::from_compact(&record)
                })
                .collect(),
        )
    }
}
