/// Events sent to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    Started,
    Completed,
}

impl TrackerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::Started => "started",
            TrackerEvent::Completed => "completed",
        }
    }
}

/// Request parameters for tracker communication
#[derive(Debug, Clone)]
pub struct TrackerRequest {
    /// SHA1 hash of the info dictionary
    pub info_hash: [u8; 20],
    /// Our peer ID
    pub peer_id: [u8; 20],
    /// Port this peer is listening on
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    /// Number of bytes left to download
    pub left: u64,
    pub event: Option<TrackerEvent>,
    /// Request compact peer list format
    pub compact: bool,
}

impl TrackerRequest {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20], port: u16, left: u64) -> Self {
        Self {
            info_hash,
            peer_id,
            port,
            uploaded: 0,
            downloaded: 0,
            left,
            event: Some(TrackerEvent::Started),
            compact: true,
        }
    }

    /// Build the announce query string. The binary hashes are
    /// percent-encoded byte by byte, so this must not go through a
    /// form encoder a second time.
    pub fn to_query_string(&self) -> String {
        let mut params = vec![
            format!("info_hash={}", percent_encode(&self.info_hash)),
            format!("peer_id={}", percent_encode(&self.peer_id)),
            format!("port={}", self.port),
            format!("uploaded={}", self.uploaded),
            format!("downloaded={}", self.downloaded),
            format!("left={}", self.left),
            format!("compact={}", if self.compact { 1 } else { 0 }),
        ];

        if let Some(event) = &self.event {
            params.push(format!("event={}", event.as_str()));
        }

        params.join("&")
    }
}

/// URL-encode raw bytes, leaving unreserved characters as-is
fn percent_encode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_encode() {
        assert_eq!(percent_encode(b"-BF0001-"), "-BF0001-");
        assert_eq!(percent_encode(&[0x00, 0xff, b' ', b'%']), "%00%FF%20%25");
    }

    #[test]
    fn test_query_string() {
        let mut request = TrackerRequest::new([0xab; 20], *b"-BF0001-abcdefghijkl", 6881, 92063);
        request.event = None;

        let query = request.to_query_string();
        assert!(query.starts_with(&format!("info_hash={}&", "%AB".repeat(20))));
        assert!(query.contains("peer_id=-BF0001-abcdefghijkl&"));
        assert!(query.contains("port=6881"));
        assert!(query.contains("left=92063"));
        assert!(query.ends_with("compact=1"));
    }
}
