use super::Peer;
use crate::bencode::BencodeValue;
use crate::error::{BittorrentError, Result};

/// Response from a tracker
#[derive(Debug, Clone)]
pub struct TrackerResponse {
    /// Interval in seconds to wait before next request
    pub interval: u64,
    pub min_interval: Option<u64>,
    /// Number of seeders
    pub complete: Option<u64>,
    /// Number of leechers
    pub incomplete: Option<u64>,
    pub peers: Vec<Peer>,
}

impl TrackerResponse {
    pub fn from_bencode(value: &BencodeValue) -> Result<Self> {
        let dict = value.as_dict().ok_or_else(|| {
            BittorrentError::TrackerError(format!("Response must be a dict, got {}", value.kind()))
        })?;

        // A failure reason replaces the rest of the response
        if let Some(failure) = dict.get(b"failure reason".as_ref()) {
            let reason = failure
                .as_bytes()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_else(|| "unknown failure".to_string());
            return Err(BittorrentError::AnnounceFailure(reason));
        }

        let interval = dict
            .get(b"interval".as_ref())
            .and_then(|v| v.as_integer())
            .and_then(|i| u64::try_from(i).ok())
            .ok_or_else(|| {
                BittorrentError::TrackerError("Missing or invalid 'interval' field".to_string())
            })?;

        let optional = |key: &[u8]| {
            dict.get(key)
                .and_then(|v| v.as_integer())
                .and_then(|i| u64::try_from(i).ok())
        };

        let compact = dict
            .get(b"peers".as_ref())
            .and_then(|v| v.as_bytes())
            .ok_or_else(|| {
                BittorrentError::TrackerError("Missing compact 'peers' field".to_string())
            })?;

        let peers = Peer::from_compact_list(compact).ok_or_else(|| {
            BittorrentError::TrackerError(format!(
                "'peers' length {} is not a multiple of 6",
                compact.len()
            ))
        })?;

        Ok(TrackerResponse {
            interval,
            min_interval: optional(b"min interval"),
            complete: optional(b"complete"),
            incomplete: optional(b"incomplete"),
            peers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decode;

    #[test]
    fn test_compact_peers() {
        let mut body = b"d8:completei2e8:intervali1800e5:peers12:".to_vec();
        body.extend_from_slice(&[192, 168, 1, 10, 0x1a, 0xe1, 10, 0, 0, 1, 0xc8, 0xd5]);
        body.push(b'e');

        let response = TrackerResponse::from_bencode(&decode(&body).unwrap()).unwrap();
        assert_eq!(response.interval, 1800);
        assert_eq!(response.complete, Some(2));
        assert_eq!(response.incomplete, None);
        assert_eq!(response.peers.len(), 2);
        assert_eq!(response.peers[0].addr.to_string(), "192.168.1.10:6881");
        assert_eq!(response.peers[1].addr.to_string(), "10.0.0.1:51413");
    }

    #[test]
    fn test_failure_reason() {
        let value = decode(b"d14:failure reason12:unregisterede").unwrap();
        match TrackerResponse::from_bencode(&value) {
            Err(BittorrentError::AnnounceFailure(reason)) => assert_eq!(reason, "unregistered"),
            other => panic!("expected announce failure, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_peer_blob() {
        let value = decode(b"d8:intervali60e5:peers5:abcdee").unwrap();
        assert!(matches!(
            TrackerResponse::from_bencode(&value),
            Err(BittorrentError::TrackerError(_))
        ));

        let missing = decode(b"d8:intervali60ee").unwrap();
        assert!(TrackerResponse::from_bencode(&missing).is_err());
    }
}
