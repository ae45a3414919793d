use crate::error::{BittorrentError, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

/// A block request within a piece: used by `request` and `cancel`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Piece index
    pub piece_index: u32,
    /// Byte offset within the piece
    pub offset: u32,
    /// Length of the block
    pub length: u32,
}

impl BlockInfo {
    pub fn new(piece_index: u32, offset: u32, length: u32) -> Self {
        Self {
            piece_index,
            offset,
            length,
        }
    }
}

/// The type byte of a framed message
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = BittorrentError;

    fn try_from(id: u8) -> Result<Self> {
        use MessageType::*;
        Ok(match id {
            0 => Choke,
            1 => Unchoke,
            2 => Interested,
            3 => NotInterested,
            4 => Have,
            5 => Bitfield,
            6 => Request,
            7 => Piece,
            8 => Cancel,
            n => return Err(BittorrentError::UnknownMessageType(n)),
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Messages exchanged between peers after the handshake.
/// Keep-alives never surface here; the connection skips them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    /// Indicate possession of a piece
    Have { piece_index: u32 },
    /// Bitfield of available pieces, high bit of the first byte is piece 0
    Bitfield { bitfield: Vec<u8> },
    /// Request a block
    Request { block: BlockInfo },
    /// Deliver a block
    Piece {
        piece_index: u32,
        offset: u32,
        data: Vec<u8>,
    },
    /// Cancel a block request
    Cancel { block: BlockInfo },
}

impl PeerMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            PeerMessage::Choke => MessageType::Choke,
            PeerMessage::Unchoke => MessageType::Unchoke,
            PeerMessage::Interested => MessageType::Interested,
            PeerMessage::NotInterested => MessageType::NotInterested,
            PeerMessage::Have { .. } => MessageType::Have,
            PeerMessage::Bitfield { .. } => MessageType::Bitfield,
            PeerMessage::Request { .. } => MessageType::Request,
            PeerMessage::Piece { .. } => MessageType::Piece,
            PeerMessage::Cancel { .. } => MessageType::Cancel,
        }
    }

    /// Serialize message to bytes
    /// Format: <length prefix><message ID><payload>, where the prefix is 1 + payload length
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = BytesMut::new();

        match self {
            PeerMessage::Choke
            | PeerMessage::Unchoke
            | PeerMessage::Interested
            | PeerMessage::NotInterested => {}
            PeerMessage::Have { piece_index } => payload.put_u32(*piece_index),
            PeerMessage::Bitfield { bitfield } => payload.put_slice(bitfield),
            PeerMessage::Request { block } | PeerMessage::Cancel { block } => {
                payload.put_u32(block.piece_index);
                payload.put_u32(block.offset);
                payload.put_u32(block.length);
            }
            PeerMessage::Piece {
                piece_index,
                offset,
                data,
            } => {
                payload.put_u32(*piece_index);
                payload.put_u32(*offset);
                payload.put_slice(data);
            }
        }

        let mut buf = BytesMut::with_capacity(5 + payload.len());
        buf.put_u32(1 + payload.len() as u32);
        buf.put_u8(self.message_type() as u8);
        buf.put_slice(&payload);
        buf.to_vec()
    }

    /// Build a message from its type byte and the payload that followed it
    pub fn from_frame(id: u8, mut payload: &[u8]) -> Result<Self> {
        let kind = MessageType::try_from(id)?;

        let expect_len = |expected: usize, payload: &[u8]| {
            if payload.len() != expected {
                return Err(BittorrentError::ProtocolViolation(format!(
                    "{} payload is {} bytes, expected {}",
                    kind,
                    payload.len(),
                    expected
                )));
            }
            Ok(())
        };

        let message = match kind {
            MessageType::Choke => {
                expect_len(0, payload)?;
                PeerMessage::Choke
            }
            MessageType::Unchoke => {
                expect_len(0, payload)?;
                PeerMessage::Unchoke
            }
            MessageType::Interested => {
                expect_len(0, payload)?;
                PeerMessage::Interested
            }
            MessageType::NotInterested => {
                expect_len(0, payload)?;
                PeerMessage::NotInterested
            }
            MessageType::Have => {
                expect_len(4, payload)?;
                PeerMessage::Have {
                    piece_index: payload.get_u32(),
                }
            }
            MessageType::Bitfield => PeerMessage::Bitfield {
                bitfield: payload.to_vec(),
            },
            MessageType::Request | MessageType::Cancel => {
                expect_len(12, payload)?;
                let block = BlockInfo::new(payload.get_u32(), payload.get_u32(), payload.get_u32());
                if kind == MessageType::Request {
                    PeerMessage::Request { block }
                } else {
                    PeerMessage::Cancel { block }
                }
            }
            MessageType::Piece => {
                if payload.len() < 8 {
                    return Err(BittorrentError::ProtocolViolation(format!(
                        "Piece payload is {} bytes, expected at least 8",
                        payload.len()
                    )));
                }
                let piece_index = payload.get_u32();
                let offset = payload.get_u32();
                PeerMessage::Piece {
                    piece_index,
                    offset,
                    data: payload.to_vec(),
                }
            }
        };

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reparse(message: &PeerMessage) -> PeerMessage {
        let bytes = message.to_bytes();
        let length = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(length, bytes.len() - 4);
        PeerMessage::from_frame(bytes[4], &bytes[5..]).unwrap()
    }

    #[test]
    fn test_length_prefix_counts_type_byte() {
        assert_eq!(PeerMessage::Interested.to_bytes(), vec![0, 0, 0, 1, 2]);
        assert_eq!(
            PeerMessage::Have { piece_index: 7 }.to_bytes(),
            vec![0, 0, 0, 5, 4, 0, 0, 0, 7]
        );
    }

    #[test]
    fn test_request_layout() {
        let bytes = PeerMessage::Request {
            block: BlockInfo::new(1, 16384, 100),
        }
        .to_bytes();
        assert_eq!(
            bytes,
            vec![0, 0, 0, 13, 6, 0, 0, 0, 1, 0, 0, 0x40, 0, 0, 0, 0, 100]
        );
    }

    #[test]
    fn test_piece_payload_split() {
        let message = PeerMessage::Piece {
            piece_index: 3,
            offset: 16384,
            data: b"block".to_vec(),
        };
        assert_eq!(reparse(&message), message);
    }

    #[test]
    fn test_unknown_type() {
        assert!(matches!(
            PeerMessage::from_frame(20, &[]),
            Err(BittorrentError::UnknownMessageType(20))
        ));
    }

    #[test]
    fn test_state_messages_carry_no_payload() {
        assert_eq!(PeerMessage::from_frame(1, &[]).unwrap(), PeerMessage::Unchoke);
        for id in 0..=3 {
            assert!(matches!(
                PeerMessage::from_frame(id, &[0]),
                Err(BittorrentError::ProtocolViolation(_))
            ));
        }
    }

    #[test]
    fn test_short_payloads_rejected() {
        assert!(matches!(
            PeerMessage::from_frame(4, &[0, 0]),
            Err(BittorrentError::ProtocolViolation(_))
        ));
        assert!(matches!(
            PeerMessage::from_frame(6, &[0; 8]),
            Err(BittorrentError::ProtocolViolation(_))
        ));
        assert!(matches!(
            PeerMessage::from_frame(7, &[0; 7]),
            Err(BittorrentError::ProtocolViolation(_))
        ));
    }
}
