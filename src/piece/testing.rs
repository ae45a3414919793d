use crate::bencode::{encode, BencodeValue};
use crate::error::{BittorrentError, Result};
use crate::peer::{BlockInfo, Handshake, PeerMessage, HANDSHAKE_LEN};
use crate::torrent::{parse_torrent, TorrentMetadata};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub const OUR_ID: [u8; 20] = *b"-BF0001-testtesttest";
pub const REMOTE_ID: [u8; 20] = *b"-XX0001-remoteremote";

/// Split a failed download into the peer, the piece and the underlying error
pub fn peer_failure<T: std::fmt::Debug>(result: Result<T>) -> (String, u32, BittorrentError) {
    match result {
        Err(BittorrentError::PeerFailure {
            peer,
            piece_index,
            source,
        }) => (peer, piece_index, *source),
        other => panic!("expected a peer failure, got {:?}", other),
    }
}

pub fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn metadata_for(content: &[u8], piece_length: usize) -> TorrentMetadata {
    let pieces: Vec<u8> = content
        .chunks(piece_length)
        .flat_map(|chunk| Sha1::digest(chunk).to_vec())
        .collect();

    let mut info = BTreeMap::new();
    info.insert(b"length".to_vec(), BencodeValue::Integer(content.len() as i64));
    info.insert(b"name".to_vec(), BencodeValue::from("test.bin"));
    info.insert(
        b"piece length".to_vec(),
        BencodeValue::Integer(piece_length as i64),
    );
    info.insert(b"pieces".to_vec(), BencodeValue::ByteString(pieces));

    let mut root = BTreeMap::new();
    root.insert(b"announce".to_vec(), BencodeValue::from("http://tracker.test/announce"));
    root.insert(b"info".to_vec(), BencodeValue::Dictionary(info));

    parse_torrent(&encode(&BencodeValue::Dictionary(root))).unwrap()
}

/// Scripted remote peer: answers the handshake with `reply_hash`, writes
/// `before_interested`, waits for `interested`, writes `after_interested`,
/// then answers every request with `respond(block)`.
pub async fn run_peer<F>(
    mut stream: DuplexStream,
    reply_hash: [u8; 20],
    before_interested: Vec<Vec<u8>>,
    after_interested: Vec<Vec<u8>>,
    respond: F,
) where
    F: Fn(BlockInfo) -> Vec<u8>,
{
    let mut handshake = [0u8; HANDSHAKE_LEN];
    if stream.read_exact(&mut handshake).await.is_err() {
        return;
    }
    let reply = Handshake::new(reply_hash, REMOTE_ID).to_bytes();
    let _ = stream.write_all(&reply).await;

    for frame in before_interested {
        let _ = stream.write_all(&frame).await;
    }

    let mut interested = [0u8; 5];
    if stream.read_exact(&mut interested).await.is_err() {
        return;
    }
    assert_eq!(interested, [0, 0, 0, 1, 2]);

    for frame in after_interested {
        let _ = stream.write_all(&frame).await;
    }

    loop {
        let mut request = [0u8; 17];
        if stream.read_exact(&mut request).await.is_err() {
            return;
        }
        let block = match PeerMessage::from_frame(request[4], &request[5..]).unwrap() {
            PeerMessage::Request { block } => block,
            other => panic!("expected request, got {:?}", other),
        };
        let _ = stream.write_all(&respond(block)).await;
    }
}

pub fn serve_content(content: Vec<u8>, piece_length: usize) -> impl Fn(BlockInfo) -> Vec<u8> {
    move |block| {
        let start = block.piece_index as usize * piece_length + block.offset as usize;
        PeerMessage::Piece {
            piece_index: block.piece_index,
            offset: block.offset,
            data: content[start..start + block.length as usize].to_vec(),
        }
        .to_bytes()
    }
}

pub fn bitfield() -> Vec<u8> {
    PeerMessage::Bitfield {
        bitfield: vec![0xff],
    }
    .to_bytes()
}

pub fn unchoke() -> Vec<u8> {
    PeerMessage::Unchoke.to_bytes()
}
