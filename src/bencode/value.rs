use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::BTreeMap;

/// A decoded bencode value.
///
/// Dictionaries are kept in a `BTreeMap` so that iteration, and therefore
/// encoding, always walks keys in ascending byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BencodeValue {
    /// Byte string: <length>:<contents>
    ByteString(Vec<u8>),
    /// Integer: i<number>e
    Integer(i64),
    /// List: l<values>e
    List(Vec<BencodeValue>),
    /// Dictionary: d<key-value pairs>e
    Dictionary(BTreeMap<Vec<u8>, BencodeValue>),
}

impl BencodeValue {
    /// Try to get this value as an integer
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BencodeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get this value as a byte string
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::ByteString(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a UTF-8 string
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, BencodeValue>> {
        match self {
            BencodeValue::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    /// Get a value from a dictionary by key
    pub fn dict_get(&self, key: &[u8]) -> Option<&BencodeValue> {
        self.as_dict()?.get(key)
    }

    /// Name of the variant, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            BencodeValue::ByteString(_) => "byte string",
            BencodeValue::Integer(_) => "integer",
            BencodeValue::List(_) => "list",
            BencodeValue::Dictionary(_) => "dictionary",
        }
    }
}

impl From<&str> for BencodeValue {
    fn from(s: &str) -> Self {
        BencodeValue::ByteString(s.as_bytes().to_vec())
    }
}

// JSON rendering for the `decode` command. Byte strings are shown as lossy
// UTF-8 since JSON has no binary type.
impl Serialize for BencodeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            BencodeValue::ByteString(s) => serializer.serialize_str(&String::from_utf8_lossy(s)),
            BencodeValue::Integer(i) => serializer.serialize_i64(*i),
            BencodeValue::List(list) => {
                let mut seq = serializer.serialize_seq(Some(list.len()))?;
                for item in list {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            BencodeValue::Dictionary(dict) => {
                let mut map = serializer.serialize_map(Some(dict.len()))?;
                for (key, value) in dict {
                    map.serialize_entry(&String::from_utf8_lossy(key), value)?;
                }
                map.end()
            }
        }
    }
}
