use super::BencodeValue;
use crate::error::{BittorrentError, Result};
use std::collections::BTreeMap;

/// Deepest list/dictionary nesting the decoder will follow
const MAX_DEPTH: usize = 256;

/// Decode a complete bencoded buffer into a BencodeValue.
///
/// The whole input must be consumed by exactly one value.
pub fn decode(data: &[u8]) -> Result<BencodeValue> {
    let mut decoder = Decoder { data, pos: 0 };
    let value = decoder.decode_value(0)?;

    if decoder.pos != data.len() {
        return Err(malformed(format!(
            "{} trailing bytes after value",
            data.len() - decoder.pos
        )));
    }

    Ok(value)
}

fn malformed(msg: impl Into<String>) -> BittorrentError {
    BittorrentError::MalformedEncoding(msg.into())
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn peek(&self) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| malformed("Unexpected end of input"))
    }

    fn decode_value(&mut self, depth: usize) -> Result<BencodeValue> {
        if depth > MAX_DEPTH {
            return Err(malformed("Nesting too deep"));
        }

        match self.peek()? {
            b'i' => self.decode_integer(),
            b'l' => self.decode_list(depth),
            b'd' => self.decode_dict(depth),
            b'0'..=b'9' => self.decode_string(),
            c => Err(malformed(format!(
                "Invalid bencode token {:?} at offset {}",
                c as char, self.pos
            ))),
        }
    }

    /// Consume bytes up to `terminator`, returning them without the terminator
    fn read_until(&mut self, terminator: u8) -> Result<&'a [u8]> {
        let start = self.pos;
        let len = self.data[start..]
            .iter()
            .position(|&b| b == terminator)
            .ok_or_else(|| {
                malformed(format!(
                    "Missing {:?} terminator after offset {}",
                    terminator as char, start
                ))
            })?;

        self.pos = start + len + 1;
        Ok(&self.data[start..start + len])
    }

    fn decode_integer(&mut self) -> Result<BencodeValue> {
        self.pos += 1; // Skip 'i'

        let digits = self.read_until(b'e')?;
        let unsigned = digits.strip_prefix(b"-").unwrap_or(digits);
        if unsigned.is_empty() || !unsigned.iter().all(u8::is_ascii_digit) {
            return Err(malformed(format!(
                "Invalid integer {:?}",
                String::from_utf8_lossy(digits)
            )));
        }

        // Only ASCII was accepted above
        let num = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| {
                malformed(format!(
                    "Integer out of range: {}",
                    String::from_utf8_lossy(digits)
                ))
            })?;

        Ok(BencodeValue::Integer(num))
    }

    fn decode_string(&mut self) -> Result<BencodeValue> {
        let digits = self.read_until(b':')?;
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(malformed(format!(
                "Invalid string length {:?}",
                String::from_utf8_lossy(digits)
            )));
        }

        let len = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| malformed("Invalid string length"))?;

        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                malformed(format!(
                    "String of length {} exceeds input at offset {}",
                    len, self.pos
                ))
            })?;

        let bytes = self.data[self.pos..end].to_vec();
        self.pos = end;

        Ok(BencodeValue::ByteString(bytes))
    }

    fn decode_list(&mut self, depth: usize) -> Result<BencodeValue> {
        self.pos += 1; // Skip 'l'

        let mut list = Vec::new();
        while self.peek()? != b'e' {
            list.push(self.decode_value(depth + 1)?);
        }
        self.pos += 1;

        Ok(BencodeValue::List(list))
    }

    fn decode_dict(&mut self, depth: usize) -> Result<BencodeValue> {
        self.pos += 1; // Skip 'd'

        let mut dict = BTreeMap::new();
        while self.peek()? != b'e' {
            let key = match self.decode_value(depth + 1)? {
                BencodeValue::ByteString(k) => k,
                other => {
                    return Err(malformed(format!(
                        "Dictionary key must be a byte string, got {}",
                        other.kind()
                    )))
                }
            };

            let value = self.decode_value(depth + 1)?;
            // Last write wins on duplicate keys
            dict.insert(key, value);
        }
        self.pos += 1;

        Ok(BencodeValue::Dictionary(dict))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_malformed(input: &[u8]) {
        match decode(input) {
            Err(BittorrentError::MalformedEncoding(_)) => {}
            other => panic!("expected MalformedEncoding for {:?}, got {:?}", input, other),
        }
    }

    #[test]
    fn test_decode_string() {
        assert_eq!(decode(b"5:hello").unwrap(), BencodeValue::from("hello"));
        assert_eq!(decode(b"0:").unwrap(), BencodeValue::ByteString(vec![]));
    }

    #[test]
    fn test_decode_binary_string() {
        let value = decode(b"4:\xff\x00\xfe\x01").unwrap();
        assert_eq!(value.as_bytes(), Some(&[0xff, 0x00, 0xfe, 0x01][..]));
        assert_eq!(value.as_str(), None);
    }

    #[test]
    fn test_decode_integer() {
        assert_eq!(decode(b"i-42e").unwrap(), BencodeValue::Integer(-42));
        assert_eq!(decode(b"i0e").unwrap(), BencodeValue::Integer(0));
        assert_eq!(
            decode(b"i9223372036854775807e").unwrap(),
            BencodeValue::Integer(i64::MAX)
        );
    }

    #[test]
    fn test_decode_list() {
        let value = decode(b"l4:spam4:eggse").unwrap();
        assert_eq!(
            value,
            BencodeValue::List(vec![BencodeValue::from("spam"), BencodeValue::from("eggs")])
        );
    }

    #[test]
    fn test_decode_dict() {
        let value = decode(b"d3:cow3:moo4:spam4:eggse").unwrap();
        assert_eq!(value.dict_get(b"cow"), Some(&BencodeValue::from("moo")));
        assert_eq!(value.dict_get(b"spam"), Some(&BencodeValue::from("eggs")));
        assert_eq!(value.as_dict().unwrap().len(), 2);
    }

    #[test]
    fn test_decode_empty_containers() {
        assert_eq!(decode(b"le").unwrap(), BencodeValue::List(vec![]));
        assert_eq!(
            decode(b"de").unwrap(),
            BencodeValue::Dictionary(BTreeMap::new())
        );
    }

    #[test]
    fn test_decode_unsorted_and_duplicate_keys() {
        let value = decode(b"d1:bi1e1:ai2e1:bi3ee").unwrap();
        let dict = value.as_dict().unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(value.dict_get(b"a"), Some(&BencodeValue::Integer(2)));
        assert_eq!(value.dict_get(b"b"), Some(&BencodeValue::Integer(3)));
    }

    #[test]
    fn test_decode_errors() {
        assert_malformed(b"");
        assert_malformed(b"5:hell");
        assert_malformed(b"i42");
        assert_malformed(b"ie");
        assert_malformed(b"i-e");
        assert_malformed(b"i4x2e");
        assert_malformed(b"i+4e");
        assert_malformed(b"l4:spam");
        assert_malformed(b"d3:cow");
        assert_malformed(b"di1e3:mooe");
        assert_malformed(b"x");
        assert_malformed(b"3x:abc");
        assert_malformed(b"i1ei2e");
        assert_malformed(b"i99999999999999999999e");
    }

    #[test]
    fn test_decode_depth_limit() {
        let mut deep = vec![b'l'; MAX_DEPTH + 2];
        deep.extend(vec![b'e'; MAX_DEPTH + 2]);
        assert_malformed(&deep);

        let mut ok = vec![b'l'; 10];
        ok.extend(vec![b'e'; 10]);
        assert!(decode(&ok).is_ok());
    }
}
