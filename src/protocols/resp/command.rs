//! Request encoding for the commands the benchmark issues.
//!
//! Requests are multi-bulk frames: an array header carrying the element
//! count, then one length-prefixed bulk string per element. Keys and values
//! are written verbatim; they must not contain `\r\n`.

use bytes::{BufMut, Bytes, BytesMut};

/// A single request issued by a worker
#[derive(Debug, Clone, PartialEq)]
pub enum Command<'a> {
    Set { key: &'a str, value: &'a str },
    Get { key: &'a str },
}

impl Command<'_> {
    pub fn encode(&self) -> Bytes {
        match self {
            Command::Set { key, value } => encode_set(key, value),
            Command::Get { key } => encode_get(key),
        }
    }
}

/// `*3\r\n$3\r\nSET\r\n$<klen>\r\n<key>\r\n$<vlen>\r\n<value>\r\n`
pub fn encode_set(key: &str, value: &str) -> Bytes {
    encode_request(&[b"SET", key.as_bytes(), value.as_bytes()])
}

/// `*2\r\n$3\r\nGET\r\n$<klen>\r\n<key>\r\n`
pub fn encode_get(key: &str) -> Bytes {
    encode_request(&[b"GET", key.as_bytes()])
}

fn encode_request(parts: &[&[u8]]) -> Bytes {
    let payload: usize = parts.iter().map(|p| p.len() + 16).sum();
    let mut buf = BytesMut::with_capacity(payload + 16);

    buf.put_u8(b'*');
    buf.put_slice(parts.len().to_string().as_bytes());
    buf.put_slice(b"\r\n");
    for part in parts {
        buf.put_u8(b'$');
        buf.put_slice(part.len().to_string().as_bytes());
        buf.put_slice(b"\r\n");
        buf.put_slice(part);
        buf.put_slice(b"\r\n");
    }

    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::resp::parser::{parse, Frame, ParseResult};

    fn decode(bytes: &[u8]) -> Vec<Vec<u8>> {
        match parse(bytes) {
            ParseResult::Complete(Frame::Array(Some(frames)), consumed) => {
                assert_eq!(consumed, bytes.len(), "trailing bytes after frame");
                frames
                    .iter()
                    .map(|f| f.as_bulk().expect("bulk element").to_vec())
                    .collect()
            }
            other => panic!("Expected array frame, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_set_exact_bytes() {
        assert_eq!(
            &encode_set("key_0_0", "value_0")[..],
            b"*3\r\n$3\r\nSET\r\n$7\r\nkey_0_0\r\n$7\r\nvalue_0\r\n"
        );
    }

    #[test]
    fn test_encode_get_exact_bytes() {
        assert_eq!(
            &encode_get("key_12_345")[..],
            b"*2\r\n$3\r\nGET\r\n$10\r\nkey_12_345\r\n"
        );
    }

    #[test]
    fn test_encoded_frames_decode_back() {
        let cases = [
            ("k", "v"),
            ("key_9_99999", "value_99999"),
            ("a much longer key with spaces", "x"),
        ];
        for (key, value) in cases {
            assert_eq!(
                decode(&encode_set(key, value)),
                vec![b"SET".to_vec(), key.as_bytes().to_vec(), value.as_bytes().to_vec()]
            );
            assert_eq!(
                decode(&encode_get(key)),
                vec![b"GET".to_vec(), key.as_bytes().to_vec()]
            );
        }
    }

    #[test]
    fn test_lengths_are_byte_lengths() {
        let key = "clé";
        let encoded = encode_get(key);
        assert!(encoded.starts_with(b"*2\r\n$3\r\nGET\r\n$4\r\n"));
        assert_eq!(decode(&encoded)[1], key.as_bytes());
    }

    #[test]
    fn test_command_dispatch() {
        let set = Command::Set { key: "a", value: "b" };
        let get = Command::Get { key: "a" };
        assert_eq!(set.encode(), encode_set("a", "b"));
        assert_eq!(get.encode(), encode_get("a"));
    }
}
