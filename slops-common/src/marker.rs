//! `MessageSetMarker`: the payload of the `SyncEvent` header stamped on a
//! hand-off control record.
//!
//! The original Go implementation (`internal/msgSet.go`) encoded this with
//! `fmt.Fprintln`/`Fscanln`, a whitespace-delimited text format that breaks
//! if a key ever contains whitespace. This codec is self-describing instead:
//! every variable-length field carries an explicit `u32` length prefix, so
//! decoding never depends on delimiter scanning.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSetMarker {
    pub key: String,
    pub src_partition: i32,
    pub src_index: i32,
    pub dest_partition: i32,
    pub dest_index: i32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarkerError {
    #[error("marker buffer truncated: expected at least {expected} more bytes, got {got}")]
    Truncated { expected: usize, got: usize },
    #[error("marker key is not valid UTF-8")]
    InvalidKeyEncoding,
    #[error("marker buffer has {0} trailing bytes after a complete record")]
    TrailingBytes(usize),
}

impl MessageSetMarker {
    /// Encoded layout: `u32 key_len | key bytes | i32 src_partition |
    /// i32 src_index | i32 dest_partition | i32 dest_index`, all integers
    /// big-endian.
    pub fn encode(&self) -> Vec<u8> {
        let key_bytes = self.key.as_bytes();
        let mut out = Vec::with_capacity(4 + key_bytes.len() + 4 * 4);
        out.extend_from_slice(&(key_bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(key_bytes);
        out.extend_from_slice(&self.src_partition.to_be_bytes());
        out.extend_from_slice(&self.src_index.to_be_bytes());
        out.extend_from_slice(&self.dest_partition.to_be_bytes());
        out.extend_from_slice(&self.dest_index.to_be_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, MarkerError> {
        let mut cursor = 0usize;
        let key_len = read_u32(buf, &mut cursor)? as usize;

        if buf.len() < cursor + key_len {
            return Err(MarkerError::Truncated {
                expected: key_len,
                got: buf.len() - cursor,
            });
        }
        let key = std::str::from_utf8(&buf[cursor..cursor + key_len])
            .map_err(|_| MarkerError::InvalidKeyEncoding)?
            .to_owned();
        cursor += key_len;

        let src_partition = read_i32(buf, &mut cursor)?;
        let src_index = read_i32(buf, &mut cursor)?;
        let dest_partition = read_i32(buf, &mut cursor)?;
        let dest_index = read_i32(buf, &mut cursor)?;

        if cursor != buf.len() {
            return Err(MarkerError::TrailingBytes(buf.len() - cursor));
        }

        Ok(MessageSetMarker {
            key,
            src_partition,
            src_index,
            dest_partition,
            dest_index,
        })
    }
}

fn read_u32(buf: &[u8], cursor: &mut usize) -> Result<u32, MarkerError> {
    let bytes = take(buf, cursor, 4)?;
    Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
}

fn read_i32(buf: &[u8], cursor: &mut usize) -> Result<i32, MarkerError> {
    let bytes = take(buf, cursor, 4)?;
    Ok(i32::from_be_bytes(bytes.try_into().unwrap()))
}

fn take<'a>(buf: &'a [u8], cursor: &mut usize, n: usize) -> Result<&'a [u8], MarkerError> {
    if buf.len() < *cursor + n {
        return Err(MarkerError::Truncated {
            expected: n,
            got: buf.len() - *cursor,
        });
    }
    let slice = &buf[*cursor..*cursor + n];
    *cursor += n;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MessageSetMarker {
        MessageSetMarker {
            key: "orders:42".to_string(),
            src_partition: 3,
            src_index: 108,
            dest_partition: 7,
            dest_index: 0,
        }
    }

    #[test]
    fn round_trips() {
        let marker = sample();
        let encoded = marker.encode();
        let decoded = MessageSetMarker::decode(&encoded).unwrap();
        assert_eq!(marker, decoded);
    }

    #[test]
    fn round_trips_key_with_whitespace_and_newlines() {
        let marker = MessageSetMarker {
            key: "order key\nwith\tstrange bytes ".to_string(),
            ..sample()
        };
        let encoded = marker.encode();
        assert_eq!(MessageSetMarker::decode(&encoded).unwrap(), marker);
    }

    #[test]
    fn rejects_truncated_buffer() {
        let marker = sample();
        let mut encoded = marker.encode();
        encoded.truncate(encoded.len() - 1);
        assert!(matches!(
            MessageSetMarker::decode(&encoded),
            Err(MarkerError::Truncated { .. })
        ));
    }

    #[test]
    fn rejects_trailing_bytes() {
        let marker = sample();
        let mut encoded = marker.encode();
        encoded.push(0xff);
        assert!(matches!(
            MessageSetMarker::decode(&encoded),
            Err(MarkerError::TrailingBytes(1))
        ));
    }

    #[test]
    fn rejects_invalid_key_utf8() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&4u32.to_be_bytes());
        buf.extend_from_slice(&[0xff, 0xff, 0xff, 0xff]);
        buf.extend_from_slice(&0i32.to_be_bytes());
        buf.extend_from_slice(&0i32.to_be_bytes());
        buf.extend_from_slice(&0i32.to_be_bytes());
        buf.extend_from_slice(&0i32.to_be_bytes());
        assert_eq!(
            MessageSetMarker::decode(&buf),
            Err(MarkerError::InvalidKeyEncoding)
        );
    }
}
