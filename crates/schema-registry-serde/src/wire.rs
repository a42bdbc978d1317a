//! Wire envelope shared with other registry-aware clients.
//!
//! ```text
//! +------+----------------+------------------------+-----------------+
//! | 0x00 | schema id (BE) | message indexes        | protobuf bytes  |
//! | 1 B  | 4 B            | zig-zag varints        | rest            |
//! +------+----------------+------------------------+-----------------+
//! ```
//!
//! The index array is a count followed by that many indexes. The common
//! case, the first top-level message `[0]`, is written as a single `0`.

use crate::error::{Error, Result};
use protobuf::{CodedInputStream, CodedOutputStream};

pub const MAGIC_BYTE: u8 = 0;

/// Magic byte plus schema id.
pub const HEADER_LEN: usize = 5;

/// A parsed envelope borrowing its payload from the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireEnvelope<'a> {
    pub schema_id: u32,
    /// Message-index path of the encoded type inside its schema file
    pub message_indexes: Vec<i32>,
    pub payload: &'a [u8],
    /// Offset of `payload` within the full input
    pub payload_offset: usize,
}

impl<'a> WireEnvelope<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let Some(&magic) = bytes.first() else {
            return Err(format_error(0, "empty payload"));
        };
        if magic != MAGIC_BYTE {
            return Err(format_error(
                0,
                format!("unknown magic byte 0x{magic:02x}, expected 0x{MAGIC_BYTE:02x}"),
            ));
        }
        if bytes.len() < HEADER_LEN {
            return Err(format_error(
                bytes.len(),
                format!("need {HEADER_LEN} header bytes, got {}", bytes.len()),
            ));
        }
        let schema_id = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);

        let rest = &bytes[HEADER_LEN..];
        let mut is = CodedInputStream::from_bytes(rest);

        let count = is
            .read_sint32()
            .map_err(|e| format_error(offset(&is), format!("bad message index count: {e}")))?;

        let message_indexes = if count == 0 {
            vec![0]
        } else {
            // Every index takes at least one byte.
            if count < 0 || count as usize > rest.len() {
                return Err(format_error(
                    HEADER_LEN,
                    format!("invalid message index count {count}"),
                ));
            }
            let mut indexes = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let at = offset(&is);
                let index = is
                    .read_sint32()
                    .map_err(|e| format_error(at, format!("bad message index: {e}")))?;
                if index < 0 {
                    return Err(format_error(at, format!("negative message index {index}")));
                }
                indexes.push(index);
            }
            indexes
        };

        let payload_offset = offset(&is);
        Ok(Self {
            schema_id,
            message_indexes,
            payload: &bytes[payload_offset..],
            payload_offset,
        })
    }
}

/// Frame an encoded message.
pub fn encode_envelope(schema_id: u32, message_indexes: &[i32], payload: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(HEADER_LEN + message_indexes.len() + 1 + payload.len());
    out.push(MAGIC_BYTE);
    out.extend_from_slice(&schema_id.to_be_bytes());
    out.extend_from_slice(&encode_message_indexes(message_indexes)?);
    out.extend_from_slice(payload);
    Ok(out)
}

fn offset(is: &CodedInputStream<'_>) -> usize {
    HEADER_LEN + is.pos() as usize
}

fn write_index(os: &mut CodedOutputStream<'_>, value: i32) -> Result<()> {
    os.write_sint32_no_tag(value)
        .map_err(|e| Error::Encode(format!("message index: {e}")))
}

fn encode_message_indexes(indexes: &[i32]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut os = CodedOutputStream::vec(&mut buf);
        if indexes.is_empty() || indexes == [0] {
            write_index(&mut os, 0)?;
        } else {
            write_index(&mut os, indexes.len() as i32)?;
            for &index in indexes {
                write_index(&mut os, index)?;
            }
        }
        os.flush()
            .map_err(|e| Error::Encode(format!("message index: {e}")))?;
    }
    Ok(buf)
}

fn format_error(offset: usize, message: impl Into<String>) -> Error {
    Error::Format {
        offset,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_message_uses_single_zero() {
        let bytes = encode_envelope(7, &[0], b"\x0a\x01a").unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0, 7, 0, 0x0a, 0x01, b'a']);

        let envelope = WireEnvelope::parse(&bytes).unwrap();
        assert_eq!(envelope.schema_id, 7);
        assert_eq!(envelope.message_indexes, vec![0]);
        assert_eq!(envelope.payload, b"\x0a\x01a");
        assert_eq!(envelope.payload_offset, 6);
    }

    #[test]
    fn test_nested_indexes_are_zigzag_encoded() {
        let bytes = encode_envelope(0x01020304, &[1, 0], &[]).unwrap();
        // count 2 -> 4, 1 -> 2, 0 -> 0
        assert_eq!(bytes, vec![0, 1, 2, 3, 4, 4, 2, 0]);

        let envelope = WireEnvelope::parse(&bytes).unwrap();
        assert_eq!(envelope.schema_id, 0x01020304);
        assert_eq!(envelope.message_indexes, vec![1, 0]);
        assert!(envelope.payload.is_empty());
    }

    #[test]
    fn test_bad_magic_byte() {
        let err = WireEnvelope::parse(&[1, 0, 0, 0, 7, 0]).unwrap_err();
        assert!(matches!(err, Error::Format { offset: 0, .. }));

        let err = WireEnvelope::parse(&[]).unwrap_err();
        assert!(matches!(err, Error::Format { offset: 0, .. }));
    }

    #[test]
    fn test_truncated_header() {
        let err = WireEnvelope::parse(&[0, 0, 0]).unwrap_err();
        assert!(matches!(err, Error::Format { offset: 3, .. }));
    }

    #[test]
    fn test_missing_index_array() {
        let err = WireEnvelope::parse(&[0, 0, 0, 0, 7]).unwrap_err();
        assert!(matches!(err, Error::Format { offset: 5, .. }));
    }

    #[test]
    fn test_invalid_index_count() {
        // zig-zag 3 decodes to -2
        let err = WireEnvelope::parse(&[0, 0, 0, 0, 7, 3]).unwrap_err();
        assert!(matches!(err, Error::Format { .. }));

        // count 5 but only one byte follows
        let err = WireEnvelope::parse(&[0, 0, 0, 0, 7, 10, 0]).unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }
}
