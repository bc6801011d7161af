//! Little-endian property streams shared by the binary item format and the
//! attribute blobs stored in relational rows.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use crate::items::{AttributeMap, AttributeValue};

const ATTR_INTEGER: u8 = 1;
const ATTR_TEXT: u8 = 2;
const ATTR_FLAG: u8 = 3;

/// Low-level failure while reading a property stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream truncated: needed {needed} bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },

    #[error("invalid utf-8 in string property")]
    InvalidUtf8,

    #[error("unexpected marker 0x{found:02X}, expected 0x{expected:02X}")]
    BadMarker { expected: u8, found: u8 },

    #[error("unknown item kind {0}")]
    UnknownKind(u8),

    #[error("unknown attribute tag {0}")]
    UnknownAttribute(u8),

    #[error("item type 0 is reserved")]
    InvalidType,

    #[error("{0}")]
    Invalid(String),
}

/// Growable output stream.
#[derive(Debug, Default)]
pub struct PropWriter {
    buf: BytesMut,
}

impl PropWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buf.put_i16_le(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    /// Length-prefixed (u32) UTF-8 string.
    pub fn write_string(&mut self, value: &str) {
        self.write_len(value.len());
        self.buf.put_slice(value.as_bytes());
    }

    /// Length or element count prefix (u32).
    pub fn write_len(&mut self, len: usize) {
        self.write_u32(u32::try_from(len).unwrap_or(u32::MAX));
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Cursor over a borrowed byte slice that reports its absolute offset.
#[derive(Debug, Clone)]
pub struct PropReader<'a> {
    data: &'a [u8],
    total: usize,
}

impl<'a> PropReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            total: data.len(),
        }
    }

    pub fn offset(&self) -> usize {
        self.total - self.data.remaining()
    }

    pub fn remaining(&self) -> usize {
        self.data.remaining()
    }

    pub fn is_exhausted(&self) -> bool {
        !self.data.has_remaining()
    }

    fn need(&self, needed: usize) -> Result<(), StreamError> {
        let remaining = self.data.remaining();
        if remaining < needed {
            return Err(StreamError::Truncated { needed, remaining });
        }
        Ok(())
    }

    pub fn peek_u8(&self) -> Result<u8, StreamError> {
        self.need(1)?;
        Ok(self.data.chunk()[0])
    }

    pub fn read_u8(&mut self) -> Result<u8, StreamError> {
        self.need(1)?;
        Ok(self.data.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16, StreamError> {
        self.need(2)?;
        Ok(self.data.get_u16_le())
    }

    pub fn read_u32(&mut self) -> Result<u32, StreamError> {
        self.need(4)?;
        Ok(self.data.get_u32_le())
    }

    pub fn read_i16(&mut self) -> Result<i16, StreamError> {
        self.need(2)?;
        Ok(self.data.get_i16_le())
    }

    pub fn read_i64(&mut self) -> Result<i64, StreamError> {
        self.need(8)?;
        Ok(self.data.get_i64_le())
    }

    pub fn read_string(&mut self) -> Result<String, StreamError> {
        let len = self.read_u32()? as usize;
        self.need(len)?;
        let (head, tail) = self.data.split_at(len);
        let text = std::str::from_utf8(head).map_err(|_| StreamError::InvalidUtf8)?;
        self.data = tail;
        Ok(text.to_string())
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], StreamError> {
        self.need(len)?;
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    /// Consume a marker byte, failing without consuming on mismatch.
    pub fn expect_marker(&mut self, expected: u8) -> Result<(), StreamError> {
        let found = self.peek_u8()?;
        if found != expected {
            return Err(StreamError::BadMarker { expected, found });
        }
        self.data.advance(1);
        Ok(())
    }
}

/// Write `attrs` as a bare sequence of entries (no count prefix).
pub fn write_attribute_entries(out: &mut PropWriter, attrs: &AttributeMap) {
    for (key, value) in attrs.iter() {
        out.write_string(key);
        match value {
            AttributeValue::Integer(v) => {
                out.write_u8(ATTR_INTEGER);
                out.write_i64(*v);
            }
            AttributeValue::Text(v) => {
                out.write_u8(ATTR_TEXT);
                out.write_string(v);
            }
            AttributeValue::Flag(v) => {
                out.write_u8(ATTR_FLAG);
                out.write_u8(u8::from(*v));
            }
        }
    }
}

/// Read `count` entries into `attrs`. Entries decoded before a failure stay in `attrs`.
pub fn read_attribute_entries(
    input: &mut PropReader<'_>,
    count: usize,
    attrs: &mut AttributeMap,
) -> Result<(), StreamError> {
    for _ in 0..count {
        let key = input.read_string()?;
        let value = match input.read_u8()? {
            ATTR_INTEGER => AttributeValue::Integer(input.read_i64()?),
            ATTR_TEXT => AttributeValue::Text(input.read_string()?),
            ATTR_FLAG => AttributeValue::Flag(input.read_u8()? != 0),
            other => return Err(StreamError::UnknownAttribute(other)),
        };
        attrs.insert(key, value);
    }
    Ok(())
}

/// Serialize a whole attribute bag (u32 count + entries), the form kept in item rows.
pub fn encode_attributes(attrs: &AttributeMap) -> Vec<u8> {
    let mut out = PropWriter::new();
    out.write_len(attrs.len());
    write_attribute_entries(&mut out, attrs);
    out.into_vec()
}

/// Inverse of [`encode_attributes`]; on failure returns the entries read so far.
pub fn decode_attributes(blob: &[u8]) -> Result<AttributeMap, (AttributeMap, StreamError)> {
    let mut attrs = AttributeMap::new();
    if blob.is_empty() {
        return Ok(attrs);
    }
    let mut input = PropReader::new(blob);
    let count = match input.read_u32() {
        Ok(count) => count as usize,
        Err(e) => return Err((attrs, e)),
    };
    match read_attribute_entries(&mut input, count, &mut attrs) {
        Ok(()) => Ok(attrs),
        Err(e) => Err((attrs, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_reports_offsets_and_truncation() {
        let mut out = PropWriter::new();
        out.write_u16(0xBEEF);
        out.write_string("abc");
        let bytes = out.into_vec();

        let mut input = PropReader::new(&bytes);
        assert_eq!(input.read_u16(), Ok(0xBEEF));
        assert_eq!(input.offset(), 2);
        assert_eq!(input.read_string().as_deref(), Ok("abc"));
        assert!(input.is_exhausted());
        assert_eq!(
            input.read_u32(),
            Err(StreamError::Truncated {
                needed: 4,
                remaining: 0
            })
        );
    }

    #[test]
    fn marker_mismatch_does_not_consume() {
        let bytes = [0x10u8, 0xFE];
        let mut input = PropReader::new(&bytes);
        assert_eq!(
            input.expect_marker(0xFE),
            Err(StreamError::BadMarker {
                expected: 0xFE,
                found: 0x10
            })
        );
        assert_eq!(input.offset(), 0);
    }

    #[test]
    fn attribute_blob_keeps_order_and_types() {
        let attrs: AttributeMap = vec![
            ("writer", AttributeValue::from("Eremo")),
            ("date", AttributeValue::from(1_700_000_000i64)),
            ("unique", AttributeValue::from(true)),
        ]
        .into_iter()
        .collect();
        let blob = encode_attributes(&attrs);
        assert_eq!(decode_attributes(&blob), Ok(attrs));
        assert_eq!(decode_attributes(&[]), Ok(AttributeMap::new()));
    }

    #[test]
    fn attribute_blob_failure_keeps_prefix() {
        let attrs: AttributeMap = vec![("a", 1i64), ("b", 2i64)].into_iter().collect();
        let mut blob = encode_attributes(&attrs);
        blob.truncate(blob.len() - 3);
        let (partial, err) = decode_attributes(&blob).expect_err("truncated");
        assert_eq!(partial.len(), 1);
        assert!(matches!(err, StreamError::Truncated { .. }));
    }

    #[test]
    fn long_text_is_kept_whole() {
        let long = "é".repeat(40_000);
        let attrs: AttributeMap = vec![
            (long.as_str(), AttributeValue::from(1i64)),
            ("text", AttributeValue::from(long.as_str())),
        ]
        .into_iter()
        .collect();
        let blob = encode_attributes(&attrs);
        let decoded = decode_attributes(&blob).expect("clean decode");
        assert_eq!(decoded, attrs);
        assert_eq!(decoded.get("text"), Some(&AttributeValue::from(long.as_str())));
    }
}
