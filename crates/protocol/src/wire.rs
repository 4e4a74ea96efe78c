//! SSH wire primitives.
//!
//! # Encoding
//!
//! Channel request payloads are sequences of the RFC 4251 data types:
//! - `uint32`: 4 bytes, big-endian
//! - `boolean`: 1 byte, any nonzero value is true
//! - `string`: `uint32` length followed by that many bytes, which need not
//!   be UTF-8; [`WireReader::read_string`] is for fields that must be text
//!
//! [`WireReader`] decodes strictly: every field must be fully present and
//! [`WireReader::finish`] rejects bytes left over after the last field.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};

/// Cursor over a request payload.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    /// Create a reader over the given payload.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn ensure(&self, field: &'static str, needed: usize) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(ProtocolError::Truncated {
                field,
                needed,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    /// Read a big-endian `uint32`.
    pub fn read_u32(&mut self, field: &'static str) -> Result<u32> {
        self.ensure(field, 4)?;
        Ok(self.buf.get_u32())
    }

    /// Read a `boolean`.
    pub fn read_bool(&mut self, field: &'static str) -> Result<bool> {
        self.ensure(field, 1)?;
        Ok(self.buf.get_u8() != 0)
    }

    /// Read a `string` as raw bytes.
    pub fn read_bytes(&mut self, field: &'static str) -> Result<Bytes> {
        let len = self.read_u32(field)? as usize;
        self.ensure(field, len)?;
        Ok(self.buf.copy_to_bytes(len))
    }

    /// Read a `string` that must be valid UTF-8.
    pub fn read_string(&mut self, field: &'static str) -> Result<String> {
        let raw = self.read_bytes(field)?;
        String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8(field))
    }

    /// Finish decoding, failing if any bytes remain.
    pub fn finish(self) -> Result<()> {
        if self.buf.has_remaining() {
            return Err(ProtocolError::TrailingData(self.buf.remaining()));
        }
        Ok(())
    }
}

/// Builder for a request payload.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a big-endian `uint32`.
    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    /// Append a `boolean`.
    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.buf.put_u8(u8::from(value));
        self
    }

    /// Append a length-prefixed `string`.
    pub fn put_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buf.put_u32(value.len() as u32);
        self.buf.put_slice(value);
        self
    }

    /// Append a UTF-8 `string`.
    pub fn put_str(&mut self, value: &str) -> &mut Self {
        self.put_bytes(value.as_bytes())
    }

    /// Freeze the payload.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_layout() {
        let mut writer = WireWriter::new();
        writer.put_str("sftp");
        let bytes = writer.finish();
        assert_eq!(&bytes[..], b"\x00\x00\x00\x04sftp");
    }

    #[test]
    fn test_mixed_fields() {
        let mut writer = WireWriter::new();
        writer.put_str("TERM").put_u32(80).put_bool(true);
        let bytes = writer.finish();

        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_string("name").unwrap(), "TERM");
        assert_eq!(reader.read_u32("columns").unwrap(), 80);
        assert!(reader.read_bool("flag").unwrap());
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn test_nonzero_bool_is_true() {
        let mut reader = WireReader::new(&[0x02]);
        assert!(reader.read_bool("flag").unwrap());
    }

    #[test]
    fn test_truncated_u32() {
        let mut reader = WireReader::new(&[0, 0, 1]);
        let err = reader.read_u32("columns").unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Truncated {
                field: "columns",
                needed: 4,
                available: 3
            }
        );
    }

    #[test]
    fn test_string_length_exceeds_payload() {
        let mut reader = WireReader::new(b"\x00\x00\x00\x10abc");
        let err = reader.read_bytes("command").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Truncated {
                field: "command",
                needed: 16,
                available: 3
            }
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut reader = WireReader::new(b"\x00\x00\x00\x02\xff\xfe");
        let err = reader.read_string("name").unwrap_err();
        assert_eq!(err, ProtocolError::InvalidUtf8("name"));
    }

    #[test]
    fn test_trailing_data_rejected() {
        let mut reader = WireReader::new(b"\x00\x00\x00\x01\x00");
        reader.read_u32("status").unwrap();
        assert_eq!(reader.finish(), Err(ProtocolError::TrailingData(1)));
    }

    #[test]
    fn test_empty_string() {
        let mut reader = WireReader::new(&[0, 0, 0, 0]);
        assert_eq!(reader.read_string("value").unwrap(), "");
        assert!(reader.finish().is_ok());
    }
}
