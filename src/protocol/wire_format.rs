//! QAP1 wire format encoding and decoding.
//!
//! Implements the 16-byte message header:
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┐
//! │ Command  │ Length   │ Aux len  │ Reserved │
//! │ 4 bytes  │ 4 bytes  │ 4 bytes  │ 4 bytes  │
//! │ u32 LE   │ u32 LE   │ u32 LE   │ u32 LE   │
//! └──────────┴──────────┴──────────┴──────────┘
//! ```
//! and the tagged-length item header used for every message parameter and
//! every encoded expression: one u32 LE word with the type tag in the low
//! 6 bits, the LARGE and HAS_ATTR flags in bits 6–7 and a 24-bit length in
//! bits 8–31. When LARGE is set a second u32 follows carrying `length >> 24`.
//!
//! All multi-byte integers are Little Endian (Intel order, as transmitted
//! by Rserve).

use bytes::{BufMut, BytesMut};

use crate::error::{Result, RserveError};

/// Message header size in bytes (fixed, exactly 16).
pub const HEADER_SIZE: usize = 16;

/// Default maximum payload size accepted from the server (256 MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 256 * 1024 * 1024;

/// Largest item length representable without the LARGE form.
pub const MAX_SHORT_LEN: usize = 0x7f_ffff;

/// Maximum number of top-level parameters scanned per message.
pub const MAX_PARAMS: usize = 16;

/// Command codes for requests this client can issue.
pub mod cmd {
    pub const LOGIN: u32 = 0x001;
    pub const VOID_EVAL: u32 = 0x002;
    pub const EVAL: u32 = 0x003;
    pub const SHUTDOWN: u32 = 0x004;

    pub const OPEN_FILE: u32 = 0x010;
    pub const CREATE_FILE: u32 = 0x011;
    pub const CLOSE_FILE: u32 = 0x012;
    pub const READ_FILE: u32 = 0x013;
    pub const WRITE_FILE: u32 = 0x014;
    pub const REMOVE_FILE: u32 = 0x015;

    pub const SET_SEXP: u32 = 0x020;
    pub const ASSIGN_SEXP: u32 = 0x021;

    /// Control commands, accepted only by servers started with a control
    /// channel enabled.
    pub const CTRL_EVAL: u32 = 0x42;
    pub const CTRL_SHUTDOWN: u32 = 0x44;
    pub const CTRL_SOURCE: u32 = 0x45;

    /// Bit marking a response command word.
    pub const RESP: u32 = 0x10000;
    pub const RESP_OK: u32 = RESP | 0x0001;
    pub const RESP_ERR: u32 = RESP | 0x0002;
}

/// Parameter type tags (DT_*).
pub mod dt {
    pub const INT: u8 = 1;
    pub const CHAR: u8 = 2;
    pub const DOUBLE: u8 = 3;
    pub const STRING: u8 = 4;
    pub const BYTESTREAM: u8 = 5;
    pub const SEXP: u8 = 10;
    pub const ARRAY: u8 = 11;
}

/// Expression type tags (XT_*).
pub mod xt {
    pub const NULL: u8 = 0;
    pub const INT: u8 = 1;
    pub const DOUBLE: u8 = 2;
    pub const STR: u8 = 3;
    pub const LANG: u8 = 4;
    pub const SYM: u8 = 5;
    pub const BOOL: u8 = 6;
    pub const S4: u8 = 7;
    pub const VECTOR: u8 = 16;
    pub const LIST: u8 = 17;
    pub const CLOSURE: u8 = 18;
    pub const SYMNAME: u8 = 19;
    pub const LIST_NOTAG: u8 = 20;
    pub const LIST_TAG: u8 = 21;
    pub const LANG_NOTAG: u8 = 22;
    pub const LANG_TAG: u8 = 23;
    pub const VECTOR_EXP: u8 = 26;
    pub const VECTOR_STR: u8 = 27;
    pub const ARRAY_INT: u8 = 32;
    pub const ARRAY_DOUBLE: u8 = 33;
    pub const ARRAY_STR: u8 = 34;
    pub const ARRAY_BOOL_UA: u8 = 35;
    pub const ARRAY_BOOL: u8 = 36;
    pub const RAW: u8 = 37;
    pub const ARRAY_CPLX: u8 = 38;
    pub const UNKNOWN: u8 = 48;
}

/// Mask selecting the type tag of an item header word.
pub const TYPE_MASK: u32 = 0x3f;
/// Flag: the item header has an extra length word.
pub const FLAG_LARGE: u32 = 0x40;
/// Flag: the item content starts with an attribute expression.
pub const FLAG_HAS_ATTR: u32 = 0x80;

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Command code (or response code with status in bits 24–30).
    pub cmd: u32,
    /// Payload length in bytes.
    pub len: u32,
    /// Auxiliary-data length, skipped by this client.
    pub dof: u32,
    /// Reserved word.
    pub res: u32,
}

impl Header {
    /// Create a request header for `cmd` with `len` payload bytes.
    pub fn new(cmd: u32, len: u32) -> Self {
        Self {
            cmd,
            len,
            dof: 0,
            res: 0,
        }
    }

    /// Encode the header to bytes (Little Endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.cmd.to_le_bytes());
        buf[4..8].copy_from_slice(&self.len.to_le_bytes());
        buf[8..12].copy_from_slice(&self.dof.to_le_bytes());
        buf[12..16].copy_from_slice(&self.res.to_le_bytes());
        buf
    }

    /// Decode a header from bytes (Little Endian).
    ///
    /// Returns `None` if the buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            cmd: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            len: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            dof: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            res: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
        })
    }

    /// Check if this is a response.
    #[inline]
    pub fn is_response(&self) -> bool {
        self.cmd & cmd::RESP != 0
    }

    /// The command word without the status byte.
    #[inline]
    pub fn base_command(&self) -> u32 {
        self.cmd & 0x00ff_ffff
    }

    /// The server status carried in bits 24–30 of a response command.
    ///
    /// Zero means success.
    #[inline]
    pub fn status(&self) -> u32 {
        (self.cmd >> 24) & 0x7f
    }
}

/// Decoded tagged-length item header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemHeader {
    /// Type tag (low 6 bits of the header word).
    pub ty: u8,
    /// Content length in bytes.
    pub len: usize,
    /// Content starts with an attribute expression.
    pub has_attr: bool,
}

impl ItemHeader {
    /// Create an item header for `ty` with `len` content bytes.
    pub fn new(ty: u8, len: usize) -> Self {
        Self {
            ty,
            len,
            has_attr: false,
        }
    }

    /// Whether encoding requires the 8-byte LARGE form.
    #[inline]
    pub fn is_large(&self) -> bool {
        self.len > MAX_SHORT_LEN
    }

    /// The encoded size of this header: 4 bytes, or 8 for the LARGE form.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        if self.is_large() {
            8
        } else {
            4
        }
    }

    /// Append the encoded header to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        let mut word = (self.ty as u32 & TYPE_MASK) | ((self.len as u32 & 0x00ff_ffff) << 8);
        if self.has_attr {
            word |= FLAG_HAS_ATTR;
        }
        if self.is_large() {
            word |= FLAG_LARGE;
            buf.put_u32_le(word);
            buf.put_u32_le((self.len >> 24) as u32);
        } else {
            buf.put_u32_le(word);
        }
    }

    /// Decode an item header from the start of `buf`.
    ///
    /// Returns the header and the number of bytes consumed (4 or 8).
    /// A truncated header is a framing violation.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 4 {
            return Err(RserveError::MalformedPacket);
        }
        let word = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let ty = (word & TYPE_MASK) as u8;
        let has_attr = word & FLAG_HAS_ATTR != 0;
        let mut len = (word >> 8) as usize;
        let mut consumed = 4;
        if word & FLAG_LARGE != 0 {
            if buf.len() < 8 {
                return Err(RserveError::MalformedPacket);
            }
            let hi = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
            len |= (hi as usize) << 24;
            consumed = 8;
        }
        Ok((Self { ty, len, has_attr }, consumed))
    }
}

/// Length of a NUL-terminated, 4-byte-aligned encoding of `text`.
#[inline]
pub fn padded_string_len(text: &str) -> usize {
    (text.len() + 1 + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::new(cmd::EVAL, 100);
        let encoded = original.encode();
        let decoded = Header::decode(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_little_endian_byte_order() {
        let header = Header {
            cmd: 0x0102_0304,
            len: 0x0506_0708,
            dof: 0,
            res: 0,
        };
        let bytes = header.encode();

        // Command: 0x01020304 in LE
        assert_eq!(bytes[0], 0x04);
        assert_eq!(bytes[1], 0x03);
        assert_eq!(bytes[2], 0x02);
        assert_eq!(bytes[3], 0x01);

        // Length: 0x05060708 in LE
        assert_eq!(bytes[4], 0x08);
        assert_eq!(bytes[5], 0x07);
        assert_eq!(bytes[6], 0x06);
        assert_eq!(bytes[7], 0x05);
    }

    #[test]
    fn test_header_size_is_exactly_16() {
        assert_eq!(HEADER_SIZE, 16);
        assert_eq!(Header::new(cmd::EVAL, 0).encode().len(), 16);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; 15];
        assert!(Header::decode(&buf).is_none());
    }

    #[test]
    fn test_response_status_extraction() {
        let ok = Header::new(cmd::RESP_OK, 0);
        assert!(ok.is_response());
        assert_eq!(ok.status(), 0);
        assert_eq!(ok.base_command(), cmd::RESP_OK);

        let rejected = Header::new(cmd::RESP_ERR | (0x41 << 24), 0);
        assert!(rejected.is_response());
        assert_eq!(rejected.status(), 0x41);
        assert_eq!(rejected.base_command(), cmd::RESP_ERR);
    }

    #[test]
    fn test_item_header_short_form_roundtrip() {
        for len in [0usize, 1, 4, 0x1234, MAX_SHORT_LEN] {
            let item = ItemHeader::new(xt::ARRAY_INT, len);
            assert_eq!(item.encoded_len(), 4);

            let mut buf = BytesMut::new();
            item.encode_into(&mut buf);
            assert_eq!(buf.len(), 4);

            let (decoded, consumed) = ItemHeader::decode(&buf).unwrap();
            assert_eq!(consumed, 4);
            assert_eq!(decoded.ty, xt::ARRAY_INT);
            assert_eq!(decoded.len, len);
            assert!(!decoded.has_attr);
        }
    }

    #[test]
    fn test_item_header_large_form_roundtrip() {
        for len in [MAX_SHORT_LEN + 1, 0x0100_0000, 0x1234_5678] {
            let item = ItemHeader::new(dt::SEXP, len);
            assert_eq!(item.encoded_len(), 8);

            let mut buf = BytesMut::new();
            item.encode_into(&mut buf);
            assert_eq!(buf.len(), 8);

            let (decoded, consumed) = ItemHeader::decode(&buf).unwrap();
            assert_eq!(consumed, 8);
            assert_eq!(decoded.ty, dt::SEXP);
            assert_eq!(decoded.len, len);
        }
    }

    #[test]
    fn test_item_header_attr_flag() {
        let mut item = ItemHeader::new(xt::ARRAY_DOUBLE, 16);
        item.has_attr = true;

        let mut buf = BytesMut::new();
        item.encode_into(&mut buf);

        let (decoded, _) = ItemHeader::decode(&buf).unwrap();
        assert!(decoded.has_attr);
        assert_eq!(decoded.ty, xt::ARRAY_DOUBLE);
    }

    #[test]
    fn test_item_header_truncated() {
        assert!(ItemHeader::decode(&[0x01, 0x02]).is_err());

        // LARGE flag set but no second word
        let word = (FLAG_LARGE | 1).to_le_bytes();
        assert!(ItemHeader::decode(&word).is_err());
    }

    #[test]
    fn test_padded_string_len() {
        assert_eq!(padded_string_len(""), 4);
        assert_eq!(padded_string_len("x"), 4);
        assert_eq!(padded_string_len("abc"), 4);
        assert_eq!(padded_string_len("abcd"), 8);
        assert_eq!(padded_string_len("1+1"), 4);
    }
}
