//! Message struct with typed accessors and request builders.
//!
//! A [`Message`] is one framed QAP1 unit: a 16-byte header plus a payload
//! holding up to [`MAX_PARAMS`] tagged-length parameters. Payloads use
//! `bytes::Bytes`, so parameter views and expression nodes parsed out of a
//! response all share the one received buffer without copying.

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{
    cmd, dt, padded_string_len, Header, ItemHeader, MAX_PARAMS,
};
use crate::error::{Result, RserveError};

/// One parameter of a message payload.
#[derive(Debug, Clone)]
pub struct Param {
    /// The decoded item header.
    pub header: ItemHeader,
    /// Content bytes (zero-copy slice of the message payload).
    pub data: Bytes,
}

impl Param {
    /// Type tag of this parameter.
    #[inline]
    pub fn ty(&self) -> u8 {
        self.header.ty
    }
}

/// A complete protocol message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
    params: Vec<Param>,
}

impl Message {
    /// Create a message with no payload (e.g. `CMD_closeFile`).
    pub fn new(command: u32) -> Self {
        Self {
            header: Header::new(command, 0),
            payload: Bytes::new(),
            params: Vec::new(),
        }
    }

    /// Create a message with one NUL-terminated string parameter.
    ///
    /// The text is padded with zero bytes to a 4-byte boundary; the message
    /// length covers the padded text plus its 4-byte item header.
    pub fn with_string(command: u32, text: &str) -> Self {
        let padded = padded_string_len(text);
        let mut buf = BytesMut::with_capacity(4 + padded);
        ItemHeader::new(dt::STRING, padded).encode_into(&mut buf);
        buf.put_slice(text.as_bytes());
        buf.put_bytes(0, padded - text.len());
        Self::from_built(command, buf.freeze())
    }

    /// Create a message with one byte-stream parameter.
    pub fn with_bytestream(command: u32, data: &[u8]) -> Self {
        let item = ItemHeader::new(dt::BYTESTREAM, data.len());
        let mut buf = BytesMut::with_capacity(item.encoded_len() + data.len());
        item.encode_into(&mut buf);
        buf.put_slice(data);
        Self::from_built(command, buf.freeze())
    }

    /// Create a message from an already-framed payload.
    ///
    /// The payload must consist of valid tagged-length parameters.
    pub fn with_raw(command: u32, payload: Bytes) -> Self {
        Self::from_built(command, payload)
    }

    /// Create a message with one integer parameter.
    pub fn with_int(command: u32, value: i32) -> Self {
        let mut buf = BytesMut::with_capacity(8);
        ItemHeader::new(dt::INT, 4).encode_into(&mut buf);
        buf.put_i32_le(value);
        Self::from_built(command, buf.freeze())
    }

    fn from_built(command: u32, payload: Bytes) -> Self {
        let params = scan_params(&payload).unwrap_or_default();
        Self {
            header: Header::new(command, payload.len() as u32),
            payload,
            params,
        }
    }

    /// Assemble a received message from its header and complete payload,
    /// scanning the payload for parameters.
    pub fn from_parts(header: Header, payload: Bytes) -> Result<Self> {
        if header.len as usize != payload.len() {
            return Err(RserveError::MalformedPacket);
        }
        let params = scan_params(&payload)?;
        Ok(Self {
            header,
            payload,
            params,
        })
    }

    /// The command word of this message.
    #[inline]
    pub fn command(&self) -> u32 {
        self.header.cmd
    }

    /// The server status byte of a response (zero = success).
    #[inline]
    pub fn status(&self) -> u32 {
        self.header.status()
    }

    /// True for a successful `RESP_OK` response.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.header.base_command() == cmd::RESP_OK && self.status() == 0
    }

    /// The scanned payload parameters.
    #[inline]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Get one parameter by index.
    #[inline]
    pub fn param(&self, index: usize) -> Option<&Param> {
        self.params.get(index)
    }

    /// The payload length in bytes.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// Scan a payload for top-level tagged-length parameters.
///
/// At most [`MAX_PARAMS`] parameters are recorded. A parameter whose
/// declared content extends past the end of the payload is a framing
/// violation.
fn scan_params(payload: &Bytes) -> Result<Vec<Param>> {
    let mut params = Vec::new();
    let mut offset = 0usize;
    while offset < payload.len() && params.len() < MAX_PARAMS {
        let (header, consumed) = ItemHeader::decode(&payload[offset..])?;
        let start = offset + consumed;
        let end = start
            .checked_add(header.len)
            .ok_or(RserveError::MalformedPacket)?;
        if end > payload.len() {
            return Err(RserveError::MalformedPacket);
        }
        params.push(Param {
            header,
            data: payload.slice(start..end),
        });
        offset = end;
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire_format::xt;

    #[test]
    fn test_empty_message() {
        let msg = Message::new(cmd::CLOSE_FILE);
        assert_eq!(msg.command(), cmd::CLOSE_FILE);
        assert_eq!(msg.payload_len(), 0);
        assert!(msg.params().is_empty());
    }

    #[test]
    fn test_string_message_layout() {
        let msg = Message::with_string(cmd::EVAL, "1+1");

        // "1+1\0" pads to 4, plus the 4-byte item header
        assert_eq!(msg.header.len, 8);
        assert_eq!(msg.payload_len(), 8);
        assert_eq!(&msg.payload[..], &[4, 4, 0, 0, b'1', b'+', b'1', 0]);

        assert_eq!(msg.params().len(), 1);
        let p = msg.param(0).unwrap();
        assert_eq!(p.ty(), dt::STRING);
        assert_eq!(&p.data[..], b"1+1\0");
    }

    #[test]
    fn test_string_message_padding() {
        // "eval" needs 5 bytes with the NUL, padded to 8
        let msg = Message::with_string(cmd::EVAL, "eval");
        assert_eq!(msg.header.len, 12);
        assert_eq!(&msg.payload[4..], b"eval\0\0\0\0");
    }

    #[test]
    fn test_int_message_layout() {
        let msg = Message::with_int(cmd::READ_FILE, 1024);
        assert_eq!(msg.header.len, 8);

        let p = msg.param(0).unwrap();
        assert_eq!(p.ty(), dt::INT);
        assert_eq!(&p.data[..], &1024i32.to_le_bytes());
    }

    #[test]
    fn test_bytestream_message() {
        let msg = Message::with_bytestream(cmd::WRITE_FILE, b"file data");
        assert_eq!(msg.header.len, 13);

        let p = msg.param(0).unwrap();
        assert_eq!(p.ty(), dt::BYTESTREAM);
        assert_eq!(&p.data[..], b"file data");
    }

    #[test]
    fn test_from_parts_length_mismatch() {
        let header = Header::new(cmd::RESP_OK, 12);
        let result = Message::from_parts(header, Bytes::from_static(&[0u8; 8]));
        assert!(matches!(result, Err(RserveError::MalformedPacket)));
    }

    #[test]
    fn test_scan_multiple_params() {
        let mut buf = BytesMut::new();
        ItemHeader::new(dt::STRING, 4).encode_into(&mut buf);
        buf.put_slice(b"x\0\0\0");
        ItemHeader::new(dt::SEXP, 8).encode_into(&mut buf);
        ItemHeader::new(xt::STR, 4).encode_into(&mut buf);
        buf.put_slice(b"hi\0\0");

        let payload = buf.freeze();
        let header = Header::new(cmd::SET_SEXP, payload.len() as u32);
        let msg = Message::from_parts(header, payload).unwrap();

        assert_eq!(msg.params().len(), 2);
        assert_eq!(msg.param(0).unwrap().ty(), dt::STRING);
        assert_eq!(msg.param(1).unwrap().ty(), dt::SEXP);
        assert_eq!(msg.param(1).unwrap().data.len(), 8);
    }

    #[test]
    fn test_scan_param_overruns_payload() {
        let mut buf = BytesMut::new();
        // claims 100 content bytes, provides 4
        ItemHeader::new(dt::STRING, 100).encode_into(&mut buf);
        buf.put_slice(b"x\0\0\0");

        let payload = buf.freeze();
        let header = Header::new(cmd::RESP_OK, payload.len() as u32);
        assert!(matches!(
            Message::from_parts(header, payload),
            Err(RserveError::MalformedPacket)
        ));
    }

    #[test]
    fn test_scan_stops_at_param_cap() {
        let mut buf = BytesMut::new();
        for _ in 0..20 {
            ItemHeader::new(dt::INT, 4).encode_into(&mut buf);
            buf.put_i32_le(7);
        }
        let payload = buf.freeze();
        let header = Header::new(cmd::RESP_OK, payload.len() as u32);
        let msg = Message::from_parts(header, payload).unwrap();
        assert_eq!(msg.params().len(), MAX_PARAMS);
    }

    #[test]
    fn test_params_share_payload_buffer() {
        let msg = Message::with_string(cmd::EVAL, "shared");
        let p = msg.param(0).unwrap().data.clone();
        // Bytes slices alias the payload allocation
        assert_eq!(p.as_ptr(), msg.payload[4..].as_ptr());
    }
}
