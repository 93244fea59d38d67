//! Resumable message reading.
//!
//! [`MessageReader`] accumulates one inbound message from a non-blocking
//! byte stream. Each [`MessageReader::poll_read`] call re-enters at the
//! current state, performs whatever work is available without blocking and
//! returns [`Progress::Pending`] when the stream has no more data
//! (`WouldBlock`). All partial-progress counters live inside the state, so
//! any number of connections can be driven from one readiness loop.
//!
//! States, in order:
//! `Header` → `SkipAux` → `AllocPayload` → `Payload` → `Complete`.

use std::io::{ErrorKind, Read};

use bytes::Bytes;

use super::message::Message;
use super::wire_format::{Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use crate::error::{Result, RserveError};

/// Outcome of one resumable I/O step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// No further progress possible without blocking; retry on readiness.
    Pending,
    /// The state machine has run to completion.
    Complete,
}

enum ReadState {
    Header {
        buf: [u8; HEADER_SIZE],
        filled: usize,
    },
    SkipAux {
        header: Header,
        remaining: u32,
    },
    AllocPayload {
        header: Header,
    },
    Payload {
        header: Header,
        buf: Vec<u8>,
        filled: usize,
    },
    Complete {
        message: Option<Message>,
    },
}

/// State machine for reading one message from a non-blocking stream.
pub struct MessageReader {
    state: ReadState,
    max_payload_size: u32,
}

impl MessageReader {
    /// Create a reader with the default payload ceiling.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a reader with a custom payload ceiling.
    ///
    /// A message declaring a longer payload fails with `OutOfMemory`
    /// before any allocation is attempted.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            state: ReadState::Header {
                buf: [0; HEADER_SIZE],
                filled: 0,
            },
            max_payload_size,
        }
    }

    /// Drive the read forward as far as the stream allows.
    ///
    /// Returns `Progress::Pending` when the stream would block,
    /// `Progress::Complete` once the message is fully received and
    /// scanned. Fatal conditions are errors; the stream is then
    /// desynchronized and must be discarded.
    pub fn poll_read<R: Read>(&mut self, io: &mut R) -> Result<Progress> {
        loop {
            match &mut self.state {
                ReadState::Header { buf, filled } => {
                    while *filled < HEADER_SIZE {
                        match io.read(&mut buf[*filled..]) {
                            Ok(0) => {
                                // EOF before a complete header: a clean close
                                // only if nothing of the message arrived yet
                                return if *filled == 0 {
                                    Err(RserveError::RemoteClosed)
                                } else {
                                    Err(RserveError::MalformedPacket)
                                };
                            }
                            Ok(n) => *filled += n,
                            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                                return Ok(Progress::Pending)
                            }
                            Err(e) if e.kind() == ErrorKind::Interrupted => {}
                            Err(e) => return Err(RserveError::Io(e)),
                        }
                    }
                    let header = Header::decode(&buf[..]).expect("buffer holds a full header");
                    if header.len > self.max_payload_size {
                        return Err(RserveError::OutOfMemory);
                    }
                    tracing::trace!(cmd = header.cmd, len = header.len, "message header");
                    self.state = ReadState::SkipAux {
                        header,
                        remaining: header.dof,
                    };
                }

                ReadState::SkipAux { header, remaining } => {
                    let header = *header;
                    let mut chunk = [0u8; 256];
                    while *remaining > 0 {
                        let want = (*remaining as usize).min(chunk.len());
                        match io.read(&mut chunk[..want]) {
                            Ok(0) => return Err(RserveError::MalformedPacket),
                            Ok(n) => *remaining -= n as u32,
                            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                                return Ok(Progress::Pending)
                            }
                            Err(e) if e.kind() == ErrorKind::Interrupted => {}
                            Err(_) => return Err(RserveError::MalformedPacket),
                        }
                    }
                    self.state = ReadState::AllocPayload { header };
                }

                ReadState::AllocPayload { header } => {
                    let header = *header;
                    let len = header.len as usize;
                    let mut buf = Vec::new();
                    if buf.try_reserve_exact(len).is_err() {
                        return Err(RserveError::OutOfMemory);
                    }
                    buf.resize(len, 0);
                    self.state = ReadState::Payload {
                        header,
                        buf,
                        filled: 0,
                    };
                }

                ReadState::Payload {
                    header,
                    buf,
                    filled,
                } => {
                    let header = *header;
                    while *filled < buf.len() {
                        match io.read(&mut buf[*filled..]) {
                            Ok(0) => return Err(RserveError::MalformedPacket),
                            Ok(n) => *filled += n,
                            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                                return Ok(Progress::Pending)
                            }
                            Err(e) if e.kind() == ErrorKind::Interrupted => {}
                            Err(_) => return Err(RserveError::MalformedPacket),
                        }
                    }
                    let payload = Bytes::from(std::mem::take(buf));
                    let message = Message::from_parts(header, payload)?;
                    self.state = ReadState::Complete {
                        message: Some(message),
                    };
                }

                ReadState::Complete { .. } => return Ok(Progress::Complete),
            }
        }
    }

    /// Take the completed message, leaving the reader finished.
    ///
    /// Returns `None` before completion or if already taken.
    pub fn take_message(&mut self) -> Option<Message> {
        match &mut self.state {
            ReadState::Complete { message } => message.take(),
            _ => None,
        }
    }

    /// Reset to await a fresh message.
    pub fn reset(&mut self) {
        self.state = ReadState::Header {
            buf: [0; HEADER_SIZE],
            filled: 0,
        };
    }
}

impl Default for MessageReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire_format::cmd;
    use std::io;

    /// Reader that yields at most `chunk` bytes per call, with a
    /// `WouldBlock` between chunks to exercise resumption.
    struct ChunkedStream {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
        block_next: bool,
    }

    impl ChunkedStream {
        fn new(data: Vec<u8>, chunk: usize) -> Self {
            Self {
                data,
                pos: 0,
                chunk,
                block_next: false,
            }
        }
    }

    impl Read for ChunkedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.block_next {
                self.block_next = false;
                return Err(io::Error::new(ErrorKind::WouldBlock, "not ready"));
            }
            self.block_next = true;
            let n = buf.len().min(self.chunk).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn wire_message(command: u32, dof: u32, payload: &[u8]) -> Vec<u8> {
        let mut header = Header::new(command, payload.len() as u32);
        header.dof = dof;
        let mut bytes = header.encode().to_vec();
        bytes.extend(std::iter::repeat(0xEE).take(dof as usize));
        bytes.extend_from_slice(payload);
        bytes
    }

    fn read_to_completion(data: Vec<u8>, chunk: usize) -> Result<Message> {
        let mut stream = ChunkedStream::new(data, chunk);
        let mut reader = MessageReader::new();
        loop {
            match reader.poll_read(&mut stream)? {
                Progress::Pending => continue,
                Progress::Complete => return Ok(reader.take_message().unwrap()),
            }
        }
    }

    #[test]
    fn test_single_shot_read() {
        let payload = Message::with_string(cmd::EVAL, "1+1").payload;
        let data = wire_message(cmd::RESP_OK, 0, &payload);
        let msg = read_to_completion(data, usize::MAX).unwrap();

        assert_eq!(msg.command(), cmd::RESP_OK);
        assert_eq!(msg.params().len(), 1);
    }

    #[test]
    fn test_chunked_reads_are_equivalent() {
        let payload = Message::with_string(cmd::EVAL, "rnorm(100)").payload;
        let data = wire_message(cmd::RESP_OK, 0, &payload);

        let whole = read_to_completion(data.clone(), usize::MAX).unwrap();
        for chunk in [1usize, 2, 3, 5, 7, 16, 64] {
            let piecewise = read_to_completion(data.clone(), chunk).unwrap();
            assert_eq!(piecewise.command(), whole.command());
            assert_eq!(piecewise.payload, whole.payload);
            assert_eq!(piecewise.params().len(), whole.params().len());
        }
    }

    #[test]
    fn test_aux_data_is_skipped() {
        let payload = Message::with_int(cmd::RESP_OK, 7).payload;
        let data = wire_message(cmd::RESP_OK, 12, &payload);
        let msg = read_to_completion(data, 3).unwrap();

        assert_eq!(msg.payload_len(), 8);
        assert_eq!(msg.param(0).unwrap().data[..4], 7i32.to_le_bytes());
    }

    #[test]
    fn test_empty_payload_completes() {
        let data = wire_message(cmd::RESP_OK, 0, &[]);
        let msg = read_to_completion(data, 4).unwrap();
        assert!(msg.params().is_empty());
    }

    #[test]
    fn test_eof_before_any_data_is_remote_close() {
        let mut stream = ChunkedStream::new(Vec::new(), 16);
        let mut reader = MessageReader::new();
        loop {
            match reader.poll_read(&mut stream) {
                Ok(Progress::Pending) => continue,
                other => {
                    assert!(matches!(other, Err(RserveError::RemoteClosed)));
                    break;
                }
            }
        }
    }

    #[test]
    fn test_eof_mid_header_is_malformed() {
        let data = wire_message(cmd::RESP_OK, 0, b"abcd");
        let mut stream = ChunkedStream::new(data[..7].to_vec(), 16);
        let mut reader = MessageReader::new();
        let err = loop {
            match reader.poll_read(&mut stream) {
                Ok(Progress::Pending) => continue,
                Ok(Progress::Complete) => panic!("truncated header accepted"),
                Err(e) => break e,
            }
        };
        assert!(matches!(err, RserveError::MalformedPacket));
    }

    #[test]
    fn test_eof_mid_payload_is_malformed() {
        let payload = Message::with_string(cmd::EVAL, "x").payload;
        let data = wire_message(cmd::RESP_OK, 0, &payload);
        let truncated = data[..data.len() - 3].to_vec();

        let mut stream = ChunkedStream::new(truncated, 16);
        let mut reader = MessageReader::new();
        let err = loop {
            match reader.poll_read(&mut stream) {
                Ok(Progress::Pending) => continue,
                Ok(Progress::Complete) => panic!("truncated payload accepted"),
                Err(e) => break e,
            }
        };
        assert!(matches!(err, RserveError::MalformedPacket));
    }

    #[test]
    fn test_declared_length_over_ceiling() {
        let data = wire_message(cmd::RESP_OK, 0, &[0u8; 64]);
        let mut stream = ChunkedStream::new(data, usize::MAX);
        let mut reader = MessageReader::with_max_payload(16);
        let err = loop {
            match reader.poll_read(&mut stream) {
                Ok(Progress::Pending) => continue,
                Ok(Progress::Complete) => panic!("oversized payload accepted"),
                Err(e) => break e,
            }
        };
        assert!(matches!(err, RserveError::OutOfMemory));
    }

    #[test]
    fn test_take_message_is_once() {
        let data = wire_message(cmd::RESP_OK, 0, &[]);
        let mut stream = ChunkedStream::new(data, usize::MAX);
        let mut reader = MessageReader::new();
        while reader.poll_read(&mut stream).unwrap() != Progress::Complete {}
        assert!(reader.take_message().is_some());
        assert!(reader.take_message().is_none());
    }

    #[test]
    fn test_reset_reuses_reader() {
        let data = wire_message(cmd::RESP_OK, 0, &[]);
        let mut reader = MessageReader::new();

        for _ in 0..2 {
            let mut stream = ChunkedStream::new(data.clone(), usize::MAX);
            while reader.poll_read(&mut stream).unwrap() != Progress::Complete {}
            assert!(reader.take_message().is_some());
            reader.reset();
        }
    }
}
