//! Resumable message writing.
//!
//! [`MessageWriter`] pushes one outbound message through a non-blocking
//! byte stream, header first, then the payload. Short writes resume where
//! they left off on the next [`MessageWriter::poll_write`] call, so a
//! loaded local socket cannot desynchronize the stream.

use std::io::{ErrorKind, Write};

use bytes::Bytes;

use super::message::Message;
use super::reader::Progress;
use super::wire_format::HEADER_SIZE;
use crate::error::{Result, RserveError};

enum WriteState {
    Header { sent: usize },
    Payload { sent: usize },
    Done,
}

/// State machine for writing one message to a non-blocking stream.
pub struct MessageWriter {
    header: [u8; HEADER_SIZE],
    payload: Bytes,
    state: WriteState,
}

impl MessageWriter {
    /// Prepare `message` for transmission.
    ///
    /// The payload is referenced, not copied.
    pub fn new(message: &Message) -> Self {
        Self {
            header: message.header.encode(),
            payload: message.payload.clone(),
            state: WriteState::Header { sent: 0 },
        }
    }

    /// Drive the write forward as far as the stream allows.
    ///
    /// Returns `Progress::Pending` when the stream would block and
    /// `Progress::Complete` once header and payload are fully written.
    /// A sink accepting zero bytes fails with `SendError`.
    pub fn poll_write<W: Write>(&mut self, io: &mut W) -> Result<Progress> {
        loop {
            match &mut self.state {
                WriteState::Header { sent } => {
                    while *sent < HEADER_SIZE {
                        match io.write(&self.header[*sent..]) {
                            Ok(0) => return Err(RserveError::SendError),
                            Ok(n) => *sent += n,
                            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                                return Ok(Progress::Pending)
                            }
                            Err(e) if e.kind() == ErrorKind::Interrupted => {}
                            Err(_) => return Err(RserveError::SendError),
                        }
                    }
                    self.state = WriteState::Payload { sent: 0 };
                }

                WriteState::Payload { sent } => {
                    while *sent < self.payload.len() {
                        match io.write(&self.payload[*sent..]) {
                            Ok(0) => return Err(RserveError::SendError),
                            Ok(n) => *sent += n,
                            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                                return Ok(Progress::Pending)
                            }
                            Err(e) if e.kind() == ErrorKind::Interrupted => {}
                            Err(_) => return Err(RserveError::SendError),
                        }
                    }
                    self.state = WriteState::Done;
                }

                WriteState::Done => return Ok(Progress::Complete),
            }
        }
    }
}
