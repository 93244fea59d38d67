//! QAP1 protocol layer: wire format, message framing, resumable I/O and
//! the handshake greeting.

mod handshake;
mod message;
mod reader;
mod wire_format;
mod writer;

pub use handshake::{parse_id_string, ServerIdent, CLIENT_ID, ID_LENGTH};
pub use message::{Message, Param};
pub use reader::{MessageReader, Progress};
pub use wire_format::{
    cmd, dt, padded_string_len, xt, Header, ItemHeader, DEFAULT_MAX_PAYLOAD_SIZE, FLAG_HAS_ATTR,
    FLAG_LARGE, HEADER_SIZE, MAX_PARAMS, MAX_SHORT_LEN, TYPE_MASK,
};
pub use writer::MessageWriter;
