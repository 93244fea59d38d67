//! Error types for rserve-client.
//!
//! Transport and protocol failures are fatal to the connection; the stream
//! is assumed desynchronized and the socket is closed. Server-side command
//! rejections ([`RserveError::Server`]) leave the connection usable.

use thiserror::Error;

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum RserveError {
    /// Socket creation or connect failed.
    #[error("connect failed")]
    ConnectFailed,

    /// Handshake could not be completed.
    #[error("handshake failed")]
    HandshakeFailed,

    /// The server greeting does not carry the expected protocol magic.
    #[error("invalid server ID string")]
    InvalidId,

    /// The server speaks a newer protocol version or a different transport.
    #[error("protocol not supported")]
    ProtocolNotSupported,

    /// Operation attempted on a connection that is not established.
    #[error("not connected")]
    NotConnected,

    /// The peer closed the connection.
    #[error("remote connection closed")]
    RemoteClosed,

    /// Framing violation: short header, declared-length mismatch, truncated
    /// item, or a response larger than the caller-provided buffer.
    #[error("malformed packet")]
    MalformedPacket,

    /// A write to the socket failed.
    #[error("send error")]
    SendError,

    /// The declared payload cannot be buffered.
    #[error("out of memory receiving payload")]
    OutOfMemory,

    /// The operation is not available, e.g. crypt authentication was
    /// negotiated but no crypt routine is installed.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// An eval response did not carry an expression parameter.
    #[error("response is not an expression")]
    NotAnExpression,

    /// The server rejected the request. Application level: the connection
    /// remains usable for further requests.
    #[error("server error: {0}")]
    Server(ServerError),

    /// I/O error outside of the send/receive paths (e.g. poll).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RserveError {
    /// The stable numeric status code of this error.
    ///
    /// Client-side conditions map to the negative code taxonomy of the
    /// original Rserve clients (−1 … −12); server rejections return the
    /// positive status byte from the response command word.
    pub fn status_code(&self) -> i32 {
        match self {
            RserveError::ConnectFailed => -1,
            RserveError::HandshakeFailed => -2,
            RserveError::InvalidId => -3,
            RserveError::ProtocolNotSupported => -4,
            RserveError::NotConnected => -5,
            RserveError::RemoteClosed => -7,
            RserveError::MalformedPacket => -8,
            RserveError::SendError => -9,
            RserveError::OutOfMemory => -10,
            RserveError::Unsupported(_) => -11,
            RserveError::NotAnExpression => -12,
            RserveError::Server(e) => e.status() as i32,
            RserveError::Io(_) => -1,
        }
    }

    /// True when the connection must be torn down after this error.
    ///
    /// Server rejections and a well-framed response of the wrong shape
    /// leave the stream aligned and the connection usable.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            RserveError::Server(_) | RserveError::NotAnExpression
        )
    }
}

/// Server-side status carried in bits 24–30 of a response command word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerError {
    AuthFailed,
    ConnectionBroken,
    InvalidCommand,
    InvalidParameter,
    REvalError,
    IoError,
    NotOpen,
    AccessDenied,
    UnsupportedCommand,
    UnknownCommand,
    DataOverflow,
    ObjectTooBig,
    OutOfMemory,
    ControlClosed,
    SessionBusy,
    DetachFailed,
    /// A status byte this client does not know.
    Other(u32),
}

impl ServerError {
    /// Map a response status byte to the known error set.
    pub fn from_status(stat: u32) -> Self {
        match stat {
            0x41 => ServerError::AuthFailed,
            0x42 => ServerError::ConnectionBroken,
            0x43 => ServerError::InvalidCommand,
            0x44 => ServerError::InvalidParameter,
            0x45 => ServerError::REvalError,
            0x46 => ServerError::IoError,
            0x47 => ServerError::NotOpen,
            0x48 => ServerError::AccessDenied,
            0x49 => ServerError::UnsupportedCommand,
            0x4a => ServerError::UnknownCommand,
            0x4b => ServerError::DataOverflow,
            0x4c => ServerError::ObjectTooBig,
            0x4d => ServerError::OutOfMemory,
            0x4e => ServerError::ControlClosed,
            0x50 => ServerError::SessionBusy,
            0x51 => ServerError::DetachFailed,
            other => ServerError::Other(other),
        }
    }

    /// The raw status byte.
    pub fn status(&self) -> u32 {
        match self {
            ServerError::AuthFailed => 0x41,
            ServerError::ConnectionBroken => 0x42,
            ServerError::InvalidCommand => 0x43,
            ServerError::InvalidParameter => 0x44,
            ServerError::REvalError => 0x45,
            ServerError::IoError => 0x46,
            ServerError::NotOpen => 0x47,
            ServerError::AccessDenied => 0x48,
            ServerError::UnsupportedCommand => 0x49,
            ServerError::UnknownCommand => 0x4a,
            ServerError::DataOverflow => 0x4b,
            ServerError::ObjectTooBig => 0x4c,
            ServerError::OutOfMemory => 0x4d,
            ServerError::ControlClosed => 0x4e,
            ServerError::SessionBusy => 0x50,
            ServerError::DetachFailed => 0x51,
            ServerError::Other(s) => *s,
        }
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::AuthFailed => write!(f, "authentication failed"),
            ServerError::ConnectionBroken => write!(f, "connection broken"),
            ServerError::InvalidCommand => write!(f, "invalid command"),
            ServerError::InvalidParameter => write!(f, "invalid parameter"),
            ServerError::REvalError => write!(f, "R evaluation error"),
            ServerError::IoError => write!(f, "server I/O error"),
            ServerError::NotOpen => write!(f, "file is not open"),
            ServerError::AccessDenied => write!(f, "access denied"),
            ServerError::UnsupportedCommand => write!(f, "unsupported command"),
            ServerError::UnknownCommand => write!(f, "unknown command"),
            ServerError::DataOverflow => write!(f, "data overflow"),
            ServerError::ObjectTooBig => write!(f, "object too big"),
            ServerError::OutOfMemory => write!(f, "server out of memory"),
            ServerError::ControlClosed => write!(f, "control pipe closed"),
            ServerError::SessionBusy => write!(f, "session busy"),
            ServerError::DetachFailed => write!(f, "session detach failed"),
            ServerError::Other(s) => write!(f, "status {s:#x}"),
        }
    }
}

/// Result type alias using RserveError.
pub type Result<T> = std::result::Result<T, RserveError>;
