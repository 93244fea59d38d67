//! Connection lifecycle and application operations.
//!
//! A [`Connection`] owns one socket to one server and moves through
//! `Disconnected → HandshakeInProgress → Connected`. Any fatal transport
//! or framing condition closes the socket and drops back to
//! `Disconnected`. One request is outstanding at a time; every operation
//! is a synchronous exchange built on the resumable reader and writer in
//! [`crate::protocol`].
//!
//! # Example
//!
//! ```ignore
//! use rserve_client::{Connection, ServerAddr};
//!
//! let mut conn = Connection::new(ServerAddr::tcp("127.0.0.1", 6311));
//! conn.connect()?;
//! conn.handshake()?;
//! let value = conn.eval("rnorm(10)")?;
//! conn.disconnect();
//! ```

use bytes::{BufMut, BytesMut};

use crate::error::{Result, RserveError, ServerError};
use crate::protocol::{
    cmd, dt, padded_string_len, parse_id_string, ItemHeader, Message, MessageReader,
    MessageWriter, Progress, ServerIdent, DEFAULT_MAX_PAYLOAD_SIZE, ID_LENGTH,
};
use crate::sexp::{parse_sexp, Sexp};
use crate::transport::{ServerAddr, SocketStream};

/// Hash a password against the negotiated two-byte salt.
///
/// The challenge scheme is the platform `crypt(3)`; install a routine
/// with [`Connection::set_crypt`] to enable it. Returning `None` reports
/// the scheme as unavailable.
pub type CryptFn = fn(password: &str, salt: &[u8; 2]) -> Option<String>;

enum State {
    Disconnected,
    HandshakeInProgress {
        id: [u8; ID_LENGTH],
        received: usize,
    },
    Connected,
}

/// One client connection to an Rserve instance.
pub struct Connection {
    addr: ServerAddr,
    stream: Option<SocketStream>,
    state: State,
    ident: ServerIdent,
    crypt: Option<CryptFn>,
    max_payload_size: u32,
}

impl Connection {
    /// Create a connection for `addr`. No I/O happens until
    /// [`Connection::connect`].
    pub fn new(addr: ServerAddr) -> Self {
        Self {
            addr,
            stream: None,
            state: State::Disconnected,
            ident: ServerIdent::default(),
            crypt: None,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }

    /// Install the crypt routine used for challenge authentication.
    pub fn set_crypt(&mut self, crypt: CryptFn) {
        self.crypt = Some(crypt);
    }

    /// Cap the response payload size accepted from the server.
    pub fn set_max_payload_size(&mut self, bytes: u32) {
        self.max_payload_size = bytes;
    }

    /// Open the socket and begin the handshake.
    ///
    /// On success the connection is in the handshake phase; drive it with
    /// [`Connection::poll_handshake`] (or [`Connection::handshake`] to
    /// block until done).
    pub fn connect(&mut self) -> Result<()> {
        let stream = SocketStream::connect(&self.addr).map_err(|e| {
            tracing::debug!(addr = %self.addr, error = %e, "connect failed");
            RserveError::ConnectFailed
        })?;
        self.stream = Some(stream);
        self.state = State::HandshakeInProgress {
            id: [0; ID_LENGTH],
            received: 0,
        };
        Ok(())
    }

    /// Make whatever handshake progress the socket allows.
    ///
    /// Repeatable until it returns `Progress::Complete` (connected) or an
    /// error (socket closed, state reset). Returns `Progress::Pending`
    /// when the greeting has not fully arrived yet.
    pub fn poll_handshake(&mut self) -> Result<Progress> {
        match self.poll_handshake_inner() {
            Err(e) if e.is_fatal() => {
                self.teardown();
                Err(e)
            }
            other => other,
        }
    }

    fn poll_handshake_inner(&mut self) -> Result<Progress> {
        use std::io::Read;

        let stream = self.stream.as_mut().ok_or(RserveError::NotConnected)?;
        let (id, received) = match &mut self.state {
            State::HandshakeInProgress { id, received } => (id, received),
            State::Connected => return Ok(Progress::Complete),
            State::Disconnected => return Err(RserveError::NotConnected),
        };

        while *received < ID_LENGTH {
            match stream.read(&mut id[*received..]) {
                Ok(0) => return Err(RserveError::ConnectFailed),
                Ok(n) => *received += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return Ok(Progress::Pending)
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(_) => return Err(RserveError::ConnectFailed),
            }
        }

        let ident = parse_id_string(id)?;
        tracing::debug!(
            auth_required = ident.auth_required,
            crypt = ident.crypt_auth,
            plain = ident.plain_auth,
            "handshake complete"
        );
        self.ident = ident;
        self.state = State::Connected;
        Ok(Progress::Complete)
    }

    /// Block until the handshake finishes.
    pub fn handshake(&mut self) -> Result<()> {
        loop {
            match self.poll_handshake()? {
                Progress::Complete => return Ok(()),
                Progress::Pending => {
                    let stream = self.stream.as_ref().ok_or(RserveError::NotConnected)?;
                    if let Err(e) = stream.wait_readable() {
                        self.teardown();
                        return Err(e.into());
                    }
                }
            }
        }
    }

    /// Close the socket. Subsequent operations fail with `NotConnected`.
    pub fn disconnect(&mut self) {
        self.teardown();
    }

    /// True once the handshake has completed.
    pub fn is_connected(&self) -> bool {
        matches!(self.state, State::Connected)
    }

    /// Capabilities announced by the server greeting.
    pub fn server_ident(&self) -> &ServerIdent {
        &self.ident
    }

    /// The raw socket descriptor, for readiness-loop registration.
    #[cfg(unix)]
    pub fn as_raw_fd(&self) -> Option<std::os::fd::RawFd> {
        use std::os::fd::AsRawFd;
        self.stream.as_ref().map(|s| s.as_raw_fd())
    }

    fn teardown(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown();
        }
        self.state = State::Disconnected;
        self.ident = ServerIdent::default();
    }

    /// Send one request and receive its response, closing the connection
    /// on any fatal condition.
    fn request(&mut self, message: &Message) -> Result<Message> {
        match self.request_inner(message) {
            Err(e) if e.is_fatal() => {
                tracing::debug!(error = %e, "exchange failed, closing");
                self.teardown();
                Err(e)
            }
            other => other,
        }
    }

    fn request_inner(&mut self, message: &Message) -> Result<Message> {
        if !matches!(self.state, State::Connected) {
            return Err(RserveError::NotConnected);
        }
        let stream = self.stream.as_mut().ok_or(RserveError::NotConnected)?;

        let mut writer = MessageWriter::new(message);
        while writer.poll_write(stream)? != Progress::Complete {
            stream.wait_writable()?;
        }

        let mut reader = MessageReader::with_max_payload(self.max_payload_size);
        while reader.poll_read(stream)? != Progress::Complete {
            stream.wait_readable()?;
        }
        Ok(reader.take_message().expect("reader completed"))
    }

    /// Fail on a non-zero response status.
    fn check_status(response: &Message) -> Result<()> {
        let status = response.status();
        if status != 0 {
            return Err(RserveError::Server(ServerError::from_status(status)));
        }
        if response.header.base_command() == cmd::RESP_ERR {
            return Err(RserveError::Server(ServerError::Other(0)));
        }
        Ok(())
    }

    /// Evaluate `expr` and return the resulting expression tree.
    pub fn eval(&mut self, expr: &str) -> Result<Sexp> {
        let response = self.request(&Message::with_string(cmd::EVAL, expr))?;
        Self::check_status(&response)?;

        // exactly one expression parameter is a well-formed eval response
        if response.params().len() != 1 {
            return Err(RserveError::NotAnExpression);
        }
        let param = response.param(0).expect("one parameter");
        if param.ty() != dt::SEXP {
            return Err(RserveError::NotAnExpression);
        }
        match parse_sexp(&param.data) {
            Ok(sexp) => Ok(sexp),
            Err(e) => {
                self.teardown();
                Err(e)
            }
        }
    }

    /// Evaluate `expr`, discarding the result.
    pub fn void_eval(&mut self, expr: &str) -> Result<()> {
        let response = self.request(&Message::with_string(cmd::VOID_EVAL, expr))?;
        Self::check_status(&response)
    }

    /// Assign `value` to the global variable `name`.
    pub fn assign(&mut self, name: &str, value: &Sexp) -> Result<()> {
        let padded = padded_string_len(name);
        let value_size = value.storage_size();
        let sexp_header = ItemHeader::new(dt::SEXP, value_size);

        let mut buf =
            BytesMut::with_capacity(4 + padded + sexp_header.encoded_len() + value_size);
        ItemHeader::new(dt::STRING, padded).encode_into(&mut buf);
        buf.put_slice(name.as_bytes());
        buf.put_bytes(0, padded - name.len());
        sexp_header.encode_into(&mut buf);
        value.store(&mut buf);

        let response = self.request(&Message::with_raw(cmd::SET_SEXP, buf.freeze()))?;
        Self::check_status(&response)
    }

    /// Authenticate against the server.
    ///
    /// Succeeds without I/O when the greeting did not require
    /// authentication. Uses the crypt challenge when negotiated and a
    /// crypt routine is installed, falling back to plaintext when the
    /// server offers it.
    pub fn login(&mut self, user: &str, password: &str) -> Result<()> {
        if !self.ident.auth_required {
            return Ok(());
        }

        let secret = if self.ident.crypt_auth {
            let hashed = match (self.crypt, self.ident.salt) {
                (Some(crypt), Some(salt)) => crypt(password, &salt),
                _ => None,
            };
            match hashed {
                Some(h) => h,
                None if self.ident.plain_auth => password.to_string(),
                None => {
                    return Err(RserveError::Unsupported(
                        "crypt authentication is required but no crypt routine is installed",
                    ))
                }
            }
        } else {
            password.to_string()
        };

        let credentials = format!("{user}\n{secret}");
        let response = self.request(&Message::with_string(cmd::LOGIN, &credentials))?;
        Self::check_status(&response)
    }

    /// Ask the server to shut down, with an optional authorization key.
    pub fn shutdown(&mut self, key: Option<&str>) -> Result<()> {
        let message = match key {
            Some(key) => Message::with_string(cmd::SHUTDOWN, key),
            None => Message::new(cmd::SHUTDOWN),
        };
        let response = self.request(&message)?;
        Self::check_status(&response)
    }

    /// Open a server-side file for reading.
    pub fn open_file(&mut self, path: &str) -> Result<()> {
        let response = self.request(&Message::with_string(cmd::OPEN_FILE, path))?;
        Self::check_status(&response)
    }

    /// Create (truncate) a server-side file for writing.
    pub fn create_file(&mut self, path: &str) -> Result<()> {
        let response = self.request(&Message::with_string(cmd::CREATE_FILE, path))?;
        Self::check_status(&response)
    }

    /// Read from the open server-side file into `buf`.
    ///
    /// Requests at most `buf.len()` bytes and returns the number
    /// received; zero means end of file. A response larger than `buf`
    /// is a framing violation, nothing is copied.
    pub fn read_file(&mut self, buf: &mut [u8]) -> Result<usize> {
        let response = self.request(&Message::with_int(cmd::READ_FILE, buf.len() as i32))?;
        Self::check_status(&response)?;

        // Rserve sends the bytes as the bare payload, without an item header
        let payload = &response.payload;
        if payload.len() > buf.len() {
            self.teardown();
            return Err(RserveError::MalformedPacket);
        }
        buf[..payload.len()].copy_from_slice(payload);
        Ok(payload.len())
    }

    /// Append `data` to the open server-side file.
    pub fn write_file(&mut self, data: &[u8]) -> Result<()> {
        let response = self.request(&Message::with_bytestream(cmd::WRITE_FILE, data))?;
        Self::check_status(&response)
    }

    /// Close the open server-side file.
    pub fn close_file(&mut self) -> Result<()> {
        let response = self.request(&Message::new(cmd::CLOSE_FILE))?;
        Self::check_status(&response)
    }

    /// Remove a server-side file.
    pub fn remove_file(&mut self, path: &str) -> Result<()> {
        let response = self.request(&Message::with_string(cmd::REMOVE_FILE, path))?;
        Self::check_status(&response)
    }

    /// Evaluate `expr` in the server process itself.
    #[cfg(feature = "control")]
    pub fn server_eval(&mut self, expr: &str) -> Result<()> {
        let response = self.request(&Message::with_string(cmd::CTRL_EVAL, expr))?;
        Self::check_status(&response)
    }

    /// Source a file in the server process itself.
    #[cfg(feature = "control")]
    pub fn server_source(&mut self, path: &str) -> Result<()> {
        let response = self.request(&Message::with_string(cmd::CTRL_SOURCE, path))?;
        Self::check_status(&response)
    }

    /// Shut the server down through the control channel.
    #[cfg(feature = "control")]
    pub fn server_shutdown(&mut self) -> Result<()> {
        let response = self.request(&Message::new(cmd::CTRL_SHUTDOWN))?;
        Self::check_status(&response)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.teardown();
    }
}
