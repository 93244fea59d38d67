//! Socket transport.
//!
//! One [`SocketStream`] per connection: TCP for network targets, a Unix
//! domain socket for local ones. Streams are switched to non-blocking
//! mode right after connect so the protocol state machines can be driven
//! from a readiness loop; [`SocketStream::wait_readable`] and
//! [`SocketStream::wait_writable`] provide the blocking wait used by the
//! synchronous call paths.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
#[cfg(unix)]
use std::os::fd::{AsRawFd, RawFd};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
#[cfg(unix)]
use std::path::PathBuf;

/// Target server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAddr {
    /// TCP host and port.
    Tcp { host: String, port: u16 },
    /// Local domain socket path.
    #[cfg(unix)]
    Unix { path: PathBuf },
}

impl ServerAddr {
    /// A TCP address.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        ServerAddr::Tcp {
            host: host.into(),
            port,
        }
    }

    /// A local domain socket address.
    #[cfg(unix)]
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        ServerAddr::Unix { path: path.into() }
    }
}

impl std::fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerAddr::Tcp { host, port } => write!(f, "{host}:{port}"),
            #[cfg(unix)]
            ServerAddr::Unix { path } => write!(f, "{}", path.display()),
        }
    }
}

/// A connected stream socket.
pub enum SocketStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl SocketStream {
    /// Connect to `addr` and switch the socket to non-blocking mode.
    ///
    /// Nagling is disabled on TCP so small request frames go out
    /// immediately.
    pub fn connect(addr: &ServerAddr) -> io::Result<Self> {
        let stream = match addr {
            ServerAddr::Tcp { host, port } => {
                let s = TcpStream::connect((host.as_str(), *port))?;
                s.set_nodelay(true)?;
                SocketStream::Tcp(s)
            }
            #[cfg(unix)]
            ServerAddr::Unix { path } => SocketStream::Unix(UnixStream::connect(path)?),
        };
        stream.set_nonblocking(true)?;
        Ok(stream)
    }

    /// Toggle non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            SocketStream::Tcp(s) => s.set_nonblocking(nonblocking),
            #[cfg(unix)]
            SocketStream::Unix(s) => s.set_nonblocking(nonblocking),
        }
    }

    /// Shut down both directions of the stream.
    pub fn shutdown(&self) -> io::Result<()> {
        match self {
            SocketStream::Tcp(s) => s.shutdown(Shutdown::Both),
            #[cfg(unix)]
            SocketStream::Unix(s) => s.shutdown(Shutdown::Both),
        }
    }

    /// Block until the stream is readable.
    pub fn wait_readable(&self) -> io::Result<()> {
        self.wait(WaitFor::Read)
    }

    /// Block until the stream is writable.
    pub fn wait_writable(&self) -> io::Result<()> {
        self.wait(WaitFor::Write)
    }

    #[cfg(unix)]
    fn wait(&self, dir: WaitFor) -> io::Result<()> {
        let events = match dir {
            WaitFor::Read => libc::POLLIN,
            WaitFor::Write => libc::POLLOUT,
        };
        let mut pfd = libc::pollfd {
            fd: self.as_raw_fd(),
            events,
            revents: 0,
        };
        loop {
            let rc = unsafe { libc::poll(&mut pfd, 1, -1) };
            if rc >= 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    #[cfg(not(unix))]
    fn wait(&self, _dir: WaitFor) -> io::Result<()> {
        std::thread::sleep(std::time::Duration::from_millis(1));
        Ok(())
    }
}

enum WaitFor {
    Read,
    Write,
}

#[cfg(unix)]
impl AsRawFd for SocketStream {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            SocketStream::Tcp(s) => s.as_raw_fd(),
            SocketStream::Unix(s) => s.as_raw_fd(),
        }
    }
}

impl Read for SocketStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            SocketStream::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            SocketStream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for SocketStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            SocketStream::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            SocketStream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            SocketStream::Tcp(s) => s.flush(),
            #[cfg(unix)]
            SocketStream::Unix(s) => s.flush(),
        }
    }
}
