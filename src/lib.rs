//! # rserve-client
//!
//! Rust client for the [Rserve](https://www.rforge.net/Rserve/) binary
//! protocol (QAP1) over TCP or a local domain socket.
//!
//! ## Architecture
//!
//! - **`protocol`**: wire constants, the tagged-length item codec, message
//!   framing and the resumable, non-blocking read/write state machines
//! - **`sexp`**: the decoded expression tree, zero-copy over the received
//!   payload via `bytes::Bytes`
//! - **`transport`**: the non-blocking TCP/Unix stream socket
//! - **[`Connection`]**: handshake, authentication and the command surface
//!   (eval, assign, file transfer, shutdown)
//!
//! ## Example
//!
//! ```ignore
//! use rserve_client::{Connection, ServerAddr};
//!
//! fn main() -> rserve_client::Result<()> {
//!     let mut conn = Connection::new(ServerAddr::tcp("127.0.0.1", 6311));
//!     conn.connect()?;
//!     conn.handshake()?;
//!
//!     conn.void_eval("x <- rnorm(100)")?;
//!     let mean = conn.eval("mean(x)")?;
//!     println!("mean: {:?}", mean.as_doubles());
//!
//!     conn.disconnect();
//!     Ok(())
//! }
//! ```
//!
//! One request is outstanding per connection at a time. The protocol
//! state machines report distinct "no progress yet" outcomes, so many
//! connections can also be driven from a single readiness loop instead
//! of the built-in blocking waits.

pub mod error;
pub mod protocol;
pub mod sexp;
pub mod transport;

mod connection;

pub use connection::{Connection, CryptFn};
pub use error::{Result, RserveError, ServerError};
pub use sexp::{Sexp, SexpKind};
pub use transport::ServerAddr;
