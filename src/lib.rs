//! An async WebSocket endpoint engine for the Tokio stack, usable symmetrically as
//! client and server.
//!
//! It implements [RFC 6455](https://datatracker.ietf.org/doc/html/rfc6455) end to end:
//! the opening HTTP upgrade handshake ([`handshake`]), the frame codec ([`codec`],
//! [`frame`]), and the per-connection state machine that reassembles fragments,
//! answers control frames, and drives the close handshake ([`connection`]).
//! Applications plug in by implementing [`connection::Handler`] and driving the
//! resulting [`connection::Connection`] with `run()`.

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handshake;
mod mask;
pub mod message;
pub mod stream;

pub use connection::{Connection, Handler, Role, Sender};
pub use error::Error;
pub use frame::OpCode;
pub use handshake::{accept_async, accept_async_tcp, connect_async};
pub use message::Message;
