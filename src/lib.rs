//! Async WebSocket endpoint library for the Tokio stack.
//!
//! Implements both sides of [RFC 6455](https://datatracker.ietf.org/doc/html/rfc6455)
//! plus the permessage-deflate extension of
//! [RFC 7692](https://datatracker.ietf.org/doc/html/rfc7692), sharing one
//! frame-processing core between the client and server roles: the opening
//! handshake, the frame codec with masking and fragmentation, the message
//! assembler with UTF-8 validation, per-direction DEFLATE sessions with
//! negotiated window sizes and context takeover, the closing handshake and
//! ping/pong keep-alive with correlation ids.
//!
//! Servers are usually spawned with [`server::start_server`], which yields
//! an [`event::EventStream`] of connection events; clients connect with
//! [`handshake::connect_async`] and drive the returned
//! [`connection::WSConnection`] as a stream of [`event::WSEvent`]s. Both
//! roles share the same configuration surface in [`config`], including
//! TLS via rustls and the deflate options in [`extensions`].

pub mod config;
mod connection;
mod deflate;
pub mod error;
pub mod event;
pub mod extensions;
pub mod frame;
pub mod handshake;
mod keepalive;
pub mod message;
mod read;
pub mod request;
pub mod server;
pub mod split;
pub mod stream;
mod utils;
mod write;

mod tests;

pub use crate::config::{
    AcceptDecision, AutoPingConfig, ClientConfig, LeftoverBytes, ServerConfig, WebSocketConfig,
};
pub use crate::connection::{ConnectionState, WSConnection};
pub use crate::error::Error;
pub use crate::event::{Event, EventStream, ShutdownHandle, WSEvent, ID};
pub use crate::extensions::DeflateOptions;
pub use crate::frame::{CloseFrame, Frame, OpCode};
pub use crate::message::Message;
pub use crate::split::{WSReader, WSWriter};
