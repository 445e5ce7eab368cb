use crate::error::Error;
use crate::event::WSEvent;
use crate::frame::OpCode;
use crate::message::Message;
use crate::split::{WSReader, WSWriter};
use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Connection state shared between the reader task, the writer handle and
/// the keep-alive timers. Transitions go through compare-and-swap so the
/// close paths stay idempotent no matter which side runs first.
#[derive(Clone)]
pub(crate) struct ConnState(Arc<AtomicU8>);

impl ConnState {
    pub fn new(state: ConnectionState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Returns true only for the caller that performed the transition.
    pub fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// An established WebSocket connection: a stream of inbound events plus
/// the full send surface. Splitting hands the halves to separate tasks.
pub struct WSConnection {
    reader: WSReader,
    writer: WSWriter,
}

impl WSConnection {
    pub(crate) fn new(reader: WSReader, writer: WSWriter) -> Self {
        Self { reader, writer }
    }

    // Splitting the connection, so incoming events can be monitored in a
    // separate task while the writer half is handed to the end-user
    pub fn split(self) -> (WSReader, WSWriter) {
        (self.reader, self.writer)
    }

    pub fn state(&self) -> ConnectionState {
        self.writer.state()
    }

    pub async fn send_message(&mut self, message: Message) -> Result<(), Error> {
        self.writer.send_message(message).await
    }

    /// Sends a vector of bytes as a text message.
    pub async fn send(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.writer.send(data).await
    }

    pub async fn send_as_text(&mut self, data: String) -> Result<(), Error> {
        self.writer.send_as_text(data).await
    }

    pub async fn send_as_binary(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.writer.send_as_binary(data).await
    }

    pub async fn send_fragmented(
        &mut self,
        message: Message,
        fragment_size: usize,
    ) -> Result<(), Error> {
        self.writer.send_fragmented(message, fragment_size).await
    }

    pub async fn send_frame(
        &mut self,
        payload: Vec<u8>,
        opcode: OpCode,
        final_fragment: bool,
    ) -> Result<(), Error> {
        self.writer.send_frame(payload, opcode, final_fragment).await
    }

    pub async fn send_ping(&mut self, payload: Vec<u8>) -> Result<(), Error> {
        self.writer.send_ping(payload).await
    }

    pub async fn send_pong(&mut self, payload: Vec<u8>) -> Result<(), Error> {
        self.writer.send_pong(payload).await
    }

    pub async fn close(&mut self, code: u16, reason: &str) -> Result<(), Error> {
        self.writer.close(code, reason).await
    }

    pub async fn buffered_amount(&self) -> usize {
        self.writer.buffered_amount().await
    }
}

impl Stream for WSConnection {
    type Item = Result<WSEvent, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().reader).poll_next(cx)
    }
}
