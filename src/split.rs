use crate::config::WebSocketConfig;
use crate::connection::{ConnState, ConnectionState};
use crate::deflate::DeflateEncoder;
use crate::error::Error;
use crate::event::WSEvent;
use crate::frame::{CloseFrame, Frame, OpCode, MAX_CLOSE_REASON_SIZE};
use crate::message::Message;
use crate::write::Writer;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::Mutex;
use tokio_stream::wrappers::ReceiverStream;

/// The inbound half of a split connection, a plain stream of events.
pub struct WSReader {
    read_rx: ReceiverStream<Result<WSEvent, Error>>,
}

impl WSReader {
    pub(crate) fn new(read_rx: ReceiverStream<Result<WSEvent, Error>>) -> Self {
        Self { read_rx }
    }
}

impl Stream for WSReader {
    type Item = Result<WSEvent, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.read_rx).poll_next(cx)
    }
}

/// The outbound half of a split connection. Owns the send path: state
/// check, fragmentation, per-frame deflate, then the shared writer.
pub struct WSWriter {
    writer: Arc<Mutex<Writer>>,
    config: WebSocketConfig,
    state: ConnState,
    encoder: Option<DeflateEncoder>,
}

impl WSWriter {
    pub(crate) fn new(
        writer: Arc<Mutex<Writer>>,
        config: WebSocketConfig,
        state: ConnState,
        encoder: Option<DeflateEncoder>,
    ) -> Self {
        Self {
            writer,
            config,
            state,
            encoder,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Bytes staged in the write buffer but not yet flushed to the socket.
    pub async fn buffered_amount(&self) -> usize {
        self.writer.lock().await.buffered_amount()
    }

    pub async fn send_message(&mut self, message: Message) -> Result<(), Error> {
        let fragment_size = self.config.max_frame_size.unwrap_or(usize::MAX);
        self.write_data_frames(message.into_frames(fragment_size))
            .await
    }

    /// Sends a vector of bytes as a text message.
    pub async fn send(&mut self, data: Vec<u8>) -> Result<(), Error> {
        let text = String::from_utf8(data).map_err(|_| Error::InvalidUTF8String)?;
        self.send_message(Message::Text(text)).await
    }

    pub async fn send_as_text(&mut self, data: String) -> Result<(), Error> {
        self.send_message(Message::Text(data)).await
    }

    pub async fn send_as_binary(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.send_message(Message::Binary(data)).await
    }

    /// Sends a message split into caller-sized fragments instead of the
    /// configured frame size.
    pub async fn send_fragmented(
        &mut self,
        message: Message,
        fragment_size: usize,
    ) -> Result<(), Error> {
        let max_frame_size = self.config.max_frame_size.unwrap_or(usize::MAX);
        if fragment_size > max_frame_size {
            return Err(Error::CustomFragmentSizeExceeded(
                fragment_size,
                max_frame_size,
            ));
        }

        self.write_data_frames(message.into_frames(fragment_size))
            .await
    }

    /// Sends one raw frame. For data opcodes the caller owns fragmentation
    /// sequencing: a non-final text/binary frame opens a sequence the peer
    /// expects to see continued and finished, in order and uninterleaved.
    /// Close frames are routed through the closing handshake.
    pub async fn send_frame(
        &mut self,
        payload: Vec<u8>,
        opcode: OpCode,
        final_fragment: bool,
    ) -> Result<(), Error> {
        match opcode {
            OpCode::Text | OpCode::Binary | OpCode::Continue => {
                self.write_data_frames(vec![Frame::new(final_fragment, opcode, payload)])
                    .await
            }
            OpCode::Ping | OpCode::Pong => {
                self.write_control_frame(Frame::new(true, opcode, payload)).await
            }
            OpCode::Close => match CloseFrame::parse(&payload)? {
                Some(close_frame) => self.close(close_frame.code, &close_frame.reason).await,
                None => self.close(1000, "").await,
            },
        }
    }

    pub async fn send_ping(&mut self, payload: Vec<u8>) -> Result<(), Error> {
        self.write_control_frame(Frame::ping(payload)).await
    }

    pub async fn send_pong(&mut self, payload: Vec<u8>) -> Result<(), Error> {
        self.write_control_frame(Frame::pong(payload)).await
    }

    /// Starts the closing handshake. 1005 and 1006 are rewritten to a
    /// normal closure, any other code outside the wire whitelist is
    /// refused, and the reason must fit the 125-byte control payload next
    /// to the two code bytes.
    pub async fn close(&mut self, code: u16, reason: &str) -> Result<(), Error> {
        if reason.len() > MAX_CLOSE_REASON_SIZE {
            return Err(Error::CloseReasonTooLong);
        }
        let code = CloseFrame::sanitize_code(code);
        if !CloseFrame::is_allowed_on_wire(code) {
            return Err(Error::InvalidCloseCode(code));
        }

        match self.state.get() {
            ConnectionState::Open => {
                if !self
                    .state
                    .transition(ConnectionState::Open, ConnectionState::Closing)
                {
                    // Lost the race against an inbound close, the frame
                    // already on its way is answer enough.
                    return Ok(());
                }
                let close_frame = CloseFrame::new(code, reason);
                let mut writer = self.writer.lock().await;
                writer
                    .write_frame(Frame::close(close_frame.to_payload()))
                    .await?;
                writer.flush().await
            }
            // A close is already in flight, nothing more to send.
            ConnectionState::Closing => Ok(()),
            _ => Err(Error::WebSocketNotConnected),
        }
    }

    fn ensure_open(&self) -> Result<(), Error> {
        match self.state.get() {
            ConnectionState::Open => Ok(()),
            _ => Err(Error::WebSocketNotConnected),
        }
    }

    async fn write_control_frame(&mut self, frame: Frame) -> Result<(), Error> {
        self.ensure_open()?;
        if frame.payload.len() > 125 {
            return Err(Error::ControlFramePayloadSize);
        }
        // Control frames never run through the deflate session
        self.writer.lock().await.write_frame(frame).await
    }

    async fn write_data_frames(&mut self, frames: Vec<Frame>) -> Result<(), Error> {
        self.ensure_open()?;

        for frame in frames {
            let frame = match self.encoder.as_mut() {
                Some(encoder) => encoder.encode(frame)?,
                None => frame,
            };
            self.writer.lock().await.write_frame(frame).await?;
        }
        Ok(())
    }
}
