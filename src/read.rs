use crate::config::WebSocketConfig;
use crate::connection::{ConnState, ConnectionState};
use crate::deflate::DeflateDecoder;
use crate::error::Error;
use crate::event::WSEvent;
use crate::frame::{CloseFrame, Frame, OpCode};
use crate::keepalive::{PingTracker, PING_ID_SIZE};
use crate::message::Message;
use crate::stream::WsStream;
use crate::write::Writer;
use log::debug;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, BufReader, ReadHalf};
use tokio::sync::mpsc::Sender;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

// Guards against a peer that sends a frame header and then trickles the
// payload forever. Idle connections are unaffected, the clock only runs
// once a header arrived.
const PAYLOAD_READ_TIMEOUT: Duration = Duration::from_secs(5);

// Grace period a client grants the server to drop the TCP connection
// after the closing handshake completed.
const CLOSE_LINGER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReaderKind {
    Client,
    Server,
}

struct FragmentedMessage {
    fragments: Vec<u8>,
    op_code: OpCode,
    /// RSV1 of the first frame decides the fate of the whole message, the
    /// continuation frames carry no flag of their own.
    compressed: bool,
    frame_count: usize,
}

/// Owns the inbound half of a connection: decodes frames off the wire,
/// assembles fragmented messages, runs the deflate session, answers pings
/// and drives the closing handshake. Everything it learns is forwarded
/// through the event channel in wire order.
pub(crate) struct ReadStream {
    kind: ReaderKind,
    buf_reader: BufReader<ReadHalf<WsStream>>,
    fragmented_message: Option<FragmentedMessage>,
    read_tx: Sender<Result<WSEvent, Error>>,
    writer: Arc<Mutex<Writer>>,
    config: WebSocketConfig,
    decoder: Option<DeflateDecoder>,
    state: ConnState,
    ping_tracker: Arc<PingTracker>,
}

impl ReadStream {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: ReaderKind,
        buf_reader: BufReader<ReadHalf<WsStream>>,
        read_tx: Sender<Result<WSEvent, Error>>,
        writer: Arc<Mutex<Writer>>,
        config: WebSocketConfig,
        decoder: Option<DeflateDecoder>,
        state: ConnState,
        ping_tracker: Arc<PingTracker>,
    ) -> Self {
        Self {
            kind,
            buf_reader,
            fragmented_message: None,
            read_tx,
            writer,
            config,
            decoder,
            state,
            ping_tracker,
        }
    }

    /// Drives the connection until it closes, then tears everything down.
    /// Fatal protocol errors emit a best-effort close frame, transport
    /// errors skip straight to CLOSED.
    pub async fn run(mut self, keepalive: Option<JoinHandle<()>>) {
        if let Err(error) = self.poll_messages().await {
            self.fail(error).await;
        }

        self.state.set(ConnectionState::Closed);
        self.ping_tracker.abort_all().await;
        if let Some(task) = keepalive {
            task.abort();
        }
        let _ = self.writer.lock().await.shutdown().await;
    }

    async fn fail(&mut self, error: Error) {
        debug!("connection failed: {}", error);

        if !error.is_transport() {
            let close_frame = CloseFrame::new(error.close_code(), "");
            let mut writer = self.writer.lock().await;
            let _ = writer.write_frame(Frame::close(close_frame.to_payload())).await;
        }

        let _ = self.read_tx.send(Err(error)).await;
    }

    pub async fn poll_messages(&mut self) -> Result<(), Error> {
        loop {
            let frame = self.read_frame().await?;

            match frame.opcode {
                // A fragmented message opens with a non-final text or
                // binary frame, anything else arriving mid-sequence is
                // a protocol violation.
                OpCode::Text | OpCode::Binary if !frame.final_fragment => {
                    if self.fragmented_message.is_some() {
                        return Err(Error::ReceivedNewFrameWithoutFinishingPreviousOne);
                    }
                    if frame.payload.len() < self.config.min_non_final_fragment_size {
                        return Err(Error::NonFinalFragmentSizeIsTooSmall);
                    }

                    let compressed = frame.rsv1;
                    let frame = self.decode_frame(frame, compressed)?;
                    let fragmented_message = FragmentedMessage {
                        op_code: frame.opcode,
                        fragments: frame.payload,
                        compressed,
                        frame_count: 1,
                    };
                    self.check_fragment_limits(&fragmented_message)?;
                    self.fragmented_message = Some(fragmented_message);
                }
                OpCode::Continue => {
                    if self.fragmented_message.is_none() {
                        return Err(Error::ReceivedContinuationFrameWithoutPreviousFragmentFrame);
                    }
                    if !frame.final_fragment
                        && frame.payload.len() < self.config.min_non_final_fragment_size
                    {
                        return Err(Error::NonFinalFragmentSizeIsTooSmall);
                    }

                    let compressed = self
                        .fragmented_message
                        .as_ref()
                        .map(|message| message.compressed)
                        .unwrap_or_default();
                    let final_fragment = frame.final_fragment;
                    let frame = self.decode_frame(frame, compressed)?;

                    if let Some(fragmented_message) = self.fragmented_message.as_mut() {
                        fragmented_message.fragments.extend_from_slice(&frame.payload);
                        fragmented_message.frame_count += 1;
                    }
                    if let Some(fragmented_message) = self.fragmented_message.as_ref() {
                        self.check_fragment_limits(fragmented_message)?;
                    }

                    if final_fragment {
                        if let Some(fragmented_message) = self.fragmented_message.take() {
                            self.deliver(Frame::new(
                                true,
                                fragmented_message.op_code,
                                fragmented_message.fragments,
                            ))
                            .await?;
                        }
                    }
                }
                OpCode::Text | OpCode::Binary => {
                    if self.fragmented_message.is_some() {
                        return Err(Error::ReceivedNewFrameWithoutFinishingPreviousOne);
                    }

                    let compressed = frame.rsv1;
                    let frame = self.decode_frame(frame, compressed)?;
                    self.deliver(frame).await?;
                }
                OpCode::Close => {
                    self.handle_close(frame).await?;
                    break;
                }
                OpCode::Ping => {
                    // The pong goes out before the embedder hears about
                    // the ping, keeping the RFC-mandated order even if
                    // the callback is slow.
                    self.writer
                        .lock()
                        .await
                        .write_frame(Frame::pong(frame.payload.clone()))
                        .await?;
                    self.transmit(WSEvent::Ping(frame.payload)).await?;
                }
                OpCode::Pong => {
                    if frame.payload.len() == PING_ID_SIZE {
                        self.ping_tracker.resolve(&frame.payload).await;
                    }
                    self.transmit(WSEvent::Pong(frame.payload)).await?;
                }
            }
        }
        Ok(())
    }

    fn decode_frame(&mut self, frame: Frame, compressed: bool) -> Result<Frame, Error> {
        match (compressed, self.decoder.as_mut()) {
            (true, Some(decoder)) => decoder.decode(frame),
            _ => Ok(frame),
        }
    }

    fn check_fragment_limits(&self, message: &FragmentedMessage) -> Result<(), Error> {
        if let Some(max) = self.config.max_accumulated_frame_count {
            if message.frame_count > max {
                return Err(Error::TooManyFrameFragments);
            }
        }
        if let Some(max) = self.config.max_accumulated_frame_size {
            if message.fragments.len() > max {
                return Err(Error::AccumulatedFrameSizeIsTooLarge);
            }
        }
        Ok(())
    }

    /// Hand-off of a complete message. Text payloads prove their UTF-8
    /// inside the conversion, at delivery time.
    async fn deliver(&mut self, frame: Frame) -> Result<(), Error> {
        self.transmit(WSEvent::Message(Message::from_frame(frame)?))
            .await
    }

    async fn transmit(&mut self, event: WSEvent) -> Result<(), Error> {
        self.read_tx
            .send(Ok(event))
            .await
            .map_err(|_| Error::ChannelNotActive)
    }

    async fn handle_close(&mut self, frame: Frame) -> Result<(), Error> {
        let close_frame = CloseFrame::parse(&frame.payload)?;

        if self.state.transition(ConnectionState::Open, ConnectionState::Closing) {
            // Peer-initiated close: report it, echo the payload back and
            // consider the handshake complete.
            self.transmit(WSEvent::Closing(close_frame)).await?;
            self.writer
                .lock()
                .await
                .write_frame(Frame::close(frame.payload))
                .await?;
            self.state.set(ConnectionState::Closed);
            if self.kind == ReaderKind::Client {
                self.await_server_fin().await;
            }
        } else if self.state.get() == ConnectionState::Closing {
            // The reply to a close we sent earlier.
            self.state.set(ConnectionState::Closed);
            if self.kind == ReaderKind::Client {
                self.await_server_fin().await;
            }
        }

        Ok(())
    }

    // The server is the one dropping the TCP connection, a client lingers
    // until the FIN arrives (or gives up after a grace period).
    async fn await_server_fin(&mut self) {
        let mut scratch = [0u8; 128];
        let _ = timeout(CLOSE_LINGER_TIMEOUT, async {
            loop {
                match self.buf_reader.read(&mut scratch).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
    }

    pub async fn read_frame(&mut self) -> Result<Frame, Error> {
        let mut header = [0u8; 2];

        self.buf_reader.read_exact(&mut header).await?;

        // The first bit in the first byte tells whether this frame is the
        // final fragment of a message, the low nibble is the opcode.
        let final_fragment = (header[0] & 0b1000_0000) != 0;
        let opcode = OpCode::from(header[0] & 0b0000_1111)?;

        // Reserved bits belong to negotiated extensions. Only RSV1 ever
        // has an owner here, and only on the first frame of a data
        // message, everything else fails the connection.
        let rsv1 = (header[0] & 0b0100_0000) != 0;
        let rsv2 = (header[0] & 0b0010_0000) != 0;
        let rsv3 = (header[0] & 0b0001_0000) != 0;

        if rsv2 || rsv3 {
            return Err(Error::InvalidReservedBits);
        }
        if rsv1 && (self.decoder.is_none() || opcode == OpCode::Continue || opcode.is_control()) {
            return Err(Error::InvalidReservedBits);
        }

        // Control frames can't be fragmented
        if !final_fragment && opcode.is_control() {
            return Err(Error::ControlFrameShouldNotBeFragmented);
        }

        // Per RFC 6455 every client frame is masked and no server frame
        // is, each side enforces its own view.
        let masked = (header[1] & 0b1000_0000) != 0;
        match self.kind {
            ReaderKind::Server if !masked => return Err(Error::UnmaskedFrameFromClient),
            ReaderKind::Client if masked => return Err(Error::MaskedFrameFromServer),
            _ => {}
        }

        // The next 7 bits carry the payload length, with 126 and 127
        // escaping to 16-bit and 64-bit big-endian extensions.
        let mut length = (header[1] & 0b0111_1111) as usize;

        // Control frames are only allowed a payload up to 125 octets
        if length > 125 && opcode.is_control() {
            return Err(Error::ControlFramePayloadSize);
        }

        if length == 126 {
            let mut be_bytes = [0u8; 2];
            self.buf_reader.read_exact(&mut be_bytes).await?;
            length = u16::from_be_bytes(be_bytes) as usize;
        } else if length == 127 {
            let mut be_bytes = [0u8; 8];
            self.buf_reader.read_exact(&mut be_bytes).await?;
            length = u64::from_be_bytes(be_bytes) as usize;
        }

        if length > self.config.max_frame_size.unwrap_or(usize::MAX) {
            return Err(Error::MaxFrameSize);
        }

        let mask = if masked {
            let mut mask = [0u8; 4];
            self.buf_reader.read_exact(&mut mask).await?;
            Some(mask)
        } else {
            None
        };

        let mut payload = vec![0u8; length];
        timeout(
            PAYLOAD_READ_TIMEOUT,
            self.buf_reader.read_exact(&mut payload),
        )
        .await??;

        // Unmasking happens in place: each payload byte XORed with the
        // corresponding byte (modulo 4) of the mask key.
        if let Some(mask) = mask {
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte ^= mask[i % 4];
            }
        }

        Ok(Frame {
            final_fragment,
            rsv1,
            rsv2,
            rsv3,
            opcode,
            payload,
        })
    }
}
