use crate::error::Error;
use crate::frame::Frame;
use crate::stream::WsStream;
use bytes::{BufMut, BytesMut};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncWriteExt, WriteHalf};

pub enum WriterKind {
    Client,
    Server,
}

/// Serialises frames into the socket. Frames are staged in an internal
/// buffer: control frames and final fragments go out immediately, while
/// non-final fragments batch until the low watermark. No send may leave
/// more than the high watermark buffered.
pub struct Writer {
    write_half: WriteHalf<WsStream>,
    kind: WriterKind,
    out: BytesMut,
    low_watermark: usize,
    high_watermark: usize,
}

impl Writer {
    pub fn new(
        write_half: WriteHalf<WsStream>,
        kind: WriterKind,
        low_watermark: usize,
        high_watermark: usize,
    ) -> Self {
        Self {
            write_half,
            kind,
            out: BytesMut::new(),
            low_watermark,
            high_watermark,
        }
    }

    pub fn buffered_amount(&self) -> usize {
        self.out.len()
    }

    pub async fn write_frame(&mut self, frame: Frame) -> Result<(), Error> {
        // 14 bytes covers the largest possible header
        if self.out.len() + frame.payload.len() + 14 > self.high_watermark {
            self.flush().await?;
        }

        let flush_now = frame.opcode.is_control() || frame.final_fragment;
        match self.kind {
            WriterKind::Client => self.encode_frame_client(frame),
            WriterKind::Server => self.encode_frame_server(frame),
        }

        if flush_now || self.out.len() >= self.low_watermark {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), Error> {
        if !self.out.is_empty() {
            let buffered = self.out.split();
            self.write_half.write_all(&buffered).await?;
        }
        self.write_half.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), Error> {
        self.flush().await?;
        self.write_half.shutdown().await?;
        Ok(())
    }

    // The first byte of a frame carries the fin bit, the three reserved
    // bits and the opcode; the second the mask bit and the length
    // indicator, with 16-bit and 64-bit big-endian extensions.
    fn put_header(&mut self, frame: &Frame, masked: bool) {
        let mut first_byte = (frame.final_fragment as u8) << 7 | frame.opcode.as_u8();
        if frame.rsv1 {
            first_byte |= 0x40;
        }
        if frame.rsv2 {
            first_byte |= 0x20;
        }
        if frame.rsv3 {
            first_byte |= 0x10;
        }
        self.out.put_u8(first_byte);

        let mask_bit = (masked as u8) << 7;
        let payload_len = frame.payload.len();
        if payload_len <= 125 {
            self.out.put_u8(mask_bit | payload_len as u8);
        } else if payload_len <= 65535 {
            self.out.put_u8(mask_bit | 126);
            self.out.put_u16(payload_len as u16);
        } else {
            self.out.put_u8(mask_bit | 127);
            self.out.put_u64(payload_len as u64);
        }
    }

    fn encode_frame_server(&mut self, frame: Frame) {
        self.put_header(&frame, false);
        self.out.extend_from_slice(&frame.payload);
    }

    // Frames sent by a client carry a fresh random mask key, and the
    // payload goes on the wire XORed against it.
    fn encode_frame_client(&mut self, frame: Frame) {
        let mut rng = StdRng::from_rng(&mut rand::rng());
        let mask: [u8; 4] = rng.random();

        self.put_header(&frame, true);
        self.out.extend_from_slice(&mask);

        self.out.reserve(frame.payload.len());
        for (i, byte) in frame.payload.iter().enumerate() {
            self.out.put_u8(byte ^ mask[i % 4]);
        }
    }
}
