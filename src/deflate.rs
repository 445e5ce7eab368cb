use crate::error::Error;
use crate::extensions::NegotiatedDeflate;
use crate::frame::{Frame, OpCode};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

// Every Z_SYNC_FLUSH block ends with an empty stored block. The sender
// strips it from the last frame of a message, the receiver restores it
// before inflating, RFC 7692 7.2.1.
const DEFLATE_TAIL: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

const OUTPUT_CHUNK: usize = 8 * 1024;

// zlib refuses raw streams with a window below nine bits, an eight-bit
// negotiation result is promoted the way zlib itself promotes it.
fn effective_window_bits(bits: u8) -> u8 {
    if bits == 8 {
        9
    } else {
        bits
    }
}

/// The outbound half of a permessage-deflate session. Owned by the sender,
/// lives as long as the connection.
pub(crate) struct DeflateEncoder {
    compress: Compress,
    reset_context: bool,
}

impl DeflateEncoder {
    pub fn new(params: &NegotiatedDeflate) -> Self {
        Self {
            compress: Compress::new_with_window_bits(
                Compression::default(),
                false,
                effective_window_bits(params.local_max_window_bits),
            ),
            reset_context: params.compress_reset,
        }
    }

    /// Compresses one outbound data frame. Control frames pass through
    /// untouched, RSV1 is raised on the first frame of each message.
    pub fn encode(&mut self, mut frame: Frame) -> Result<Frame, Error> {
        if frame.opcode.is_control() {
            return Ok(frame);
        }

        let mut compressed = self.deflate(&frame.payload)?;
        if frame.final_fragment {
            compressed.truncate(compressed.len().saturating_sub(DEFLATE_TAIL.len()));
            if self.reset_context {
                self.compress.reset();
            }
        }

        frame.rsv1 = frame.opcode != OpCode::Continue;
        frame.payload = compressed;
        Ok(frame)
    }

    fn deflate(&mut self, input: &[u8]) -> Result<Vec<u8>, Error> {
        let mut output = Vec::with_capacity((input.len() / 2).max(64));
        let before_in = self.compress.total_in();

        loop {
            let consumed = (self.compress.total_in() - before_in) as usize;
            if output.len() == output.capacity() {
                output.reserve(OUTPUT_CHUNK);
            }
            self.compress
                .compress_vec(&input[consumed..], &mut output, FlushCompress::Sync)
                .map_err(|err| Error::Compression(err.to_string()))?;

            let consumed = (self.compress.total_in() - before_in) as usize;
            // A sync flush that leaves spare output space has emitted
            // everything it buffered.
            if consumed == input.len() && output.len() < output.capacity() {
                return Ok(output);
            }
        }
    }
}

/// The inbound half of a permessage-deflate session. Frames of a
/// fragmented message inflate through the same stream, so the shared LZ77
/// window survives fragment boundaries.
pub(crate) struct DeflateDecoder {
    decompress: Decompress,
    reset_context: bool,
    max_size: usize,
    /// Bytes already produced for the message currently being inflated.
    produced: usize,
}

impl DeflateDecoder {
    pub fn new(params: &NegotiatedDeflate) -> Self {
        Self {
            decompress: Decompress::new_with_window_bits(
                false,
                effective_window_bits(params.remote_max_window_bits),
            ),
            reset_context: params.decompress_reset,
            max_size: params.max_decompression_size,
            produced: 0,
        }
    }

    /// Inflates one inbound data frame, clearing RSV1 on the way out.
    pub fn decode(&mut self, mut frame: Frame) -> Result<Frame, Error> {
        if frame.opcode.is_control() {
            return Ok(frame);
        }

        let mut input = std::mem::take(&mut frame.payload);
        if frame.final_fragment {
            input.extend_from_slice(&DEFLATE_TAIL);
        }

        let output = self.inflate(&input)?;
        self.produced += output.len();

        if frame.final_fragment {
            self.produced = 0;
            if self.reset_context {
                self.decompress.reset(false);
            }
        }

        frame.rsv1 = false;
        frame.payload = output;
        Ok(frame)
    }

    fn inflate(&mut self, input: &[u8]) -> Result<Vec<u8>, Error> {
        let mut output = Vec::with_capacity(input.len().max(64) * 2);
        let before_in = self.decompress.total_in();

        loop {
            let consumed = (self.decompress.total_in() - before_in) as usize;
            if output.len() == output.capacity() {
                output.reserve(OUTPUT_CHUNK);
            }
            let status = self
                .decompress
                .decompress_vec(&input[consumed..], &mut output, FlushDecompress::Sync)
                .map_err(|err| Error::Decompression(err.to_string()))?;

            if self.produced + output.len() > self.max_size {
                return Err(Error::LimitExceeded);
            }

            let consumed = (self.decompress.total_in() - before_in) as usize;
            match status {
                Status::StreamEnd => return Ok(output),
                _ if consumed == input.len() && output.len() < output.capacity() => {
                    return Ok(output)
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::NegotiatedDeflate;

    fn params(bits: u8, compress_reset: bool, decompress_reset: bool) -> NegotiatedDeflate {
        NegotiatedDeflate {
            local_max_window_bits: bits,
            remote_max_window_bits: bits,
            compress_reset,
            decompress_reset,
            max_decompression_size: 64 << 20,
        }
    }

    fn data_frame(fin: bool, opcode: OpCode, payload: &[u8]) -> Frame {
        Frame::new(fin, opcode, payload.to_vec())
    }

    #[test]
    fn encode_strips_tail_and_sets_rsv1() {
        let mut encoder = DeflateEncoder::new(&params(15, false, false));
        let frame = encoder
            .encode(data_frame(true, OpCode::Text, &[b'A'; 1024]))
            .unwrap();

        assert!(frame.rsv1);
        assert!(frame.payload.len() < 1024);
        assert_ne!(frame.payload[frame.payload.len() - 4..], DEFLATE_TAIL);
    }

    #[test]
    fn control_frames_pass_through() {
        let mut encoder = DeflateEncoder::new(&params(15, false, false));
        let frame = encoder.encode(Frame::ping(b"probe".to_vec())).unwrap();
        assert!(!frame.rsv1);
        assert_eq!(frame.payload, b"probe");
    }

    #[test]
    fn round_trip_across_negotiated_parameters() {
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(20);

        for bits in 8..=15 {
            for compress_reset in [false, true] {
                for decompress_reset in [false, true] {
                    let negotiated = params(bits, compress_reset, decompress_reset);
                    let mut encoder = DeflateEncoder::new(&negotiated);
                    let mut decoder = DeflateDecoder::new(&negotiated);

                    // A couple of messages in a row so context (or its
                    // absence) actually matters.
                    for _ in 0..3 {
                        let encoded = encoder
                            .encode(data_frame(true, OpCode::Binary, &payload))
                            .unwrap();
                        let decoded = decoder.decode(encoded).unwrap();
                        assert!(!decoded.rsv1);
                        assert_eq!(decoded.payload, payload);
                    }
                }
            }
        }
    }

    #[test]
    fn fragmented_message_inflates_across_frames() {
        let negotiated = params(15, false, false);
        let mut encoder = DeflateEncoder::new(&negotiated);
        let mut decoder = DeflateDecoder::new(&negotiated);

        let first = encoder
            .encode(data_frame(false, OpCode::Text, b"hello "))
            .unwrap();
        let last = encoder
            .encode(data_frame(true, OpCode::Continue, b"world"))
            .unwrap();
        assert!(first.rsv1);
        assert!(!last.rsv1);

        let mut assembled = decoder.decode(first).unwrap().payload;
        assembled.extend(decoder.decode(last).unwrap().payload);
        assert_eq!(assembled, b"hello world");
    }

    #[test]
    fn empty_message_round_trips() {
        let negotiated = params(15, true, true);
        let mut encoder = DeflateEncoder::new(&negotiated);
        let mut decoder = DeflateDecoder::new(&negotiated);

        let encoded = encoder.encode(data_frame(true, OpCode::Text, b"")).unwrap();
        let decoded = decoder.decode(encoded).unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn decompression_limit_is_enforced() {
        let negotiated = params(15, false, false);
        let mut encoder = DeflateEncoder::new(&negotiated);
        let mut decoder = DeflateDecoder::new(&NegotiatedDeflate {
            max_decompression_size: 512,
            ..negotiated
        });

        let encoded = encoder
            .encode(data_frame(true, OpCode::Binary, &[0u8; 4096]))
            .unwrap();
        assert!(matches!(decoder.decode(encoded), Err(Error::LimitExceeded)));
    }
}
