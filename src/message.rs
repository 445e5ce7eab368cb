use crate::error::Error;
use crate::frame::{Frame, OpCode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    // Converts a delivered frame into a Message variant. The payload of a
    // text frame has already been validated by the assembler.
    pub(crate) fn from_frame(frame: Frame) -> Result<Self, Error> {
        match frame.opcode {
            OpCode::Text => Ok(Message::Text(
                String::from_utf8(frame.payload).map_err(|_| Error::InvalidUTF8String)?,
            )),
            OpCode::Binary => Ok(Message::Binary(frame.payload)),
            other => Err(Error::UnknownOpCode(other.as_u8())),
        }
    }

    pub fn opcode(&self) -> OpCode {
        match self {
            Message::Text(_) => OpCode::Text,
            Message::Binary(_) => OpCode::Binary,
        }
    }

    pub fn as_binary(&self) -> &[u8] {
        match self {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(data) => data,
        }
    }

    pub fn as_text(&self) -> Result<&str, Error> {
        match self {
            Message::Text(text) => Ok(text),
            Message::Binary(data) => {
                std::str::from_utf8(data).map_err(|_| Error::InvalidUTF8String)
            }
        }
    }

    pub fn into_payload(self) -> Vec<u8> {
        match self {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(data) => data,
        }
    }

    /// Splits the message into wire frames of at most `fragment_size`
    /// payload bytes: the first carries the data opcode, the rest are
    /// continuations, the last one has the fin bit.
    pub(crate) fn into_frames(self, fragment_size: usize) -> Vec<Frame> {
        let opcode = self.opcode();
        let payload = self.into_payload();

        if payload.len() <= fragment_size {
            return vec![Frame::new(true, opcode, payload)];
        }

        let mut frames = Vec::new();
        for chunk in payload.chunks(fragment_size) {
            frames.push(Frame::new(
                false,
                if frames.is_empty() {
                    opcode
                } else {
                    OpCode::Continue
                },
                chunk.to_vec(),
            ));
        }

        if let Some(last_frame) = frames.last_mut() {
            last_frame.final_fragment = true;
        }

        frames
    }
}
