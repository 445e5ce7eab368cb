use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continue,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from(byte: u8) -> Result<Self, Error> {
        match byte {
            0x0 => Ok(OpCode::Continue),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            // 0x3-0x7 and 0xB-0xF are reserved by RFC 6455
            other => Err(Error::UnknownOpCode(other)),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            OpCode::Continue => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    pub fn is_data(&self) -> bool {
        matches!(self, OpCode::Text | OpCode::Binary)
    }
}

/// A single parsed WebSocket frame. The mask key never appears here: the
/// decoder unmasks in place and the encoder generates a fresh key per
/// frame, so payloads are always in the clear inside the library.
#[derive(Debug, Clone)]
pub struct Frame {
    pub final_fragment: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(final_fragment: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            final_fragment,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            payload,
        }
    }

    /// A data frame flagged as compressed (RSV1). Used for the first frame
    /// of an outbound permessage-deflate message.
    pub fn compressed(final_fragment: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            rsv1: true,
            ..Frame::new(final_fragment, opcode, payload)
        }
    }

    pub fn close(payload: Vec<u8>) -> Self {
        Frame::new(true, OpCode::Close, payload)
    }

    pub fn ping(payload: Vec<u8>) -> Self {
        Frame::new(true, OpCode::Ping, payload)
    }

    pub fn pong(payload: Vec<u8>) -> Self {
        Frame::new(true, OpCode::Pong, payload)
    }
}

// A close reason plus the two length bytes of the code must fit the
// 125-byte control payload bound.
pub const MAX_CLOSE_REASON_SIZE: usize = 123;

/// Parsed payload of a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Codes allowed on the wire per RFC 6455 section 7.4. 1005 and 1006
    /// are reserved for local reporting and must never be sent.
    pub fn is_allowed_on_wire(code: u16) -> bool {
        matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
    }

    /// Locally requested 1005/1006 are rewritten to a normal closure
    /// before serialisation.
    pub fn sanitize_code(code: u16) -> u16 {
        match code {
            1005 | 1006 => 1000,
            other => other,
        }
    }

    /// Parses an inbound close payload. An empty payload is a close
    /// without a code, a single byte is malformed, anything else carries
    /// a big-endian code plus an optional UTF-8 reason.
    pub fn parse(payload: &[u8]) -> Result<Option<CloseFrame>, Error> {
        match payload.len() {
            0 => Ok(None),
            1 => Err(Error::InvalidClosePayload),
            _ => {
                let code = u16::from_be_bytes([payload[0], payload[1]]);
                if !Self::is_allowed_on_wire(code) {
                    return Err(Error::InvalidCloseCode(code));
                }
                let reason = String::from_utf8(payload[2..].to_vec())
                    .map_err(|_| Error::InvalidUTF8String)?;
                Ok(Some(CloseFrame { code, reason }))
            }
        }
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(2 + self.reason.len());
        payload.extend_from_slice(&self.code.to_be_bytes());
        payload.extend_from_slice(self.reason.as_bytes());
        payload
    }
}
