use httparse::Error as HttpParseError;
use pki_types::InvalidDnsNameError;
use std::io;
use thiserror::Error;
use tokio::time::error::Elapsed;
use url::ParseError;

#[derive(Error, Debug)]
pub enum Error {
    // Transport / channel errors
    #[error("IO Error happened: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("channel is no longer active")]
    ChannelNotActive,

    #[error("{source}")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    #[error("WebSocket timeout")]
    WebSocketTimeout,

    // Handshake errors
    #[error("Invalid handshake request method and version")]
    InvalidHTTPHandshake,

    #[error("Connection: Upgrade header missing in the request")]
    NoConnectionHeaderPresent,

    #[error("Upgrade: websocket header missing in the request")]
    NoUpgradeHeaderPresent,

    #[error("Host header missing in the request")]
    NoHostHeaderPresent,

    #[error("Couldn't find Sec-WebSocket-Key header in the request")]
    NoSecWebsocketKey,

    #[error("Server didn't upgrade the connection")]
    NotUpgraded,

    #[error("Server didn't send a valid Sec-WebSocket-Accept key")]
    InvalidAcceptKey,

    #[error("Only the GET method may initiate a websocket upgrade")]
    MethodNotAllowed,

    #[error("Incomplete HTTP request")]
    IncompleteHTTPRequest,

    #[error("{source}")]
    HttpParseError {
        #[from]
        source: HttpParseError,
    },

    // Client bootstrap errors
    #[error("{source}")]
    URLParseError {
        #[from]
        source: ParseError,
    },

    #[error("Invalid WebSocket URL: {0}")]
    InvalidURL(String),

    #[error("Invalid network device `{0}`")]
    InvalidDevice(String),

    #[error("TLS initialization failed: {0}")]
    TLSInitializationFailed(String),

    #[error("{source}")]
    DomainError {
        #[from]
        source: InvalidDnsNameError,
    },

    // Framing errors
    #[error("Unknown opcode `{0:#x}`")]
    UnknownOpCode(u8),

    #[error("Control frames must not be fragmented")]
    ControlFrameShouldNotBeFragmented,

    #[error("Control frame with invalid payload size, can't be greater than 125")]
    ControlFramePayloadSize,

    #[error("Max frame size reached")]
    MaxFrameSize,

    #[error("Received an unmasked frame from the client")]
    UnmaskedFrameFromClient,

    #[error("Received a masked frame from the server")]
    MaskedFrameFromServer,

    #[error("Reserved bits set without a negotiated extension")]
    InvalidReservedBits,

    // Fragmentation errors
    #[error("Received a new data frame while a fragmented message is in progress")]
    ReceivedNewFrameWithoutFinishingPreviousOne,

    #[error("Received a continuation frame with no fragmented message to continue")]
    ReceivedContinuationFrameWithoutPreviousFragmentFrame,

    #[error("Non-final fragment is smaller than the configured minimum")]
    NonFinalFragmentSizeIsTooSmall,

    #[error("Fragmented message has too many frames")]
    TooManyFrameFragments,

    #[error("Accumulated fragments exceed the maximum message size")]
    AccumulatedFrameSizeIsTooLarge,

    #[error("Text payload is not valid UTF-8")]
    InvalidUTF8String,

    #[error("fragment_size: `{0}` can't be greater than max_frame_size: `{1}`")]
    CustomFragmentSizeExceeded(usize, usize),

    // Closing errors
    #[error("Close reason exceeds 123 UTF-8 bytes")]
    CloseReasonTooLong,

    #[error("Close code `{0}` is not allowed on the wire")]
    InvalidCloseCode(u16),

    #[error("Malformed close frame payload")]
    InvalidClosePayload,

    #[error("WebSocket is not connected")]
    WebSocketNotConnected,

    // Extension errors
    #[error("Duplicate extension parameter `{0}`")]
    DuplicateParameter(String),

    #[error("Invalid extension parameter value `{0}`")]
    InvalidParameterValue(String),

    #[error("Unknown extension parameter `{0}`")]
    UnknownExtensionParameter(String),

    #[error("Invalid extension response from server: {0}")]
    InvalidServerResponse(String),

    #[error("Negotiated extensions claim conflicting reserved bits")]
    IncompatibleExtensions,

    #[error("Decompressed message exceeds the configured limit")]
    LimitExceeded,

    #[error("Compression failed: {0}")]
    Compression(String),

    #[error("Decompression failed: {0}")]
    Decompression(String),

    // Configuration errors
    #[error("max_window_bits should be a value between 8 and 15")]
    InvalidMaxWindowBits,

    #[error("low write watermark can't be greater than the high watermark")]
    InvalidWatermarks,
}

impl Error {
    /// Close code carried in the close frame emitted for this error before
    /// the connection is torn down. Transport errors never get a close
    /// frame, callers check `is_transport` first.
    pub(crate) fn close_code(&self) -> u16 {
        match self {
            Error::InvalidUTF8String => 1007,
            Error::MaxFrameSize
            | Error::LimitExceeded
            | Error::TooManyFrameFragments
            | Error::AccumulatedFrameSizeIsTooLarge => 1009,
            _ => 1002,
        }
    }

    pub(crate) fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::IOError { .. } | Error::Timeout { .. } | Error::ChannelNotActive
        )
    }
}
