use httparse::Error as HttpParseError;
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use url::ParseError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    Timeout {
        #[from]
        source: tokio::time::error::Elapsed,
    },

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    #[error("invalid UTF-8 in a text message")]
    InvalidUtf8,

    #[error("the connection is no longer open")]
    ConnectionClosed,

    // Handshake errors
    #[error("request did not include a GET/HTTP upgrade line")]
    InvalidHTTPHandshake,

    #[error("Connection: Upgrade header missing in the request")]
    NoConnectionHeaderPresent,

    #[error("Upgrade: websocket header missing in the request")]
    NoUpgradeHeaderPresent,

    #[error("Sec-WebSocket-Version must be 13")]
    UnsupportedVersion,

    #[error("Couldn't find Sec-WebSocket-Key header in the request")]
    NoSecWebsocketKey,

    #[error("server didn't respond with HTTP/1.1 101")]
    NoUpgrade,

    #[error("server didn't send a valid Sec-WebSocket-Accept key")]
    InvalidAcceptKey,

    // Framing errors
    #[error("RSV bit set without a negotiated extension")]
    RSVNotZero,

    #[error("control frames must not be fragmented")]
    ControlFramesFragmented,

    #[error("control frame payload can't be greater than 125 bytes")]
    ControlFramePayloadSize,

    #[error("frame length was not encoded in its minimal form")]
    NonMinimalLength,

    #[error("payload length's 64-bit form had its reserved high bit set")]
    PayloadLengthTooLarge,

    #[error("close frame payload of length 1 can't carry a status code")]
    InvalidCloseFramePayload,

    #[error("fragment_size `{0}` can't be greater than max_frame_size `{1}`")]
    CustomFragmentSizeExceeded(usize, usize),

    #[error("frame exceeds the configured max_frame_size")]
    MaxFrameSize,

    #[error("reassembled message exceeds the configured max_message_size")]
    MaxMessageSize,

    #[error("receive buffer exceeded the 1 MiB protocol limit")]
    BufferExceeded,

    // Fragmentation errors
    #[error("text/binary frame received while a fragmented message is already in progress")]
    InvalidFrameFragmentation,

    #[error("continuation frame received but no fragmented message is in progress")]
    InvalidContinuationFrame,

    #[error("invalid opcode")]
    InvalidOpcode,

    #[error("server received an unmasked frame, or client received a masked one")]
    InvalidMaskingDirection,

    // HTTP / URL errors
    #[error("{source}")]
    URLParseError {
        #[from]
        source: ParseError,
    },

    #[error("invalid scheme in WebSocket URL, expected ws:// or wss://")]
    InvalidSchemeURL,

    #[error("URL has no host")]
    URLNoHost,

    #[error("{source}")]
    InvalidServerName {
        #[from]
        source: pki_types::InvalidDnsNameError,
    },

    #[error("{source}")]
    HttpParseError {
        #[from]
        source: HttpParseError,
    },

    #[error("incomplete HTTP request")]
    IncompleteHTTPRequest,
}

impl Error {
    /// The wire close status a protocol-level failure of this kind maps to, per the
    /// engine's error taxonomy. `None` means the failure is below the protocol (a raw
    /// I/O error) and no close frame can reliably be written.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Error::FromUtf8Error { .. } | Error::InvalidUtf8 => Some(1007),
            Error::BufferExceeded | Error::MaxFrameSize | Error::MaxMessageSize => Some(1009),
            Error::IOError { .. } | Error::Timeout { .. } | Error::ConnectionClosed => None,
            _ => Some(1002),
        }
    }
}
