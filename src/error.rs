use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BittorrentError {
    #[error("Bencode parsing error: {0}")]
    BencodeError(String),

    #[error("Invalid torrent file: {0}")]
    InvalidTorrent(String),

    #[error("Tracker error: {0}")]
    TrackerError(String),

    #[error("Peer connection error: {0}")]
    PeerError(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Index {index} out of range (count {count})")]
    IndexOutOfRange { index: u32, count: u32 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Cannot request blocks while choked by the peer")]
    Choked,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(String),
}

/// Framing, handshake and state-machine violations. Each one tears down
/// the connection it happened on and nothing else.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("handshake too short: got {got} bytes, expected {expected}")]
    TooShort { got: usize, expected: usize },

    #[error("handshake declares a zero-length protocol string")]
    ZeroProtocolLength,

    #[error("protocol string of {len} bytes does not fit the length byte")]
    ProtocolStringTooLong { len: usize },

    #[error("buffer too short to hold a length prefix: got {got} bytes")]
    TooShortForLength { got: usize },

    #[error("incomplete message: expected {expected} bytes, got {got}")]
    IncompleteMessage { expected: usize, got: usize },

    #[error("info hash mismatch")]
    InfoHashMismatch,

    #[error("invalid payload length {len} for message id {id}")]
    InvalidPayload { id: u8, len: usize },

    #[error("frame of {len} bytes exceeds the maximum frame size")]
    FrameTooLarge { len: usize },

    #[error("have for unknown piece {index}")]
    HaveOutOfRange { index: u32 },

    #[error("{event} not allowed in state {state}")]
    UnexpectedEvent { state: String, event: String },

    #[error("connection closed by peer")]
    ConnectionClosed,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("file does not exist: {0}")]
    NotFound(PathBuf),

    #[error("short read from {path}: expected {expected} bytes, got {got}")]
    ShortRead {
        path: PathBuf,
        expected: usize,
        got: usize,
    },

    #[error("directory does not exist: {0}")]
    MissingDirectory(PathBuf),

    #[error("buffer only partially written at {start}: expected {expected} bytes, wrote {written}")]
    PartialWrite {
        start: u64,
        expected: usize,
        written: usize,
    },

    #[error("range [{start}, {start}+{length}) exceeds content size {total}")]
    OutOfBounds { start: u64, length: u64, total: u64 },
}

impl From<url::ParseError> for BittorrentError {
    fn from(err: url::ParseError) -> Self {
        BittorrentError::UrlParseError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BittorrentError>;
