use std::io;

/// Errors produced by the HTTP framing layer.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Reactor or stream error.
    #[error("stream error: {0}")]
    Stream(#[from] coil::Error),

    /// Invalid URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// A header or start line exceeded the line-length cap.
    #[error("line too long")]
    LineTooLong,

    /// Malformed start line.
    #[error("invalid first line: {0:?}")]
    InvalidFirstLine(String),

    /// Malformed header line.
    #[error("invalid header line: {0:?}")]
    InvalidHeader(String),

    /// Continuation headers are not handled.
    #[error("continuation header")]
    ContinuationHeader,

    /// Malformed chunk-length line.
    #[error("invalid chunk length: {0:?}")]
    InvalidChunkLength(String),

    /// The line terminating a chunk carried data.
    #[error("invalid chunk end")]
    InvalidChunkEnd,

    /// Unsupported protocol version on the wire.
    #[error("unsupported protocol: {0:?}")]
    UnsupportedProtocol(String),

    /// The parser already reported an error and cannot continue.
    #[error("parser poisoned")]
    Poisoned,

    /// The pipeline already holds the maximum number of outstanding
    /// requests.
    #[error("pipeline full")]
    PipelineFull,

    /// Protocol error (unexpected event, bad state).
    #[error("protocol error: {0}")]
    Protocol(String),
}
