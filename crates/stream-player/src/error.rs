//! Error taxonomy for streaming sessions.
//!
//! Only [`StreamError`] is fatal to a session. [`DecodeFailure`] is expected while
//! data is still arriving and [`PlaybackDeviceError`] is surfaced without stopping
//! the read loop.

/// Result type for session-level operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Fatal session errors.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Connecting to or reading from the network source failed.
    #[error("network error: {0}")]
    Network(String),

    /// The source answered with a non-success HTTP status.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// The audio id could not be turned into a source location.
    #[error("invalid audio source: {0}")]
    InvalidSource(String),

    /// The bytes left at end of stream still did not decode.
    #[error("final segment could not be decoded: {0}")]
    FinalDecode(#[source] DecodeFailure),

    /// The session was stopped while the operation was pending.
    #[error("session stopped")]
    Cancelled,
}

/// Decoding a byte range did not produce playable audio.
///
/// Non-final failures mean "wait for more data"; the orchestrator retries once a
/// larger range is available.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeFailure {
    /// The range is not recognized as coded audio (misaligned boundary, unknown format).
    #[error("unrecognized audio data: {0}")]
    Unrecognized(String),

    /// The range decoded to zero frames.
    #[error("no playable frames")]
    Empty,
}

/// The output device could not accept a segment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("playback device error: {0}")]
pub struct PlaybackDeviceError(pub String);

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        StreamError::Network(err.to_string())
    }
}
