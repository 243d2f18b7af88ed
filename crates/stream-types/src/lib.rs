use serde::{Deserialize, Serialize};

/// Lifecycle phase of a streaming session.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No session, or the last one finished playing.
    #[default]
    Idle,
    /// Reading from the network and decoding as data arrives.
    Streaming,
    /// Network finished; waiting for scheduled audio to play out.
    Draining,
    /// Halted by `stop()` or by a fatal error.
    Stopped,
}

impl SessionPhase {
    /// `true` while a session owns the network stream or scheduled audio.
    pub fn is_active(self) -> bool {
        matches!(self, SessionPhase::Streaming | SessionPhase::Draining)
    }
}

/// Reason why a session ended.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Network reached end of data and every segment played out.
    Completed,
    /// A network or final decode error ended the session.
    Error,
    /// Explicitly stopped.
    Stopped,
}

/// Notifications emitted by a streaming session to the status layer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Network stream opened for `audio_id`.
    Started {
        audio_id: String,
        total_bytes: Option<u64>,
    },
    /// Bytes received / decoded so far.
    Progress {
        received_bytes: u64,
        total_bytes: Option<u64>,
        decoded_bytes: u64,
        segments_decoded: u64,
        segments_finished: u64,
    },
    /// Decoded audio was late; the next segment was pulled forward to "now".
    Underrun { gap_ms: u64 },
    /// The output device rejected a segment. Streaming continues.
    DeviceError { message: String },
    /// Fatal session error.
    Error { message: String },
    /// All audio played out.
    Completed,
    /// Session halted by `stop()`.
    Stopped,
}

/// Snapshot of the streamer status for UIs and logs.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamStatus {
    /// Logical id or URL of the current (or last) session.
    pub audio_id: Option<String>,
    /// Current lifecycle phase.
    pub phase: SessionPhase,
    /// Bytes received from the network.
    pub received_bytes: u64,
    /// Expected total size, when the source reports one.
    pub total_bytes: Option<u64>,
    /// Bytes consumed by successful decodes.
    pub decoded_bytes: u64,
    /// Segments handed to the scheduler.
    pub segments_decoded: u64,
    /// Segments that finished playing.
    pub segments_finished: u64,
    /// Number of underrun incidents.
    pub underruns: u64,
    /// Last human-readable error message.
    pub last_error: Option<String>,
    /// Terminal reason once the session ends.
    pub end_reason: Option<EndReason>,
}

impl StreamStatus {
    /// Percent of the expected total received, capped at 100.
    pub fn receive_percent(&self) -> Option<u8> {
        let total = self.total_bytes.filter(|t| *t > 0)?;
        let pct = self.received_bytes.saturating_mul(100) / total;
        Some(pct.min(100) as u8)
    }
}

/// One forwarding route exposed by the proxy.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteInfo {
    /// Logical audio id (`1`, `hls`, ...).
    pub id: String,
    /// Passthrough path on the proxy.
    pub path: String,
    /// Artificially chunked streaming path on the proxy.
    pub stream_path: String,
    /// Remote URL the route forwards to.
    pub url: String,
}

/// Response body for `GET /routes`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoutesResponse {
    pub routes: Vec<RouteInfo>,
}
