use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use stream_types::{EndReason, SessionPhase, StreamEvent, StreamStatus};

/// Receiver of session notifications.
///
/// Called while the orchestrator holds its session lock, so events arrive in order.
/// Implementations must not block or call back into the orchestrator.
pub trait StatusSink: Send + Sync {
    fn notify(&self, event: StreamEvent);
}

/// Forward events to an async consumer (UI task, logger, test).
impl StatusSink for mpsc::UnboundedSender<StreamEvent> {
    fn notify(&self, event: StreamEvent) {
        let _ = self.send(event);
    }
}

/// Shared, mutex-protected status snapshot updated from session events.
#[derive(Clone, Debug, Default)]
pub struct StatusStore {
    inner: Arc<Mutex<StreamStatus>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current status.
    pub fn snapshot(&self) -> StreamStatus {
        self.lock().clone()
    }

    pub fn set_phase(&self, phase: SessionPhase) {
        self.lock().phase = phase;
    }

    /// Fold `event` into the snapshot.
    pub fn apply(&self, event: &StreamEvent) {
        let mut status = self.lock();
        match event {
            StreamEvent::Started {
                audio_id,
                total_bytes,
            } => {
                *status = StreamStatus {
                    audio_id: Some(audio_id.clone()),
                    phase: SessionPhase::Streaming,
                    total_bytes: *total_bytes,
                    ..StreamStatus::default()
                };
            }
            StreamEvent::Progress {
                received_bytes,
                total_bytes,
                decoded_bytes,
                segments_decoded,
                segments_finished,
            } => {
                status.received_bytes = *received_bytes;
                status.total_bytes = *total_bytes;
                status.decoded_bytes = *decoded_bytes;
                status.segments_decoded = *segments_decoded;
                status.segments_finished = *segments_finished;
            }
            StreamEvent::Underrun { .. } => {
                status.underruns += 1;
            }
            StreamEvent::DeviceError { message } => {
                status.last_error = Some(message.clone());
            }
            StreamEvent::Error { message } => {
                status.last_error = Some(message.clone());
                status.phase = SessionPhase::Stopped;
                status.end_reason = Some(EndReason::Error);
            }
            StreamEvent::Completed => {
                status.phase = SessionPhase::Idle;
                status.end_reason = Some(EndReason::Completed);
            }
            StreamEvent::Stopped => {
                status.phase = SessionPhase::Stopped;
                status.end_reason = Some(EndReason::Stopped);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, StreamStatus> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StatusSink for StatusStore {
    fn notify(&self, event: StreamEvent) {
        self.apply(&event);
    }
}

/// Emit each event to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl StatusSink for LogSink {
    fn notify(&self, event: StreamEvent) {
        match &event {
            StreamEvent::Started {
                audio_id,
                total_bytes,
            } => tracing::info!(audio_id = %audio_id, ?total_bytes, "stream started"),
            StreamEvent::Progress {
                received_bytes,
                decoded_bytes,
                segments_decoded,
                ..
            } => tracing::debug!(
                received_bytes,
                decoded_bytes,
                segments_decoded,
                "stream progress"
            ),
            StreamEvent::Underrun { gap_ms } => tracing::warn!(gap_ms, "underrun"),
            StreamEvent::DeviceError { message } => {
                tracing::warn!(error = %message, "playback device error")
            }
            StreamEvent::Error { message } => tracing::error!(error = %message, "stream failed"),
            StreamEvent::Completed => tracing::info!("stream completed"),
            StreamEvent::Stopped => tracing::info!("stream stopped"),
        }
    }
}
