//! Audio output collaborator.
//!
//! The scheduler only needs a clock and the ability to start/stop a decoded segment at a
//! point on that clock. [`crate::playback::CpalOutput`] is the device-backed implementation.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::decode::AudioSegment;
use crate::error::PlaybackDeviceError;

/// Identity of a scheduled segment: session generation plus per-session sequence number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId {
    pub session: u64,
    pub seq: u64,
}

/// Playback clock and voice control.
pub trait AudioOutput: Send + Sync {
    /// Current position of the output clock in seconds. Monotonic.
    fn now(&self) -> f64;

    /// Convert a decoded segment into the form [`AudioOutput::start`] plays directly.
    ///
    /// May be slow. Called from the blocking pool before the segment is placed on the
    /// clock, never while session state is locked.
    fn prepare(&self, segment: Arc<AudioSegment>) -> Result<Arc<AudioSegment>, PlaybackDeviceError> {
        Ok(segment)
    }

    /// Play `segment` starting at clock time `at`.
    ///
    /// When the segment finishes playing on its own, `id` is sent on `done`. Segments
    /// halted through [`AudioOutput::stop`] never report completion.
    fn start(
        &self,
        id: SegmentId,
        segment: Arc<AudioSegment>,
        at: f64,
        done: UnboundedSender<SegmentId>,
    ) -> Result<(), PlaybackDeviceError>;

    /// Halt `id` immediately. Unknown ids are ignored.
    fn stop(&self, id: SegmentId);

    /// Take a failure the device reported since the last call, if any.
    fn take_error(&self) -> Option<PlaybackDeviceError> {
        None
    }
}
