//! Gapless playback scheduling.
//!
//! Segments are placed back to back on the output clock: each one starts exactly where
//! the previous one ends. The first segment of a session starts `lookahead` after "now".
//! When decoding falls behind the clock the next start is pulled forward to "now" and the
//! gap is reported as an underrun.
//!
//! Segments handed to [`PlaybackScheduler::schedule`] are expected to be prepared for the
//! output already, so the clock is read right before the voice is started.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::decode::AudioSegment;
use crate::error::PlaybackDeviceError;
use crate::output::{AudioOutput, SegmentId};

/// Placement of one segment on the output clock.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScheduledPlayback {
    pub id: SegmentId,
    pub start: f64,
    pub end: f64,
}

/// Result of a successful [`PlaybackScheduler::schedule`] call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Scheduled {
    pub playback: ScheduledPlayback,
    /// Seconds between the planned start and "now" when the segment arrived late.
    pub underrun_gap: Option<f64>,
}

pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    lookahead: f64,
    session: u64,
    next_seq: u64,
    next_start: Option<f64>,
    active: BTreeMap<SegmentId, ScheduledPlayback>,
    finished: u64,
    stopped: bool,
    done_tx: mpsc::UnboundedSender<SegmentId>,
    done_rx: mpsc::UnboundedReceiver<SegmentId>,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn AudioOutput>, lookahead: Duration, session: u64) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            output,
            lookahead: lookahead.as_secs_f64(),
            session,
            next_seq: 0,
            next_start: None,
            active: BTreeMap::new(),
            finished: 0,
            stopped: false,
            done_tx,
            done_rx,
        }
    }

    /// Place `segment` right after the previously scheduled one and start it.
    ///
    /// Returns `Ok(None)` once the scheduler is stopped. A device error leaves the
    /// timeline untouched so the next segment takes the same slot.
    pub fn schedule(
        &mut self,
        segment: Arc<AudioSegment>,
    ) -> Result<Option<Scheduled>, PlaybackDeviceError> {
        if self.stopped {
            return Ok(None);
        }

        let now = self.output.now();
        let mut start = self.next_start.unwrap_or(now + self.lookahead);
        let mut underrun_gap = None;
        if start < now {
            underrun_gap = Some(now - start);
            start = now;
        }
        let end = start + segment.duration_secs();

        let id = SegmentId {
            session: self.session,
            seq: self.next_seq,
        };
        self.output.start(id, segment, start, self.done_tx.clone())?;

        self.next_seq += 1;
        self.next_start = Some(end);
        let playback = ScheduledPlayback { id, start, end };
        self.active.insert(id, playback);

        if let Some(gap) = underrun_gap {
            tracing::warn!(
                gap_ms = (gap * 1000.0).round() as u64,
                seq = id.seq,
                "playback underrun; segment starts immediately"
            );
        }

        Ok(Some(Scheduled {
            playback,
            underrun_gap,
        }))
    }

    /// Handle a natural-completion notification. Returns `true` if `id` was active.
    pub fn on_completed(&mut self, id: SegmentId) -> bool {
        if self.stopped || id.session != self.session {
            return false;
        }
        if self.active.remove(&id).is_some() {
            self.finished += 1;
            true
        } else {
            false
        }
    }

    /// Apply every completion posted by the output so far. Returns the number applied.
    pub fn drain_completions(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(id) = self.done_rx.try_recv() {
            if self.on_completed(id) {
                applied += 1;
            }
        }
        applied
    }

    /// Halt every active segment and refuse further scheduling.
    pub fn stop_all(&mut self) {
        for id in self.active.keys() {
            self.output.stop(*id);
        }
        self.active.clear();
        self.stopped = true;
        while self.done_rx.try_recv().is_ok() {}
    }

    pub fn active(&self) -> impl Iterator<Item = &ScheduledPlayback> {
        self.active.values()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// End of the latest scheduled segment on the output clock.
    pub fn horizon(&self) -> Option<f64> {
        self.next_start
    }

    pub fn finished(&self) -> u64 {
        self.finished
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}
