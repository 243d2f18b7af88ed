//! Session control loop.
//!
//! [`StreamOrchestrator`] drives one streaming session at a time:
//!
//! ```text
//! Idle --start--> Streaming --end of data--> Draining --played out--> Idle
//!                     |                          |
//!                     +------ stop / error ------+--> Stopped
//! ```
//!
//! The loop runs as a tokio task and suspends only on chunk reads, decode attempts, and
//! drain polls. All session state lives in one [`Session`] behind a mutex, tagged with a
//! generation number. Every mutation after an `await` re-checks the generation, so a
//! result that resolves after `stop()` (or after a newer `start()`) is discarded.

use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use stream_types::{SessionPhase, StreamEvent, StreamStatus};

use crate::accumulator::{ChunkAccumulator, DecodePlanner};
use crate::config::StreamerConfig;
use crate::decode::{AudioSegment, SegmentDecoder};
use crate::error::{DecodeFailure, PlaybackDeviceError, StreamError, StreamResult};
use crate::output::AudioOutput;
use crate::scheduler::PlaybackScheduler;
use crate::source::{NetworkSource, SourceConnector};
use crate::status::{StatusSink, StatusStore};

/// External services a session talks to.
pub struct Collaborators {
    pub connector: Arc<dyn SourceConnector>,
    pub decoder: Arc<dyn SegmentDecoder>,
    pub output: Arc<dyn AudioOutput>,
    /// Extra event consumer in addition to the built-in [`StatusStore`].
    pub sink: Option<Arc<dyn StatusSink>>,
}

/// Handle to the streaming state machine. Cheap to clone.
#[derive(Clone)]
pub struct StreamOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: StreamerConfig,
    connector: Arc<dyn SourceConnector>,
    decoder: Arc<dyn SegmentDecoder>,
    output: Arc<dyn AudioOutput>,
    sink: Option<Arc<dyn StatusSink>>,
    status: StatusStore,
    state: Mutex<State>,
    phase_tx: watch::Sender<SessionPhase>,
}

#[derive(Default)]
struct State {
    generation: u64,
    phase: SessionPhase,
    session: Option<Session>,
}

impl State {
    fn current(&mut self, generation: u64) -> Option<&mut Session> {
        self.session
            .as_mut()
            .filter(|session| session.generation == generation)
    }
}

struct Session {
    generation: u64,
    audio_id: String,
    cancel: CancellationToken,
    buffer: ChunkAccumulator,
    planner: DecodePlanner,
    scheduler: PlaybackScheduler,
    total_bytes: Option<u64>,
    segments_decoded: u64,
    drain_deadline: Option<Instant>,
}

/// Extra wall-clock time a drain may take past the scheduled horizon.
const DRAIN_SLACK: Duration = Duration::from_millis(100);

impl Session {
    fn progress(&self) -> StreamEvent {
        StreamEvent::Progress {
            received_bytes: self.buffer.len() as u64,
            total_bytes: self.total_bytes,
            decoded_bytes: self.planner.cursor() as u64,
            segments_decoded: self.segments_decoded,
            segments_finished: self.scheduler.finished(),
        }
    }

    fn attempt(&self, range: Range<usize>) -> Attempt {
        let bytes = Bytes::copy_from_slice(self.buffer.slice_from(range.start, range.end));
        Attempt { range, bytes }
    }

    /// Cancel the read loop, halt playback, and release the buffer.
    fn shutdown(mut self) {
        self.cancel.cancel();
        self.scheduler.stop_all();
        self.buffer.clear();
        self.planner.reset();
    }
}

struct Attempt {
    range: Range<usize>,
    bytes: Bytes,
}

enum Step {
    Stale,
    Wait,
    Decode(Attempt),
}

enum Drain {
    Stale,
    Pending,
    Done,
}

impl StreamOrchestrator {
    pub fn new(config: StreamerConfig, parts: Collaborators) -> Self {
        let (phase_tx, _) = watch::channel(SessionPhase::Idle);
        Self {
            inner: Arc::new(Inner {
                config: config.normalized(),
                connector: parts.connector,
                decoder: parts.decoder,
                output: parts.output,
                sink: parts.sink,
                status: StatusStore::new(),
                state: Mutex::new(State::default()),
                phase_tx,
            }),
        }
    }

    /// Begin streaming `audio_id`, stopping any previous session first.
    ///
    /// Resolves once the network stream is open; the session then continues in the
    /// background. Returns the session generation.
    pub async fn start(&self, audio_id: &str) -> StreamResult<u64> {
        let inner = &self.inner;
        let (generation, cancel) = {
            let mut state = inner.lock();
            inner.halt(&mut state);
            state.generation += 1;
            let generation = state.generation;
            let cancel = CancellationToken::new();
            state.session = Some(Session {
                generation,
                audio_id: audio_id.to_string(),
                cancel: cancel.clone(),
                buffer: ChunkAccumulator::new(),
                planner: DecodePlanner::new(inner.config.decode_quantum),
                scheduler: PlaybackScheduler::new(
                    inner.output.clone(),
                    inner.config.lookahead,
                    generation,
                ),
                total_bytes: None,
                segments_decoded: 0,
                drain_deadline: None,
            });
            (generation, cancel)
        };
        tracing::info!(generation, audio_id, "starting stream");

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StreamError::Cancelled),
            opened = inner.connector.open(audio_id) => opened,
        };
        let source = match opened {
            Ok(source) => source,
            Err(StreamError::Cancelled) => return Err(StreamError::Cancelled),
            Err(err) => {
                inner.fail(generation, &err);
                return Err(err);
            }
        };

        {
            let mut state = inner.lock();
            let Some(session) = state.current(generation) else {
                return Err(StreamError::Cancelled);
            };
            session.total_bytes = source.content_length();
            let started = StreamEvent::Started {
                audio_id: session.audio_id.clone(),
                total_bytes: session.total_bytes,
            };
            inner.set_phase(&mut state, SessionPhase::Streaming);
            inner.emit(started);
        }

        tokio::spawn(run_session(inner.clone(), generation, cancel, source));
        Ok(generation)
    }

    /// Halt the current session: cancel reading, stop playback, drop buffered data.
    ///
    /// No-op when no session is active, so repeated calls are harmless.
    pub fn stop(&self) {
        let mut state = self.inner.lock();
        self.inner.halt(&mut state);
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.lock().phase
    }

    /// Watch phase transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.inner.phase_tx.subscribe()
    }

    pub fn status(&self) -> StreamStatus {
        self.inner.status.snapshot()
    }

    /// Generation of the most recent `start()`.
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.inner.config
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_phase(&self, state: &mut State, phase: SessionPhase) {
        state.phase = phase;
        self.status.set_phase(phase);
        self.phase_tx.send_replace(phase);
    }

    fn emit(&self, event: StreamEvent) {
        self.status.apply(&event);
        if let Some(sink) = &self.sink {
            sink.notify(event);
        }
    }

    fn halt(&self, state: &mut State) {
        let Some(session) = state.session.take() else {
            return;
        };
        tracing::info!(generation = session.generation, "stream stopped");
        session.shutdown();
        self.set_phase(state, SessionPhase::Stopped);
        self.emit(StreamEvent::Stopped);
    }

    fn fail(&self, generation: u64, err: &StreamError) {
        let mut state = self.lock();
        if state.current(generation).is_none() {
            return;
        }
        if let Some(session) = state.session.take() {
            session.shutdown();
        }
        tracing::error!(generation, error = %err, "stream failed");
        self.set_phase(&mut state, SessionPhase::Stopped);
        self.emit(StreamEvent::Error {
            message: err.to_string(),
        });
    }

    fn on_chunk(&self, generation: u64, chunk: &[u8]) -> Step {
        let mut state = self.lock();
        let Some(session) = state.current(generation) else {
            return Step::Stale;
        };
        let len = session.buffer.append(chunk);
        session.scheduler.drain_completions();
        let progress = session.progress();
        let step = match session.planner.next_range(len) {
            Some(range) => Step::Decode(session.attempt(range)),
            None => Step::Wait,
        };
        self.emit(progress);
        step
    }

    fn final_attempt(&self, generation: u64) -> Step {
        let mut state = self.lock();
        let Some(session) = state.current(generation) else {
            return Step::Stale;
        };
        match session.planner.final_range(session.buffer.len()) {
            Some(range) => Step::Decode(session.attempt(range)),
            None => Step::Wait,
        }
    }

    /// Run one decode attempt, convert the result for the output, and schedule it.
    ///
    /// Conversion runs on the blocking pool before the session lock is taken, so the
    /// scheduler reads the clock only once the segment is ready to play.
    /// Returns `None` when the session was stopped or replaced meanwhile.
    async fn decode(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        attempt: Attempt,
    ) -> Option<Result<(), DecodeFailure>> {
        let Attempt { range, bytes } = attempt;
        tracing::debug!(generation, start = range.start, end = range.end, "decode attempt");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            result = self.decoder.decode(bytes) => result,
        };

        let prepared = match result {
            Ok(segment) => Ok(tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                prepared = self.prepare(segment) => prepared,
            }),
            Err(failure) => Err(failure),
        };

        let mut state = self.lock();
        let Some(session) = state.current(generation) else {
            tracing::debug!(generation, "discarding decode result for stale session");
            return None;
        };

        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(failure) => {
                session.planner.defer(range.end);
                tracing::debug!(
                    generation,
                    start = range.start,
                    end = range.end,
                    error = %failure,
                    "decode deferred until more data arrives"
                );
                return Some(Err(failure));
            }
        };

        session.planner.commit(range.end);
        session.segments_decoded += 1;
        let mut events = Vec::new();
        match prepared.and_then(|segment| session.scheduler.schedule(segment)) {
            Ok(Some(scheduled)) => {
                tracing::debug!(
                    seq = scheduled.playback.id.seq,
                    start = scheduled.playback.start,
                    end = scheduled.playback.end,
                    "segment scheduled"
                );
                if let Some(gap) = scheduled.underrun_gap {
                    events.push(StreamEvent::Underrun {
                        gap_ms: (gap * 1000.0).round() as u64,
                    });
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(generation, error = %err, "segment not scheduled");
                events.push(StreamEvent::DeviceError {
                    message: err.to_string(),
                });
            }
        }
        events.push(session.progress());
        for event in events {
            self.emit(event);
        }
        Some(Ok(()))
    }

    async fn prepare(
        &self,
        segment: AudioSegment,
    ) -> Result<Arc<AudioSegment>, PlaybackDeviceError> {
        let output = self.output.clone();
        tokio::task::spawn_blocking(move || output.prepare(Arc::new(segment)))
            .await
            .unwrap_or_else(|e| {
                Err(PlaybackDeviceError(format!("segment conversion failed: {e}")))
            })
    }

    fn begin_drain(&self, generation: u64) -> bool {
        let mut state = self.lock();
        let Some(session) = state.current(generation) else {
            return false;
        };
        let remaining = session
            .scheduler
            .horizon()
            .map(|end| (end - self.output.now()).max(0.0))
            .unwrap_or(0.0);
        session.drain_deadline =
            Some(Instant::now() + Duration::from_secs_f64(remaining) + DRAIN_SLACK);
        tracing::debug!(
            generation,
            remaining_ms = (remaining * 1000.0).round() as u64,
            "network finished; draining scheduled audio"
        );
        self.set_phase(&mut state, SessionPhase::Draining);
        true
    }

    fn poll_drain(&self, generation: u64) -> Drain {
        let mut state = self.lock();
        let Some(session) = state.current(generation) else {
            return Drain::Stale;
        };
        let mut events = Vec::new();
        if let Some(err) = self.output.take_error() {
            tracing::warn!(generation, error = %err, "output device failed while draining");
            events.push(StreamEvent::DeviceError {
                message: err.to_string(),
            });
        }
        if session.scheduler.drain_completions() > 0 {
            events.push(session.progress());
        }

        let now = self.output.now();
        let played_out = session.scheduler.active_len() == 0
            || session.scheduler.horizon().is_some_and(|end| now >= end);
        let expired = session
            .drain_deadline
            .is_some_and(|deadline| Instant::now() >= deadline);
        if !played_out && !expired {
            for event in events {
                self.emit(event);
            }
            return Drain::Pending;
        }
        if !played_out {
            tracing::warn!(
                generation,
                active = session.scheduler.active_len(),
                clock = now,
                "output clock stalled; ending drain at deadline"
            );
            session.scheduler.stop_all();
        }
        for event in events {
            self.emit(event);
        }

        let progress = session.progress();
        if let Some(mut session) = state.session.take() {
            session.buffer.clear();
        }
        tracing::info!(generation, "stream completed");
        self.set_phase(&mut state, SessionPhase::Idle);
        self.emit(progress);
        self.emit(StreamEvent::Completed);
        Drain::Done
    }
}

async fn run_session(
    inner: Arc<Inner>,
    generation: u64,
    cancel: CancellationToken,
    mut source: Box<dyn NetworkSource>,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            next = source.next_chunk() => next,
        };
        match next {
            Ok(Some(chunk)) => match inner.on_chunk(generation, &chunk) {
                Step::Stale => return,
                Step::Wait => {}
                Step::Decode(attempt) => {
                    if inner.decode(generation, &cancel, attempt).await.is_none() {
                        return;
                    }
                }
            },
            Ok(None) => break,
            Err(err) => {
                inner.fail(generation, &err);
                return;
            }
        }
    }
    drop(source);

    match inner.final_attempt(generation) {
        Step::Stale => return,
        Step::Wait => {}
        Step::Decode(attempt) => match inner.decode(generation, &cancel, attempt).await {
            None => return,
            Some(Ok(())) => {}
            Some(Err(failure)) => {
                inner.fail(generation, &StreamError::FinalDecode(failure));
                return;
            }
        },
    }

    if !inner.begin_drain(generation) {
        return;
    }
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(inner.config.drain_poll) => {}
        }
        match inner.poll_drain(generation) {
            Drain::Stale | Drain::Done => return,
            Drain::Pending => {}
        }
    }
}
