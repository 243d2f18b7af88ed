//! Scripted collaborators for orchestrator and scheduler tests.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Notify, Semaphore, mpsc};

use crate::decode::{AudioSegment, SegmentDecoder};
use crate::error::{DecodeFailure, PlaybackDeviceError, StreamError, StreamResult};
use crate::output::{AudioOutput, SegmentId};
use crate::source::{NetworkSource, SourceConnector};

/// Poll `cond` until it holds, failing the test after two seconds.
pub async fn wait_until<F: FnMut() -> bool>(what: &str, mut cond: F) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), fut)
        .await
        .expect("timed out")
}

enum FeedItem {
    Chunk(Bytes),
    Fail(String),
}

/// Test-side handle that feeds a [`ScriptedSource`].
pub struct Feed {
    tx: mpsc::UnboundedSender<FeedItem>,
}

impl Feed {
    pub fn chunk(&self, len: usize) {
        let _ = self.tx.send(FeedItem::Chunk(Bytes::from(vec![0xA5u8; len])));
    }

    pub fn fail(&self, message: &str) {
        let _ = self.tx.send(FeedItem::Fail(message.to_string()));
    }

    /// Signal end of data.
    pub fn end(self) {}
}

pub struct ScriptedSource {
    rx: mpsc::UnboundedReceiver<FeedItem>,
    content_length: Option<u64>,
}

#[async_trait]
impl NetworkSource for ScriptedSource {
    async fn next_chunk(&mut self) -> StreamResult<Option<Bytes>> {
        match self.rx.recv().await {
            Some(FeedItem::Chunk(bytes)) => Ok(Some(bytes)),
            Some(FeedItem::Fail(message)) => Err(StreamError::Network(message)),
            None => Ok(None),
        }
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length
    }
}

/// Connector handing out pre-registered scripted sources in order.
#[derive(Default)]
pub struct ScriptedConnector {
    sources: Mutex<VecDeque<ScriptedSource>>,
    opened: Mutex<Vec<String>>,
    stall: AtomicBool,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register the next source and return its feed.
    pub fn push_source(&self, content_length: Option<u64>) -> Feed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sources.lock().unwrap().push_back(ScriptedSource { rx, content_length });
        Feed { tx }
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    /// Make every later `open` hang forever, like a server that never answers.
    pub fn stall_opens(&self) {
        self.stall.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceConnector for ScriptedConnector {
    async fn open(&self, audio_id: &str) -> StreamResult<Box<dyn NetworkSource>> {
        self.opened.lock().unwrap().push(audio_id.to_string());
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let source = self
            .sources
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| StreamError::Network(format!("connection refused: {audio_id}")))?;
        Ok(Box::new(source))
    }
}

/// Decoder whose answer depends on the range length, with an optional gate.
pub struct ScriptedDecoder {
    min_len: AtomicUsize,
    segment_secs: f64,
    calls: Mutex<Vec<usize>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    entered: Notify,
}

impl ScriptedDecoder {
    /// Every range decodes into a segment of `segment_secs`.
    pub fn new(segment_secs: f64) -> Arc<Self> {
        Arc::new(Self {
            min_len: AtomicUsize::new(0),
            segment_secs,
            calls: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
            entered: Notify::new(),
        })
    }

    /// Ranges shorter than `len` bytes fail as unrecognized.
    pub fn fail_below(&self, len: usize) {
        self.min_len.store(len, Ordering::SeqCst);
    }

    /// Hold every decode until a permit is added to the returned semaphore.
    pub fn hold(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Resolves once a decode call has started.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Lengths of every attempted range in call order.
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SegmentDecoder for ScriptedDecoder {
    async fn decode(&self, bytes: Bytes) -> Result<AudioSegment, DecodeFailure> {
        self.calls.lock().unwrap().push(bytes.len());
        self.entered.notify_one();
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let permit = gate.acquire().await.expect("gate closed");
            permit.forget();
        }
        if bytes.len() < self.min_len.load(Ordering::SeqCst) {
            return Err(DecodeFailure::Unrecognized("misaligned frame".to_string()));
        }
        let rate = 1_000u32;
        let frames = (self.segment_secs * rate as f64).round() as usize;
        Ok(AudioSegment::new(vec![0.0; frames], 1, rate))
    }
}

struct Voice {
    id: SegmentId,
    end: f64,
    done: mpsc::UnboundedSender<SegmentId>,
}

#[derive(Default)]
struct ManualState {
    now: f64,
    voices: Vec<Voice>,
    started: Vec<(SegmentId, f64, f64)>,
    stopped: Vec<SegmentId>,
    fail_starts: usize,
    prepare_cost: f64,
    prepared: usize,
    device_error: Option<String>,
}

impl ManualState {
    fn advance_to(&mut self, now: f64) {
        self.now = now;
        self.voices.retain(|v| {
            if v.end <= now {
                let _ = v.done.send(v.id);
                false
            } else {
                true
            }
        });
    }
}

/// Output with a manually advanced clock.
///
/// Advancing the clock past a voice's end posts its completion.
#[derive(Default)]
pub struct ManualOutput {
    state: Mutex<ManualState>,
}

impl ManualOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_now(&self, now: f64) {
        self.state.lock().unwrap().advance_to(now);
    }

    /// Every `prepare` moves the clock forward by `secs`, like a slow conversion.
    pub fn set_prepare_cost(&self, secs: f64) {
        self.state.lock().unwrap().prepare_cost = secs;
    }

    pub fn prepared(&self) -> usize {
        self.state.lock().unwrap().prepared
    }

    /// Report `message` from the next `take_error`.
    pub fn raise_device_error(&self, message: &str) {
        self.state.lock().unwrap().device_error = Some(message.to_string());
    }

    pub fn fail_next_starts(&self, count: usize) {
        self.state.lock().unwrap().fail_starts = count;
    }

    /// `(id, start, end)` of every voice ever started.
    pub fn started(&self) -> Vec<(SegmentId, f64, f64)> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn stopped_ids(&self) -> Vec<SegmentId> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn playing(&self) -> usize {
        self.state.lock().unwrap().voices.len()
    }
}

impl AudioOutput for ManualOutput {
    fn now(&self) -> f64 {
        self.state.lock().unwrap().now
    }

    fn prepare(&self, segment: Arc<AudioSegment>) -> Result<Arc<AudioSegment>, PlaybackDeviceError> {
        let mut state = self.state.lock().unwrap();
        state.prepared += 1;
        let now = state.now + state.prepare_cost;
        state.advance_to(now);
        Ok(segment)
    }

    fn start(
        &self,
        id: SegmentId,
        segment: Arc<AudioSegment>,
        at: f64,
        done: mpsc::UnboundedSender<SegmentId>,
    ) -> Result<(), PlaybackDeviceError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_starts > 0 {
            state.fail_starts -= 1;
            return Err(PlaybackDeviceError("device unavailable".to_string()));
        }
        let end = at + segment.duration_secs();
        state.started.push((id, at, end));
        state.voices.push(Voice { id, end, done });
        Ok(())
    }

    fn stop(&self, id: SegmentId) {
        let mut state = self.state.lock().unwrap();
        let before = state.voices.len();
        state.voices.retain(|v| v.id != id);
        if state.voices.len() != before {
            state.stopped.push(id);
        }
    }

    fn take_error(&self) -> Option<PlaybackDeviceError> {
        self.state
            .lock()
            .unwrap()
            .device_error
            .take()
            .map(PlaybackDeviceError)
    }
}
