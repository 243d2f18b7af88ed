use std::time::Duration;

/// Default decode quantum: 512 KiB makes MP3 frame boundaries very likely to fall inside a range.
pub const DEFAULT_DECODE_QUANTUM: usize = 512 * 1024;

/// Streaming tuning parameters shared by the orchestrator and scheduler.
#[derive(Clone, Debug)]
pub struct StreamerConfig {
    /// Byte threshold that gates decode attempts; decode ends are rounded down to a multiple of it.
    pub decode_quantum: usize,
    /// Margin added before the first scheduled segment to absorb device latency.
    pub lookahead: Duration,
    /// How often the draining phase checks the output clock.
    pub drain_poll: Duration,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            decode_quantum: DEFAULT_DECODE_QUANTUM,
            lookahead: Duration::from_millis(100),
            drain_poll: Duration::from_millis(50),
        }
    }
}

impl StreamerConfig {
    /// Return a copy with a usable (non-zero) decode quantum.
    pub fn normalized(mut self) -> Self {
        if self.decode_quantum == 0 {
            tracing::warn!("decode quantum of 0 bytes requested; using default");
            self.decode_quantum = DEFAULT_DECODE_QUANTUM;
        }
        if self.drain_poll.is_zero() {
            self.drain_poll = Duration::from_millis(1);
        }
        self
    }
}
