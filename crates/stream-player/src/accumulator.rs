//! Byte accumulation and decode-boundary planning.
//!
//! [`ChunkAccumulator`] is the append-only buffer of everything received in a session.
//! [`DecodePlanner`] owns the decode cursor and decides which range to hand to the
//! decoder next.

use std::ops::Range;

/// Append-only byte buffer for one session.
///
/// Growth is unbounded within a session; memory is only released by [`ChunkAccumulator::clear`].
#[derive(Debug, Default)]
pub struct ChunkAccumulator {
    buf: Vec<u8>,
}

impl ChunkAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` in arrival order and return the new total length.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        self.buf.extend_from_slice(bytes);
        self.buf.len()
    }

    /// View `[cursor, end)` without mutating the buffer.
    ///
    /// Both bounds are clamped to the current length, so the view never extends past
    /// received data. `cursor > end` yields an empty slice.
    pub fn slice_from(&self, cursor: usize, end: usize) -> &[u8] {
        let end = end.min(self.buf.len());
        let start = cursor.min(end);
        &self.buf[start..end]
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drop all buffered bytes and release the allocation.
    pub fn clear(&mut self) {
        self.buf = Vec::new();
    }
}

/// Largest multiple of `quantum` at or below `len`.
pub fn decode_boundary(len: usize, quantum: usize) -> usize {
    if quantum == 0 {
        return len;
    }
    (len / quantum) * quantum
}

/// Decode cursor plus the retry guard.
///
/// An attempt is due once at least one quantum of unconsumed data is buffered. After a
/// failed attempt ending at `E`, the planner waits until a quantum boundary beyond `E`
/// is available so the same range is never retried.
#[derive(Debug, Clone)]
pub struct DecodePlanner {
    quantum: usize,
    cursor: usize,
    last_failed_end: Option<usize>,
}

impl DecodePlanner {
    pub fn new(quantum: usize) -> Self {
        Self {
            quantum: quantum.max(1),
            cursor: 0,
            last_failed_end: None,
        }
    }

    /// Offset of the last successfully decoded byte.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn quantum(&self) -> usize {
        self.quantum
    }

    /// Range to decode now for a buffer of `len` bytes, if an attempt is due.
    pub fn next_range(&self, len: usize) -> Option<Range<usize>> {
        if len.saturating_sub(self.cursor) < self.quantum {
            return None;
        }
        let end = decode_boundary(len, self.quantum);
        if end <= self.cursor {
            return None;
        }
        if let Some(failed) = self.last_failed_end {
            if end <= failed {
                return None;
            }
        }
        Some(self.cursor..end)
    }

    /// Range covering everything left after the cursor, regardless of quantum.
    pub fn final_range(&self, len: usize) -> Option<Range<usize>> {
        if len > self.cursor {
            Some(self.cursor..len)
        } else {
            None
        }
    }

    /// Record a successful decode of `[cursor, end)`.
    pub fn commit(&mut self, end: usize) {
        if end > self.cursor {
            self.cursor = end;
        }
        self.last_failed_end = None;
    }

    /// Record a failed attempt ending at `end`; the cursor does not move.
    pub fn defer(&mut self, end: usize) {
        self.last_failed_end = Some(end);
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
        self.last_failed_end = None;
    }
}
