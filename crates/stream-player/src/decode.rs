//! Segment decode stage.
//!
//! Uses Symphonia to:
//! - probe a byte range as a self-contained coded-audio stream
//! - decode every packet into interleaved `f32` samples
//! - return one immutable [`AudioSegment`] per successful range
//!
//! Ranges cut from the middle of a stream start and end on arbitrary byte offsets. Packets
//! that fail to decode at the ragged edges are skipped; a range that yields no frames at
//! all is reported as [`DecodeFailure::Empty`].

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::DecodeFailure;

/// Decoded audio for one byte range.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioSegment {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
}

impl AudioSegment {
    /// Build a segment from interleaved samples.
    ///
    /// Trailing samples that do not form a whole frame are dropped.
    pub fn new(mut samples: Vec<f32>, channels: usize, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let whole = samples.len() - samples.len() % channels;
        samples.truncate(whole);
        Self {
            samples,
            channels,
            sample_rate,
        }
    }

    /// Interleaved samples: `frame0[ch0], frame0[ch1], ...`.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback length in seconds at the segment's own sample rate.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs())
    }
}

/// Decode engine collaborator: turns a byte range into an [`AudioSegment`].
#[async_trait]
pub trait SegmentDecoder: Send + Sync {
    async fn decode(&self, bytes: Bytes) -> Result<AudioSegment, DecodeFailure>;
}

/// Symphonia-backed [`SegmentDecoder`].
///
/// Decoding runs on the blocking pool so the session loop stays responsive to `stop()`.
#[derive(Clone, Debug, Default)]
pub struct SymphoniaDecoder {
    ext_hint: Option<String>,
}

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pass a file extension (`mp3`, `flac`, ...) to speed up probing.
    pub fn with_extension_hint(ext: impl Into<String>) -> Self {
        let ext = ext.into();
        let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        Self {
            ext_hint: if ext.is_empty() { None } else { Some(ext) },
        }
    }

    pub fn ext_hint(&self) -> Option<&str> {
        self.ext_hint.as_deref()
    }
}

#[async_trait]
impl SegmentDecoder for SymphoniaDecoder {
    async fn decode(&self, bytes: Bytes) -> Result<AudioSegment, DecodeFailure> {
        let hint = self.ext_hint.clone();
        tokio::task::spawn_blocking(move || decode_segment(bytes, hint.as_deref()))
            .await
            .map_err(|e| DecodeFailure::Unrecognized(format!("decode task failed: {e}")))?
    }
}

/// Decode a complete byte range synchronously.
pub fn decode_segment(bytes: Bytes, ext_hint: Option<&str>) -> Result<AudioSegment, DecodeFailure> {
    let mut hint = Hint::new();
    if let Some(ext) = ext_hint {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeFailure::Unrecognized(e.to_string()))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DecodeFailure::Unrecognized("no audio track".to_string()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeFailure::Unrecognized(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);
    let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
    let mut skipped = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(_)) => break, // end of range (possibly a truncated frame)
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                tracing::debug!(error = %e, "stopping segment decode at unreadable packet");
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(_)) => {
                skipped += 1;
                continue;
            }
            Err(e) => {
                tracing::debug!(error = %e, "stopping segment decode at decoder error");
                break;
            }
        };

        let spec = *decoded.spec();
        if decoded.frames() == 0 {
            continue;
        }
        let packet_channels = spec.channels.count();
        if channels == 0 {
            channels = packet_channels;
        }
        if sample_rate == 0 {
            sample_rate = spec.rate;
        }
        if packet_channels != channels || spec.rate != sample_rate {
            skipped += 1;
            continue;
        }

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    if skipped > 0 {
        tracing::debug!(skipped, "skipped undecodable packets at segment edges");
    }
    if samples.is_empty() || channels == 0 || sample_rate == 0 {
        return Err(DecodeFailure::Empty);
    }

    Ok(AudioSegment::new(samples, channels, sample_rate))
}
