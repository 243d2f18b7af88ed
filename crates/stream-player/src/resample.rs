//! Segment resampling and channel mapping.
//!
//! Segments arrive at the source rate with the source channel count. Before a segment
//! becomes a voice on the device it is converted once, up front, with Rubato's sinc
//! resampler and mapped to the device channel layout.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

const CHUNK_FRAMES: usize = 1_024;

/// Convert interleaved `input` from `src_rate` to `dst_rate`.
///
/// Returns the input unchanged when the rates match.
pub fn resample_interleaved(
    input: &[f32],
    channels: usize,
    src_rate: u32,
    dst_rate: u32,
) -> Result<Vec<f32>> {
    let channels = channels.max(1);
    if src_rate == dst_rate || input.is_empty() {
        return Ok(input.to_vec());
    }

    let f_ratio = dst_rate as f64 / src_rate as f64;
    let sinc_len = 128;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };
    let mut resampler =
        Async::<f32>::new_sinc(f_ratio, 1.1, &params, CHUNK_FRAMES, channels, FixedAsync::Input)
            .map_err(|e| anyhow!("resampler init: {e}"))?;

    let total_frames = input.len() / channels;
    let expected_frames = (total_frames as f64 * f_ratio).ceil() as usize;
    let delay = resampler.output_delay();
    let mut out = Vec::with_capacity((expected_frames + delay) * channels);
    let mut scratch = vec![0.0f32; resampler.output_frames_max() * channels];
    let mut indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len: None,
    };

    let mut pos = 0usize;
    // Keep feeding (zero-padded) partial chunks until the filter delay has been flushed.
    while pos < total_frames || out.len() / channels < expected_frames + delay {
        let take = CHUNK_FRAMES.min(total_frames.saturating_sub(pos));
        let mut chunk = vec![0.0f32; CHUNK_FRAMES * channels];
        chunk[..take * channels].copy_from_slice(&input[pos * channels..(pos + take) * channels]);
        pos += take;

        let input_adapter = InterleavedSlice::new(&chunk, channels, CHUNK_FRAMES)
            .map_err(|e| anyhow!("resample input: {e}"))?;
        let out_frames = scratch.len() / channels;
        let mut output_adapter = InterleavedSlice::new_mut(&mut scratch, channels, out_frames)
            .map_err(|e| anyhow!("resample output: {e}"))?;

        indexing.partial_len = if take < CHUNK_FRAMES { Some(take) } else { None };
        let (_, produced) = resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| anyhow!("resample process: {e}"))?;
        out.extend_from_slice(&scratch[..produced * channels]);

        if take == 0 && produced == 0 {
            break;
        }
    }

    let start = (delay * channels).min(out.len());
    let end = ((delay + expected_frames) * channels).min(out.len());
    Ok(out[start..end].to_vec())
}

/// Map interleaved frames from `src_channels` to `dst_channels`.
///
/// Mono is duplicated to every output channel, stereo folds to mono by averaging, and
/// other layouts copy matching channels and repeat the last source channel.
pub fn map_channels(input: &[f32], src_channels: usize, dst_channels: usize) -> Vec<f32> {
    let src_channels = src_channels.max(1);
    let dst_channels = dst_channels.max(1);
    if src_channels == dst_channels {
        return input.to_vec();
    }
    let frames = input.len() / src_channels;
    let mut out = Vec::with_capacity(frames * dst_channels);
    for frame in input.chunks_exact(src_channels) {
        match (src_channels, dst_channels) {
            (2, 1) => out.push(0.5 * (frame[0] + frame[1])),
            (_, 1) => out.push(frame.iter().sum::<f32>() / src_channels as f32),
            _ => {
                for ch in 0..dst_channels {
                    out.push(frame[ch.min(src_channels - 1)]);
                }
            }
        }
    }
    out
}
