//! Device-backed audio output (CPAL).
//!
//! [`CpalOutput`] keeps a timeline of voices, each one a converted segment pinned to a
//! start frame on the output clock. The audio callback mixes every voice overlapping the
//! current buffer, advances the clock by the frames it rendered, and posts a completion
//! for each voice that played to its end.
//!
//! The clock is the number of frames the device has consumed, so scheduled positions
//! stay sample-accurate regardless of wall-clock drift.
//!
//! Conversion to the device rate and channel layout happens in [`AudioOutput::prepare`];
//! [`AudioOutput::start`] only pins an already converted segment to the timeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use tokio::sync::mpsc::UnboundedSender;

use crate::decode::AudioSegment;
use crate::device;
use crate::error::PlaybackDeviceError;
use crate::output::{AudioOutput, SegmentId};
use crate::resample::{map_channels, resample_interleaved};

/// Output device selection.
#[derive(Clone, Debug, Default)]
pub struct OutputOptions {
    /// Case-insensitive substring of the device name; `None` uses the host default.
    pub device: Option<String>,
    /// Preferred device sample rate.
    pub sample_rate: Option<u32>,
}

struct Voice {
    id: SegmentId,
    start_frame: u64,
    segment: Arc<AudioSegment>,
    done: UnboundedSender<SegmentId>,
}

/// Voices pinned to the output clock.
#[derive(Default)]
struct Timeline {
    voices: Vec<Voice>,
}

impl Timeline {
    /// Mix every voice overlapping `[base, base + frames)` into `mix`.
    ///
    /// Voices that end inside the window are removed and reported as completed.
    fn render(&mut self, base: u64, mix: &mut [f32], channels: usize) {
        let window_end = base + (mix.len() / channels) as u64;
        self.voices.retain(|voice| {
            let samples = voice.segment.samples();
            let voice_end = voice.start_frame + (samples.len() / channels) as u64;
            let from = voice.start_frame.max(base);
            let to = voice_end.min(window_end);
            if from < to {
                let src = ((from - voice.start_frame) as usize) * channels;
                let dst = ((from - base) as usize) * channels;
                let len = ((to - from) as usize) * channels;
                for (out, sample) in mix[dst..dst + len]
                    .iter_mut()
                    .zip(&samples[src..src + len])
                {
                    *out += *sample;
                }
            }
            if voice_end <= window_end {
                let _ = voice.done.send(voice.id);
                false
            } else {
                true
            }
        });
    }
}

#[derive(Default)]
struct Shared {
    rendered_frames: AtomicU64,
    timeline: Mutex<Timeline>,
    stream_error: Mutex<Option<String>>,
}

impl Shared {
    fn timeline(&self) -> MutexGuard<'_, Timeline> {
        self.timeline.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn render(&self, mix: &mut [f32], channels: usize) {
        mix.fill(0.0);
        let base = self.rendered_frames.load(Ordering::Acquire);
        self.timeline().render(base, mix, channels);
        self.rendered_frames
            .store(base + (mix.len() / channels) as u64, Ordering::Release);
    }

    /// Take the last error reported by the stream, if any.
    fn take_stream_error(&self) -> Option<String> {
        self.stream_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    fn set_stream_error(&self, message: String) {
        *self
            .stream_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(message);
    }
}

/// Format negotiated with the device.
#[derive(Clone, Debug)]
pub struct OutputFormat {
    pub device_name: String,
    pub sample_rate: u32,
    pub channels: usize,
    pub sample_format: String,
}

/// [`AudioOutput`] backed by a CPAL output stream.
///
/// The stream lives on a dedicated thread (CPAL streams are not `Send` on every host)
/// and is torn down when the output is dropped.
pub struct CpalOutput {
    shared: Arc<Shared>,
    format: OutputFormat,
    shutdown_tx: crossbeam_channel::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// Open the selected device and start its stream (playing silence until voices arrive).
    pub fn open(opts: &OutputOptions) -> Result<Self> {
        let shared = Arc::new(Shared::default());
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<OutputFormat>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let thread_shared = shared.clone();
        let opts = opts.clone();
        let thread = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = match open_stream(&opts, thread_shared) {
                    Ok((stream, format)) => {
                        let _ = ready_tx.send(Ok(format));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .context("spawn output thread")?;

        let format = ready_rx
            .recv()
            .map_err(|_| anyhow!("output thread exited before the stream started"))??;
        tracing::info!(
            device = %format.device_name,
            sample_rate = format.sample_rate,
            channels = format.channels,
            sample_format = %format.sample_format,
            "output stream started"
        );

        Ok(Self {
            shared,
            format,
            shutdown_tx,
            thread: Some(thread),
        })
    }

    pub fn format(&self) -> &OutputFormat {
        &self.format
    }

    fn matches_device(&self, segment: &AudioSegment) -> bool {
        segment.sample_rate() == self.format.sample_rate
            && segment.channels() == self.format.channels
    }

    /// Convert a decoded segment to the device rate and channel layout.
    fn convert(&self, segment: &AudioSegment) -> Result<AudioSegment> {
        let resampled = resample_interleaved(
            segment.samples(),
            segment.channels(),
            segment.sample_rate(),
            self.format.sample_rate,
        )?;
        let samples = map_channels(&resampled, segment.channels(), self.format.channels);
        Ok(AudioSegment::new(
            samples,
            self.format.channels,
            self.format.sample_rate,
        ))
    }
}

impl AudioOutput for CpalOutput {
    fn now(&self) -> f64 {
        self.shared.rendered_frames.load(Ordering::Acquire) as f64
            / self.format.sample_rate as f64
    }

    fn prepare(&self, segment: Arc<AudioSegment>) -> Result<Arc<AudioSegment>, PlaybackDeviceError> {
        if self.matches_device(&segment) {
            return Ok(segment);
        }
        self.convert(&segment)
            .map(Arc::new)
            .map_err(|e| PlaybackDeviceError(format!("{e:#}")))
    }

    fn start(
        &self,
        id: SegmentId,
        segment: Arc<AudioSegment>,
        at: f64,
        done: UnboundedSender<SegmentId>,
    ) -> Result<(), PlaybackDeviceError> {
        if let Some(err) = self.take_error() {
            return Err(err);
        }
        if !self.matches_device(&segment) {
            return Err(PlaybackDeviceError(format!(
                "segment is {} Hz / {} ch but the device plays {} Hz / {} ch",
                segment.sample_rate(),
                segment.channels(),
                self.format.sample_rate,
                self.format.channels
            )));
        }
        let start_frame = (at.max(0.0) * self.format.sample_rate as f64).round() as u64;
        self.shared.timeline().voices.push(Voice {
            id,
            start_frame,
            segment,
            done,
        });
        Ok(())
    }

    fn stop(&self, id: SegmentId) {
        self.shared.timeline().voices.retain(|v| v.id != id);
    }

    fn take_error(&self) -> Option<PlaybackDeviceError> {
        self.shared.take_stream_error().map(PlaybackDeviceError)
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn open_stream(opts: &OutputOptions, shared: Arc<Shared>) -> Result<(cpal::Stream, OutputFormat)> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, opts.device.as_deref())?;
    let device_name = device::device_name(&device).unwrap_or_else(|| "unknown".to_string());
    let supported = device::pick_output_config(&device, opts.sample_rate)?;
    let sample_format = supported.sample_format();
    let mut config = supported.config();
    if let Some(buffer_size) = device::pick_buffer_size(&supported) {
        config.buffer_size = buffer_size;
    }

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, shared),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, shared),
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, shared),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, shared),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }?;
    stream.play().context("start output stream")?;

    let format = OutputFormat {
        device_name,
        sample_rate: config.sample_rate,
        channels: config.channels as usize,
        sample_format: format!("{sample_format:?}"),
    };
    Ok((stream, format))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: Arc<Shared>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = (config.channels as usize).max(1);
    let mut mix: Vec<f32> = Vec::new();
    let err_shared = shared.clone();

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            mix.resize(data.len(), 0.0);
            shared.render(&mut mix, channels);
            for (out, sample) in data.iter_mut().zip(&mix) {
                *out = <T as cpal::Sample>::from_sample::<f32>(sample.clamp(-1.0, 1.0));
            }
        },
        move |err| {
            tracing::warn!("stream error: {err}");
            err_shared.set_stream_error(err.to_string());
        },
        None,
    )?;
    Ok(stream)
}
