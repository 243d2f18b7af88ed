//! Output device discovery and selection.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Largest fixed callback buffer requested from a device, in frames.
const MAX_BUFFER_FRAMES: u32 = 4_096;

/// Output device summary for `list-devices`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub min_rate: u32,
    pub max_rate: u32,
    pub is_default: bool,
}

/// Pick the first output device whose name contains `needle` (case-insensitive), or the
/// host default when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let Some(needle) = needle.filter(|n| !n.trim().is_empty()) else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device"));
    };

    host.output_devices()
        .context("No output devices")?
        .find(|d| {
            device_name(d)
                .map(|name| matches_device_name(&name, needle))
                .unwrap_or(false)
        })
        .ok_or_else(|| anyhow!("No output device matched: {needle}"))
}

/// Choose an output config, preferring a rate at or below `target_rate` and float samples.
///
/// Without a target the highest supported rate wins.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;
    for range in device
        .supported_output_configs()
        .context("Failed to query output configs")?
    {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let candidate = Candidate {
            below_target: target_rate.map(|t| rate <= t).unwrap_or(true),
            rate,
            format_rank: sample_format_rank(range.sample_format()),
        };
        if best.as_ref().is_none_or(|(b, _)| candidate.beats(b)) {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }

    match best {
        Some((_, cfg)) => Ok(cfg),
        None => device
            .default_output_config()
            .context("No supported output configs"),
    }
}

/// Fixed callback buffer size, capped to keep the output clock responsive.
///
/// Returns `None` when the device does not report a range.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(MAX_BUFFER_FRAMES.clamp(*min, *max)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Enumerate output devices with their supported rate span.
pub fn list_devices(host: &cpal::Host) -> Result<Vec<DeviceInfo>> {
    let default_name = host.default_output_device().and_then(|d| device_name(&d));
    let mut out = Vec::new();
    for device in host.output_devices().context("No output devices")? {
        let Some(name) = device_name(&device) else {
            continue;
        };
        let (mut min_rate, mut max_rate) = (u32::MAX, 0u32);
        if let Ok(ranges) = device.supported_output_configs() {
            for range in ranges {
                min_rate = min_rate.min(range.min_sample_rate());
                max_rate = max_rate.max(range.max_sample_rate());
            }
        }
        if max_rate == 0 {
            match device.default_output_config() {
                Ok(cfg) => {
                    min_rate = cfg.sample_rate();
                    max_rate = cfg.sample_rate();
                }
                Err(e) => {
                    tracing::warn!(device = %name, error = %e, "skipping device without output configs");
                    continue;
                }
            }
        }
        out.push(DeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
            min_rate,
            max_rate,
        });
    }
    Ok(out)
}

pub fn device_name(device: &cpal::Device) -> Option<String> {
    device.description().ok().map(|d| d.name().to_string())
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    below_target: bool,
    rate: u32,
    format_rank: u8,
}

impl Candidate {
    fn beats(&self, other: &Candidate) -> bool {
        if self.below_target != other.below_target {
            self.below_target
        } else if self.rate != other.rate {
            self.rate > other.rate
        } else {
            self.format_rank < other.format_rank
        }
    }
}

fn pick_rate_for_range(min: u32, max: u32, target_rate: Option<u32>) -> u32 {
    match target_rate {
        Some(target) => target.clamp(min, max.max(min)),
        None => max,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    !needle.is_empty() && name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_name_match_is_case_insensitive_substring() {
        assert!(matches_device_name("MacBook Pro Speakers", "speakers"));
        assert!(matches_device_name("USB DAC", " usb "));
        assert!(!matches_device_name("USB DAC", "hdmi"));
        assert!(!matches_device_name("USB DAC", "   "));
    }

    #[test]
    fn rate_clamps_into_range() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(48_000)), 48_000);
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(8_000)), 44_100);
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(192_000)), 96_000);
        assert_eq!(pick_rate_for_range(44_100, 96_000, None), 96_000);
    }

    #[test]
    fn candidate_ordering() {
        let below = Candidate {
            below_target: true,
            rate: 44_100,
            format_rank: 2,
        };
        let above = Candidate {
            below_target: false,
            rate: 96_000,
            format_rank: 0,
        };
        assert!(below.beats(&above));

        let faster = Candidate {
            rate: 48_000,
            ..below
        };
        assert!(faster.beats(&below));

        let float = Candidate {
            format_rank: 0,
            ..below
        };
        assert!(float.beats(&below));
        assert!(!below.beats(&below));
    }
}
