//! Command implementations for the `streamer` binary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use stream_player::config::StreamerConfig;
use stream_player::decode::SymphoniaDecoder;
use stream_player::device;
use stream_player::orchestrator::{Collaborators, StreamOrchestrator};
use stream_player::playback::{CpalOutput, OutputOptions};
use stream_player::source::HttpConnector;
use stream_player::status::LogSink;
use stream_player::{EndReason, StreamStatus};
use stream_types::RoutesResponse;

use crate::cli::Args;

/// Streaming tunables from the command line.
pub fn streamer_config(args: &Args) -> StreamerConfig {
    StreamerConfig {
        decode_quantum: args.decode_quantum,
        lookahead: Duration::from_millis(args.lookahead_ms),
        drain_poll: Duration::from_millis(args.drain_poll_ms),
    }
    .normalized()
}

/// File extension of an absolute URL's last path segment, used as a probe hint.
pub fn ext_hint_for(target: &str) -> Option<String> {
    if !(target.starts_with("http://") || target.starts_with("https://")) {
        return None;
    }
    let path = target.split(['?', '#']).next().unwrap_or(target);
    let last = path.rsplit('/').next()?;
    let (_, ext) = last.rsplit_once('.')?;
    let ext = ext.trim().to_ascii_lowercase();
    (!ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .then_some(ext)
}

/// Stream `target` to the output device until it completes, fails, or Ctrl-C stops it.
pub async fn run_play(args: &Args, target: &str) -> Result<()> {
    let output = CpalOutput::open(&OutputOptions {
        device: args.device.clone(),
        sample_rate: args.sample_rate,
    })
    .context("open output device")?;
    let output = Arc::new(output);

    let connector = HttpConnector::new(args.base_url.clone()).context("build HTTP client")?;
    let decoder = match ext_hint_for(target) {
        Some(ext) => SymphoniaDecoder::with_extension_hint(ext),
        None => SymphoniaDecoder::new(),
    };

    let config = streamer_config(args);
    tracing::info!(
        audio_id = %target,
        base_url = %args.base_url,
        decode_quantum = config.decode_quantum,
        lookahead_ms = config.lookahead.as_millis() as u64,
        "starting playback"
    );
    let orch = StreamOrchestrator::new(
        config,
        Collaborators {
            connector: Arc::new(connector),
            decoder: Arc::new(decoder),
            output,
            sink: Some(Arc::new(LogSink)),
        },
    );

    let stopper = orch.clone();
    ctrlc::set_handler(move || {
        tracing::info!("interrupt received; stopping");
        stopper.stop();
    })
    .context("install Ctrl-C handler")?;

    let mut phases = orch.subscribe();
    orch.start(target).await.context("start stream")?;
    phases
        .wait_for(|phase| !phase.is_active())
        .await
        .context("session state channel closed")?;

    finish(orch.status())
}

fn finish(status: StreamStatus) -> Result<()> {
    match status.end_reason {
        Some(EndReason::Error) => Err(anyhow!(
            "{}",
            status
                .last_error
                .unwrap_or_else(|| "stream failed".to_string())
        )),
        Some(EndReason::Stopped) => {
            tracing::info!(received_bytes = status.received_bytes, "playback stopped");
            Ok(())
        }
        _ => {
            tracing::info!(
                received_bytes = status.received_bytes,
                segments = status.segments_decoded,
                underruns = status.underruns,
                "playback finished"
            );
            Ok(())
        }
    }
}

/// Print the proxy's route table.
pub async fn list_routes(base_url: &str) -> Result<()> {
    let url = format!("{}/routes", base_url.trim_end_matches('/'));
    let routes: RoutesResponse = reqwest::get(&url)
        .await
        .with_context(|| format!("GET {url}"))?
        .error_for_status()
        .with_context(|| format!("GET {url}"))?
        .json()
        .await
        .context("decode routes response")?;
    for route in routes.routes {
        println!("{:<6} {}  (stream: {})", route.id, route.url, route.stream_path);
    }
    Ok(())
}

pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    for (i, info) in device::list_devices(&host)?.into_iter().enumerate() {
        let marker = if info.is_default { " [default]" } else { "" };
        println!(
            "#{i}: {} ({}-{} Hz){marker}",
            info.name, info.min_rate, info.max_rate
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn ext_hint_from_absolute_url() {
        assert_eq!(
            ext_hint_for("https://www.soundhelix.com/examples/mp3/SoundHelix-Song-1.mp3"),
            Some("mp3".to_string())
        );
        assert_eq!(
            ext_hint_for("http://host/a/b.FLAC?token=1"),
            Some("flac".to_string())
        );
    }

    #[test]
    fn no_ext_hint_for_logical_ids_or_bare_paths() {
        assert_eq!(ext_hint_for("1"), None);
        assert_eq!(ext_hint_for("http://host/stream/audio/1"), None);
        assert_eq!(ext_hint_for("http://host.example/"), None);
    }

    #[test]
    fn zero_quantum_falls_back_to_default() {
        let args = Args::try_parse_from(["streamer", "--decode-quantum", "0", "play", "1"]).unwrap();
        let cfg = streamer_config(&args);
        assert_eq!(cfg.decode_quantum, stream_player::config::DEFAULT_DECODE_QUANTUM);
        assert_eq!(cfg.lookahead, Duration::from_millis(100));
    }

    #[test]
    fn error_end_reason_becomes_failure() {
        let status = StreamStatus {
            end_reason: Some(EndReason::Error),
            last_error: Some("network error: reset".to_string()),
            ..StreamStatus::default()
        };
        let err = finish(status).unwrap_err();
        assert_eq!(err.to_string(), "network error: reset");
        assert!(finish(StreamStatus::default()).is_ok());
    }
}
