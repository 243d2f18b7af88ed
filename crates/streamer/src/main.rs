//! Streamer: plays a remote audio stream while it is still downloading.
//!
//! Bytes are accumulated as they arrive, decoded in fixed-size ranges once enough data is
//! buffered, and each decoded segment is scheduled back to back on the output device so
//! playback is gapless. See `stream_player::orchestrator` for the session state machine.
//!
//! ## Commands
//! - `play <id|url>`: stream a proxy route id or an absolute URL to the output device.
//! - `routes`: list the ids the forwarding proxy knows about.
//! - `list-devices`: list CPAL output devices.

mod cli;
mod runtime;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,streamer=info,stream_player=info")
        }))
        .init();

    match &args.cmd {
        cli::Command::Play { target } => runtime::run_play(&args, target).await,
        cli::Command::Routes => runtime::list_routes(&args.base_url).await,
        cli::Command::ListDevices => runtime::list_devices(),
    }
}
