use clap::{Parser, Subcommand};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "streamer", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Forwarding proxy that serves `/stream/audio/{id}` and `/routes`
    #[arg(long, default_value = "http://localhost:8080")]
    pub base_url: String,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Preferred output sample rate in Hz (defaults to the device maximum)
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Bytes that must accumulate before a decode attempt; decode ends round down to a multiple
    #[arg(long, default_value_t = stream_player::config::DEFAULT_DECODE_QUANTUM)]
    pub decode_quantum: usize,

    /// Delay before the first segment plays, in milliseconds
    #[arg(long, default_value_t = 100)]
    pub lookahead_ms: u64,

    /// How often to check whether scheduled audio has played out, in milliseconds
    #[arg(long, default_value_t = 50)]
    pub drain_poll_ms: u64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stream and play a logical audio id (`1`, `hls`, ...) or an absolute URL
    Play {
        target: String,
    },

    /// List the audio ids known to the proxy
    Routes,

    /// List output devices
    ListDevices,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_uses_streaming_defaults() {
        let args = Args::try_parse_from(["streamer", "play", "2"]).unwrap();
        assert_eq!(args.decode_quantum, 524_288);
        assert_eq!(args.lookahead_ms, 100);
        assert_eq!(args.drain_poll_ms, 50);
        assert!(matches!(args.cmd, Command::Play { ref target } if target == "2"));
    }

    #[test]
    fn global_flags_before_subcommand() {
        let args = Args::try_parse_from([
            "streamer",
            "--base-url",
            "http://proxy:9000",
            "--device",
            "dac",
            "--decode-quantum",
            "65536",
            "routes",
        ])
        .unwrap();
        assert_eq!(args.base_url, "http://proxy:9000");
        assert_eq!(args.device.as_deref(), Some("dac"));
        assert_eq!(args.decode_quantum, 65_536);
        assert!(matches!(args.cmd, Command::Routes));
    }

    #[test]
    fn play_requires_target() {
        assert!(Args::try_parse_from(["streamer", "play"]).is_err());
    }
}
