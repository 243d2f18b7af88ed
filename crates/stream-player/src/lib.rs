pub mod accumulator;
pub mod config;
pub mod decode;
pub mod device;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod playback;
pub mod resample;
pub mod scheduler;
pub mod source;
pub mod status;

#[cfg(test)]
mod test_support;

pub use stream_types::{EndReason, SessionPhase, StreamEvent, StreamStatus};
