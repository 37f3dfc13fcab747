//! The playback engine: a producer/consumer pipeline that moves decoded
//! frames through an SPSC ring buffer to the output device, preserving
//! gapless transitions and honoring seek/pause/stop/volume commands.

pub mod channel_mixer;
pub mod event;
pub mod filter;
pub mod player;
pub mod replaygain;
pub mod resampler;
pub mod ring;
pub mod sink;
pub mod source;

pub use filter::{AudioFormat, Filter, FilterChain};
pub use player::{Player, PlayerDelegate, PlayerState};
pub use replaygain::{ReplayGainConfig, ReplayGainInfo, ReplayGainMode};
