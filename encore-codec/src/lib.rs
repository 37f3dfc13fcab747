//! Decoders and PCM conversion: packet → interleaved f32 frames.

pub mod decoder;
pub mod g711;
pub mod lpcm;
pub mod packet;
pub mod pcm;
pub mod symphonia_decoder;

pub use decoder::{resolve, DecodeStatus, Decoder};
pub use packet::Packet;
