//! Container demultiplexers: byte-accurate parsers that locate elementary
//! audio streams inside MP4, ASF, WAVE, CAF, ADTS and RealMedia files and
//! expose packetized access plus seeking.

pub mod adts;
pub mod asf;
pub mod caf;
pub mod demuxer;
pub mod dict;
pub mod format;
pub mod info;
pub mod media;
pub mod mp4;
pub mod real;
pub mod tags;
pub mod wave;

pub use demuxer::{resolve, Demuxer, OpenMode, SeekPos};
pub use dict::Dictionary;
pub use format::{channel, CodecFormat, CodecId};
pub use info::{Image, ImageKind, StreamInfo};
