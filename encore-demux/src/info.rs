//! Immutable per-stream summaries returned by demuxers.

use encore_common::UStr;

use crate::dict::Dictionary;
use crate::format::{CodecFormat, CodecId};

/// What a cover image depicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    FrontCover,
    BackCover,
    Other,
}

/// An embedded picture, passed through as opaque bytes plus a MIME type.
#[derive(Debug, Clone, Default)]
pub struct Image {
    pub mime_type: UStr,
    pub data: Vec<u8>,
}

impl Image {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// The immutable summary a demuxer reports for one stream (or chapter).
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub codec_id: CodecId,
    pub sample_rate: u32,
    pub channels: u32,
    pub channel_layout: u32,
    pub bits_per_sample: u32,
    pub frames: u64,
    /// Encoder priming, in frames, to discard before presentation.
    pub start_offset: u64,
    pub average_bit_rate: u32,
    pub tags: Dictionary,
    pub props: Dictionary,
}

impl StreamInfo {
    pub fn new(format: &CodecFormat) -> Self {
        StreamInfo {
            codec_id: format.codec_id,
            sample_rate: format.sample_rate,
            channels: format.channels,
            channel_layout: format.channel_layout,
            bits_per_sample: format.bits_per_sample,
            frames: 0,
            start_offset: 0,
            average_bit_rate: 0,
            tags: Dictionary::new(),
            props: Dictionary::new(),
        }
    }
}
