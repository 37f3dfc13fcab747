//! The track record shared by the player and playlists.

use encore_common::num::muldiv;
use encore_common::UStr;

use crate::dict::Dictionary;

/// One playable entry: a location plus everything the scanner learned
/// about it. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct Track {
    pub location: UStr,
    pub tags: Dictionary,
    pub info: Dictionary,
    /// First presentable frame (encoder priming or chapter start).
    pub start_offset: u64,
    pub frames: u64,
    pub sample_rate: u32,
    pub channel_layout: u32,
    pub chapter: u32,
}

impl Track {
    pub fn length_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            0
        } else {
            muldiv(self.frames, 1000, u64::from(self.sample_rate))
        }
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location && self.chapter == other.chapter
    }
}

impl Eq for Track {}
