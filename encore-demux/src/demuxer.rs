//! The demultiplexer contract and the extension-keyed demuxer registry.

use std::sync::RwLock;

use once_cell::sync::Lazy;

use encore_common::registry::{self, Registry};
use encore_common::{stream, Error, Result, Stream};

use crate::format::CodecFormat;
use crate::info::{Image, ImageKind, StreamInfo};

/// What the caller intends to do with the opened container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode(u32);

impl OpenMode {
    pub const PLAYBACK: OpenMode = OpenMode(1 << 0);
    pub const METADATA: OpenMode = OpenMode(1 << 1);
    pub const PICTURES: OpenMode = OpenMode(1 << 2);

    pub fn contains(self, other: OpenMode) -> bool {
        (self.0 & other.0) != 0
    }
}

impl std::ops::BitOr for OpenMode {
    type Output = OpenMode;

    fn bitor(self, rhs: OpenMode) -> OpenMode {
        OpenMode(self.0 | rhs.0)
    }
}

/// Where a seek landed: the requested target and the frames the caller must
/// discard from the decoder before presenting output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekPos {
    pub target: u64,
    pub priming: u64,
}

/// A container parser producing a stream of compressed packets.
pub trait Demuxer: Send {
    /// The format of the selected audio stream.
    fn format(&self) -> &CodecFormat;

    /// Total playable frames, excluding encoder priming.
    fn total_frames(&self) -> u64;

    /// Frames the decoder must discard before the first playable frame.
    fn start_offset(&self) -> u64 {
        0
    }

    fn average_bit_rate(&self) -> u32;

    fn instant_bit_rate(&self) -> u32;

    /// Reads the next compressed packet into `dest`.
    ///
    /// Returns `false` at end of stream. `dest` is cleared and refilled.
    fn feed(&mut self, dest: &mut Vec<u8>) -> Result<bool>;

    /// Positions the stream before the packet containing `pts` (in frames).
    fn seek(&mut self, pts: u64) -> Result<SeekPos>;

    fn get_info(&mut self, chapter: u32) -> Result<StreamInfo>;

    fn get_image(&mut self, kind: ImageKind) -> Result<Option<Image>> {
        let _ = kind;
        Ok(None)
    }

    fn chapter_count(&self) -> u32 {
        0
    }
}

/// Creates a demuxer for an already-opened stream.
pub type DemuxerFactory = fn(Box<dyn Stream>, OpenMode) -> Result<Box<dyn Demuxer>>;

static DEMUXER_FACTORIES: Lazy<RwLock<Registry<&'static str, DemuxerFactory>>> =
    Lazy::new(|| {
        let mut registry = Registry::new();
        crate::wave::register(&mut registry);
        crate::caf::register(&mut registry);
        crate::adts::register(&mut registry);
        crate::mp4::register(&mut registry);
        crate::asf::register(&mut registry);
        crate::real::register(&mut registry);
        RwLock::new(registry)
    });

pub fn register_demuxer(extensions: &[&'static str], factory: DemuxerFactory) {
    let mut registry = DEMUXER_FACTORIES.write().unwrap();
    for ext in extensions {
        registry.register(ext, factory);
    }
}

pub(crate) fn register_all(
    registry: &mut Registry<&'static str, DemuxerFactory>,
    extensions: &[&'static str],
    factory: DemuxerFactory,
) {
    for ext in extensions {
        registry.register(ext, factory);
    }
}

/// Whether any demuxer claims the path's extension.
pub fn have_demuxer_for(path: &str) -> bool {
    match extension_of(path) {
        Some(ext) => DEMUXER_FACTORIES.read().unwrap().contains(ext),
        None => false,
    }
}

fn extension_of(path: &str) -> Option<&str> {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
        _ => None,
    }
}

/// Resolves a demuxer for `location` by its lowercased path extension.
///
/// Factories registered for the extension are tried in registration order,
/// each over a freshly opened stream. With no registered factory this fails
/// with `protocol_not_supported`; when every factory fails, the last error
/// wins.
pub fn resolve(location: &str, mode: OpenMode) -> Result<Box<dyn Demuxer>> {
    let (_, path) = stream::split_scheme(location);
    let ext = extension_of(path).ok_or_else(|| {
        Error::invalid_argument("cannot open audio input for a path with no extension")
    })?;

    let registry = DEMUXER_FACTORIES.read().unwrap();
    registry::try_each(
        registry.find(ext),
        || Error::protocol_not_supported(format!("no audio input for file extension: {ext:?}")),
        |factory| factory(stream::open(location)?, mode),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_are_taken_after_the_last_dot() {
        assert_eq!(extension_of("/music/a.song.m4a"), Some("m4a"));
        assert_eq!(extension_of("C:\\music\\b.WAV"), Some("WAV"));
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of(".hidden"), None);
    }

    #[test]
    fn open_modes_combine() {
        let mode = OpenMode::PLAYBACK | OpenMode::PICTURES;
        assert!(mode.contains(OpenMode::PLAYBACK));
        assert!(mode.contains(OpenMode::PICTURES));
        assert!(!mode.contains(OpenMode::METADATA));
    }

    #[test]
    fn resolving_an_unknown_extension_fails_cleanly() {
        let err = match resolve("/tmp/nothing.xyz", OpenMode::METADATA) {
            Ok(_) => panic!("expected resolve to fail"),
            Err(err) => err,
        };
        assert_eq!(
            err.kind(),
            encore_common::ErrorKind::ProtocolNotSupported
        );
    }
}
