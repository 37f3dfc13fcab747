//! Random-access byte streams.
//!
//! A [`Stream`] is the abstract input every demuxer parses from. File and
//! memory backends are provided; additional backends register a factory
//! under their URI scheme and are resolved through [`open`].

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::RwLock;

use once_cell::sync::Lazy;

use crate::error::{Error, Result};
use crate::registry::{self, Registry};

/// A seekable, readable byte source.
pub trait Stream: Read + Seek + Send {
    /// Total length in bytes.
    fn size(&mut self) -> Result<u64>;

    fn tell(&mut self) -> Result<u64> {
        Ok(self.stream_position()?)
    }

    fn remain(&mut self) -> Result<u64> {
        let pos = self.tell()?;
        let len = self.size()?;
        Ok(len.saturating_sub(pos))
    }
}

/// Convenience accessors shared by every stream.
pub trait StreamExt: Stream {
    fn read_vec(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_fourcc(&mut self) -> Result<[u8; 4]> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        self.seek(SeekFrom::Current(n as i64))?;
        Ok(())
    }

    fn goto(&mut self, pos: u64) -> Result<()> {
        self.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    fn rewind_to_start(&mut self) -> Result<()> {
        self.goto(0)
    }
}

impl<S: Stream + ?Sized> StreamExt for S {}

impl<S: Stream + ?Sized> Stream for Box<S> {
    fn size(&mut self) -> Result<u64> {
        (**self).size()
    }

    fn tell(&mut self) -> Result<u64> {
        (**self).tell()
    }

    fn remain(&mut self) -> Result<u64> {
        (**self).remain()
    }
}

/// A stream over a file on disk. The length is queried once at open.
pub struct FileStream {
    file: File,
    len: u64,
}

impl FileStream {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(FileStream { file, len })
    }
}

impl Read for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for FileStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl Stream for FileStream {
    fn size(&mut self) -> Result<u64> {
        Ok(self.len)
    }
}

/// A stream over an owned byte buffer.
pub struct MemoryStream {
    cursor: Cursor<Vec<u8>>,
}

impl MemoryStream {
    pub fn new(data: Vec<u8>) -> Self {
        MemoryStream {
            cursor: Cursor::new(data),
        }
    }
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for MemoryStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl Stream for MemoryStream {
    fn size(&mut self) -> Result<u64> {
        Ok(self.cursor.get_ref().len() as u64)
    }
}

/// Creates a stream for a location's path component.
pub type StreamFactory = fn(&str) -> Result<Box<dyn Stream>>;

static STREAM_FACTORIES: Lazy<RwLock<Registry<&'static str, StreamFactory>>> =
    Lazy::new(|| {
        let mut registry = Registry::new();
        registry.register("file", open_file_stream as StreamFactory);
        RwLock::new(registry)
    });

fn open_file_stream(path: &str) -> Result<Box<dyn Stream>> {
    Ok(Box::new(FileStream::open(path)?))
}

pub fn register_stream_factory(scheme: &'static str, factory: StreamFactory) {
    STREAM_FACTORIES.write().unwrap().register(scheme, factory);
}

/// Splits a track locator into `(scheme, path)`.
///
/// A location without a scheme is a plain file path.
pub fn split_scheme(location: &str) -> (&str, &str) {
    match location.split_once("://") {
        Some((scheme, path)) if !scheme.is_empty() => (scheme, path),
        _ => ("file", location),
    }
}

/// Resolves `location` through the scheme registry and opens a stream.
pub fn open(location: &str) -> Result<Box<dyn Stream>> {
    let (scheme, path) = split_scheme(location);
    log::trace!("opening stream: scheme={scheme:?} path={path:?}");
    let registry = STREAM_FACTORIES.read().unwrap();
    registry::try_each(
        registry.find(scheme),
        || Error::protocol_not_supported(format!("no handler for URI scheme: {scheme:?}")),
        |factory| factory(path),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{ReadBytesExt, BE};

    #[test]
    fn memory_stream_tracks_position_and_remainder() {
        let mut s = MemoryStream::new(vec![0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(s.size().unwrap(), 8);
        assert_eq!(s.read_u32::<BE>().unwrap(), 0x00010203);
        assert_eq!(s.tell().unwrap(), 4);
        assert_eq!(s.remain().unwrap(), 4);

        s.skip(2).unwrap();
        assert_eq!(s.read_u16::<BE>().unwrap(), 0x0607);
        assert_eq!(s.remain().unwrap(), 0);
    }

    #[test]
    fn scheme_splitting_defaults_to_file() {
        assert_eq!(split_scheme("file:///tmp/a.wav"), ("file", "/tmp/a.wav"));
        assert_eq!(split_scheme("/tmp/a.wav"), ("file", "/tmp/a.wav"));
        assert_eq!(split_scheme("mem://x"), ("mem", "x"));
    }

    #[test]
    fn open_rejects_unknown_schemes() {
        let err = match open("gopher://nowhere") {
            Ok(_) => panic!("expected open to fail"),
            Err(err) => err,
        };
        assert_eq!(
            err.kind(),
            crate::error::ErrorKind::ProtocolNotSupported
        );
    }
}
