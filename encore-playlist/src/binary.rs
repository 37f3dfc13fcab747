//! The on-disk playlist formats.
//!
//! A playlist file is a 12-byte header followed by an LZ4-compressed body
//! of length-prefixed records; the playlist index is a small uncompressed
//! table of uid/position/name entries. Everything is little-endian.

use std::path::Path;

use encore_common::io::{ByteReader, ByteWriter, LE};
use encore_common::{gather, scatter, Error, Result, UStr};
use encore_demux::media::Track;

const PLAYLIST_MAGIC: u32 = u32::from_le_bytes(*b"AMPL");
const PLAYLIST_VERSION: u16 = 1;

fn pack_playlist(tracks: &[Track]) -> Vec<u8> {
    let mut w = ByteWriter::new();

    let write_data = |w: &mut ByteWriter, bytes: &[u8]| {
        w.put::<u32, LE>(bytes.len() as u32);
        w.put_bytes(bytes);
    };

    w.put::<u32, LE>(tracks.len() as u32);
    for track in tracks {
        write_data(&mut w, track.location.as_bytes());

        w.put::<u32, LE>(track.tags.len() as u32);
        for (key, value) in track.tags.iter() {
            write_data(&mut w, key.as_bytes());
            write_data(&mut w, value.as_bytes());
        }

        w.put::<u32, LE>(track.info.len() as u32);
        for (key, value) in track.info.iter() {
            write_data(&mut w, key.as_bytes());
            write_data(&mut w, value.as_bytes());
        }

        scatter!(w, LE =>
            track.start_offset,
            track.frames,
            track.sample_rate,
            track.channel_layout,
            track.chapter);
    }
    w.into_inner()
}

fn unpack_playlist(body: &[u8]) -> Result<Vec<Track>> {
    let mut r = ByteReader::new(body);

    fn read_data<'a>(r: &mut ByteReader<'a>) -> Result<&'a [u8]> {
        let len = r.get::<u32, LE>()? as usize;
        r.get_bytes(len)
    }

    fn read_string(r: &mut ByteReader<'_>) -> Result<UStr> {
        let bytes = read_data(r)?;
        UStr::from_utf8(bytes).map(|s| UStr::intern(&s))
    }

    let count = r.get::<u32, LE>()? as usize;
    let mut tracks = Vec::with_capacity(count);

    for _ in 0..count {
        let mut track = Track {
            location: read_string(&mut r)?,
            ..Track::default()
        };

        let tag_count = r.get::<u32, LE>()?;
        for _ in 0..tag_count {
            let key = read_string(&mut r)?;
            let value = read_string(&mut r)?;
            track.tags.push_sorted(key, value);
        }

        let info_count = r.get::<u32, LE>()?;
        for _ in 0..info_count {
            let key = read_string(&mut r)?;
            let value = read_string(&mut r)?;
            track.info.push_sorted(key, value);
        }

        gather!(r, LE =>
            track.start_offset,
            track.frames,
            track.sample_rate,
            track.channel_layout,
            track.chapter);

        tracks.push(track);
    }
    Ok(tracks)
}

/// Serializes a playlist body and writes the compressed file.
pub fn save_playlist(path: &Path, tracks: &[Track]) -> Result<()> {
    let body = pack_playlist(tracks);
    let compressed = lz4_flex::block::compress(&body);

    let mut w = ByteWriter::new();
    scatter!(w, LE =>
        PLAYLIST_MAGIC,
        PLAYLIST_VERSION,
        0u16,
        body.len() as u32);
    w.put_bytes(&compressed);

    std::fs::write(path, w.into_inner())?;
    Ok(())
}

/// Loads a playlist file; a missing file is an empty playlist.
pub fn load_playlist(path: &Path) -> Result<Vec<Track>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut r = ByteReader::new(&data);
    let mut magic = 0u32;
    let mut version = 0u16;
    let mut flags = 0u16;
    let mut size = 0u32;
    gather!(r, LE => magic, version, flags, size);

    if magic != PLAYLIST_MAGIC || version != PLAYLIST_VERSION || flags != 0 {
        return Err(Error::failure("invalid playlist file"));
    }

    let compressed = r.get_bytes(r.remaining())?;
    let body = lz4_flex::block::decompress(compressed, size as usize)
        .map_err(|e| Error::failure(format!("LZ4 decompression failed: {e}")))?;
    if body.len() != size as usize {
        return Err(Error::failure("invalid decompressed size"));
    }
    unpack_playlist(&body)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexEntry {
    pub uid: u32,
    pub pos: u32,
    pub name: UStr,
}

/// Reads the playlist index: entry count, selection, then the entries.
pub fn load_index(path: &Path) -> Result<(Vec<IndexEntry>, u32)> {
    let data = std::fs::read(path)?;
    let mut r = ByteReader::new(&data);

    let mut entry_count = 0u32;
    let mut selection = 0u32;
    gather!(r, LE => entry_count, selection);

    let mut entries = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        let mut entry = IndexEntry::default();
        let mut name_len = 0u32;
        gather!(r, LE => entry.uid, entry.pos, name_len);

        let name = r.get_bytes(name_len as usize)?;
        entry.name = UStr::from_utf8(name)?;
        entries.push(entry);
    }
    Ok((entries, selection))
}

pub fn save_index(path: &Path, entries: &[IndexEntry], selection: u32) -> Result<()> {
    let mut w = ByteWriter::new();
    scatter!(w, LE => entries.len() as u32, selection);

    for entry in entries {
        scatter!(w, LE => entry.uid, entry.pos, entry.name.len() as u32);
        w.put_bytes(entry.name.as_bytes());
    }

    std::fs::write(path, w.into_inner())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use encore_demux::dict::Dictionary;

    fn sample_tracks() -> Vec<Track> {
        let mut tags = Dictionary::new();
        tags.insert(UStr::intern("artist"), UStr::new("Someone"));
        tags.insert(UStr::intern("title"), UStr::new("Something"));

        let mut info = Dictionary::new();
        info.insert(UStr::intern("container"), UStr::new("Wave"));

        vec![
            Track {
                location: UStr::new("/music/one.wav"),
                tags,
                info,
                start_offset: 0,
                frames: 441_000,
                sample_rate: 44_100,
                channel_layout: 0b11,
                chapter: 0,
            },
            Track {
                location: UStr::new("/music/two.m4a"),
                start_offset: 2112,
                frames: 5_934_400,
                sample_rate: 44_100,
                channel_layout: 0b11,
                chapter: 0,
                ..Track::default()
            },
        ]
    }

    #[test]
    fn playlists_round_trip_field_by_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0001.ampl");

        let tracks = sample_tracks();
        save_playlist(&path, &tracks).unwrap();
        let loaded = load_playlist(&path).unwrap();

        assert_eq!(loaded.len(), tracks.len());
        for (a, b) in loaded.iter().zip(&tracks) {
            assert_eq!(a.location, b.location);
            assert_eq!(a.tags, b.tags);
            assert_eq!(a.info, b.info);
            assert_eq!(a.start_offset, b.start_offset);
            assert_eq!(a.frames, b.frames);
            assert_eq!(a.sample_rate, b.sample_rate);
            assert_eq!(a.channel_layout, b.channel_layout);
            assert_eq!(a.chapter, b.chapter);
        }
    }

    #[test]
    fn header_starts_with_the_magic_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0002.ampl");
        save_playlist(&path, &sample_tracks()).unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(&data[..4], b"AMPL");
        assert_eq!(u16::from_le_bytes([data[4], data[5]]), 1);
        assert_eq!(u16::from_le_bytes([data[6], data[7]]), 0);
    }

    #[test]
    fn corrupted_headers_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.ampl");
        std::fs::write(&path, b"NOPE\x01\x00\x00\x00\x00\x00\x00\x00").unwrap();
        assert!(load_playlist(&path).is_err());
    }

    #[test]
    fn missing_playlists_are_empty() {
        let loaded = load_playlist(Path::new("/nonexistent/playlist.ampl")).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn index_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.dat");

        let entries = vec![
            IndexEntry {
                uid: 1,
                pos: 0,
                name: UStr::new("Default"),
            },
            IndexEntry {
                uid: 7,
                pos: 1,
                name: UStr::new("Road trip"),
            },
        ];
        save_index(&path, &entries, 1).unwrap();

        let (loaded, selection) = load_index(&path).unwrap();
        assert_eq!(loaded, entries);
        assert_eq!(selection, 1);
    }
}
