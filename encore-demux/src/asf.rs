//! ASF (Windows Media) demultiplexing.
//!
//! The container is a GUID-keyed object stream: a header object carrying
//! file/stream properties and metadata subobjects, followed by a data
//! object holding fixed-granularity packets whose payloads reassemble into
//! media objects. Seeking probes packet `send_time` values at the minimum
//! packet size stride.

use std::io::Read;

use byteorder::{ReadBytesExt, LE};

use encore_common::io::ByteReader;
use encore_common::num::muldiv;
use encore_common::registry::Registry;
use encore_common::stream::StreamExt;
use encore_common::ustr::TextEncoding;
use encore_common::{Error, Result, Stream, UStr};

use crate::demuxer::{register_all, Demuxer, DemuxerFactory, OpenMode, SeekPos};
use crate::dict::Dictionary;
use crate::format::CodecFormat;
use crate::info::{Image, ImageKind, StreamInfo};
use crate::tags;
use crate::wave;

pub(crate) fn register(registry: &mut Registry<&'static str, DemuxerFactory>) {
    register_all(registry, &["asf", "wm", "wma", "wmv"], |s, m| {
        Ok(Box::new(AsfDemuxer::new(s, m)?) as Box<dyn Demuxer>)
    });
}

// Top-level object GUIDs.
const GUID_HEADER_OBJECT: [u8; 16] = [
    0x30, 0x26, 0xb2, 0x75, 0x8e, 0x66, 0xcf, 0x11, 0xa6, 0xd9, 0x00, 0xaa, 0x00, 0x62, 0xce, 0x6c,
];
const GUID_DATA_OBJECT: [u8; 16] = [
    0x36, 0x26, 0xb2, 0x75, 0x8e, 0x66, 0xcf, 0x11, 0xa6, 0xd9, 0x00, 0xaa, 0x00, 0x62, 0xce, 0x6c,
];

// Header subobject GUIDs.
const GUID_FILE_PROPERTIES: [u8; 16] = [
    0xa1, 0xdc, 0xab, 0x8c, 0x47, 0xa9, 0xcf, 0x11, 0x8e, 0xe4, 0x00, 0xc0, 0x0c, 0x20, 0x53, 0x65,
];
const GUID_STREAM_PROPERTIES: [u8; 16] = [
    0x91, 0x07, 0xdc, 0xb7, 0xb7, 0xa9, 0xcf, 0x11, 0x8e, 0xe6, 0x00, 0xc0, 0x0c, 0x20, 0x53, 0x65,
];
const GUID_HEADER_EXTENSION: [u8; 16] = [
    0xb5, 0x03, 0xbf, 0x5f, 0x2e, 0xa9, 0xcf, 0x11, 0x8e, 0xe3, 0x00, 0xc0, 0x0c, 0x20, 0x53, 0x65,
];
const GUID_MARKER: [u8; 16] = [
    0x01, 0xcd, 0x87, 0xf4, 0x51, 0xa9, 0xcf, 0x11, 0x8e, 0xe6, 0x00, 0xc0, 0x0c, 0x20, 0x53, 0x65,
];
const GUID_CONTENT_DESCRIPTION: [u8; 16] = [
    0x33, 0x26, 0xb2, 0x75, 0x8e, 0x66, 0xcf, 0x11, 0xa6, 0xd9, 0x00, 0xaa, 0x00, 0x62, 0xce, 0x6c,
];
const GUID_EXTENDED_CONTENT_DESCRIPTION: [u8; 16] = [
    0x40, 0xa4, 0xd0, 0xd2, 0x07, 0xe3, 0xd2, 0x11, 0x97, 0xf0, 0x00, 0xa0, 0xc9, 0x5e, 0xa8, 0x50,
];
const GUID_CONTENT_ENCRYPTION: [u8; 16] = [
    0xfb, 0xb3, 0x11, 0x22, 0x23, 0xbd, 0xd2, 0x11, 0xb4, 0xb7, 0x00, 0xa0, 0xc9, 0x55, 0xfc, 0x6e,
];
const GUID_EXTENDED_CONTENT_ENCRYPTION: [u8; 16] = [
    0x14, 0xe6, 0x8a, 0x29, 0x22, 0x26, 0x17, 0x4c, 0xb9, 0x35, 0xda, 0xe0, 0x7e, 0xe9, 0x28, 0x9c,
];
const GUID_ADVANCED_CONTENT_ENCRYPTION: [u8; 16] = [
    0xb6, 0x9b, 0x07, 0x7a, 0xa4, 0xda, 0x12, 0x4e, 0xa5, 0xca, 0x91, 0xd3, 0x8d, 0xc1, 0x1a, 0x8d,
];

// Header extension subobject GUIDs.
const GUID_EXTENDED_STREAM_PROPERTIES: [u8; 16] = [
    0xcb, 0xa5, 0xe6, 0x14, 0x72, 0xc6, 0x32, 0x43, 0x83, 0x99, 0xa9, 0x69, 0x52, 0x06, 0x5b, 0x5a,
];
const GUID_METADATA: [u8; 16] = [
    0xea, 0xcb, 0xf8, 0xc5, 0xaf, 0x5b, 0x77, 0x48, 0x84, 0x67, 0xaa, 0x8c, 0x44, 0xfa, 0x4c, 0xca,
];
const GUID_METADATA_LIBRARY: [u8; 16] = [
    0x94, 0x1c, 0x23, 0x44, 0x98, 0x94, 0xd1, 0x49, 0xa1, 0x41, 0x1d, 0x13, 0x4e, 0x45, 0x70, 0x54,
];

// Stream-properties GUIDs.
const GUID_AUDIO_MEDIA: [u8; 16] = [
    0x40, 0x9e, 0x69, 0xf8, 0x4d, 0x5b, 0xcf, 0x11, 0xa8, 0xfd, 0x00, 0x80, 0x5f, 0x5c, 0x44, 0x2b,
];
const GUID_AUDIO_SPREAD: [u8; 16] = [
    0x50, 0xcd, 0xc3, 0xbf, 0x8f, 0x61, 0xcf, 0x11, 0x8b, 0xb2, 0x00, 0xaa, 0x00, 0xb4, 0xe2, 0x20,
];

const TICKS_PER_SECOND: u64 = 10_000_000;

fn wm_key_mapping(key: &str) -> Option<&'static str> {
    const TABLE: &[(&str, &str)] = &[
        ("MusicBrainz/Album Artist Id", tags::MB_ALBUM_ARTIST_ID),
        ("MusicBrainz/Album Id", tags::MB_ALBUM_ID),
        ("MusicBrainz/Artist Id", tags::MB_ARTIST_ID),
        ("MusicBrainz/Release Country", tags::MB_RELEASE_COUNTRY),
        ("MusicBrainz/Track Id", tags::MB_TRACK_ID),
        ("WM/AlbumArtist", tags::ALBUM_ARTIST),
        ("WM/AlbumArtistSortOrder", tags::ALBUM_ARTIST_SORT),
        ("WM/AlbumSortOrder", tags::ALBUM_SORT),
        ("WM/AlbumTitle", tags::ALBUM),
        ("WM/ArtistSortOrder", tags::ARTIST_SORT),
        ("WM/Barcode", tags::BARCODE),
        ("WM/BeatsPerMinute", tags::BPM),
        ("WM/CatalogNo", tags::CATALOG_NUMBER),
        ("WM/Comments", tags::COMMENT),
        ("WM/Compilation", tags::COMPILATION),
        ("WM/Composer", tags::COMPOSER),
        ("WM/ComposerSortOrder", tags::COMPOSER_SORT),
        ("WM/Conductor", tags::CONDUCTOR),
        ("WM/ContentGroupDescription", tags::GROUP),
        ("WM/Copyright", tags::COPYRIGHT),
        ("WM/EncodedBy", tags::ENCODED_BY),
        ("WM/EncodingSettings", tags::ENCODING_SETTINGS),
        ("WM/Genre", tags::GENRE),
        ("WM/ISRC", tags::ISRC),
        ("WM/Lyrics", tags::LYRICS),
        ("WM/Mood", tags::MOOD),
        ("WM/OriginalAlbumTitle", tags::ORIGINAL_ALBUM),
        ("WM/OriginalArtist", tags::ORIGINAL_ARTIST),
        ("WM/PartOfSet", tags::DISC_NUMBER),
        ("WM/Publisher", tags::LABEL),
        ("WM/SharedUserRating", tags::RATING),
        ("WM/TitleSortOrder", tags::TITLE_SORT),
        ("WM/TrackNumber", tags::TRACK_NUMBER),
        ("WM/Writer", tags::LYRICIST),
        ("WM/Year", tags::DATE),
    ];
    TABLE
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|&(_, v)| v)
}

fn to_media_key(key: &str) -> UStr {
    match wm_key_mapping(key) {
        Some(canonical) => UStr::intern(canonical),
        None => tags::map_common_key(key),
    }
}

fn load_utf16le_string(bytes: &[u8]) -> UStr {
    // Values are null-terminated UTF-16LE; stop at the terminator.
    let mut end = bytes.len() & !1;
    for pos in (0..end).step_by(2) {
        if bytes[pos] == 0 && bytes[pos + 1] == 0 {
            end = pos;
            break;
        }
    }
    UStr::from_encoding_lossy(&bytes[..end], TextEncoding::Utf16Le)
}

fn read_utf16le_string(file: &mut dyn Stream, bytes: usize) -> Result<UStr> {
    let bytes = (bytes + 1) & !1;
    if bytes == 0 {
        return Ok(UStr::empty());
    }
    let buf = file.read_vec(bytes)?;
    Ok(load_utf16le_string(&buf))
}

#[derive(Default)]
struct FileProperties {
    packet_count: u64,
    play_duration: u64,
    preroll: u64,
    min_packet_size: u32,
    max_packet_size: u32,
}

#[derive(Default)]
struct ContentDescription {
    title: UStr,
    artist: UStr,
    copyright: UStr,
    description: UStr,
    rating: UStr,
}

struct MarkerEntry {
    presentation_time: u64,
    description: UStr,
}

// Attribute value types in metadata objects.
const ATTR_UNICODE: u16 = 0;
const ATTR_BYTES: u16 = 1;
const ATTR_BOOLEAN: u16 = 2;
const ATTR_DWORD: u16 = 3;
const ATTR_QWORD: u16 = 4;
const ATTR_WORD: u16 = 5;

struct Attribute {
    name: UStr,
    data: Vec<u8>,
    kind: u16,
    stream_number: u16,
}

impl Attribute {
    fn to_text(&self) -> Option<UStr> {
        match self.kind {
            ATTR_UNICODE => Some(load_utf16le_string(&self.data)),
            ATTR_BOOLEAN => {
                let value = !self.data.is_empty() && self.data[0] != 0;
                Some(UStr::intern(if value { "Yes" } else { "No" }))
            }
            ATTR_DWORD | ATTR_QWORD | ATTR_WORD => {
                let mut r = ByteReader::new(&self.data);
                let value = match self.kind {
                    ATTR_QWORD => r.get::<u64, LE>().ok()?,
                    ATTR_DWORD => u64::from(r.get::<u32, LE>().ok()?),
                    _ => u64::from(r.get::<u16, LE>().ok()?),
                };
                Some(UStr::new(value.to_string()))
            }
            _ => None,
        }
    }
}

/// Re-interleaves "audio spread" error-corrected sub-packets.
#[derive(Default)]
struct Descrambler {
    span: u32,
    virtual_packet_length: u32,
    virtual_chunk_length: u32,
}

impl Descrambler {
    fn parse(&mut self, data: &[u8]) {
        let mut r = ByteReader::new(data);
        self.span = r.get::<u8, LE>().map(u32::from).unwrap_or(0);
        self.virtual_packet_length = r.get::<u16, LE>().map(u32::from).unwrap_or(0);
        self.virtual_chunk_length = r.get::<u16, LE>().map(u32::from).unwrap_or(0);

        if self.span > 1 {
            let invalid = self.virtual_chunk_length == 0
                || self.virtual_packet_length / self.virtual_chunk_length <= 1
                || self.virtual_packet_length % self.virtual_chunk_length != 0;
            if invalid {
                self.span = 0;
            }
        }
    }

    fn apply(&self, pkt: &mut Vec<u8>) -> Result<()> {
        if self.span <= 1 {
            return Ok(());
        }

        let expected = (self.virtual_packet_length * self.span) as usize;
        if pkt.len() != expected {
            return Err(Error::invalid_argument("invalid packet size"));
        }

        let n = self.virtual_chunk_length as usize;
        let h = (self.virtual_packet_length / self.virtual_chunk_length) as usize;
        let w = self.span as usize;

        let mut tmp = vec![0u8; expected];
        for i in 0..h {
            for j in 0..w {
                tmp[n * (j + i * w)..n * (j + i * w) + n]
                    .copy_from_slice(&pkt[n * (i + j * h)..n * (i + j * h) + n]);
            }
        }
        *pkt = tmp;
        Ok(())
    }
}

struct PayloadParsingInfo {
    length_type_flags: u8,
    property_flags: u8,
    packet_length: u32,
    padding_length: u32,
    send_time: u32,
    duration: u16,
    payload_flags: u8,
}

struct PayloadDataHeader {
    stream_number: u8,
    offset_into_media_object: u32,
    replicated_data_length: u32,
}

/// Field width selected by a 2-bit type code: 0, 1, 2 or 4 bytes.
pub(crate) fn coded_size(flags: u32, offset: u32) -> u32 {
    (1u32 << ((flags >> offset) & 0x3)) >> 1
}

fn read_coded(r: &mut ByteReader<'_>, size: u32) -> Result<u32> {
    let mut value = 0u32;
    let bytes = r.get_bytes(size as usize)?;
    for (i, &b) in bytes.iter().enumerate() {
        value |= u32::from(b) << (8 * i);
    }
    Ok(value)
}

#[derive(Default, Clone)]
struct StreamData {
    ts_data: Vec<u8>,
    ec_data: Vec<u8>,
    start_time: u64,
    end_time: u64,
    bit_rate: u32,
    is_audio: bool,
    has_spread_ec: bool,
}

pub struct AsfDemuxer {
    file: Box<dyn Stream>,
    format: CodecFormat,
    file_properties: FileProperties,
    content_description: ContentDescription,
    markers: Vec<MarkerEntry>,
    descramble: Descrambler,
    attributes: Vec<Attribute>,
    data_start_offset: u64,
    data_length: u64,
    total_frames: u64,
    encoder_delay: u64,
    average_bit_rate: u32,
    instant_bit_rate: u32,
    packet_queue: Vec<Vec<u8>>,
    packet_buffer: Vec<u8>,
    packet_offset: u32,
    packet_number: u64,
    audio_stream_number: u8,
}

impl AsfDemuxer {
    pub fn new(mut file: Box<dyn Stream>, mode: OpenMode) -> Result<Self> {
        // Header object: GUID, size, subobject count, two reserved bytes.
        let mut header_id = [0u8; 16];
        file.read_exact(&mut header_id)?;
        let _header_size = file.read_u64::<LE>()?;
        let _subobject_count = file.read_u32::<LE>()?;
        let mut reserved = [0u8; 2];
        file.read_exact(&mut reserved)?;
        if header_id != GUID_HEADER_OBJECT || reserved[1] != 0x02 {
            return Err(Error::invalid_data_format("invalid ASF header object"));
        }

        let mut demuxer = AsfDemuxer {
            file,
            format: CodecFormat::default(),
            file_properties: FileProperties::default(),
            content_description: ContentDescription::default(),
            markers: Vec::new(),
            descramble: Descrambler::default(),
            attributes: Vec::new(),
            data_start_offset: 0,
            data_length: 0,
            total_frames: 0,
            encoder_delay: 0,
            average_bit_rate: 0,
            instant_bit_rate: 0,
            packet_queue: Vec::new(),
            packet_buffer: Vec::new(),
            packet_offset: 0,
            packet_number: 0,
            audio_stream_number: 0,
        };

        let mut streams = vec![StreamData::default(); 128];

        let file_length = demuxer.file.size()?;
        let mut file_offset = demuxer.file.tell()?;

        while file_offset + 24 < file_length {
            let mut object_id = [0u8; 16];
            demuxer.file.read_exact(&mut object_id)?;
            let object_size = demuxer.file.read_u64::<LE>()?;
            if object_size < 24 {
                return Err(Error::invalid_data_format(
                    "ASF object size must be at least 24 bytes",
                ));
            }

            match object_id {
                GUID_HEADER_EXTENSION => {
                    // Descend into the extension data rather than skipping
                    // the whole object.
                    file_offset += 46;
                    demuxer.file.goto(file_offset)?;
                    continue;
                }
                GUID_FILE_PROPERTIES => demuxer.read_file_properties(object_size)?,
                GUID_STREAM_PROPERTIES => demuxer.parse_stream_properties(&mut streams)?,
                GUID_EXTENDED_STREAM_PROPERTIES => {
                    demuxer.parse_extended_stream_properties(&mut streams)?;
                }
                GUID_DATA_OBJECT => {
                    demuxer.data_start_offset = file_offset + 50;
                    demuxer.data_length = object_size - 50;
                }
                GUID_MARKER => {
                    if mode.contains(OpenMode::METADATA) {
                        demuxer.parse_marker_object()?;
                    }
                }
                GUID_CONTENT_DESCRIPTION => {
                    if mode.contains(OpenMode::METADATA) {
                        demuxer.read_content_description()?;
                    }
                }
                GUID_EXTENDED_CONTENT_DESCRIPTION => {
                    if mode.contains(OpenMode::METADATA | OpenMode::PICTURES) {
                        demuxer.read_extended_content_description()?;
                    }
                }
                GUID_METADATA | GUID_METADATA_LIBRARY => {
                    if mode.contains(OpenMode::METADATA | OpenMode::PICTURES) {
                        demuxer.read_metadata_object()?;
                    }
                }
                GUID_CONTENT_ENCRYPTION
                | GUID_EXTENDED_CONTENT_ENCRYPTION
                | GUID_ADVANCED_CONTENT_ENCRYPTION => {
                    return Err(Error::new(
                        encore_common::ErrorKind::NotImplemented,
                        "ASF file contains DRM-protected content",
                    ));
                }
                _ => {}
            }

            file_offset += object_size;
            demuxer.file.goto(file_offset)?;
        }

        if mode.contains(OpenMode::PLAYBACK | OpenMode::METADATA) {
            demuxer.find_first_audio_stream(&streams)?;
            if mode.contains(OpenMode::PLAYBACK) {
                demuxer.file.goto(demuxer.data_start_offset)?;
            }
            if mode.contains(OpenMode::METADATA) {
                let preroll =
                    demuxer.file_properties.preroll * (TICKS_PER_SECOND / 1000);
                for entry in &mut demuxer.markers {
                    entry.presentation_time =
                        entry.presentation_time.saturating_sub(preroll);
                }
            }
        }
        Ok(demuxer)
    }

    fn read_file_properties(&mut self, object_size: u64) -> Result<()> {
        if object_size < 104 {
            return Err(Error::invalid_data_format(
                "ASF File Properties Object is too small",
            ));
        }

        self.file.skip(16)?; // file id
        let _file_size = self.file.read_u64::<LE>()?;
        let _creation_date = self.file.read_u64::<LE>()?;
        self.file_properties.packet_count = self.file.read_u64::<LE>()?;
        self.file_properties.play_duration = self.file.read_u64::<LE>()?;
        let _send_duration = self.file.read_u64::<LE>()?;
        self.file_properties.preroll = self.file.read_u64::<LE>()?;
        let _flags = self.file.read_u32::<LE>()?;
        self.file_properties.min_packet_size = self.file.read_u32::<LE>()?;
        self.file_properties.max_packet_size = self.file.read_u32::<LE>()?;
        Ok(())
    }

    fn parse_stream_properties(&mut self, streams: &mut [StreamData]) -> Result<()> {
        let mut stream_type = [0u8; 16];
        self.file.read_exact(&mut stream_type)?;
        let mut ec_type = [0u8; 16];
        self.file.read_exact(&mut ec_type)?;
        self.file.skip(8)?; // time offset
        let ts_data_length = self.file.read_u32::<LE>()?;
        let ec_data_length = self.file.read_u32::<LE>()?;
        let flags = self.file.read_u16::<LE>()?;
        self.file.skip(4)?; // reserved

        let stream = &mut streams[usize::from(flags & 0x7f)];
        stream.ts_data = self.file.read_vec(ts_data_length as usize)?;
        stream.ec_data = self.file.read_vec(ec_data_length as usize)?;
        stream.is_audio = stream_type == GUID_AUDIO_MEDIA;
        stream.has_spread_ec = ec_type == GUID_AUDIO_SPREAD;
        Ok(())
    }

    fn parse_extended_stream_properties(&mut self, streams: &mut [StreamData]) -> Result<()> {
        let start_time = self.file.read_u64::<LE>()?;
        let end_time = self.file.read_u64::<LE>()?;
        let data_bit_rate = self.file.read_u32::<LE>()?;
        self.file.skip(4 * 6)?; // buffer and alternate-rate fields
        let stream_number = self.file.read_u16::<LE>()?;
        self.file.skip(2 + 8 + 2 + 2)?;

        let stream = &mut streams[usize::from(stream_number & 0x7f)];
        stream.start_time = start_time;
        stream.end_time = end_time;
        stream.bit_rate = data_bit_rate;
        Ok(())
    }

    fn parse_marker_object(&mut self) -> Result<()> {
        self.file.skip(16)?; // reserved
        let entry_count = self.file.read_u32::<LE>()?;
        self.file.skip(2)?; // reserved
        let name_length = self.file.read_u16::<LE>()?;
        let _name = read_utf16le_string(&mut *self.file, usize::from(name_length))?;

        for _ in 0..entry_count {
            let _byte_offset = self.file.read_u64::<LE>()?;
            let presentation_time = self.file.read_u64::<LE>()?;
            let _entry_length = self.file.read_u16::<LE>()?;
            let _send_time = self.file.read_u32::<LE>()?;
            let _flags = self.file.read_u32::<LE>()?;
            let descr_length = self.file.read_u32::<LE>()?;
            let description =
                read_utf16le_string(&mut *self.file, descr_length as usize * 2)?;

            self.markers.push(MarkerEntry {
                presentation_time,
                description,
            });
        }
        Ok(())
    }

    fn read_content_description(&mut self) -> Result<()> {
        let mut lengths = [0u16; 5];
        for len in &mut lengths {
            *len = self.file.read_u16::<LE>()?;
        }

        self.content_description.title =
            read_utf16le_string(&mut *self.file, usize::from(lengths[0]))?;
        self.content_description.artist =
            read_utf16le_string(&mut *self.file, usize::from(lengths[1]))?;
        self.content_description.copyright =
            read_utf16le_string(&mut *self.file, usize::from(lengths[2]))?;
        self.content_description.description =
            read_utf16le_string(&mut *self.file, usize::from(lengths[3]))?;
        self.content_description.rating =
            read_utf16le_string(&mut *self.file, usize::from(lengths[4]))?;
        Ok(())
    }

    fn read_extended_content_description(&mut self) -> Result<()> {
        let count = self.file.read_u16::<LE>()?;
        self.attributes.reserve(usize::from(count));

        for _ in 0..count {
            let name_length = self.file.read_u16::<LE>()?;
            let name = read_utf16le_string(&mut *self.file, usize::from(name_length))?;
            let kind = self.file.read_u16::<LE>()?;
            let data_length = self.file.read_u16::<LE>()?;
            let data = self.file.read_vec(usize::from(data_length))?;

            self.attributes.push(Attribute {
                name,
                data,
                kind,
                stream_number: 0,
            });
        }
        Ok(())
    }

    fn read_metadata_object(&mut self) -> Result<()> {
        let count = self.file.read_u16::<LE>()?;
        self.attributes.reserve(usize::from(count));

        for _ in 0..count {
            self.file.skip(2)?; // language list index
            let stream_number = self.file.read_u16::<LE>()?;
            let name_length = self.file.read_u16::<LE>()?;
            let kind = self.file.read_u16::<LE>()?;
            let data_length = self.file.read_u32::<LE>()?;
            let name = read_utf16le_string(&mut *self.file, usize::from(name_length))?;
            let data = self.file.read_vec(data_length as usize)?;

            self.attributes.push(Attribute {
                name,
                data,
                kind,
                stream_number,
            });
        }
        Ok(())
    }

    fn find_first_audio_stream(&mut self, streams: &[StreamData]) -> Result<()> {
        for number in 1..128u8 {
            let stream = &streams[usize::from(number)];
            if !stream.is_audio {
                continue;
            }
            match wave::parse_format(&stream.ts_data) {
                Ok(format) => {
                    self.format = format;
                    self.audio_stream_number = number;
                    break;
                }
                Err(e) => log::debug!("skipping ASF stream {number}: {e}"),
            }
        }
        if self.audio_stream_number == 0 {
            return Err(Error::failure("no audio stream(s) found in ASF file"));
        }

        let stream = &streams[usize::from(self.audio_stream_number)];
        if stream.has_spread_ec {
            self.descramble.parse(&stream.ec_data);
        }

        let start_time = stream.start_time;
        let mut total_time = stream.end_time;
        if total_time == 0 {
            total_time = self.file_properties.play_duration;
            total_time = total_time
                .saturating_sub(self.file_properties.preroll * (TICKS_PER_SECOND / 1000));
        }
        total_time = total_time.saturating_sub(start_time);

        let sample_rate = u64::from(self.format.sample_rate);
        self.encoder_delay = muldiv(start_time, sample_rate, TICKS_PER_SECOND);
        self.total_frames = muldiv(total_time, sample_rate, TICKS_PER_SECOND);

        self.average_bit_rate = stream.bit_rate;
        if self.average_bit_rate == 0 {
            self.average_bit_rate = self.format.bit_rate;
        }
        if self.average_bit_rate == 0 && self.total_frames != 0 {
            self.average_bit_rate =
                muldiv(self.data_length, sample_rate * 8, self.total_frames) as u32;
        }
        self.instant_bit_rate = self.average_bit_rate;
        Ok(())
    }

    fn read_payload_parsing_info(&mut self) -> Result<PayloadParsingInfo> {
        let mut length_type_flags = self.file.read_u8()?;
        if length_type_flags & 0x80 != 0 {
            // Error correction data precedes the payload parsing info.
            self.file.skip(u64::from(length_type_flags & 0xf))?;
            length_type_flags = self.file.read_u8()?;
        }

        let flags = u32::from(length_type_flags);
        let size0 = coded_size(flags, 5);
        let size1 = coded_size(flags, 1);
        let size2 = coded_size(flags, 3);
        let size3 = flags & 0x1;

        let property_flags = self.file.read_u8()?;
        let body = self
            .file
            .read_vec((size0 + size1 + size2 + 4 + 2 + size3) as usize)?;
        let mut r = ByteReader::new(&body);

        let mut info = PayloadParsingInfo {
            length_type_flags,
            property_flags,
            packet_length: read_coded(&mut r, size0)?,
            // The sequence field is obsolete and discarded.
            padding_length: {
                let _sequence = read_coded(&mut r, size1)?;
                read_coded(&mut r, size2)?
            },
            send_time: r.get::<u32, LE>()?,
            duration: r.get::<u16, LE>()?,
            payload_flags: if size3 != 0 { r.get::<u8, LE>()? } else { 0 },
        };

        let min_packet_size = self.file_properties.min_packet_size;
        let max_packet_size = self.file_properties.max_packet_size;

        if info.packet_length == 0 {
            info.packet_length = min_packet_size;
        } else if info.packet_length < min_packet_size {
            info.padding_length += min_packet_size - info.packet_length;
            info.packet_length = min_packet_size;
        }

        if info.packet_length < info.padding_length {
            return Err(Error::out_of_bounds(format!(
                "ASF padding length ({} bytes) exceeds packet length ({} bytes)",
                info.padding_length, info.packet_length
            )));
        }
        if info.packet_length > max_packet_size {
            return Err(Error::out_of_bounds(format!(
                "ASF packet length ({} bytes) exceeds max packet length ({} bytes)",
                info.packet_length, max_packet_size
            )));
        }
        Ok(info)
    }

    fn read_payload_data_header(
        &mut self,
        info: &PayloadParsingInfo,
    ) -> Result<PayloadDataHeader> {
        let flags = u32::from(info.property_flags);
        let size0 = coded_size(flags, 4);
        let size1 = coded_size(flags, 2);
        let size2 = coded_size(flags, 0);

        let stream_number = self.file.read_u8()? & 0x7f;
        let body = self.file.read_vec((size0 + size1 + size2) as usize)?;
        let mut r = ByteReader::new(&body);

        let _media_object_number = read_coded(&mut r, size0)?;
        Ok(PayloadDataHeader {
            stream_number,
            offset_into_media_object: read_coded(&mut r, size1)?,
            replicated_data_length: read_coded(&mut r, size2)?,
        })
    }

    fn read_payload_length(&mut self, info: &PayloadParsingInfo) -> Result<u32> {
        let size0 = coded_size(u32::from(info.payload_flags), 6);
        let body = self.file.read_vec(size0 as usize)?;
        let mut r = ByteReader::new(&body);
        read_coded(&mut r, size0)
    }

    fn demux_payloads(
        &mut self,
        info: &PayloadParsingInfo,
        packet_start_offset: u64,
    ) -> Result<()> {
        let packet_end_offset = packet_start_offset + u64::from(info.packet_length);
        let multiple_payloads = info.length_type_flags & 0x1 != 0;
        let mut payload_count = if multiple_payloads {
            u32::from(info.payload_flags & 0x3f)
        } else {
            1
        };

        while payload_count > 0 {
            payload_count -= 1;
            let head = self.read_payload_data_header(info)?;

            let mut media_object_size = 0u32;
            if head.replicated_data_length >= 8 {
                media_object_size = self.file.read_u32::<LE>()?;
                let _presentation_time = self.file.read_u32::<LE>()?;
                if head.replicated_data_length > 8 {
                    self.file.skip(u64::from(head.replicated_data_length - 8))?;
                }
            } else if head.replicated_data_length == 1 {
                let _presentation_time_delta = self.file.read_u8()?;
            } else if head.replicated_data_length != 0 {
                return Err(Error::failure(format!(
                    "invalid replicated data length: {}",
                    head.replicated_data_length
                )));
            }

            let payload_length = if multiple_payloads {
                self.read_payload_length(info)?
            } else {
                let end = packet_start_offset + u64::from(info.packet_length);
                (end - self.file.tell()?) as u32 - info.padding_length
            };

            if head.stream_number != self.audio_stream_number {
                self.file.skip(u64::from(payload_length))?;
                continue;
            }

            if head.replicated_data_length < 8 {
                media_object_size = payload_length;
            }

            if self.packet_offset != head.offset_into_media_object {
                return Err(Error::failure("invalid ASF media object offset"));
            }
            if self.packet_offset + payload_length > media_object_size {
                return Err(Error::out_of_bounds("oversized ASF media object payload"));
            }

            if self.packet_buffer.is_empty() {
                self.packet_buffer = vec![0u8; media_object_size as usize];
            }

            let offset = self.packet_offset as usize;
            self.file
                .read_exact(&mut self.packet_buffer[offset..offset + payload_length as usize])?;
            self.packet_offset += payload_length;

            if self.packet_offset as usize == self.packet_buffer.len() {
                self.packet_offset = 0;
                self.packet_queue.push(std::mem::take(&mut self.packet_buffer));

                self.instant_bit_rate = if info.duration != 0 {
                    muldiv(
                        u64::from(media_object_size),
                        1000 * 8,
                        u64::from(info.duration),
                    ) as u32
                } else {
                    self.average_bit_rate
                };
            }
        }

        let file_offset = self.file.tell()?;
        if file_offset != packet_end_offset {
            if file_offset > packet_end_offset {
                return Err(Error::failure("ASF: read outside of packet boundaries"));
            }
            self.file.goto(packet_end_offset)?;
        }

        // The queue is drained from the back.
        if multiple_payloads {
            self.packet_queue.reverse();
        }
        Ok(())
    }

    fn is_beginning_of_packet(&mut self, info: &PayloadParsingInfo) -> Result<bool> {
        let multiple_payloads = info.length_type_flags & 0x1 != 0;
        let mut payload_count = if multiple_payloads {
            u32::from(info.payload_flags & 0x3f)
        } else {
            1
        };

        while payload_count > 0 {
            payload_count -= 1;
            let head = self.read_payload_data_header(info)?;
            if head.stream_number == self.audio_stream_number {
                return Ok(head.offset_into_media_object == 0);
            }

            if multiple_payloads {
                self.file.skip(u64::from(head.replicated_data_length))?;
                let length = self.read_payload_length(info)?;
                self.file.skip(u64::from(length))?;
            }
        }
        Ok(false)
    }
}

impl Demuxer for AsfDemuxer {
    fn format(&self) -> &CodecFormat {
        &self.format
    }

    fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn start_offset(&self) -> u64 {
        self.encoder_delay
    }

    fn average_bit_rate(&self) -> u32 {
        self.average_bit_rate
    }

    fn instant_bit_rate(&self) -> u32 {
        self.instant_bit_rate
    }

    fn feed(&mut self, dest: &mut Vec<u8>) -> Result<bool> {
        while self.packet_queue.is_empty() {
            if self.packet_number >= self.file_properties.packet_count {
                return Ok(false);
            }

            let packet_start_offset = self.file.tell()?;
            let info = self.read_payload_parsing_info()?;
            self.demux_payloads(&info, packet_start_offset)?;
            self.packet_number += 1;
        }

        *dest = self.packet_queue.pop().expect("queue is non-empty");
        self.descramble.apply(dest)?;
        Ok(true)
    }

    fn seek(&mut self, target_pts: u64) -> Result<SeekPos> {
        let packet_count = self.file_properties.packet_count;
        let sample_rate = u64::from(self.format.sample_rate);
        let frames_per_packet = self.total_frames / packet_count.max(1);
        let bytes_per_packet = u64::from(self.file_properties.min_packet_size);

        if packet_count == 0 || frames_per_packet == 0 || bytes_per_packet == 0 {
            return Err(Error::seek_error("ASF stream is not seekable"));
        }

        self.packet_queue.clear();
        self.packet_buffer.clear();
        self.packet_offset = 0;
        self.packet_number = target_pts / frames_per_packet;

        let mut priming;
        let mut packet_start_offset;

        loop {
            if self.packet_number >= packet_count {
                packet_start_offset = self.data_length;
                priming = 0;
                break;
            }
            if self.packet_number == 0 {
                packet_start_offset = 0;
                priming = target_pts;
                break;
            }

            packet_start_offset = self.packet_number * bytes_per_packet;
            self.file.goto(self.data_start_offset + packet_start_offset)?;

            let info = self.read_payload_parsing_info()?;
            let pts = muldiv(u64::from(info.send_time), sample_rate, 1000);

            if target_pts > pts {
                if self.is_beginning_of_packet(&info)? {
                    priming = target_pts - pts;
                    break;
                }
                self.packet_number -= 1;
                continue;
            }

            // Halve the remaining distance and retry.
            let mut step = (pts - target_pts) / (frames_per_packet * 2);
            step = step.max(1);

            if step > self.packet_number {
                packet_start_offset = 0;
                priming = target_pts;
                break;
            }
            self.packet_number -= step;
        }

        self.file.goto(self.data_start_offset + packet_start_offset)?;
        Ok(SeekPos {
            target: target_pts,
            priming,
        })
    }

    fn get_info(&mut self, chapter: u32) -> Result<StreamInfo> {
        let mut info = StreamInfo::new(&self.format);
        info.average_bit_rate = self.average_bit_rate;
        info.frames = self.total_frames;
        info.start_offset = self.encoder_delay;
        info.props
            .insert(UStr::intern(tags::CONTAINER), UStr::intern("ASF"));

        let mut tag_dict = Dictionary::new();
        let description = &self.content_description;
        for (key, value) in [
            (tags::TITLE, &description.title),
            (tags::ARTIST, &description.artist),
            (tags::COMMENT, &description.description),
            (tags::COPYRIGHT, &description.copyright),
            (tags::RATING, &description.rating),
        ] {
            if !value.is_empty() {
                tag_dict.insert(UStr::intern(key), value.clone());
            }
        }

        for attr in &self.attributes {
            if attr.stream_number != 0
                && attr.stream_number != u16::from(self.audio_stream_number)
            {
                continue;
            }
            if attr.name.is_empty() {
                continue;
            }
            if let Some(value) = attr.to_text() {
                if !value.is_empty() {
                    tag_dict.insert(to_media_key(&attr.name), value);
                }
            }
        }
        info.tags = tag_dict;

        if chapter != 0 {
            let index = (chapter - 1) as usize;
            let entry = self
                .markers
                .get(index)
                .ok_or_else(|| Error::out_of_bounds("marker number out of range"))?;

            let sample_rate = u64::from(self.format.sample_rate);
            info.start_offset =
                muldiv(entry.presentation_time, sample_rate, TICKS_PER_SECOND);
            info.frames = if chapter as usize == self.markers.len() {
                self.total_frames
            } else {
                muldiv(
                    self.markers[chapter as usize].presentation_time,
                    sample_rate,
                    TICKS_PER_SECOND,
                )
            };
            info.frames -= info.start_offset;

            if !entry.description.is_empty() {
                info.tags
                    .insert(UStr::intern(tags::TITLE), entry.description.clone());
            }
        }
        Ok(info)
    }

    fn get_image(&mut self, kind: ImageKind) -> Result<Option<Image>> {
        let wanted = match kind {
            ImageKind::FrontCover => 3u8,
            ImageKind::BackCover => 4,
            ImageKind::Other => 0,
        };

        for attr in &self.attributes {
            if attr.stream_number != 0
                && attr.stream_number != u16::from(self.audio_stream_number)
            {
                continue;
            }
            if attr.kind != ATTR_BYTES || !attr.name.eq_ignore_ascii_case("WM/Picture") {
                continue;
            }

            let mut r = ByteReader::new(&attr.data);
            let picture_type = r.get::<u8, LE>()?;
            let _picture_size = r.get::<u32, LE>()?;
            if picture_type != wanted {
                continue;
            }

            // Two null-terminated UTF-16 strings (MIME type, description)
            // precede the image bytes.
            let data = r.get_bytes(r.remaining())?;
            let mut cursor = 0usize;
            let take_string = |data: &[u8], cursor: &mut usize| -> UStr {
                let start = *cursor;
                let mut end = start;
                while end + 2 <= data.len() {
                    if data[end] == 0 && data[end + 1] == 0 {
                        break;
                    }
                    end += 2;
                }
                let s = load_utf16le_string(&data[start..end]);
                *cursor = (end + 2).min(data.len());
                s
            };

            let mime_type = take_string(data, &mut cursor);
            let _description = take_string(data, &mut cursor);

            if cursor < data.len() {
                return Ok(Some(Image {
                    mime_type,
                    data: data[cursor..].to_vec(),
                }));
            }
        }
        Ok(None)
    }

    fn chapter_count(&self) -> u32 {
        self.markers.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coded_sizes_follow_the_two_bit_type_codes() {
        // Length type flags 0x5d: packet length coded in 2 bytes, the
        // obsolete sequence field in 2, padding length in 4, with the
        // multiple-payloads bit set.
        let flags = 0x5du32;
        assert_eq!(coded_size(flags, 5), 2);
        assert_eq!(coded_size(flags, 1), 2);
        assert_eq!(coded_size(flags, 3), 4);
        assert_eq!(flags & 0x1, 1);

        // Property flags 0x5d: media object number in 1 byte, offset into
        // media object in 4, replicated data length in 1.
        assert_eq!(coded_size(flags, 4), 1);
        assert_eq!(coded_size(flags, 2), 4);
        assert_eq!(coded_size(flags, 0), 1);
    }

    #[test]
    fn coded_values_read_little_endian_in_their_width() {
        let mut r = ByteReader::new(&[0x34, 0x12, 0xff]);
        assert_eq!(read_coded(&mut r, 2).unwrap(), 0x1234);
        assert_eq!(read_coded(&mut r, 1).unwrap(), 0xff);
        assert_eq!(read_coded(&mut r, 0).unwrap(), 0);
    }

    #[test]
    fn descrambler_reinterleaves_spread_packets() {
        let mut d = Descrambler::default();
        // span=2, virtual packet length=4, virtual chunk length=2
        d.parse(&[2, 4, 0, 2, 0]);
        assert_eq!(d.span, 2);

        // Two interleaved virtual packets of two chunks each.
        let mut pkt = vec![
            b'A', b'1', // packet 0, chunk 0
            b'B', b'1', // packet 0, chunk 1
            b'A', b'2', // packet 1, chunk 0
            b'B', b'2', // packet 1, chunk 1
        ];
        d.apply(&mut pkt).unwrap();
        assert_eq!(pkt, vec![b'A', b'1', b'A', b'2', b'B', b'1', b'B', b'2']);
    }

    #[test]
    fn wm_keys_normalize() {
        assert_eq!(to_media_key("WM/AlbumTitle").as_str(), tags::ALBUM);
        assert_eq!(to_media_key("wm/albumartist").as_str(), tags::ALBUM_ARTIST);
        assert_eq!(to_media_key("title").as_str(), tags::TITLE);
    }

    #[test]
    fn utf16_values_stop_at_the_terminator() {
        let bytes = [b'W', 0, b'M', 0, b'A', 0, 0, 0, b'x', 0];
        assert_eq!(load_utf16le_string(&bytes).as_str(), "WMA");
    }
}
