//! RealMedia / RealAudio demultiplexing.
//!
//! Two header forms exist: the chunked `.RMF` container (PROP/MDPR/CONT/
//! DATA/INDX objects) and the bare `.ra\xfd` stream. Audio packets are
//! interleaved on disk; a per-codec deinterleaver (`Int0`, `Int4`, `genr`,
//! `sipr`, `vbrs`) reassembles decodable sub-packets, with SIPR applying a
//! fixed nibble-swap pass after reassembly.

use std::io::Read;

use byteorder::{ReadBytesExt, BE};

use encore_common::num::muldiv;
use encore_common::registry::Registry;
use encore_common::stream::StreamExt;
use encore_common::{Error, Result, Stream, UStr};

use crate::demuxer::{register_all, Demuxer, DemuxerFactory, OpenMode, SeekPos};
use crate::format::{channel, CodecFormat, CodecId};
use crate::info::StreamInfo;
use crate::tags;

pub(crate) fn register(registry: &mut Registry<&'static str, DemuxerFactory>) {
    register_all(registry, &["ra", "rm", "rma", "rmvb"], |s, m| {
        Ok(Box::new(RealDemuxer::new(s, m)?) as Box<dyn Demuxer>)
    });
}

const SIG_RMF: [u8; 4] = *b".RMF";
const SIG_RA: [u8; 4] = [b'.', b'r', b'a', 0xfd];

#[derive(Default, Clone)]
struct AudioSpecificData {
    version: u16,
    bytes_per_minute: u16,
    flavor: u16,
    coded_frame_size: u32,
    sub_packet_h: u16,
    frame_size: u16,
    sub_packet_size: u16,
    sample_rate: u16,
    sample_size: u16,
    channels: u16,
    deint_id: [u8; 4],
    codec_id: [u8; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SplitterKind {
    Int0,
    Int4,
    Genr,
    Sipr,
    Vbrs,
}

/// Reassembles decodable sub-packets from interleaved stream packets.
struct Splitter {
    kind: SplitterKind,
    sub_packets: Vec<Vec<u8>>,
    sub_packet_size: u32,
    frame_size: u32,
    width: u32,
    height: u32,
    sub_packet_pos: u32,
    sub_packet_row: u32,
    sub_packet_count: u32,
    sub_packet_ready: bool,
    dnet: bool,
}

impl Default for Splitter {
    fn default() -> Self {
        Splitter {
            kind: SplitterKind::Int0,
            sub_packets: vec![Vec::new(); 0xf],
            sub_packet_size: 0,
            frame_size: 0,
            width: 0,
            height: 0,
            sub_packet_pos: 0,
            sub_packet_row: 0,
            sub_packet_count: 0,
            sub_packet_ready: false,
            dnet: false,
        }
    }
}

impl Splitter {
    fn reset(&mut self, head: &AudioSpecificData) -> Result<()> {
        self.kind = match &head.deint_id {
            b"Int0" => SplitterKind::Int0,
            b"Int4" => SplitterKind::Int4,
            b"genr" => SplitterKind::Genr,
            b"sipr" => SplitterKind::Sipr,
            b"vbrs" | b"vbrf" => SplitterKind::Vbrs,
            _ => {
                return Err(Error::invalid_data_format(
                    "invalid RealAudio deinterleaver ID",
                ));
            }
        };

        match self.kind {
            SplitterKind::Vbrs => return Ok(()),
            SplitterKind::Int0 => {
                self.dnet = &head.codec_id == b"dnet";
                return Ok(());
            }
            SplitterKind::Int4 => {
                self.frame_size = u32::from(head.frame_size);
                self.sub_packet_size = head.coded_frame_size;
                self.width = u32::from(head.sub_packet_h) / 2;
            }
            SplitterKind::Genr => {
                self.sub_packet_size = u32::from(head.sub_packet_size);
                if self.sub_packet_size == 0 {
                    return Err(Error::invalid_data_format("zero RealAudio sub-packet size"));
                }
                self.width = u32::from(head.frame_size) / self.sub_packet_size;
            }
            SplitterKind::Sipr => {
                self.sub_packet_size = u32::from(head.frame_size);
                self.width = 1;
            }
        }

        self.height = u32::from(head.sub_packet_h);
        self.sub_packet_pos = self.width * self.height;
        self.sub_packets[0] =
            vec![0u8; (self.sub_packet_pos * self.sub_packet_size) as usize];
        Ok(())
    }

    fn flush(&mut self) {
        match self.kind {
            SplitterKind::Int0 => self.sub_packet_ready = false,
            SplitterKind::Int4 | SplitterKind::Genr | SplitterKind::Sipr => {
                self.sub_packet_pos = self.width * self.height;
                self.sub_packet_row = 0;
            }
            SplitterKind::Vbrs => {
                self.sub_packet_pos = 0;
                self.sub_packet_count = 0;
            }
        }
    }

    fn send(&mut self, file: &mut dyn Stream, size: u32) -> Result<()> {
        match self.kind {
            SplitterKind::Int0 => {
                let buf = &mut self.sub_packets[0];
                buf.resize(size as usize, 0);
                file.read_exact(buf)?;
                if self.dnet {
                    // DNET is byte-swapped AC-3.
                    for pair in buf.chunks_exact_mut(2) {
                        pair.swap(0, 1);
                    }
                }
                self.sub_packet_ready = true;
            }
            SplitterKind::Int4 | SplitterKind::Genr | SplitterKind::Sipr => {
                if size != self.sub_packet_size * self.width {
                    return Err(Error::failure(format!(
                        "expected packet size: {}, actual packet size: {}",
                        self.sub_packet_size * self.width,
                        size
                    )));
                }

                let h = self.height;
                let y = self.sub_packet_row;
                self.sub_packet_row += 1;
                let sps = self.sub_packet_size;

                for x in 0..self.width {
                    let index = match self.kind {
                        SplitterKind::Int4 => y + (x * 2 * self.frame_size / sps),
                        SplitterKind::Genr => h * x + ((h + 1) / 2) * (y & 1) + (y >> 1),
                        _ => y,
                    };
                    let start = (index * sps) as usize;
                    file.read_exact(&mut self.sub_packets[0][start..start + sps as usize])?;
                }

                if self.sub_packet_row == self.height {
                    self.sub_packet_row = 0;
                    self.sub_packet_pos = 0;
                    if self.kind == SplitterKind::Sipr {
                        self.reorder_sipr_sub_packets();
                    }
                }
            }
            SplitterKind::Vbrs => {
                let count = u32::from(file.read_u16::<BE>()? & 0xf0) >> 4;

                let mut sizes = [0u16; 0xf];
                for entry in sizes.iter_mut().take(count as usize) {
                    *entry = file.read_u16::<BE>()?;
                }

                let mut actual_size = (1 + count) * 2;
                for &entry in sizes.iter().take(count as usize) {
                    actual_size += u32::from(entry);
                }
                if size != actual_size {
                    return Err(Error::failure(format!(
                        "expected packet size={size}, actual packet size={actual_size}"
                    )));
                }

                for i in 0..count as usize {
                    let buf = &mut self.sub_packets[i];
                    buf.resize(usize::from(sizes[i]), 0);
                    file.read_exact(buf)?;
                }
                self.sub_packet_count = count;
                self.sub_packet_pos = 0;
            }
        }
        Ok(())
    }

    fn recv(&mut self, dest: &mut Vec<u8>) -> bool {
        match self.kind {
            SplitterKind::Int0 => {
                if self.sub_packet_ready {
                    std::mem::swap(&mut self.sub_packets[0], dest);
                    self.sub_packet_ready = false;
                    return true;
                }
                false
            }
            SplitterKind::Int4 | SplitterKind::Genr | SplitterKind::Sipr => {
                if self.sub_packet_pos < self.width * self.height {
                    let pos = self.sub_packet_pos as usize;
                    self.sub_packet_pos += 1;
                    let sps = self.sub_packet_size as usize;
                    dest.clear();
                    dest.extend_from_slice(&self.sub_packets[0][pos * sps..(pos + 1) * sps]);
                    return true;
                }
                false
            }
            SplitterKind::Vbrs => {
                if self.sub_packet_pos < self.sub_packet_count {
                    let pos = self.sub_packet_pos as usize;
                    self.sub_packet_pos += 1;
                    std::mem::swap(&mut self.sub_packets[pos], dest);
                    return true;
                }
                false
            }
        }
    }

    fn reorder_sipr_sub_packets(&mut self) {
        // Fixed nibble interleaving shared by every SIPR flavor.
        const SWAP_TABLE: [(u8, u8); 38] = [
            (0, 63),
            (1, 22),
            (2, 44),
            (3, 90),
            (5, 81),
            (7, 31),
            (8, 86),
            (9, 58),
            (10, 36),
            (12, 68),
            (13, 39),
            (14, 73),
            (15, 53),
            (16, 69),
            (17, 57),
            (19, 88),
            (20, 34),
            (21, 71),
            (24, 46),
            (25, 94),
            (26, 54),
            (28, 75),
            (29, 50),
            (32, 70),
            (33, 92),
            (35, 74),
            (38, 85),
            (40, 56),
            (42, 87),
            (43, 65),
            (45, 59),
            (48, 79),
            (49, 93),
            (51, 89),
            (55, 95),
            (61, 76),
            (67, 83),
            (77, 80),
        ];

        let sub_packets = &mut self.sub_packets[0];
        let nibbles_per_sub_packet = self.height * self.sub_packet_size * 2 / 96;

        for &(a, b) in &SWAP_TABLE {
            let mut i = nibbles_per_sub_packet * u32::from(a);
            let mut j = nibbles_per_sub_packet * u32::from(b);

            for _ in 0..nibbles_per_sub_packet {
                let odd0 = (i & 1) << 2;
                let odd1 = (j & 1) << 2;

                let byte0 = sub_packets[(i >> 1) as usize];
                let byte1 = sub_packets[(j >> 1) as usize];

                let nib0 = (byte0 >> odd0) & 0xf;
                let nib1 = (byte1 >> odd1) & 0xf;

                sub_packets[(i >> 1) as usize] =
                    (byte0 & (0xf0 >> odd0)) | (nib1 << odd0);
                let byte1 = sub_packets[(j >> 1) as usize];
                sub_packets[(j >> 1) as usize] =
                    (byte1 & (0xf0 >> odd1)) | (nib0 << odd1);

                i += 1;
                j += 1;
            }
        }
    }
}

#[derive(Default)]
struct Properties {
    packet_count: u32,
    duration: u32,
    index_offset: u32,
    data_offset: u32,
}

#[derive(Default)]
struct MediaProperties {
    stream_number: u16,
    average_bit_rate: u32,
    duration: u32,
}

#[derive(Default)]
struct ContentDescription {
    title: UStr,
    artist: UStr,
    copyright: UStr,
    comment: UStr,
}

impl ContentDescription {
    fn read(&mut self, file: &mut dyn Stream, wide: bool) -> Result<()> {
        self.title = Self::read_string(file, wide)?;
        self.artist = Self::read_string(file, wide)?;
        self.copyright = Self::read_string(file, wide)?;
        self.comment = Self::read_string(file, wide)?;
        Ok(())
    }

    fn read_string(file: &mut dyn Stream, wide: bool) -> Result<UStr> {
        let len = if wide {
            usize::from(file.read_u16::<BE>()?)
        } else {
            usize::from(file.read_u8()?)
        };
        if len == 0 {
            return Ok(UStr::empty());
        }

        let mut buf = file.read_vec(len)?;
        if let Some(end) = buf.iter().position(|&b| b == 0) {
            buf.truncate(end);
        }
        Ok(match std::str::from_utf8(&buf) {
            Ok(s) => UStr::new(s),
            Err(_) => UStr::from_encoding_lossy(
                &buf,
                encore_common::ustr::TextEncoding::Latin1,
            ),
        })
    }
}

#[derive(Clone, Copy)]
struct IndexRecord {
    pts: u32,
    offset: u32,
    number: u32,
}

#[derive(Default)]
struct DataHeader {
    packet_count: u32,
    beg_pos: u64,
    end_pos: u64,
}

struct PacketHeader {
    length: u16,
    stream_number: u16,
    pts: u32,
}

fn make_codec_format(head: &AudioSpecificData) -> Result<CodecFormat> {
    let mut fmt = CodecFormat {
        bits_per_sample: u32::from(head.sample_size),
        sample_rate: u32::from(head.sample_rate),
        channels: u32::from(head.channels),
        ..CodecFormat::default()
    };
    fmt.channel_layout = channel::guess(fmt.channels);

    match &head.codec_id {
        b"lpcJ" | b"14_4" => {
            fmt.codec_id = CodecId::Ra144;
            fmt.bytes_per_packet = u32::from(head.frame_size);
            fmt.bit_rate = 8000;
        }
        b"28_8" => {
            fmt.codec_id = CodecId::Ra288;
            fmt.bytes_per_packet = head.coded_frame_size;
            fmt.bit_rate = 15_200;
        }
        b"dnet" => {
            fmt.codec_id = CodecId::Ac3;
            fmt.frames_per_packet = 1536;
            fmt.bytes_per_packet = u32::from(head.frame_size);
            fmt.bit_rate = muldiv(
                u64::from(fmt.bytes_per_packet),
                u64::from(fmt.sample_rate) * 8,
                u64::from(fmt.frames_per_packet),
            ) as u32;
        }
        b"sipr" => {
            fmt.codec_id = CodecId::Sipr;
            let (bytes, rate) = match head.flavor {
                0 => (29, 6500),
                1 => (19, 8500),
                2 => (37, 5000),
                3 => (20, 16_000),
                other => {
                    return Err(Error::invalid_data_format(format!(
                        "invalid SIPR flavor={other}"
                    )));
                }
            };
            fmt.bytes_per_packet = bytes;
            fmt.bit_rate = rate;
        }
        b"cook" => {
            fmt.codec_id = CodecId::Cook;
            fmt.bytes_per_packet = u32::from(head.sub_packet_size);
        }
        b"atrc" => {
            fmt.codec_id = CodecId::Atrac3;
            fmt.bytes_per_packet = u32::from(head.sub_packet_size);
        }
        b"raac" => {
            fmt.codec_id = CodecId::AacLc;
            fmt.frames_per_packet = 1024;
        }
        b"racp" => {
            fmt.codec_id = CodecId::HeAacV1;
            fmt.frames_per_packet = 2048;
        }
        other => {
            return Err(Error::unsupported_format(format!(
                "unrecognized RealAudio codec ID: {:?}",
                String::from_utf8_lossy(other)
            )));
        }
    }
    Ok(fmt)
}

fn read_common_audio_specific_data(
    file: &mut dyn Stream,
    size: u32,
    head: &mut AudioSpecificData,
    cont: Option<&mut ContentDescription>,
) -> Result<()> {
    head.version = file.read_u16::<BE>()?;
    let min_size = match head.version {
        3 => 16,
        4 => 63,
        5 => 68,
        _ => {
            return Err(Error::invalid_data_format(
                "invalid RealAudio codec-specific data version",
            ));
        }
    };
    if size < min_size {
        return Err(Error::invalid_data_format(
            "invalid RealAudio codec-specific data size",
        ));
    }

    match head.version {
        3 => {
            let header_size = file.read_u16::<BE>()?;
            file.skip(8)?;
            head.bytes_per_minute = file.read_u16::<BE>()?;
            let _data_size = file.read_u32::<BE>()?;
            if let Some(cont) = cont {
                cont.read(file, false)?;
                file.goto(u64::from(header_size) + 8)?;
            }

            head.flavor = 0;
            head.coded_frame_size = 0;
            head.sub_packet_h = 1;
            head.frame_size = 20;
            head.sub_packet_size = 0;
            head.sample_rate = 8000;
            head.sample_size = 0;
            head.channels = 1;
            head.codec_id = *b"lpcJ";
            head.deint_id = *b"Int0";
        }
        4 => {
            file.skip(6)?;
            let _data_size = file.read_u32::<BE>()?;
            file.skip(6)?;
            head.flavor = file.read_u16::<BE>()?;
            head.coded_frame_size = file.read_u32::<BE>()?;
            file.skip(12)?;
            head.sub_packet_h = file.read_u16::<BE>()?;
            head.frame_size = file.read_u16::<BE>()?;
            head.sub_packet_size = file.read_u16::<BE>()?;
            file.skip(2)?;
            head.sample_rate = file.read_u16::<BE>()?;
            file.skip(2)?;
            head.sample_size = file.read_u16::<BE>()?;
            head.channels = file.read_u16::<BE>()?;
            file.skip(1)?; // interleaver id length
            head.deint_id = file.read_fourcc()?;
            file.skip(1)?; // codec id length
            head.codec_id = file.read_fourcc()?;
            file.skip(3)?;
        }
        _ => {
            file.skip(6)?;
            let _data_size = file.read_u32::<BE>()?;
            file.skip(6)?;
            head.flavor = file.read_u16::<BE>()?;
            head.coded_frame_size = file.read_u32::<BE>()?;
            file.skip(12)?;
            head.sub_packet_h = file.read_u16::<BE>()?;
            head.frame_size = file.read_u16::<BE>()?;
            head.sub_packet_size = file.read_u16::<BE>()?;
            file.skip(8)?;
            head.sample_rate = file.read_u16::<BE>()?;
            file.skip(2)?;
            head.sample_size = file.read_u16::<BE>()?;
            head.channels = file.read_u16::<BE>()?;
            head.deint_id = file.read_fourcc()?;
            head.codec_id = file.read_fourcc()?;
            file.skip(4)?;
        }
    }
    Ok(())
}

fn read_audio_specific_data(
    file: &mut dyn Stream,
    size: u32,
    head: &mut AudioSpecificData,
) -> Result<CodecFormat> {
    read_common_audio_specific_data(file, size, head, None)?;

    let mut extra_size = 0u32;
    match &head.codec_id {
        b"raac" | b"racp" => {
            extra_size = file.read_u32::<BE>()?;
            if extra_size != 0 {
                extra_size -= 1;
                file.skip(1)?;
            }
        }
        b"atrc" | b"cook" | b"sipr" => {
            extra_size = file.read_u32::<BE>()?;
        }
        _ => {}
    }

    let mut fmt = make_codec_format(head)?;
    if extra_size != 0 {
        fmt.extra = file.read_vec(extra_size as usize)?;
    }
    Ok(fmt)
}

fn read_lossless_audio_specific_data(file: &mut dyn Stream, size: u32) -> Result<CodecFormat> {
    let mut fmt = CodecFormat::default();

    fmt.extra = vec![0u8; size as usize + 4];
    fmt.extra[..4].copy_from_slice(b"LSD:");
    file.read_exact(&mut fmt.extra[4..])?;

    if fmt.extra.len() < 16 {
        return Err(Error::invalid_data_format(
            "RealAudio lossless header is too small",
        ));
    }
    fmt.codec_id = CodecId::RaLossless;
    fmt.channels = u32::from(u16::from_be_bytes([fmt.extra[8], fmt.extra[9]]));
    fmt.sample_rate =
        u32::from_be_bytes([fmt.extra[12], fmt.extra[13], fmt.extra[14], fmt.extra[15]]);
    fmt.channel_layout = channel::guess(fmt.channels);
    Ok(fmt)
}

pub struct RealDemuxer {
    file: Box<dyn Stream>,
    format: CodecFormat,
    head: AudioSpecificData,
    mdpr: MediaProperties,
    deint: Splitter,
    index: Vec<IndexRecord>,
    prop: Properties,
    data: DataHeader,
    cont: ContentDescription,
    total_frames: u64,
    average_bit_rate: u32,
    packet_number: u32,
    is_rmff: bool,
}

impl RealDemuxer {
    pub fn new(file: Box<dyn Stream>, mode: OpenMode) -> Result<Self> {
        let mut demuxer = RealDemuxer {
            file,
            format: CodecFormat::default(),
            head: AudioSpecificData::default(),
            mdpr: MediaProperties::default(),
            deint: Splitter::default(),
            index: Vec::new(),
            prop: Properties::default(),
            data: DataHeader::default(),
            cont: ContentDescription::default(),
            total_frames: 0,
            average_bit_rate: 0,
            packet_number: 0,
            is_rmff: false,
        };

        if !mode.contains(OpenMode::PLAYBACK | OpenMode::METADATA) {
            return Ok(demuxer);
        }

        let signature = demuxer.file.read_fourcc()?;
        demuxer.is_rmff = signature == SIG_RMF;

        if demuxer.is_rmff {
            demuxer.read_header()?;
            demuxer.average_bit_rate = demuxer.mdpr.average_bit_rate;
        } else if signature == SIG_RA {
            demuxer.read_header_old()?;
            demuxer.average_bit_rate = if demuxer.head.version == 3 {
                u32::from(demuxer.head.bytes_per_minute) * 8 / 60
            } else {
                demuxer.format.bit_rate
            };
        } else {
            return Err(Error::invalid_data_format(
                "no RealAudio or RealMedia file signature",
            ));
        }

        if mode.contains(OpenMode::PLAYBACK) {
            demuxer.file.goto(demuxer.data.beg_pos)?;
        }
        Ok(demuxer)
    }

    fn read_header(&mut self) -> Result<()> {
        // .RMF file header: object size selects the version field width.
        let object_size = self.file.read_u32::<BE>()?;
        let _object_version = self.file.read_u16::<BE>()?;
        match object_size {
            16 => {
                let _file_version = self.file.read_u16::<BE>()?;
            }
            18 => {
                let _file_version = self.file.read_u32::<BE>()?;
            }
            _ => {
                return Err(Error::invalid_data_format(
                    "invalid RealMedia file header size",
                ));
            }
        }
        let mut header_count = self.file.read_u32::<BE>()?;

        let file_length = self.file.size()?;
        let mut file_offset = self.file.tell()?;
        let mut cont_found = false;
        let mut data_found = false;
        let mut prop_found = false;
        let mut stream_selected = false;

        while header_count > 0 {
            header_count -= 1;

            let remain = file_length - file_offset;
            if remain < 10 {
                break;
            }

            let object_type = self.file.read_fourcc()?;
            let mut object_size = u64::from(self.file.read_u32::<BE>()?);
            let _object_version = self.file.read_u16::<BE>()?;

            if object_size > remain {
                object_size = remain;
                header_count = 0;
            } else if object_size < 10 {
                if &object_type == b"DATA" {
                    object_size = remain;
                } else {
                    return Err(Error::invalid_data_format(
                        "RealMedia object is too small",
                    ));
                }
            }

            match &object_type {
                b"CONT" => {
                    if cont_found {
                        return Err(Error::invalid_data_format(
                            "multiple RealMedia 'CONT' objects",
                        ));
                    }
                    self.cont.read(&mut *self.file, true)?;
                    cont_found = true;
                }
                b"PROP" => {
                    if prop_found {
                        return Err(Error::invalid_data_format(
                            "multiple RealMedia 'PROP' objects",
                        ));
                    }
                    let _max_bit_rate = self.file.read_u32::<BE>()?;
                    let _avg_bit_rate = self.file.read_u32::<BE>()?;
                    let _max_packet_size = self.file.read_u32::<BE>()?;
                    let _avg_packet_size = self.file.read_u32::<BE>()?;
                    self.prop.packet_count = self.file.read_u32::<BE>()?;
                    self.prop.duration = self.file.read_u32::<BE>()?;
                    let _preroll = self.file.read_u32::<BE>()?;
                    self.prop.index_offset = self.file.read_u32::<BE>()?;
                    self.prop.data_offset = self.file.read_u32::<BE>()?;
                    let _stream_count = self.file.read_u16::<BE>()?;
                    let _flags = self.file.read_u16::<BE>()?;
                    prop_found = true;
                }
                b"DATA" => {
                    self.data.packet_count = self.file.read_u32::<BE>()?;
                    let _next_offset = self.file.read_u32::<BE>()?;
                    self.data.beg_pos = self.file.tell()?;
                    self.data.end_pos = self.data.beg_pos + (object_size - 10);
                    data_found = true;
                }
                b"MDPR" if !stream_selected => {
                    if self.read_media_properties()? {
                        self.total_frames = muldiv(
                            u64::from(self.mdpr.duration),
                            u64::from(self.format.sample_rate),
                            1000,
                        );
                        stream_selected = true;
                    }
                }
                b"INDX" if stream_selected => {
                    let record_count = self.file.read_u32::<BE>()?;
                    let stream_number = self.file.read_u16::<BE>()?;
                    let _next_offset = self.file.read_u32::<BE>()?;
                    if stream_number == self.mdpr.stream_number {
                        self.index = self.read_index_records(record_count)?;
                    }
                }
                _ => {}
            }

            file_offset += object_size;
            self.file.goto(file_offset)?;
        }

        if !data_found || !prop_found {
            return Err(Error::invalid_data_format(format!(
                "required RealMedia object {:?} not present",
                if data_found { "PROP" } else { "DATA" }
            )));
        }
        if !stream_selected {
            return Err(Error::failure("no audio stream(s) in RealMedia file"));
        }
        Ok(())
    }

    fn read_media_properties(&mut self) -> Result<bool> {
        self.mdpr.stream_number = self.file.read_u16::<BE>()?;
        let _max_bit_rate = self.file.read_u32::<BE>()?;
        self.mdpr.average_bit_rate = self.file.read_u32::<BE>()?;
        let _max_packet_size = self.file.read_u32::<BE>()?;
        let _avg_packet_size = self.file.read_u32::<BE>()?;
        let _start_time = self.file.read_u32::<BE>()?;
        let _preroll = self.file.read_u32::<BE>()?;
        self.mdpr.duration = self.file.read_u32::<BE>()?;

        let name_len = self.file.read_u8()?;
        self.file.skip(u64::from(name_len))?;
        let mime_len = self.file.read_u8()?;
        self.file.skip(u64::from(mime_len))?;

        let size = self.file.read_u32::<BE>()?;
        let kind = self.file.read_fourcc()?;

        if kind == SIG_RA {
            match read_audio_specific_data(&mut *self.file, size, &mut self.head) {
                Ok(fmt) => {
                    self.format = fmt;
                    self.deint.reset(&self.head)?;
                    return Ok(true);
                }
                Err(e) => {
                    log::debug!("skipping RealMedia stream: {e}");
                    return Ok(false);
                }
            }
        }
        if &kind == b"LSD:" {
            self.format = read_lossless_audio_specific_data(&mut *self.file, size)?;
            self.head.sub_packet_h = 1;
            self.head.deint_id = *b"Int0";
            self.deint.reset(&self.head)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn read_index_records(&mut self, record_count: u32) -> Result<Vec<IndexRecord>> {
        let mut index = Vec::with_capacity(record_count as usize);
        let mut last_pts = -1i64;

        for i in 0..record_count {
            self.file.skip(2)?;
            let record = IndexRecord {
                pts: self.file.read_u32::<BE>()?,
                offset: self.file.read_u32::<BE>()?,
                number: self.file.read_u32::<BE>()?,
            };
            if i64::from(record.pts) < last_pts {
                return Err(Error::invalid_data_format(format!(
                    "RealMedia: index records are not sorted \
                     (record={i} PTS={} lastPTS={last_pts})",
                    record.pts
                )));
            }
            last_pts = i64::from(record.pts);
            index.push(record);
        }
        Ok(index)
    }

    fn read_header_old(&mut self) -> Result<()> {
        read_common_audio_specific_data(
            &mut *self.file,
            u32::MAX,
            &mut self.head,
            Some(&mut self.cont),
        )?;
        if self.head.version == 4 || self.head.version == 5 {
            self.cont.read(&mut *self.file, false)?;
        }
        self.format = make_codec_format(&self.head)?;
        self.deint.reset(&self.head)?;

        self.data.beg_pos = self.file.tell()?;
        self.data.end_pos = self.file.size()?;

        if self.format.bit_rate != 0 {
            self.total_frames = muldiv(
                self.data.end_pos - self.data.beg_pos,
                u64::from(self.format.sample_rate) * 8,
                u64::from(self.format.bit_rate),
            );
        }
        Ok(())
    }

    fn parse_packet_header(&mut self) -> Result<Option<PacketHeader>> {
        if self.packet_number >= self.data.packet_count {
            return Ok(None);
        }
        if self.file.tell()? + 13 >= self.data.end_pos {
            return Ok(None);
        }

        let version = self.file.read_u16::<BE>()?;
        let mut head = PacketHeader {
            length: self.file.read_u16::<BE>()?,
            stream_number: self.file.read_u16::<BE>()?,
            pts: self.file.read_u32::<BE>()?,
        };

        let mut overhead = 12u16;
        if version == 0 {
            let _flags = self.file.read_u16::<BE>()?;
        } else {
            overhead += 1;
            let _asm_rule = self.file.read_u16::<BE>()?;
            let _asm_flags = self.file.read_u8()?;
        }

        if head.length < overhead {
            return Err(Error::out_of_bounds(format!(
                "packet length ({}) is less than its header length ({overhead})",
                head.length
            )));
        }

        head.length -= overhead;
        self.packet_number += 1;
        Ok(Some(head))
    }

    fn get_packet_size(&mut self) -> Result<u32> {
        if self.is_rmff {
            while let Some(head) = self.parse_packet_header()? {
                if head.stream_number == self.mdpr.stream_number {
                    return Ok(u32::from(head.length));
                }
                self.file.skip(u64::from(head.length))?;
            }
            Ok(0)
        } else {
            let frame_size = u64::from(self.head.frame_size);
            if self.file.tell()? + frame_size <= self.data.end_pos {
                Ok(frame_size as u32)
            } else {
                Ok(0)
            }
        }
    }

    fn build_seek_index(&mut self) -> Result<()> {
        self.file.goto(self.data.beg_pos)?;
        self.packet_number = 0;

        let sub_packet_h = u32::from(self.head.sub_packet_h).max(1);
        let mut sub_packet_number = 0u32;
        let mut file_offset = self.file.tell()?;

        while let Some(head) = self.parse_packet_header()? {
            if head.stream_number == self.mdpr.stream_number {
                if sub_packet_number % sub_packet_h == 0 {
                    self.index.push(IndexRecord {
                        pts: head.pts,
                        offset: file_offset as u32,
                        number: self.packet_number,
                    });
                }
                sub_packet_number += 1;
            }
            self.file.skip(u64::from(head.length))?;
            file_offset = self.file.tell()?;
        }

        if self.index.is_empty() {
            return Err(Error::failure("RealMedia stream contains no seek index"));
        }
        Ok(())
    }
}

impl Demuxer for RealDemuxer {
    fn format(&self) -> &CodecFormat {
        &self.format
    }

    fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn average_bit_rate(&self) -> u32 {
        self.average_bit_rate
    }

    fn instant_bit_rate(&self) -> u32 {
        self.average_bit_rate
    }

    fn feed(&mut self, dest: &mut Vec<u8>) -> Result<bool> {
        while !self.deint.recv(dest) {
            let size = self.get_packet_size()?;
            if size == 0 {
                return Ok(false);
            }
            self.deint.send(&mut *self.file, size)?;
        }
        Ok(true)
    }

    fn seek(&mut self, pts: u64) -> Result<SeekPos> {
        let mut priming = 0u64;
        let seekpos;

        if self.is_rmff {
            if self.index.is_empty() {
                self.build_seek_index()?;
            }

            let target_ms = muldiv(pts, 1000, u64::from(self.format.sample_rate));
            let partition = self
                .index
                .partition_point(|record| u64::from(record.pts) < target_ms);
            let record = if partition > 0 {
                self.index.get(partition - 1)
            } else {
                self.index.first()
            };

            match record {
                Some(record) => {
                    priming = pts.saturating_sub(muldiv(
                        u64::from(record.pts),
                        u64::from(self.format.sample_rate),
                        1000,
                    ));
                    seekpos = u64::from(record.offset);
                    self.packet_number = record.number;
                }
                None => {
                    seekpos = self.data.end_pos;
                    self.packet_number = self.data.packet_count;
                }
            }
        } else {
            let frames_per_packet = u64::from(self.format.sample_rate)
                * 8
                * u64::from(self.head.frame_size)
                / u64::from(self.format.bit_rate.max(1));

            let mut nearest = pts / frames_per_packet.max(1);
            nearest -= nearest % u64::from(self.head.sub_packet_h.max(1));
            priming = pts - nearest * frames_per_packet;
            seekpos = self.data.beg_pos + nearest * u64::from(self.head.frame_size);
        }

        self.deint.flush();
        self.file.goto(seekpos.min(self.data.end_pos))?;
        Ok(SeekPos {
            target: pts,
            priming,
        })
    }

    fn get_info(&mut self, _chapter: u32) -> Result<StreamInfo> {
        let mut info = StreamInfo::new(&self.format);
        info.frames = self.total_frames;
        info.average_bit_rate = self.average_bit_rate;

        for (key, value) in [
            (tags::TITLE, &self.cont.title),
            (tags::ARTIST, &self.cont.artist),
            (tags::COPYRIGHT, &self.cont.copyright),
            (tags::COMMENT, &self.cont.comment),
        ] {
            if !value.is_empty() {
                info.tags.insert(UStr::intern(key), value.clone());
            }
        }
        info.props.insert(
            UStr::intern(tags::CONTAINER),
            UStr::intern(if self.is_rmff { "RealMedia" } else { "RealAudio" }),
        );
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genr_head(frame_size: u16, sub_packet_size: u16, sub_packet_h: u16) -> AudioSpecificData {
        AudioSpecificData {
            deint_id: *b"genr",
            codec_id: *b"cook",
            frame_size,
            sub_packet_size,
            sub_packet_h,
            ..AudioSpecificData::default()
        }
    }

    #[test]
    fn genr_deinterleaves_rows_into_sub_packets() {
        use encore_common::MemoryStream;

        // width=2, height=2: four sub-packets of two bytes each.
        let mut splitter = Splitter::default();
        splitter.reset(&genr_head(4, 2, 2)).unwrap();

        // Row 0 carries sub-packets (0, 2); row 1 carries (1, 3).
        let mut row0 = MemoryStream::new(vec![b'a', b'a', b'c', b'c']);
        let mut row1 = MemoryStream::new(vec![b'b', b'b', b'd', b'd']);
        splitter.send(&mut row0, 4).unwrap();
        assert!(!{
            let mut dest = Vec::new();
            splitter.recv(&mut dest)
        });
        splitter.send(&mut row1, 4).unwrap();

        let mut out = Vec::new();
        let mut received = Vec::new();
        while splitter.recv(&mut received) {
            out.extend_from_slice(&received);
        }
        assert_eq!(out, b"aabbccdd");
    }

    #[test]
    fn int0_passes_packets_through() {
        use encore_common::MemoryStream;

        let head = AudioSpecificData {
            deint_id: *b"Int0",
            codec_id: *b"raac",
            ..AudioSpecificData::default()
        };
        let mut splitter = Splitter::default();
        splitter.reset(&head).unwrap();

        let mut file = MemoryStream::new(vec![1, 2, 3, 4]);
        splitter.send(&mut file, 4).unwrap();

        let mut dest = Vec::new();
        assert!(splitter.recv(&mut dest));
        assert_eq!(dest, vec![1, 2, 3, 4]);
        assert!(!splitter.recv(&mut dest));
    }

    #[test]
    fn dnet_packets_are_byte_swapped() {
        use encore_common::MemoryStream;

        let head = AudioSpecificData {
            deint_id: *b"Int0",
            codec_id: *b"dnet",
            ..AudioSpecificData::default()
        };
        let mut splitter = Splitter::default();
        splitter.reset(&head).unwrap();

        let mut file = MemoryStream::new(vec![0x0b, 0x77, 0x12, 0x34]);
        splitter.send(&mut file, 4).unwrap();

        let mut dest = Vec::new();
        assert!(splitter.recv(&mut dest));
        assert_eq!(dest, vec![0x77, 0x0b, 0x34, 0x12]);
    }

    #[test]
    fn sipr_flavors_fix_the_packet_size() {
        let mut head = AudioSpecificData {
            codec_id: *b"sipr",
            deint_id: *b"sipr",
            sample_rate: 16_000,
            channels: 1,
            flavor: 3,
            ..AudioSpecificData::default()
        };
        let fmt = make_codec_format(&head).unwrap();
        assert_eq!(fmt.codec_id, CodecId::Sipr);
        assert_eq!(fmt.bytes_per_packet, 20);
        assert_eq!(fmt.bit_rate, 16_000);

        head.flavor = 9;
        assert!(make_codec_format(&head).is_err());
    }

    #[test]
    fn unknown_deinterleaver_ids_are_rejected() {
        let head = AudioSpecificData {
            deint_id: *b"beep",
            ..AudioSpecificData::default()
        };
        assert!(Splitter::default().reset(&head).is_err());
    }
}
