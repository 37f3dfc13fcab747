//! WAVE, RF64 and Wave64 demultiplexing.
//!
//! All three containers share the WAVEFORMATEX(TENSIBLE) stream description
//! and a constant packet size; they differ only in chunk framing (32-bit
//! RIFF chunks, the `ds64` 64-bit size extension, or GUID-tagged Wave64
//! chunks).

use std::io::Read;

use byteorder::{ReadBytesExt, LE};

use encore_common::io::ByteReader;
use encore_common::registry::Registry;
use encore_common::stream::StreamExt;
use encore_common::{Error, Result, Stream, UStr};

use crate::demuxer::{register_all, Demuxer, DemuxerFactory, OpenMode, SeekPos};
use crate::dict::Dictionary;
use crate::format::{channel, pcm, CodecFormat, CodecId};
use crate::info::StreamInfo;
use crate::tags;

pub(crate) fn register(registry: &mut Registry<&'static str, DemuxerFactory>) {
    register_all(registry, &["rf64", "w64", "wav"], |s, m| {
        Ok(Box::new(WaveDemuxer::new(s, m)?) as Box<dyn Demuxer>)
    });
}

// Wave64 chunk ids: a FOURCC in the first four bytes plus a fixed suffix.
const GUID_RIFF: [u8; 16] = *b"riff\x2e\x91\xcf\x11\xa5\xd6\x28\xdb\x04\xc1\x00\x00";
const GUID_WAVE: [u8; 16] = *b"wave\xf3\xac\xd3\x11\x8c\xd1\x00\xc0\x4f\x8e\xdb\x8a";
const GUID_FMT: [u8; 16] = *b"fmt \xf3\xac\xd3\x11\x8c\xd1\x00\xc0\x4f\x8e\xdb\x8a";
const GUID_DATA: [u8; 16] = *b"data\xf3\xac\xd3\x11\x8c\xd1\x00\xc0\x4f\x8e\xdb\x8a";

// WAVEFORMATEXTENSIBLE sub-format GUIDs.
const SUBTYPE_BASE_TAIL: [u8; 12] = [
    0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xaa, 0x00, 0x38, 0x9b, 0x71,
];
const SUBTYPE_EAC3: [u8; 16] = [
    0xaf, 0x87, 0xfb, 0xa7, 0x02, 0x2d, 0xfb, 0x42, 0xa4, 0xd4, 0x05, 0xcd, 0x93, 0x84, 0x3b, 0xdd,
];
const SUBTYPE_MPEG_LAYER1: [u8; 16] = [
    0x2b, 0x80, 0x6d, 0xe0, 0x46, 0xdb, 0xcf, 0x11, 0xb4, 0xd1, 0x00, 0x80, 0x5f, 0x6c, 0xbb, 0xea,
];
const SUBTYPE_AC3: [u8; 16] = [
    0x2c, 0x80, 0x6d, 0xe0, 0x46, 0xdb, 0xcf, 0x11, 0xb4, 0xd1, 0x00, 0x80, 0x5f, 0x6c, 0xbb, 0xea,
];
const SUBTYPE_ATRAC3_PLUS: [u8; 16] = [
    0xbf, 0xaa, 0x23, 0xe9, 0x58, 0xcb, 0x71, 0x44, 0xa1, 0x19, 0xff, 0xfa, 0x01, 0xe4, 0xce, 0x62,
];

fn codec_for_format_tag(tag: u16) -> Option<CodecId> {
    Some(match tag {
        0x0001 | 0x0003 => CodecId::Lpcm,
        0x0002 => CodecId::AdpcmMs,
        0x0006 => CodecId::Alaw,
        0x0007 => CodecId::Ulaw,
        0x0008 | 0x2001 => CodecId::Dts,
        0x000a | 0x000b => CodecId::WmaVoice,
        0x0010 | 0x0017 => CodecId::AdpcmImaOki,
        0x0011 | 0x0069 => CodecId::AdpcmImaMs,
        0x0020 => CodecId::AdpcmYamaha,
        0x0022 | 0x1501 => CodecId::TrueSpeech,
        0x0031 | 0x0032 | 0x1500 => CodecId::GsmMs,
        0x0038 | 0x0057 | 0x7361 => CodecId::AmrNb,
        0x0040 | 0x0045 | 0x0064 => CodecId::AdpcmG726,
        0x0042 | 0x0111 | 0xa100 => CodecId::G723_1,
        0x0050 => CodecId::MpegLayer2,
        0x0055 => CodecId::MpegLayer3,
        0x0058 | 0x7362 => CodecId::AmrWb,
        0x0061 => CodecId::AdpcmImaDk4,
        0x0062 => CodecId::AdpcmImaDk3,
        0x0065 | 0x028f => CodecId::AdpcmG722,
        0x00ff | 0x706d | 0xa106 => CodecId::AacLc,
        0x0130 => CodecId::Sipr,
        0x0160 => CodecId::WmaV1,
        0x0161 => CodecId::WmaV2,
        0x0162 => CodecId::WmaPro,
        0x0163 => CodecId::WmaLossless,
        0x0200 => CodecId::AdpcmCreative,
        0x0270 => CodecId::Atrac3,
        0x0401 => CodecId::IntelMusicCoder,
        0x0402 => CodecId::IndeoAudio,
        0x2000 => CodecId::Ac3,
        0x5346 => CodecId::AdpcmSwf,
        0x594a => CodecId::DpcmXan,
        0x6c75 => CodecId::Ulaw,
        0x7363 => CodecId::AmrWbPlus,
        0xa109 => CodecId::Speex,
        0xf1ac => CodecId::Flac,
        _ => return None,
    })
}

fn info_key_for(fourcc: &[u8; 4]) -> Option<&'static str> {
    Some(match fourcc {
        b"IART" => tags::ARTIST,
        b"ICMT" => tags::COMMENT,
        b"ICOP" => tags::COPYRIGHT,
        b"ICRD" => tags::DATE,
        b"IENC" => tags::ENCODED_BY,
        b"IFRM" => tags::DISC_NUMBER,
        b"IGNR" => tags::GENRE,
        b"INAM" => tags::TITLE,
        b"IPRD" => tags::ALBUM,
        b"IPRT" | b"ITRK" | b"TRCK" | b"itrk" => tags::TRACK_NUMBER,
        b"ISBJ" => tags::ALBUM_ARTIST,
        b"ISFT" => tags::ENCODER,
        b"ISRF" => tags::GROUP,
        _ => return None,
    })
}

struct WaveFormatEx {
    format_tag: u16,
    channels: u16,
    sample_rate: u32,
    byte_rate: u32,
    block_align: u16,
    bits_per_sample: u16,
    valid_bits_per_sample: u16,
    channel_mask: u32,
    sub_format: [u8; 16],
}

fn codec_id_and_flags(wfx: &WaveFormatEx, out: &mut CodecFormat) -> Result<()> {
    let mut format_tag = wfx.format_tag;
    if format_tag == 0xfffe && wfx.sub_format[4..16] == SUBTYPE_BASE_TAIL {
        format_tag = u16::from_le_bytes([wfx.sub_format[0], wfx.sub_format[1]]);
    }

    if format_tag == 0xfffe {
        out.codec_id = if wfx.sub_format == SUBTYPE_EAC3 {
            CodecId::Eac3
        } else if wfx.sub_format == SUBTYPE_MPEG_LAYER1 {
            CodecId::MpegLayer1
        } else if wfx.sub_format == SUBTYPE_AC3 {
            CodecId::Ac3
        } else if wfx.sub_format == SUBTYPE_ATRAC3_PLUS {
            CodecId::Atrac3Plus
        } else {
            return Err(Error::unsupported_format("unrecognized WAVE format GUID"));
        };
    } else {
        out.codec_id = codec_for_format_tag(format_tag).ok_or_else(|| {
            Error::unsupported_format(format!(
                "unrecognized WAVE format tag: {format_tag:#06x}"
            ))
        })?;
    }

    out.flags = 0;
    if format_tag == 0x1 {
        if wfx.bits_per_sample != 8 {
            out.flags |= pcm::SIGNED_INT;
        }
    } else if format_tag == 0x3 {
        out.flags |= pcm::IEEE_FLOAT;
    }
    Ok(())
}

fn frames_per_packet(codec_id: CodecId, wfx: &WaveFormatEx) -> u32 {
    let block_align = u32::from(wfx.block_align);
    let channels = u32::from(wfx.channels);
    let bits = u32::from(wfx.bits_per_sample);

    match codec_id {
        CodecId::Lpcm | CodecId::Alaw | CodecId::Ulaw => return 1,
        CodecId::GsmMs => return 320,
        CodecId::Atrac3 => return 1024,
        CodecId::Atrac3Plus => return 2048,
        CodecId::TrueSpeech => return 240 * (block_align / 32),
        CodecId::G723_1 => return 240 * (block_align / 24),
        CodecId::AdpcmG722 | CodecId::AdpcmG726 => {
            if bits != 0 {
                return block_align * 8 / bits;
            }
        }
        CodecId::IndeoAudio | CodecId::IntelMusicCoder => {
            if channels != 0 {
                return 4 * block_align / channels;
            }
        }
        CodecId::AdpcmMs => {
            if channels != 0 {
                return 2 + (block_align - 7 * channels) * 2 / channels;
            }
        }
        CodecId::AdpcmImaMs => {
            if bits != 0 && channels != 0 {
                return 1 + (block_align - 4 * channels) / (bits * channels) * 8;
            }
        }
        CodecId::AdpcmImaDk3 => {
            if channels != 0 {
                return ((block_align - 16) * 2 / 3 * 4) / channels;
            }
        }
        CodecId::AdpcmImaDk4 => {
            if channels != 0 {
                return 1 + (block_align - 4 * channels) * 2 / channels;
            }
        }
        CodecId::WmaV1 | CodecId::WmaV2 => {
            if wfx.byte_rate != 0 {
                return block_align * wfx.sample_rate / wfx.byte_rate;
            }
        }
        _ => {}
    }

    if bits > 0 && block_align > 0 && channels > 0 {
        (block_align * 8) / (bits * channels)
    } else {
        0
    }
}

/// Parses a `fmt ` chunk body into a codec format.
pub fn parse_format(body: &[u8]) -> Result<CodecFormat> {
    let mut r = ByteReader::new(body);

    let mut wfx = WaveFormatEx {
        format_tag: r.get::<u16, LE>()?,
        channels: r.get::<u16, LE>()?,
        sample_rate: r.get::<u32, LE>()?,
        byte_rate: r.get::<u32, LE>()?,
        block_align: r.get::<u16, LE>()?,
        bits_per_sample: 8,
        valid_bits_per_sample: 0,
        channel_mask: 0,
        sub_format: [0; 16],
    };

    wfx.bits_per_sample = r.get::<u16, LE>().unwrap_or(8);
    let mut extra_size = usize::from(r.get::<u16, LE>().unwrap_or(0));
    extra_size = extra_size.min(r.remaining());

    if extra_size >= 22 && wfx.format_tag == 0xfffe {
        extra_size -= 22;
        wfx.valid_bits_per_sample = r.get::<u16, LE>()?;
        wfx.channel_mask = r.get::<u32, LE>()?;
        wfx.sub_format.copy_from_slice(r.get_bytes(16)?);
    }

    if wfx.sample_rate == 0 {
        return Err(Error::unsupported_format("cannot have a sample rate of zero"));
    }
    if wfx.channels == 0 {
        return Err(Error::unsupported_format("cannot have zero channels"));
    }

    let mut fmt = CodecFormat::default();
    if extra_size != 0 {
        fmt.extra = r.get_bytes(extra_size)?.to_vec();
    }
    codec_id_and_flags(&wfx, &mut fmt)?;

    fmt.frames_per_packet = frames_per_packet(fmt.codec_id, &wfx);
    fmt.sample_rate = wfx.sample_rate;
    fmt.bytes_per_packet = u32::from(wfx.block_align);
    fmt.bit_rate = wfx.byte_rate.saturating_mul(8);

    fmt.bits_per_sample = if wfx.format_tag == 0x0045 || wfx.format_tag == 0x0064 {
        fmt.bit_rate / fmt.sample_rate
    } else if wfx.valid_bits_per_sample != 0 {
        u32::from(wfx.valid_bits_per_sample)
    } else {
        u32::from(wfx.bits_per_sample)
    };

    fmt.channels = u32::from(wfx.channels);
    fmt.channel_layout = wfx.channel_mask & channel::MASK;
    if fmt.channel_layout == 0 {
        fmt.channel_layout = channel::guess(fmt.channels);
    }
    Ok(fmt)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RiffKind {
    Wave,
    Rf64,
    Wave64,
}

impl RiffKind {
    fn container_name(self) -> &'static str {
        match self {
            RiffKind::Wave => "Wave",
            RiffKind::Rf64 => "RF64",
            RiffKind::Wave64 => "Wave64",
        }
    }
}

pub struct WaveDemuxer {
    file: Box<dyn Stream>,
    format: CodecFormat,
    kind: RiffKind,
    total_frames: u64,
    average_bit_rate: u32,
    data_begin: u64,
    data_end: u64,
    info_begin: u64,
    info_len: u32,
    packet_count: u64,
    packet_step: u32,
}

impl WaveDemuxer {
    pub fn new(mut file: Box<dyn Stream>, mode: OpenMode) -> Result<Self> {
        let tag = file.read_fourcc()?;
        let kind = match &tag {
            b"RIFF" => RiffKind::Wave,
            b"RF64" => RiffKind::Rf64,
            b"riff" => RiffKind::Wave64,
            _ => {
                return Err(Error::invalid_data_format("invalid 'RIFF' chunk tag"));
            }
        };

        let mut demuxer = WaveDemuxer {
            file,
            format: CodecFormat::default(),
            kind,
            total_frames: 0,
            average_bit_rate: 0,
            data_begin: 0,
            data_end: 0,
            info_begin: 0,
            info_len: 0,
            packet_count: 0,
            packet_step: 1,
        };

        let (found_data, found_fmt) = match kind {
            RiffKind::Wave64 => {
                demuxer.file.rewind_to_start()?;
                demuxer.parse_wave64()?
            }
            _ => demuxer.parse_wave()?,
        };

        if !found_data || !found_fmt {
            return Err(Error::invalid_data_format(format!(
                "missing required chunk {:?}",
                if found_data { "fmt " } else { "data" }
            )));
        }

        if !mode.contains(OpenMode::PLAYBACK | OpenMode::METADATA) {
            return Ok(demuxer);
        }

        demuxer.format.validate()?;
        if demuxer.format.bytes_per_packet == 0 || demuxer.format.frames_per_packet == 0 {
            return Err(Error::unsupported_format("indeterminate WAVE packet size"));
        }

        let data_len = demuxer.data_end.saturating_sub(demuxer.data_begin);
        demuxer.packet_count = data_len / u64::from(demuxer.format.bytes_per_packet);
        if demuxer.total_frames == 0 {
            demuxer.total_frames =
                demuxer.packet_count * u64::from(demuxer.format.frames_per_packet);
        }
        if demuxer.format.bit_rate == 0 && demuxer.total_frames != 0 {
            demuxer.format.bit_rate = (data_len * u64::from(demuxer.format.sample_rate) * 8
                / demuxer.total_frames) as u32;
        }
        demuxer.average_bit_rate = demuxer.format.bit_rate;

        if mode.contains(OpenMode::PLAYBACK) {
            demuxer.packet_step = match demuxer.format.codec_id {
                CodecId::Lpcm | CodecId::Alaw | CodecId::Ulaw => {
                    (demuxer.format.sample_rate / 10).max(1)
                }
                _ => 1,
            };
            demuxer.file.goto(demuxer.data_begin)?;
        }
        Ok(demuxer)
    }

    fn parse_wave(&mut self) -> Result<(bool, bool)> {
        let mut found_data = false;
        let mut found_fmt = false;

        let _riff_size = self.file.read_u32::<LE>()?;
        if &self.file.read_fourcc()? != b"WAVE" {
            return Err(Error::invalid_data_format("invalid RIFF chunk type"));
        }

        if self.kind == RiffKind::Rf64 {
            let id = self.file.read_fourcc()?;
            let len = self.file.read_u32::<LE>()?;
            if &id != b"ds64" {
                return Err(Error::invalid_data_format("missing required chunk 'ds64'"));
            }
            if len < 24 {
                return Err(Error::invalid_data_format("'ds64' chunk is too small"));
            }
            self.file.skip(8)?;
            self.data_end = self.file.read_u64::<LE>()?;
            self.total_frames = self.file.read_u64::<LE>()?;
            self.file.skip(u64::from(len) - 24)?;
        }

        let file_length = self.file.size()?;
        let mut file_offset = self.file.tell()?;

        while file_offset + 8 < file_length {
            let id = self.file.read_fourcc()?;
            let len = self.file.read_u32::<LE>()?;

            match &id {
                b"data" => {
                    found_data = true;
                    if self.data_end == 0 {
                        self.data_end = u64::from(len);
                    }
                    self.data_begin += file_offset + 8;
                    self.data_end += self.data_begin;
                }
                b"fmt " => {
                    found_fmt = true;
                    let body = self.file.read_vec(len as usize)?;
                    self.format = parse_format(&body)?;
                }
                b"fact" => {
                    if self.total_frames == 0 && len >= 4 {
                        self.total_frames = u64::from(self.file.read_u32::<LE>()?);
                    }
                }
                b"LIST" => {
                    if len >= 4 && &self.file.read_fourcc()? == b"INFO" {
                        self.info_begin = file_offset + 8 + 4;
                        self.info_len = len - 4;
                    }
                }
                _ => {}
            }

            // Chunks are word-aligned.
            file_offset = (file_offset + 8 + u64::from(len) + 1) & !1;
            self.file.goto(file_offset)?;
        }
        Ok((found_data, found_fmt))
    }

    fn parse_wave64(&mut self) -> Result<(bool, bool)> {
        let mut found_data = false;
        let mut found_fmt = false;

        let mut riff_id = [0u8; 16];
        self.file.read_exact(&mut riff_id)?;
        let riff_len = self.file.read_u64::<LE>()?;
        let mut riff_type = [0u8; 16];
        self.file.read_exact(&mut riff_type)?;

        if riff_id != GUID_RIFF || riff_type != GUID_WAVE || riff_len < 24 * 3 {
            return Err(Error::invalid_data_format("invalid Wave64 RIFF chunk"));
        }

        let file_length = self.file.size()?;
        let mut file_offset = self.file.tell()?;

        while file_offset + 24 < file_length {
            let mut chunk_id = [0u8; 16];
            self.file.read_exact(&mut chunk_id)?;
            let chunk_len = self.file.read_u64::<LE>()?;

            if chunk_len < 24 {
                return Err(Error::invalid_data_format(
                    "Wave64 chunk cannot be smaller than its header",
                ));
            }

            if chunk_id == GUID_FMT {
                found_fmt = true;
                let body = self.file.read_vec((chunk_len - 24) as usize)?;
                self.format = parse_format(&body)?;
            } else if chunk_id == GUID_DATA {
                found_data = true;
                self.data_begin = file_offset + 24;
                self.data_end = file_offset + chunk_len;
            }

            file_offset += chunk_len;
            self.file.goto(file_offset)?;
        }
        Ok((found_data, found_fmt))
    }

    fn read_info_tags(&mut self, tags_out: &mut Dictionary) -> Result<()> {
        self.file.goto(self.info_begin)?;
        let body = self.file.read_vec(self.info_len as usize)?;
        let mut r = ByteReader::new(&body);

        while r.remaining() > 8 {
            let mut id = [0u8; 4];
            id.copy_from_slice(r.get_bytes(4)?);
            let len = r.get::<u32, LE>()? as usize;
            let padded = (len + 1) & !1;
            if padded > r.remaining() {
                break;
            }

            let value = r.get_bytes(len)?;
            if let Some(key) = info_key_for(&id) {
                let text = match value.iter().position(|&b| b == 0) {
                    Some(end) => &value[..end],
                    None => value,
                };
                tags_out.insert(UStr::intern(key), UStr::from_utf8_lossy(text));
            }
            r.skip(padded - len)?;
        }
        Ok(())
    }
}

impl Demuxer for WaveDemuxer {
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
        self.format.bit_rate
    }

    fn feed(&mut self, dest: &mut Vec<u8>) -> Result<bool> {
        let bytes_per_packet = u64::from(self.format.bytes_per_packet);
        let remain = self.data_end.saturating_sub(self.file.tell()?);
        if remain < bytes_per_packet {
            return Ok(false);
        }

        let mut packet_size =
            bytes_per_packet * u64::from(self.packet_step);
        if packet_size > remain {
            packet_size = remain - remain % bytes_per_packet;
        }

        dest.resize(packet_size as usize, 0);
        self.file.read_exact(dest)?;
        Ok(true)
    }

    fn seek(&mut self, pts: u64) -> Result<SeekPos> {
        let fpp = u64::from(self.format.frames_per_packet);
        let mut nearest = pts / fpp;
        let mut priming = pts % fpp;

        if nearest >= self.packet_count {
            nearest = self.packet_count;
            priming = 0;
        }

        self.file
            .goto(self.data_begin + nearest * u64::from(self.format.bytes_per_packet))?;
        Ok(SeekPos {
            target: pts,
            priming,
        })
    }

    fn get_info(&mut self, _chapter: u32) -> Result<StreamInfo> {
        let mut info = StreamInfo::new(&self.format);
        info.frames = self.total_frames;
        info.average_bit_rate = self.average_bit_rate;
        info.props.insert(
            UStr::intern(tags::CONTAINER),
            UStr::intern(self.kind.container_name()),
        );

        if self.info_len != 0 {
            let mut tag_dict = Dictionary::new();
            self.read_info_tags(&mut tag_dict)?;
            info.tags = tag_dict;
            info.props
                .insert(UStr::intern(tags::TAG_TYPE), UStr::intern("INFO chunk"));
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encore_common::MemoryStream;

    fn wav_file(body: &[u8]) -> Vec<u8> {
        // Minimal PCM file: fmt + data chunks.
        let mut fmt = Vec::new();
        fmt.extend_from_slice(&1u16.to_le_bytes()); // PCM
        fmt.extend_from_slice(&2u16.to_le_bytes()); // stereo
        fmt.extend_from_slice(&44_100u32.to_le_bytes());
        fmt.extend_from_slice(&176_400u32.to_le_bytes());
        fmt.extend_from_slice(&4u16.to_le_bytes()); // block align
        fmt.extend_from_slice(&16u16.to_le_bytes());

        let mut file = Vec::new();
        file.extend_from_slice(b"RIFF");
        let riff_len = 4 + 8 + fmt.len() + 8 + body.len();
        file.extend_from_slice(&(riff_len as u32).to_le_bytes());
        file.extend_from_slice(b"WAVE");
        file.extend_from_slice(b"fmt ");
        file.extend_from_slice(&(fmt.len() as u32).to_le_bytes());
        file.extend_from_slice(&fmt);
        file.extend_from_slice(b"data");
        file.extend_from_slice(&(body.len() as u32).to_le_bytes());
        file.extend_from_slice(body);
        file
    }

    fn open(data: Vec<u8>) -> WaveDemuxer {
        WaveDemuxer::new(Box::new(MemoryStream::new(data)), OpenMode::PLAYBACK).unwrap()
    }

    #[test]
    fn parses_canonical_pcm_header() {
        let body = vec![0u8; 4 * 441]; // 441 stereo s16 frames
        let demuxer = open(wav_file(&body));

        assert_eq!(demuxer.format().codec_id, CodecId::Lpcm);
        assert_eq!(demuxer.format().sample_rate, 44_100);
        assert_eq!(demuxer.format().channels, 2);
        assert_eq!(demuxer.format().bits_per_sample, 16);
        assert_eq!(demuxer.format().flags & pcm::SIGNED_INT, pcm::SIGNED_INT);
        assert_eq!(demuxer.total_frames(), 441);
    }

    #[test]
    fn feed_returns_whole_packets_then_eof() {
        let mut body = Vec::new();
        for i in 0..441u32 {
            body.extend_from_slice(&(i as u16).to_le_bytes());
            body.extend_from_slice(&(i as u16).to_le_bytes());
        }
        let mut demuxer = open(wav_file(&body));

        let mut packet = Vec::new();
        let mut total = 0usize;
        while demuxer.feed(&mut packet).unwrap() {
            assert_eq!(packet.len() % 4, 0);
            total += packet.len();
        }
        assert_eq!(total, body.len());
    }

    #[test]
    fn seek_lands_on_frame_boundaries() {
        let body = vec![0u8; 4 * 441];
        let mut demuxer = open(wav_file(&body));

        let pos = demuxer.seek(100).unwrap();
        assert_eq!(pos.target, 100);
        assert_eq!(pos.priming, 0);

        // Past-the-end seeks clamp to the data end.
        let pos = demuxer.seek(10_000).unwrap();
        assert_eq!(pos.priming, 0);
        let mut packet = Vec::new();
        assert!(!demuxer.feed(&mut packet).unwrap());
    }

    #[test]
    fn seeking_twice_is_idempotent() {
        let mut body = Vec::new();
        for i in 0..441u32 {
            body.extend_from_slice(&(i as u16).to_le_bytes());
            body.extend_from_slice(&(i as u16).to_le_bytes());
        }
        let mut demuxer = open(wav_file(&body));

        let first = demuxer.seek(137).unwrap();
        let mut once = Vec::new();
        demuxer.feed(&mut once).unwrap();

        let again = demuxer.seek(137).unwrap();
        let repeat = demuxer.seek(137).unwrap();
        assert_eq!(again, repeat);
        assert_eq!(first, repeat);

        let mut twice = Vec::new();
        demuxer.feed(&mut twice).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn missing_fmt_chunk_is_rejected() {
        let mut file = Vec::new();
        file.extend_from_slice(b"RIFF");
        file.extend_from_slice(&20u32.to_le_bytes());
        file.extend_from_slice(b"WAVE");
        file.extend_from_slice(b"data");
        file.extend_from_slice(&4u32.to_le_bytes());
        file.extend_from_slice(&[0; 4]);

        let err = match WaveDemuxer::new(Box::new(MemoryStream::new(file)), OpenMode::PLAYBACK) {
            Ok(_) => panic!("expected construction to fail"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), encore_common::ErrorKind::InvalidDataFormat);
    }

    #[test]
    fn info_list_tags_are_normalized() {
        let body = vec![0u8; 4 * 10];
        let mut file = wav_file(&body);

        // Append a LIST/INFO chunk with INAM and IART entries.
        let mut info = Vec::new();
        info.extend_from_slice(b"INFO");
        info.extend_from_slice(b"INAM");
        info.extend_from_slice(&6u32.to_le_bytes());
        info.extend_from_slice(b"Song\0\0");
        info.extend_from_slice(b"IART");
        info.extend_from_slice(&4u32.to_le_bytes());
        info.extend_from_slice(b"Band");
        file.extend_from_slice(b"LIST");
        file.extend_from_slice(&(info.len() as u32).to_le_bytes());
        file.extend_from_slice(&info);

        let mut demuxer = open(file);
        let info = demuxer.get_info(0).unwrap();
        assert_eq!(info.tags.get(tags::TITLE).unwrap().as_str(), "Song");
        assert_eq!(info.tags.get(tags::ARTIST).unwrap().as_str(), "Band");
        assert_eq!(info.props.get(tags::CONTAINER).unwrap().as_str(), "Wave");
    }
}
