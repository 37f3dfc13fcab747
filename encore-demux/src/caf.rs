//! Core Audio Format demultiplexing.
//!
//! CAF is a big-endian chunked container. The `desc` chunk fixes the codec;
//! constant-rate codecs derive packet boundaries arithmetically while
//! variable-rate codecs carry an explicit `pakt` packet table.

use std::io::Read;

use byteorder::{ReadBytesExt, BE};

use encore_common::io::ByteReader;
use encore_common::registry::Registry;
use encore_common::stream::StreamExt;
use encore_common::{Error, Result, Stream, UStr};

use crate::demuxer::{register_all, Demuxer, DemuxerFactory, OpenMode, SeekPos};
use crate::dict::Dictionary;
use crate::format::{channel, pcm, CodecFormat, CodecId};
use crate::info::StreamInfo;
use crate::mp4::descriptor::{read_descriptor_length, DecoderConfigDescriptor};
use crate::tags;

pub(crate) fn register(registry: &mut Registry<&'static str, DemuxerFactory>) {
    register_all(registry, &["caf"], |s, m| {
        Ok(Box::new(CafDemuxer::new(s, m)?) as Box<dyn Demuxer>)
    });
}

#[derive(Default)]
struct AudioDescription {
    sample_rate: f64,
    format_id: [u8; 4],
    format_flags: u32,
    bytes_per_packet: u32,
    frames_per_packet: u32,
    channels_per_frame: u32,
    bits_per_channel: u32,
}

#[derive(Clone, Copy)]
struct PacketDescription {
    frames: u32,
    bytes: u32,
}

#[derive(Default)]
struct PacketTable {
    number_packets: u64,
    number_valid_frames: u64,
    priming_frames: u32,
    remainder_frames: u32,
    descriptions: Vec<PacketDescription>,
}

fn codec_for_format_id(format_id: &[u8; 4]) -> Option<CodecId> {
    Some(match format_id {
        b".mp1" => CodecId::MpegLayer1,
        b".mp2" => CodecId::MpegLayer2,
        b".mp3" | b"ms\x00\x55" => CodecId::MpegLayer3,
        b"MAC3" => CodecId::Mace3,
        b"MAC6" => CodecId::Mace6,
        b"QDM2" => CodecId::Qdesign2,
        b"QDMC" => CodecId::Qdesign1,
        b"Qclp" => CodecId::Qcelp,
        b"ac-3" => CodecId::Ac3,
        b"agsm" => CodecId::Gsm,
        b"alaw" => CodecId::Alaw,
        b"ec-3" => CodecId::Eac3,
        b"ima4" => CodecId::AdpcmImaQt,
        b"ms\x00\x02" => CodecId::AdpcmMs,
        b"ms\x00\x11" => CodecId::AdpcmImaMs,
        b"ms\x00\x31" => CodecId::GsmMs,
        b"samr" => CodecId::AmrNb,
        b"ulaw" => CodecId::Ulaw,
        _ => return None,
    })
}

pub struct CafDemuxer {
    file: Box<dyn Stream>,
    format: CodecFormat,
    desc: AudioDescription,
    pakt: PacketTable,
    data_offset: u64,
    data_size: u64,
    tag_dict: Dictionary,
    total_frames: u64,
    encoder_delay: u64,
    average_bit_rate: u32,
    instant_bit_rate: u32,
    packet_number: u64,
    packet_step: u32,
}

impl CafDemuxer {
    pub fn new(mut file: Box<dyn Stream>, mode: OpenMode) -> Result<Self> {
        let file_type = file.read_fourcc()?;
        let version = file.read_u16::<BE>()?;
        let _flags = file.read_u16::<BE>()?;
        if &file_type != b"caff" || version != 1 {
            return Err(Error::invalid_data_format("invalid CAF file header"));
        }

        let mut demuxer = CafDemuxer {
            file,
            format: CodecFormat::default(),
            desc: AudioDescription::default(),
            pakt: PacketTable::default(),
            data_offset: 0,
            data_size: 0,
            tag_dict: Dictionary::new(),
            total_frames: 0,
            encoder_delay: 0,
            average_bit_rate: 0,
            instant_bit_rate: 0,
            packet_number: 0,
            packet_step: 1,
        };

        if !mode.contains(OpenMode::PLAYBACK | OpenMode::METADATA) {
            // CAF carries no embedded pictures; nothing else to do.
            return Ok(demuxer);
        }

        let chunk_type = demuxer.file.read_fourcc()?;
        let chunk_size = demuxer.file.read_u64::<BE>()?;
        if &chunk_type != b"desc" || chunk_size != 32 {
            return Err(Error::invalid_data_format(
                "CAF audio description chunk not present",
            ));
        }

        demuxer.desc = AudioDescription {
            sample_rate: demuxer.file.read_f64::<BE>()?,
            format_id: demuxer.file.read_fourcc()?,
            format_flags: demuxer.file.read_u32::<BE>()?,
            bytes_per_packet: demuxer.file.read_u32::<BE>()?,
            frames_per_packet: demuxer.file.read_u32::<BE>()?,
            channels_per_frame: demuxer.file.read_u32::<BE>()?,
            bits_per_channel: demuxer.file.read_u32::<BE>()?,
        };

        let file_length = demuxer.file.size()?;
        let mut file_offset = demuxer.file.tell()?;

        while file_offset + 12 <= file_length {
            let chunk_type = demuxer.file.read_fourcc()?;
            let chunk_size = demuxer.file.read_u64::<BE>()?;

            match &chunk_type {
                b"data" => {
                    demuxer.data_offset = file_offset + 16;
                    if chunk_size == u64::MAX {
                        demuxer.data_size = file_length - file_offset - 16;
                    } else {
                        if chunk_size <= 4 {
                            return Err(Error::invalid_data_format(
                                "CAF 'data' chunk is too small",
                            ));
                        }
                        demuxer.data_size = chunk_size - 4;
                    }
                }
                b"info" => {
                    if mode.contains(OpenMode::METADATA) {
                        demuxer.read_info_chunk(chunk_size)?;
                    }
                }
                b"kuki" => {
                    demuxer.format.extra = demuxer.file.read_vec(chunk_size as usize)?;
                }
                b"pakt" => {
                    demuxer.read_pakt_chunk(chunk_size)?;
                }
                _ => {}
            }

            if chunk_size == u64::MAX {
                break;
            }
            file_offset += 12 + chunk_size;
            demuxer.file.goto(file_offset)?;
        }

        if demuxer.data_offset == 0 {
            return Err(Error::invalid_data_format("CAF audio data chunk not present"));
        }
        if demuxer.pakt.number_packets == 0 {
            if demuxer.desc.bytes_per_packet == 0 || demuxer.desc.frames_per_packet == 0 {
                return Err(Error::invalid_data_format(
                    "CAF files containing variable bit rate or variable frame \
                     rate codecs must contain a packet table chunk",
                ));
            }
            demuxer.pakt.number_packets =
                demuxer.data_size / u64::from(demuxer.desc.bytes_per_packet);
        }

        demuxer.prepare_for_playback()?;
        if demuxer.total_frames != 0 {
            demuxer.average_bit_rate = (demuxer.data_size
                * u64::from(demuxer.format.sample_rate)
                * 8
                / demuxer.total_frames) as u32;
        }
        demuxer.instant_bit_rate = demuxer.average_bit_rate;

        if mode.contains(OpenMode::PLAYBACK) {
            demuxer.file.goto(demuxer.data_offset)?;
        }
        Ok(demuxer)
    }

    fn read_pakt_chunk(&mut self, size: u64) -> Result<()> {
        let body = self.file.read_vec(size as usize)?;
        let mut r = ByteReader::new(&body);

        self.pakt.number_packets = r.get::<u64, BE>()?;
        self.pakt.number_valid_frames = r.get::<u64, BE>()?;
        self.pakt.priming_frames = r.get::<u32, BE>()?;
        self.pakt.remainder_frames = r.get::<u32, BE>()?;

        let count = self.pakt.number_packets as usize;
        self.pakt.descriptions.reserve(count);

        for _ in 0..count {
            let bytes = if self.desc.bytes_per_packet != 0 {
                self.desc.bytes_per_packet
            } else {
                read_descriptor_length(&mut r)?
            };
            let frames = if self.desc.frames_per_packet != 0 {
                self.desc.frames_per_packet
            } else {
                read_descriptor_length(&mut r)?
            };

            if bytes == 0 || frames == 0 {
                return Err(Error::failure(
                    "CAF packet entries cannot have zero bytes or frames",
                ));
            }
            self.pakt.descriptions.push(PacketDescription { frames, bytes });
        }
        Ok(())
    }

    fn read_info_chunk(&mut self, size: u64) -> Result<()> {
        let body = self.file.read_vec(size as usize)?;
        let mut r = ByteReader::new(&body);

        let _count = r.get::<u32, BE>()?;
        let text = r.get_bytes(r.remaining())?;

        let mut strings = text
            .split(|&b| b == 0)
            .filter(|s| !s.is_empty())
            .map(|s| UStr::from_utf8_lossy(s));
        while let (Some(key), Some(value)) = (strings.next(), strings.next()) {
            self.tag_dict.insert(tags::map_common_key(&key), value);
        }
        Ok(())
    }

    fn prepare_for_playback(&mut self) -> Result<()> {
        if self.pakt.number_valid_frames == 0 {
            self.pakt.number_valid_frames =
                self.pakt.number_packets * u64::from(self.desc.frames_per_packet);
        }

        self.format.sample_rate = self.desc.sample_rate as u32;
        self.format.channels = self.desc.channels_per_frame;
        self.format.channel_layout = channel::guess(self.format.channels);
        self.format.bits_per_sample = self.desc.bits_per_channel;
        self.format.bytes_per_packet = self.desc.bytes_per_packet;
        self.format.frames_per_packet = self.desc.frames_per_packet;

        match &self.desc.format_id {
            b"aac " | b"celp" | b"hvxc" | b"twvq" => {
                let dcd = DecoderConfigDescriptor::parse(&self.format.extra)?;
                dcd.setup(&mut self.format)?;

                if self.format.codec_id == CodecId::HeAacV1
                    || self.format.codec_id == CodecId::HeAacV2
                {
                    self.desc.frames_per_packet *= 2;
                    self.pakt.priming_frames *= 2;
                    self.pakt.remainder_frames *= 2;
                    self.pakt.number_valid_frames *= 2;
                    for entry in &mut self.pakt.descriptions {
                        entry.frames *= 2;
                    }
                }
                self.format.frames_per_packet = self.desc.frames_per_packet;
            }
            b"alac" => {
                // Strip the QuickTime 'frma'/'alac' wrapper around the
                // magic cookie when present.
                if self.format.extra.len() > 24
                    && &self.format.extra[4..8] == b"frma"
                    && &self.format.extra[8..12] == b"alac"
                {
                    self.format.extra.drain(..24);
                }
                self.format.codec_id = CodecId::Alac;
            }
            b"lpcm" => {
                if self.desc.format_flags & 0x1 != 0 {
                    self.format.flags |= pcm::IEEE_FLOAT;
                } else {
                    self.format.flags |= pcm::SIGNED_INT;
                }
                if self.desc.format_flags & 0x2 == 0 {
                    self.format.flags |= pcm::BIG_ENDIAN;
                }
                self.format.codec_id = CodecId::Lpcm;
            }
            other => {
                self.format.codec_id = codec_for_format_id(other).ok_or_else(|| {
                    Error::unsupported_format(format!(
                        "unrecognized CAF format ID: {:?}",
                        String::from_utf8_lossy(other)
                    ))
                })?;
            }
        }

        self.format.validate()?;
        self.total_frames = self.pakt.number_valid_frames;
        self.encoder_delay = u64::from(self.pakt.priming_frames);

        if matches!(
            self.format.codec_id,
            CodecId::Lpcm | CodecId::Alaw | CodecId::Ulaw
        ) {
            self.packet_step = (self.format.sample_rate / 10).max(1);
        }
        Ok(())
    }
}

impl Demuxer for CafDemuxer {
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
        if self.packet_number >= self.pakt.number_packets {
            return Ok(false);
        }

        let (bytes, frames) = if self.desc.bytes_per_packet != 0 {
            (
                self.desc.bytes_per_packet,
                self.desc.frames_per_packet.max(1),
            )
        } else {
            let entry = self.pakt.descriptions[self.packet_number as usize];
            (entry.bytes, entry.frames)
        };

        self.instant_bit_rate =
            (u64::from(bytes) * u64::from(self.format.sample_rate) * 8 / u64::from(frames)) as u32;

        let mut n = u64::from(self.packet_step);
        if n > self.pakt.number_packets - self.packet_number {
            n = self.pakt.number_packets - self.packet_number;
        }

        dest.resize((u64::from(bytes) * n) as usize, 0);
        self.file.read_exact(dest)?;
        self.packet_number += n;
        Ok(true)
    }

    fn seek(&mut self, target: u64) -> Result<SeekPos> {
        let mut priming = 0u64;

        if self.desc.bytes_per_packet != 0 && self.desc.frames_per_packet != 0 {
            self.packet_number = target / u64::from(self.desc.frames_per_packet);
            priming = target % u64::from(self.desc.frames_per_packet);
            self.file.goto(
                self.data_offset
                    + self.packet_number * u64::from(self.desc.bytes_per_packet),
            )?;
        } else {
            let mut accum_frames = 0u64;
            let mut accum_bytes = 0u64;

            self.packet_number = 0;
            for entry in &self.pakt.descriptions {
                if target <= accum_frames + u64::from(entry.frames) {
                    priming = target - accum_frames;
                    self.file.goto(self.data_offset + accum_bytes)?;
                    break;
                }
                accum_frames += u64::from(entry.frames);
                accum_bytes += u64::from(entry.bytes);
                self.packet_number += 1;
            }
        }

        Ok(SeekPos {
            target,
            priming,
        })
    }

    fn get_info(&mut self, _chapter: u32) -> Result<StreamInfo> {
        let mut info = StreamInfo::new(&self.format);
        info.frames = self.total_frames;
        info.start_offset = self.encoder_delay;
        info.average_bit_rate = self.average_bit_rate;
        info.props.insert(
            UStr::intern(tags::CONTAINER),
            UStr::intern("CAF (Core Audio Format)"),
        );
        info.tags = self.tag_dict.clone();
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encore_common::MemoryStream;

    fn caf_lpcm_file(frames: u32) -> Vec<u8> {
        let mut file = Vec::new();
        file.extend_from_slice(b"caff");
        file.extend_from_slice(&1u16.to_be_bytes());
        file.extend_from_slice(&0u16.to_be_bytes());

        file.extend_from_slice(b"desc");
        file.extend_from_slice(&32u64.to_be_bytes());
        file.extend_from_slice(&48_000f64.to_be_bytes());
        file.extend_from_slice(b"lpcm");
        file.extend_from_slice(&0u32.to_be_bytes()); // flags: signed BE ints
        file.extend_from_slice(&4u32.to_be_bytes()); // bytes per packet
        file.extend_from_slice(&1u32.to_be_bytes()); // frames per packet
        file.extend_from_slice(&2u32.to_be_bytes()); // channels
        file.extend_from_slice(&16u32.to_be_bytes()); // bits

        let body_len = frames * 4;
        file.extend_from_slice(b"data");
        file.extend_from_slice(&u64::from(body_len + 4).to_be_bytes());
        file.extend_from_slice(&0u32.to_be_bytes()); // edit count
        file.extend(std::iter::repeat(0u8).take(body_len as usize));
        file
    }

    #[test]
    fn parses_constant_rate_lpcm() {
        let demuxer = CafDemuxer::new(
            Box::new(MemoryStream::new(caf_lpcm_file(4800))),
            OpenMode::PLAYBACK,
        )
        .unwrap();

        assert_eq!(demuxer.format().codec_id, CodecId::Lpcm);
        assert_eq!(demuxer.format().sample_rate, 48_000);
        assert_eq!(
            demuxer.format().flags,
            pcm::SIGNED_INT | pcm::BIG_ENDIAN
        );
        assert_eq!(demuxer.total_frames(), 4800);
    }

    #[test]
    fn feed_and_seek_follow_packet_arithmetic() {
        let mut demuxer = CafDemuxer::new(
            Box::new(MemoryStream::new(caf_lpcm_file(4800))),
            OpenMode::PLAYBACK,
        )
        .unwrap();

        let pos = demuxer.seek(1000).unwrap();
        assert_eq!(pos.priming, 0);

        let mut packet = Vec::new();
        let mut total = 0;
        while demuxer.feed(&mut packet).unwrap() {
            total += packet.len();
        }
        assert_eq!(total, (4800 - 1000) * 4);
    }

    #[test]
    fn rejects_missing_description() {
        let mut file = Vec::new();
        file.extend_from_slice(b"caff");
        file.extend_from_slice(&1u16.to_be_bytes());
        file.extend_from_slice(&0u16.to_be_bytes());
        file.extend_from_slice(b"free");
        file.extend_from_slice(&0u64.to_be_bytes());

        let err = match CafDemuxer::new(Box::new(MemoryStream::new(file)), OpenMode::PLAYBACK) {
            Ok(_) => panic!("expected construction to fail"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), encore_common::ErrorKind::InvalidDataFormat);
    }
}
