//! ADTS (raw AAC) demultiplexing.
//!
//! ADTS has no index; the constructor scans every frame header once to
//! build a per-frame offset table, which also fixes the stream length.

use std::io::Read;

use encore_common::registry::Registry;
use encore_common::stream::StreamExt;
use encore_common::{Error, Result, Stream, UStr};

use crate::demuxer::{register_all, Demuxer, DemuxerFactory, OpenMode, SeekPos};
use crate::format::{CodecFormat, CodecId};
use crate::info::StreamInfo;
use crate::mp4::audio as aac;
use crate::tags;

pub(crate) fn register(registry: &mut Registry<&'static str, DemuxerFactory>) {
    register_all(registry, &["aac", "aacp", "adts"], |s, m| {
        Ok(Box::new(AdtsDemuxer::new(s, m)?) as Box<dyn Demuxer>)
    });
}

/// Packets to back up on seek so the decoder can settle before the target.
const SEEK_PREROLL_PACKETS: u64 = 10;

#[derive(Clone, Copy, Default)]
struct FrameHeader {
    buf: [u8; 7],
    valid: bool,
}

impl FrameHeader {
    fn read(file: &mut dyn Stream) -> Result<Self> {
        let mut header = FrameHeader::default();
        file.read_exact(&mut header.buf)?;

        let sync = u16::from_be_bytes([header.buf[0], header.buf[1]]);
        header.valid = (sync & 0xfff6) == 0xfff0
            && header.sample_rate_index() != 0xf
            && header.channel_config() != 0
            && header.full_size() >= header.header_size();
        Ok(header)
    }

    fn protection_absent(&self) -> bool {
        self.buf[1] & 0x1 != 0
    }

    fn profile(&self) -> u8 {
        self.buf[2] >> 6
    }

    fn sample_rate_index(&self) -> u8 {
        (self.buf[2] & 0x3c) >> 2
    }

    fn sample_rate(&self) -> u32 {
        aac::SAMPLE_RATES[usize::from(self.sample_rate_index())]
    }

    fn channel_config(&self) -> u8 {
        ((self.buf[2] & 0x01) << 2) | (self.buf[3] >> 6)
    }

    fn channels(&self) -> u32 {
        aac::CHANNELS[usize::from(self.channel_config())]
    }

    fn header_size(&self) -> u32 {
        if self.protection_absent() {
            7
        } else {
            9
        }
    }

    fn full_size(&self) -> u32 {
        (u32::from_be_bytes([self.buf[3], self.buf[4], self.buf[5], self.buf[6]]) >> 13) & 0x1fff
    }

    fn data_size(&self) -> u32 {
        self.full_size() - self.header_size()
    }
}

pub struct AdtsDemuxer {
    file: Box<dyn Stream>,
    format: CodecFormat,
    data_start: u64,
    data_end: u64,
    seek_table: Vec<u64>,
    total_frames: u64,
    average_bit_rate: u32,
    instant_bit_rate: u32,
}

impl AdtsDemuxer {
    pub fn new(mut file: Box<dyn Stream>, mode: OpenMode) -> Result<Self> {
        let data_start = 0u64;
        let data_end = file.size()?;

        let mut demuxer = AdtsDemuxer {
            file,
            format: CodecFormat::default(),
            data_start,
            data_end,
            seek_table: Vec::new(),
            total_frames: 0,
            average_bit_rate: 0,
            instant_bit_rate: 0,
        };

        if !mode.contains(OpenMode::PLAYBACK | OpenMode::METADATA) {
            return Ok(demuxer);
        }

        demuxer.file.goto(demuxer.data_start)?;
        let mut offset = demuxer.data_start;
        let mut header = demuxer.read_frame_header(offset)?;
        let first = match header {
            Some(h) => h,
            None => return Err(Error::invalid_data_format("not an ADTS file")),
        };

        demuxer.format.channels = first.channels();
        demuxer.format.sample_rate = first.sample_rate();
        demuxer.format.frames_per_packet = 1024;
        demuxer.format.codec_id = match first.profile() {
            0x0 => CodecId::AacMain,
            0x1 => CodecId::AacLc,
            0x2 => CodecId::AacSsr,
            _ => CodecId::AacLtp,
        };

        // Implicit SBR signaling: low-rate streams decode at twice the
        // declared rate, and parametric stereo doubles mono output.
        if demuxer.format.sample_rate <= 24_000 {
            demuxer.format.sample_rate *= 2;
            demuxer.format.frames_per_packet *= 2;
            if demuxer.format.channels == 1 {
                demuxer.format.channels = 2;
                demuxer.format.codec_id = CodecId::HeAacV2;
            } else {
                demuxer.format.codec_id = CodecId::HeAacV1;
            }
        }
        demuxer.format.channel_layout = aac::channel_layout(demuxer.format.channels);
        demuxer.format.validate()?;

        while let Some(h) = header {
            demuxer.seek_table.push(offset);
            offset += u64::from(h.full_size());
            demuxer.file.goto(offset)?;
            header = demuxer.read_frame_header(offset)?;
        }
        demuxer.file.goto(demuxer.data_start)?;

        demuxer.total_frames =
            u64::from(demuxer.format.frames_per_packet) * demuxer.seek_table.len() as u64;
        if demuxer.total_frames != 0 {
            demuxer.average_bit_rate = ((demuxer.data_end - demuxer.data_start)
                * u64::from(demuxer.format.sample_rate)
                * 8
                / demuxer.total_frames) as u32;
        }
        demuxer.instant_bit_rate = demuxer.average_bit_rate;
        Ok(demuxer)
    }

    fn read_frame_header(&mut self, offset: u64) -> Result<Option<FrameHeader>> {
        if offset + 9 < self.data_end {
            let header = FrameHeader::read(&mut *self.file)?;
            if header.valid {
                return Ok(Some(header));
            }
        }
        Ok(None)
    }
}

impl Demuxer for AdtsDemuxer {
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
        self.instant_bit_rate
    }

    fn feed(&mut self, dest: &mut Vec<u8>) -> Result<bool> {
        let offset = self.file.tell()?;
        let header = match self.read_frame_header(offset)? {
            Some(h) => h,
            None => return Ok(false),
        };

        if !header.protection_absent() {
            self.file.skip(2)?;
        }

        let bytes = header.data_size();
        dest.resize(bytes as usize, 0);
        self.file.read_exact(dest)?;

        self.instant_bit_rate = (u64::from(bytes)
            * u64::from(self.format.sample_rate)
            * 8
            / u64::from(self.format.frames_per_packet)) as u32;
        Ok(true)
    }

    fn seek(&mut self, pts: u64) -> Result<SeekPos> {
        let fpp = u64::from(self.format.frames_per_packet);
        let mut nearest = pts / fpp;
        let mut priming = pts % fpp;

        if nearest >= self.seek_table.len() as u64 {
            nearest = self.seek_table.len() as u64 - 1;
            priming = 0;
        } else {
            let preroll = nearest.min(SEEK_PREROLL_PACKETS);
            nearest -= preroll;
            priming += preroll * fpp;
        }

        self.file.goto(self.seek_table[nearest as usize])?;
        Ok(SeekPos {
            target: pts,
            priming,
        })
    }

    fn get_info(&mut self, _chapter: u32) -> Result<StreamInfo> {
        let mut info = StreamInfo::new(&self.format);
        info.frames = self.total_frames;
        info.average_bit_rate = self.average_bit_rate;
        info.props
            .insert(UStr::intern(tags::CONTAINER), UStr::intern("ADTS"));
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encore_common::MemoryStream;

    // One ADTS frame: 44.1 kHz, AAC-LC, stereo, no CRC.
    fn adts_frame(payload_len: usize) -> Vec<u8> {
        let full = (payload_len + 7) as u32;
        let mut frame = vec![0u8; 7];
        frame[0] = 0xff;
        frame[1] = 0xf1; // MPEG-4, layer 0, no CRC
        frame[2] = 0b0101_0000; // profile 1 (LC), rate index 4 (44100)
        frame[2] |= 0; // channel config high bit
        frame[3] = 0b1000_0000; // channel config 2
        frame[3] |= ((full >> 11) & 0x3) as u8;
        frame[4] = ((full >> 3) & 0xff) as u8;
        frame[5] = (((full & 0x7) as u8) << 5) | 0x1f;
        frame[6] = 0xfc;
        frame.extend(std::iter::repeat(0xaau8).take(payload_len));
        frame
    }

    fn adts_file(frames: usize) -> Vec<u8> {
        let mut file = Vec::new();
        for _ in 0..frames {
            file.extend_from_slice(&adts_frame(100));
        }
        file
    }

    #[test]
    fn scans_the_frame_table_on_open() {
        let demuxer = AdtsDemuxer::new(
            Box::new(MemoryStream::new(adts_file(50))),
            OpenMode::PLAYBACK,
        )
        .unwrap();

        assert_eq!(demuxer.format().codec_id, CodecId::AacLc);
        assert_eq!(demuxer.format().sample_rate, 44_100);
        assert_eq!(demuxer.format().channels, 2);
        assert_eq!(demuxer.seek_table.len(), 50);
        assert_eq!(demuxer.total_frames(), 50 * 1024);
    }

    #[test]
    fn feed_strips_frame_headers() {
        let mut demuxer = AdtsDemuxer::new(
            Box::new(MemoryStream::new(adts_file(3))),
            OpenMode::PLAYBACK,
        )
        .unwrap();

        let mut packet = Vec::new();
        let mut count = 0;
        while demuxer.feed(&mut packet).unwrap() {
            assert_eq!(packet.len(), 100);
            assert!(packet.iter().all(|&b| b == 0xaa));
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn seek_backs_up_for_decoder_preroll() {
        let mut demuxer = AdtsDemuxer::new(
            Box::new(MemoryStream::new(adts_file(50))),
            OpenMode::PLAYBACK,
        )
        .unwrap();

        // Deep seek: ten packets of preroll are added to priming.
        let pos = demuxer.seek(30 * 1024 + 17).unwrap();
        assert_eq!(pos.target, 30 * 1024 + 17);
        assert_eq!(pos.priming, 10 * 1024 + 17);

        // Shallow seek: preroll is limited by the file start.
        let pos = demuxer.seek(2 * 1024).unwrap();
        assert_eq!(pos.priming, 2 * 1024);

        // Past-the-end seek clamps to the final packet.
        let pos = demuxer.seek(u64::MAX).unwrap();
        assert_eq!(pos.priming, 0);
    }

    #[test]
    fn garbage_input_is_rejected() {
        let err = match AdtsDemuxer::new(
            Box::new(MemoryStream::new(vec![0u8; 64])),
            OpenMode::PLAYBACK,
        ) {
            Ok(_) => panic!("expected construction to fail"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), encore_common::ErrorKind::InvalidDataFormat);
    }
}
