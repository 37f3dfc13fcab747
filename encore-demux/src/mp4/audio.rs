//! MPEG-4 AudioSpecificConfig parsing.
//!
//! The ASC is a bit-packed descriptor selecting the audio object type,
//! sampling frequency and channel configuration, with per-object extension
//! payloads. Explicit and implicit SBR/PS signaling both resolve here:
//! SBR doubles the output sample rate and PS doubles mono to stereo.

use encore_common::{Error, Result};

use crate::format::{channel, CodecFormat, CodecId};

/// Sampling frequencies by 4-bit index. Index 0xf selects an explicit
/// 24-bit rate instead.
pub const SAMPLE_RATES: [u32; 16] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350, 0, 0, 0,
];

/// Output channels by channel configuration.
pub const CHANNELS: [u32; 8] = [0, 1, 2, 3, 4, 5, 6, 8];

/// The conventional AAC layout for a channel count.
pub fn channel_layout(channels: u32) -> u32 {
    use channel::*;
    match channels {
        1 => FC,
        2 => FL | FR,
        3 => FL | FR | FC,
        4 => FL | FR | FC | BC,
        5 => FL | FR | FC | BL | BR,
        6 => FL | FR | FC | LFE | BL | BR,
        7 => FL | FR | FC | LFE | BL | BR | BC,
        8 => FL | FR | FC | LFE | BL | BR | SL | SR,
        _ => 0,
    }
}

/// An MSB-first bit reader over a byte slice.
pub struct BitReader<'a> {
    data: &'a [u8],
    size: usize,
    cursor: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            size: data.len() * 8,
            cursor: 0,
        }
    }

    pub fn remain(&self) -> usize {
        self.size - self.cursor
    }

    pub fn peek(&self, n: usize) -> Result<u64> {
        debug_assert!(n <= 64);
        if self.remain() < n {
            return Err(Error::out_of_bounds("bit reader exhausted"));
        }

        let mut value = 0u64;
        let mut taken = 0usize;
        let mut pos = self.cursor;
        while taken < n {
            let byte = self.data[pos >> 3];
            let offset = pos & 7;
            let available = 8 - offset;
            let want = (n - taken).min(available);
            let bits = (u64::from(byte) >> (available - want)) & ((1 << want) - 1);
            value = (value << want) | bits;
            taken += want;
            pos += want;
        }
        Ok(value)
    }

    pub fn read(&mut self, n: usize) -> Result<u64> {
        let value = self.peek(n)?;
        self.cursor += n;
        Ok(value)
    }

    pub fn read_u32(&mut self, n: usize) -> Result<u32> {
        Ok(self.read(n)? as u32)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read(1)? != 0)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        if self.remain() < n {
            return Err(Error::out_of_bounds("bit reader exhausted"));
        }
        self.cursor += n;
        Ok(())
    }

    pub fn byte_align(&mut self) {
        self.cursor = (self.cursor + 7) & !7;
    }
}

// Audio object types, ISO/IEC 14496-3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Aot {
    AacMain,
    AacLc,
    AacSsr,
    AacLtp,
    Sbr,
    AacScalable,
    TwinVq,
    Celp,
    Hvxc,
    ErAacLc,
    ErAacLtp,
    ErAacScalable,
    ErTwinVq,
    ErBsac,
    ErAacLd,
    Ps,
    MpegLayer1,
    MpegLayer2,
    MpegLayer3,
    Als,
    ErAacEld,
    Other(u8),
}

impl Aot {
    fn from_raw(raw: u8) -> Result<Self> {
        let valid = (0x01..=0x2d).contains(&raw)
            && raw != 0x0a
            && raw != 0x0b
            && raw != 0x12
            && raw != 0x1f;
        if !valid {
            return Err(Error::failure(format!(
                "invalid MP4 audio object type: {raw:#04x}"
            )));
        }
        Ok(match raw {
            0x01 => Aot::AacMain,
            0x02 => Aot::AacLc,
            0x03 => Aot::AacSsr,
            0x04 => Aot::AacLtp,
            0x05 => Aot::Sbr,
            0x06 => Aot::AacScalable,
            0x07 => Aot::TwinVq,
            0x08 => Aot::Celp,
            0x09 => Aot::Hvxc,
            0x11 => Aot::ErAacLc,
            0x13 => Aot::ErAacLtp,
            0x14 => Aot::ErAacScalable,
            0x15 => Aot::ErTwinVq,
            0x16 => Aot::ErBsac,
            0x17 => Aot::ErAacLd,
            0x1d => Aot::Ps,
            0x20 => Aot::MpegLayer1,
            0x21 => Aot::MpegLayer2,
            0x22 => Aot::MpegLayer3,
            0x24 => Aot::Als,
            0x27 => Aot::ErAacEld,
            other => Aot::Other(other),
        })
    }

    fn is_error_resilient(self) -> bool {
        matches!(
            self,
            Aot::ErAacLc
                | Aot::ErAacLtp
                | Aot::ErAacScalable
                | Aot::ErTwinVq
                | Aot::ErBsac
                | Aot::ErAacLd
                | Aot::ErAacEld
        ) || matches!(self, Aot::Other(raw) if (0x18..=0x1b).contains(&raw))
    }
}

fn read_object_type(r: &mut BitReader<'_>) -> Result<Aot> {
    let mut object_type = r.read_u32(5)? as u8;
    if object_type == 0x1f {
        object_type = 0x20 + r.read_u32(6)? as u8;
    }
    Aot::from_raw(object_type)
}

fn read_sample_rate(r: &mut BitReader<'_>) -> Result<u32> {
    let index = r.read_u32(4)? as usize;
    if index == 0xf {
        r.read_u32(24)
    } else {
        Ok(SAMPLE_RATES[index])
    }
}

struct AudioSpecificConfig {
    object_type: Aot,
    sample_rate: u32,
    channel_config: u8,
    channels: u32,
    extension_object_type: Option<Aot>,
    extension_sample_rate: u32,
    frame_length: u32,
    sbr_present: bool,
    ps_present: bool,
}

impl AudioSpecificConfig {
    fn parse(r: &mut BitReader<'_>) -> Result<Self> {
        let mut asc = AudioSpecificConfig {
            object_type: read_object_type(r)?,
            sample_rate: read_sample_rate(r)?,
            channel_config: r.read_u32(4)? as u8,
            channels: 0,
            extension_object_type: None,
            extension_sample_rate: 0,
            frame_length: 0,
            sbr_present: false,
            ps_present: false,
        };

        if usize::from(asc.channel_config) < CHANNELS.len() {
            asc.channels = CHANNELS[usize::from(asc.channel_config)];
        }

        if asc.object_type == Aot::Sbr || asc.object_type == Aot::Ps {
            // Explicit hierarchical signaling.
            asc.sbr_present = true;
            asc.ps_present = asc.object_type == Aot::Ps;
            asc.extension_object_type = Some(Aot::Sbr);
            asc.extension_sample_rate = read_sample_rate(r)?;
            asc.object_type = read_object_type(r)?;
        }

        match asc.object_type {
            Aot::AacMain
            | Aot::AacLc
            | Aot::AacSsr
            | Aot::AacLtp
            | Aot::AacScalable
            | Aot::TwinVq
            | Aot::ErAacLc
            | Aot::ErAacLtp
            | Aot::ErAacScalable
            | Aot::ErTwinVq
            | Aot::ErBsac
            | Aot::ErAacLd => asc.parse_ga_specific_config(r)?,
            Aot::ErAacEld => asc.parse_eld_specific_config(r)?,
            Aot::Als => {
                r.skip(5)?;
                if r.peek(24)? as u32 != u32::from_be_bytes(*b"\0ALS") {
                    r.skip(24)?;
                }
                asc.parse_als_specific_config(r)?;
            }
            _ => {}
        }

        if asc.object_type.is_error_resilient() {
            let ep_config = r.read_u32(2)?;
            if ep_config == 2 || ep_config == 3 {
                return Err(Error::new(
                    encore_common::ErrorKind::NotImplemented,
                    "MPEG-4 EPConfig support is not implemented",
                ));
            }
        }

        if asc.extension_object_type != Some(Aot::Sbr) && r.remain() >= 16 {
            asc.parse_extension_config(r)?;
        }

        if asc.sbr_present && asc.object_type == Aot::AacLc {
            if asc.frame_length <= 1024 {
                asc.frame_length *= 2;
            }
            asc.ps_present &= asc.channels == 1;
        }
        Ok(asc)
    }

    fn parse_ga_specific_config(&mut self, r: &mut BitReader<'_>) -> Result<()> {
        self.frame_length = if r.read_bool()? { 960 } else { 1024 };
        if r.read_bool()? {
            r.skip(14)?; // core_coder_delay
        }

        let extension_flag = r.read_bool()?;
        if self.channel_config == 0 {
            self.parse_program_config(r)?;
        }

        if self.object_type == Aot::AacScalable || self.object_type == Aot::ErAacScalable {
            r.skip(3)?; // layer_number
        }

        if extension_flag {
            if self.object_type == Aot::ErBsac {
                r.skip(5 + 11)?;
            }
            if matches!(
                self.object_type,
                Aot::ErAacLc | Aot::ErAacLtp | Aot::ErAacScalable | Aot::ErAacLd
            ) {
                r.skip(3)?; // resilience flags
            }
            r.skip(1)?; // extension_flag_3
        }
        Ok(())
    }

    fn parse_program_config(&mut self, r: &mut BitReader<'_>) -> Result<()> {
        r.skip(4)?; // element_instance_tag

        self.object_type = Aot::from_raw(r.read_u32(2)? as u8)?;
        self.sample_rate = SAMPLE_RATES[r.read_u32(4)? as usize];

        let num_front = r.read_u32(4)?;
        let num_side = r.read_u32(4)?;
        let num_back = r.read_u32(4)?;
        let num_lfe = r.read_u32(2)?;
        let num_assoc_data = r.read_u32(3)?;
        let num_valid_cc = r.read_u32(4)?;

        if r.read_bool()? {
            r.skip(1)?; // mono mixdown
        }
        if r.read_bool()? {
            r.skip(4)?; // stereo mixdown
        }
        if r.read_bool()? {
            r.skip(3)?; // matrix mixdown
        }

        self.channels = num_front + num_side + num_back + num_lfe;
        for _ in 0..num_front {
            self.channels += r.read_u32(1)?; // channel-pair element
            r.skip(4)?;
        }
        for _ in 0..num_side {
            self.channels += r.read_u32(1)?;
            r.skip(4)?;
        }
        for _ in 0..num_back {
            self.channels += r.read_u32(1)?;
            r.skip(4)?;
        }

        r.skip((num_lfe * 4 + num_assoc_data * 4 + num_valid_cc * 5) as usize)?;
        r.byte_align();

        let comment_bytes = r.read_u32(8)? as usize;
        r.skip(comment_bytes * 8)
    }

    fn parse_eld_specific_config(&mut self, r: &mut BitReader<'_>) -> Result<()> {
        self.frame_length = if r.read_bool()? { 480 } else { 512 };
        r.skip(3)?; // resilience flags

        self.sbr_present = r.read_bool()?;
        if self.sbr_present {
            self.extension_sample_rate = self.sample_rate << r.read_u32(1)?;
            r.skip(1)?; // eld_sbr_crc_flag
        }

        // ExtTypeConfigData
        while r.remain() > 4 && r.read_u32(4)? != 0 {
            let mut len = r.read_u32(4)?;
            if len == 0xf {
                len += r.read_u32(8)?;
                if len == 0xf + 0xff {
                    len += r.read_u32(16)?;
                }
            }
            r.skip(len as usize)?;
        }
        Ok(())
    }

    fn parse_als_specific_config(&mut self, r: &mut BitReader<'_>) -> Result<()> {
        if r.remain() < 112 {
            return Err(Error::failure("insufficient ALS specific config size"));
        }
        if r.read_u32(32)? != u32::from_be_bytes(*b"ALS\0") {
            return Err(Error::failure("'ALS' tag missing from ALS specific config"));
        }

        self.sample_rate = r.read_u32(32)?;
        r.skip(32)?; // total samples
        self.channels = r.read_u32(16)? + 1;
        Ok(())
    }

    fn parse_extension_config(&mut self, r: &mut BitReader<'_>) -> Result<()> {
        if r.read_u32(11)? == 0x2b7 {
            let extension = read_object_type(r)?;
            self.extension_object_type = Some(extension);
            if extension == Aot::Sbr {
                self.sbr_present = r.read_bool()?;
                if self.sbr_present {
                    self.extension_sample_rate = read_sample_rate(r)?;
                }
                if r.remain() >= 12 && r.read_u32(11)? == 0x548 {
                    self.ps_present = r.read_bool()?;
                }
            } else if extension == Aot::ErBsac {
                self.sbr_present = r.read_bool()?;
                if self.sbr_present {
                    self.extension_sample_rate = read_sample_rate(r)?;
                }
                r.skip(4)?; // extension channel config
            }
        }
        Ok(())
    }

    fn output_sample_rate(&self) -> u32 {
        self.sample_rate.max(self.extension_sample_rate)
    }

    fn output_channels(&self) -> u32 {
        self.channels << u32::from(self.ps_present)
    }

    fn codec_id(&self) -> Option<CodecId> {
        Some(match self.object_type {
            Aot::AacLc => {
                if self.ps_present {
                    CodecId::HeAacV2
                } else if self.sbr_present {
                    CodecId::HeAacV1
                } else {
                    CodecId::AacLc
                }
            }
            Aot::ErAacLc => CodecId::AacLc,
            Aot::AacLtp | Aot::ErAacLtp => CodecId::AacLtp,
            Aot::ErAacLd => CodecId::AacLd,
            Aot::ErAacEld => {
                if self.sbr_present {
                    CodecId::AacEldSbr
                } else {
                    CodecId::AacEld
                }
            }
            Aot::AacMain => CodecId::AacMain,
            Aot::AacSsr => CodecId::AacSsr,
            Aot::AacScalable | Aot::ErAacScalable => CodecId::AacScalable,
            Aot::MpegLayer1 => CodecId::MpegLayer1,
            Aot::MpegLayer2 => CodecId::MpegLayer2,
            Aot::MpegLayer3 => CodecId::MpegLayer3,
            Aot::Als => CodecId::Als,
            _ => return None,
        })
    }
}

/// Parses `fmt.extra` as an AudioSpecificConfig and fills in the codec id,
/// output sample rate, channel count/layout and frame length.
pub fn parse_audio_specific_config(fmt: &mut CodecFormat) -> Result<()> {
    let extra = fmt.extra.clone();
    let mut r = BitReader::new(&extra);
    let asc = AudioSpecificConfig::parse(&mut r)?;

    fmt.codec_id = asc.codec_id().ok_or_else(|| {
        Error::unsupported_format("unsupported MPEG-4 audio object type")
    })?;
    fmt.sample_rate = asc.output_sample_rate();
    fmt.channels = asc.output_channels();
    fmt.channel_layout = channel_layout(fmt.channels);
    fmt.frames_per_packet = asc.frame_length;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asc_format(extra: &[u8]) -> CodecFormat {
        let mut fmt = CodecFormat {
            extra: extra.to_vec(),
            ..CodecFormat::default()
        };
        parse_audio_specific_config(&mut fmt).unwrap();
        fmt
    }

    #[test]
    fn plain_aac_lc() {
        // Object type 2, rate index 4 (44100), channel config 2.
        let fmt = asc_format(&[0x12, 0x10]);
        assert_eq!(fmt.codec_id, CodecId::AacLc);
        assert_eq!(fmt.sample_rate, 44_100);
        assert_eq!(fmt.channels, 2);
        assert_eq!(fmt.frames_per_packet, 1024);
    }

    #[test]
    fn explicit_sbr_signaling_doubles_the_rate() {
        // Object type 5 (SBR), base rate index 7 (22050), channel config 2,
        // extension rate index 4 (44100), then AAC-LC with GA config.
        // Bits: 00101 0111 0010 0100 00010 0 0 0
        let fmt = asc_format(&[0x2b, 0x92, 0x08, 0x00]);
        assert_eq!(fmt.codec_id, CodecId::HeAacV1);
        assert_eq!(fmt.sample_rate, 44_100);
        assert_eq!(fmt.channels, 2);
        assert_eq!(fmt.frames_per_packet, 2048);
    }

    #[test]
    fn parametric_stereo_doubles_mono() {
        // Object type 29 (PS), base rate index 7, channel config 1,
        // extension rate index 4, then AAC-LC.
        // Bits: 11101 0111 0001 0100 00010 0 0 0
        let fmt = asc_format(&[0xeb, 0x8a, 0x08, 0x00]);
        assert_eq!(fmt.codec_id, CodecId::HeAacV2);
        assert_eq!(fmt.sample_rate, 44_100);
        assert_eq!(fmt.channels, 2);
        assert_eq!(fmt.frames_per_packet, 2048);
    }

    #[test]
    fn bit_reader_reads_across_byte_boundaries() {
        let mut r = BitReader::new(&[0b1010_1100, 0b0101_0011]);
        assert_eq!(r.read(3).unwrap(), 0b101);
        assert_eq!(r.read(7).unwrap(), 0b0110_001);
        assert_eq!(r.read(6).unwrap(), 0b01_0011);
        assert!(r.read(1).is_err());
    }
}
