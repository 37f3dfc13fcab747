//! Compressed-stream descriptions: codec identifiers, channel layouts and
//! the per-stream [`CodecFormat`] every demuxer produces.

use encore_common::{Error, Result};

/// Identifies the compression scheme of an elementary audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CodecId {
    Lpcm = 1,
    Alaw,
    Ulaw,

    AacLc,
    HeAacV1,
    HeAacV2,
    AacLtp,
    AacLd,
    AacEld,
    AacEldSbr,
    AacMain,
    AacSsr,
    AacScalable,
    Als,

    MpegLayer1,
    MpegLayer2,
    MpegLayer3,

    Flac,
    Alac,
    Ac3,
    Eac3,
    Dts,
    DtsHd,
    DtsExpress,
    TrueHd,

    WmaV1,
    WmaV2,
    WmaPro,
    WmaLossless,
    WmaVoice,

    Opus,
    Vorbis,
    Speex,

    Atrac1,
    Atrac3,
    Atrac3Plus,

    Ra144,
    Ra288,
    Cook,
    RaLossless,
    Sipr,

    AdpcmImaQt,
    AdpcmImaMs,
    AdpcmImaOki,
    AdpcmImaDk3,
    AdpcmImaDk4,
    AdpcmMs,
    AdpcmYamaha,
    AdpcmCreative,
    AdpcmSwf,
    AdpcmG722,
    AdpcmG726,
    DpcmXan,

    G723_1,
    AmrNb,
    AmrWb,
    AmrWbPlus,
    Qcelp,
    Qdesign1,
    Qdesign2,
    Mace3,
    Mace6,
    Gsm,
    GsmMs,
    TrueSpeech,
    Nellymoser,
    IntelMusicCoder,
    IndeoAudio,
    TwinVq,
    Voxware,
}

impl CodecId {
    /// The human-readable codec name used in stream properties and errors.
    pub fn name(self) -> &'static str {
        match self {
            CodecId::Lpcm => "PCM",
            CodecId::Alaw => "G.711 A-law",
            CodecId::Ulaw => "G.711 \u{3bc}-law",
            CodecId::AacLc => "AAC-LC",
            CodecId::HeAacV1 => "HE-AAC",
            CodecId::HeAacV2 => "HE-AAC v2",
            CodecId::AacLtp => "AAC-LTP",
            CodecId::AacLd => "AAC-LD",
            CodecId::AacEld => "AAC-ELD",
            CodecId::AacEldSbr => "AAC-ELD with SBR",
            CodecId::AacMain => "AAC Main",
            CodecId::AacSsr => "AAC-SSR",
            CodecId::AacScalable => "AAC Scalable",
            CodecId::Als => "MPEG-4 ALS",
            CodecId::MpegLayer1 => "MPEG Layer 1",
            CodecId::MpegLayer2 => "MPEG Layer 2",
            CodecId::MpegLayer3 => "MPEG Layer 3",
            CodecId::Flac => "FLAC",
            CodecId::Alac => "Apple Lossless",
            CodecId::Ac3 => "AC-3",
            CodecId::Eac3 => "E-AC-3",
            CodecId::Dts => "DTS",
            CodecId::DtsHd => "DTS-HD",
            CodecId::DtsExpress => "DTS Express",
            CodecId::TrueHd => "TrueHD",
            CodecId::WmaV1 => "Windows Media Audio v1",
            CodecId::WmaV2 => "Windows Media Audio v2",
            CodecId::WmaPro => "Windows Media Audio Professional",
            CodecId::WmaLossless => "Windows Media Audio Lossless",
            CodecId::WmaVoice => "Windows Media Audio Voice",
            CodecId::Opus => "Opus",
            CodecId::Vorbis => "Vorbis",
            CodecId::Speex => "Speex",
            CodecId::Atrac1 => "ATRAC1",
            CodecId::Atrac3 => "ATRAC3",
            CodecId::Atrac3Plus => "ATRAC3+",
            CodecId::Ra144 => "RealAudio 14.4",
            CodecId::Ra288 => "RealAudio 28.8",
            CodecId::Cook => "Cook",
            CodecId::RaLossless => "RealAudio Lossless",
            CodecId::Sipr => "Sipro",
            CodecId::AdpcmImaQt => "IMA ADPCM (QuickTime)",
            CodecId::AdpcmImaMs => "IMA ADPCM (Microsoft)",
            CodecId::AdpcmImaOki => "IMA ADPCM (OKI)",
            CodecId::AdpcmImaDk3 => "IMA ADPCM (Duck DK3)",
            CodecId::AdpcmImaDk4 => "IMA ADPCM (Duck DK4)",
            CodecId::AdpcmMs => "Microsoft ADPCM",
            CodecId::AdpcmYamaha => "Yamaha ADPCM",
            CodecId::AdpcmCreative => "Creative ADPCM",
            CodecId::AdpcmSwf => "Shockwave Flash ADPCM",
            CodecId::AdpcmG722 => "G.722",
            CodecId::AdpcmG726 => "G.726",
            CodecId::DpcmXan => "Xan DPCM",
            CodecId::G723_1 => "G.723.1",
            CodecId::AmrNb => "AMR-NB",
            CodecId::AmrWb => "AMR-WB",
            CodecId::AmrWbPlus => "AMR-WB+",
            CodecId::Qcelp => "QCELP",
            CodecId::Qdesign1 => "QDesign Music",
            CodecId::Qdesign2 => "QDesign Music 2",
            CodecId::Mace3 => "MACE 3:1",
            CodecId::Mace6 => "MACE 6:1",
            CodecId::Gsm => "GSM",
            CodecId::GsmMs => "GSM (Microsoft)",
            CodecId::TrueSpeech => "DSP Group TrueSpeech",
            CodecId::Nellymoser => "Nellymoser Asao",
            CodecId::IntelMusicCoder => "Intel Music Coder",
            CodecId::IndeoAudio => "Indeo Audio",
            CodecId::TwinVq => "TwinVQ",
            CodecId::Voxware => "Voxware MetaSound",
        }
    }

    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

/// Canonical speaker positions, one bit per position.
///
/// The bit order matches the WAVEFORMATEXTENSIBLE speaker mask for the
/// first eighteen positions.
pub mod channel {
    pub const FL: u32 = 1 << 0;
    pub const FR: u32 = 1 << 1;
    pub const FC: u32 = 1 << 2;
    pub const LFE: u32 = 1 << 3;
    pub const BL: u32 = 1 << 4;
    pub const BR: u32 = 1 << 5;
    pub const FLC: u32 = 1 << 6;
    pub const FRC: u32 = 1 << 7;
    pub const BC: u32 = 1 << 8;
    pub const SL: u32 = 1 << 9;
    pub const SR: u32 = 1 << 10;
    pub const TC: u32 = 1 << 11;
    pub const TFL: u32 = 1 << 12;
    pub const TFC: u32 = 1 << 13;
    pub const TFR: u32 = 1 << 14;
    pub const TBL: u32 = 1 << 15;
    pub const TBC: u32 = 1 << 16;
    pub const TBR: u32 = 1 << 17;

    pub const MASK: u32 = (1 << 18) - 1;

    pub const MONO: u32 = FC;
    pub const STEREO: u32 = FL | FR;
    pub const SURROUND_5_1: u32 = FL | FR | FC | LFE | BL | BR;
    pub const SURROUND_7_1: u32 = FL | FR | FC | LFE | BL | BR | SL | SR;

    /// The conventional layout for a channel count with no declared mask.
    pub fn guess(channels: u32) -> u32 {
        match channels {
            1 => MONO,
            2 => STEREO,
            3 => FL | FR | FC,
            4 => FL | FR | BL | BR,
            5 => FL | FR | FC | BL | BR,
            6 => SURROUND_5_1,
            7 => SURROUND_5_1 | BC,
            8 => SURROUND_7_1,
            _ => 0,
        }
    }
}

pub const MIN_CHANNELS: u32 = 1;
pub const MAX_CHANNELS: u32 = 8;

/// Sample-format flag bits shared between codec formats and PCM specs.
pub mod pcm {
    pub const SIGNED_INT: u32 = 1 << 0;
    pub const IEEE_FLOAT: u32 = 1 << 1;
    pub const BIG_ENDIAN: u32 = 1 << 2;
    pub const NON_INTERLEAVED: u32 = 1 << 3;
    pub const ALIGNED_HIGH: u32 = 1 << 4;
}

/// Everything a decoder needs to know about a compressed stream.
#[derive(Debug, Clone)]
pub struct CodecFormat {
    pub codec_id: CodecId,
    pub sample_rate: u32,
    pub channels: u32,
    pub channel_layout: u32,
    pub bits_per_sample: u32,
    pub bytes_per_packet: u32,
    pub frames_per_packet: u32,
    pub bit_rate: u32,
    pub flags: u32,
    pub extra: Vec<u8>,
}

impl Default for CodecFormat {
    fn default() -> Self {
        CodecFormat {
            codec_id: CodecId::Lpcm,
            sample_rate: 0,
            channels: 0,
            channel_layout: 0,
            bits_per_sample: 0,
            bytes_per_packet: 0,
            frames_per_packet: 0,
            bit_rate: 0,
            flags: 0,
            extra: Vec::new(),
        }
    }
}

impl CodecFormat {
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::unsupported_format("sample rate must be non-zero"));
        }
        if self.channels < MIN_CHANNELS || self.channels > MAX_CHANNELS {
            return Err(Error::unsupported_format(format!(
                "invalid channel count: {}",
                self.channels
            )));
        }
        if self.channel_layout != 0
            && self.channel_layout.count_ones() != self.channels
        {
            return Err(Error::unsupported_format(
                "channel layout does not match channel count",
            ));
        }
        if self.codec_id == CodecId::Lpcm
            && self.channels != 0
            && self.bytes_per_packet != 0
            && self.bits_per_sample > self.bytes_per_packet * 8 / self.channels
        {
            return Err(Error::unsupported_format(
                "bits per sample exceed the packet's frame size",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_lpcm() -> CodecFormat {
        CodecFormat {
            codec_id: CodecId::Lpcm,
            sample_rate: 44_100,
            channels: 2,
            channel_layout: channel::STEREO,
            bits_per_sample: 16,
            bytes_per_packet: 4,
            frames_per_packet: 1,
            flags: pcm::SIGNED_INT,
            ..CodecFormat::default()
        }
    }

    #[test]
    fn validate_accepts_canonical_stereo() {
        stereo_lpcm().validate().unwrap();
    }

    #[test]
    fn validate_rejects_mismatched_layout() {
        let mut fmt = stereo_lpcm();
        fmt.channel_layout = channel::SURROUND_5_1;
        assert!(fmt.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_sample_rate() {
        let mut fmt = stereo_lpcm();
        fmt.sample_rate = 0;
        assert!(fmt.validate().is_err());
    }

    #[test]
    fn validate_rejects_oversized_lpcm_bits() {
        let mut fmt = stereo_lpcm();
        fmt.bits_per_sample = 24;
        assert!(fmt.validate().is_err());
    }

    #[test]
    fn guessed_layouts_have_matching_popcounts() {
        for channels in 1..=8 {
            assert_eq!(channel::guess(channels).count_ones(), channels);
        }
    }
}
