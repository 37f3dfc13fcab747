//! Adapters exposing Symphonia's codec implementations through the
//! [`Decoder`](crate::decoder::Decoder) contract.
//!
//! Our demuxers hand these adapters raw elementary-stream packets; the
//! codec-private bytes collected at parse time (AudioSpecificConfig, ALAC
//! magic cookie, ...) ride along as `extra_data`.

use symphonia::core::audio::{Channels, SampleBuffer};
use symphonia::core::codecs::{
    CodecParameters, CodecType, DecoderOptions, CODEC_TYPE_AAC, CODEC_TYPE_ALAC,
    CODEC_TYPE_FLAC, CODEC_TYPE_MP1, CODEC_TYPE_MP2, CODEC_TYPE_MP3, CODEC_TYPE_VORBIS,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet as SymphoniaPacket;

use encore_common::{Error, ErrorKind, Result};
use encore_demux::format::{CodecFormat, CodecId};

use crate::decoder::{DecodeStatus, Decoder};
use crate::packet::Packet;

fn codec_type_for(id: CodecId) -> Option<CodecType> {
    Some(match id {
        CodecId::AacLc
        | CodecId::HeAacV1
        | CodecId::HeAacV2
        | CodecId::AacMain
        | CodecId::AacLtp
        | CodecId::AacSsr => CODEC_TYPE_AAC,
        CodecId::MpegLayer1 => CODEC_TYPE_MP1,
        CodecId::MpegLayer2 => CODEC_TYPE_MP2,
        CodecId::MpegLayer3 => CODEC_TYPE_MP3,
        CodecId::Flac => CODEC_TYPE_FLAC,
        CodecId::Alac => CODEC_TYPE_ALAC,
        CodecId::Vorbis => CODEC_TYPE_VORBIS,
        _ => return None,
    })
}

fn map_error(err: SymphoniaError) -> Error {
    match err {
        SymphoniaError::IoError(io) => io.into(),
        SymphoniaError::DecodeError(what) => Error::invalid_data_format(what),
        SymphoniaError::Unsupported(what) => Error::unsupported_format(what),
        other => Error::with_source(ErrorKind::Failure, "codec failure", other),
    }
}

pub struct SymphoniaDecoder {
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    sample_buf: Option<SampleBuffer<f32>>,
    pending: Option<SymphoniaPacket>,
    delay: u32,
}

impl SymphoniaDecoder {
    pub fn new(fmt: &CodecFormat) -> Result<Self> {
        let codec_type = codec_type_for(fmt.codec_id).ok_or_else(|| {
            Error::unsupported_format(format!(
                "no external decoder for codec: {:?}",
                fmt.codec_id.name()
            ))
        })?;

        let mut params = CodecParameters::new();
        params.for_codec(codec_type);
        if fmt.sample_rate != 0 {
            params.with_sample_rate(fmt.sample_rate);
        }
        if let Some(channels) = Channels::from_bits(fmt.channel_layout) {
            params.with_channels(channels);
        }
        if fmt.bits_per_sample != 0 {
            params.with_bits_per_sample(fmt.bits_per_sample);
        }
        if fmt.frames_per_packet != 0 {
            params.with_max_frames_per_packet(u64::from(fmt.frames_per_packet));
        }
        if !fmt.extra.is_empty() {
            params.with_extra_data(fmt.extra.clone().into_boxed_slice());
        }

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(map_error)?;
        log::debug!("using external decoder for {}", fmt.codec_id.name());

        // HE-AAC streams absorb one full packet before producing output.
        let delay = match fmt.codec_id {
            CodecId::HeAacV1 | CodecId::HeAacV2 => fmt.frames_per_packet,
            _ => 0,
        };

        Ok(SymphoniaDecoder {
            decoder,
            sample_buf: None,
            pending: None,
            delay,
        })
    }
}

impl Decoder for SymphoniaDecoder {
    fn send(&mut self, buf: &[u8]) -> Result<()> {
        self.pending = Some(SymphoniaPacket::new_from_slice(0, 0, 0, buf));
        Ok(())
    }

    fn recv(&mut self, pkt: &mut Packet) -> Result<DecodeStatus> {
        let packet = match self.pending.take() {
            Some(packet) => packet,
            None => return Ok(DecodeStatus::EndOfBuffer),
        };

        let decoded = self.decoder.decode(&packet).map_err(map_error)?;

        let needs_new_buf = match &self.sample_buf {
            Some(buf) => buf.capacity() < decoded.capacity() * decoded.spec().channels.count(),
            None => true,
        };
        if needs_new_buf {
            self.sample_buf = Some(SampleBuffer::new(
                decoded.capacity() as u64,
                *decoded.spec(),
            ));
        }

        let sample_buf = self.sample_buf.as_mut().expect("buffer was just created");
        sample_buf.copy_interleaved_ref(decoded);

        pkt.resize(sample_buf.len());
        pkt.data_mut().copy_from_slice(sample_buf.samples());
        Ok(DecodeStatus::Output)
    }

    fn flush(&mut self) {
        self.pending = None;
        self.decoder.reset();
    }

    fn decoder_delay(&self) -> u32 {
        self.delay
    }
}
