//! The decoder contract and the codec-id-keyed decoder registry.

use std::sync::RwLock;

use once_cell::sync::Lazy;

use encore_common::registry::{self, Registry};
use encore_common::{Error, Result};
use encore_demux::format::{CodecFormat, CodecId};

use crate::packet::Packet;

/// Outcome of a [`Decoder::recv`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// `pkt` holds decoded frames.
    Output,
    /// The decoder consumed its input; `send` the next packet.
    EndOfBuffer,
}

/// A pull-based decoder: compressed packets in, f32 frames out.
pub trait Decoder: Send {
    /// Hands one compressed packet to the decoder.
    fn send(&mut self, buf: &[u8]) -> Result<()>;

    /// Requests the next PCM frame block.
    fn recv(&mut self, pkt: &mut Packet) -> Result<DecodeStatus>;

    /// Discards pending state (called after a seek).
    fn flush(&mut self);

    /// Constant frames the decoder absorbs before producing output.
    fn decoder_delay(&self) -> u32 {
        0
    }
}

pub type DecoderFactory = fn(&CodecFormat) -> Result<Box<dyn Decoder>>;

static DECODER_FACTORIES: Lazy<RwLock<Registry<u32, DecoderFactory>>> = Lazy::new(|| {
    let mut registry = Registry::new();

    register_ids(&mut registry, &[CodecId::Lpcm], |fmt| {
        Ok(Box::new(crate::lpcm::LpcmDecoder::new(fmt)?) as Box<dyn Decoder>)
    });
    register_ids(&mut registry, &[CodecId::Alaw, CodecId::Ulaw], |fmt| {
        Ok(Box::new(crate::g711::G711Decoder::new(fmt)) as Box<dyn Decoder>)
    });
    register_ids(
        &mut registry,
        &[
            CodecId::AacLc,
            CodecId::HeAacV1,
            CodecId::HeAacV2,
            CodecId::AacMain,
            CodecId::AacLtp,
            CodecId::AacSsr,
            CodecId::MpegLayer1,
            CodecId::MpegLayer2,
            CodecId::MpegLayer3,
            CodecId::Flac,
            CodecId::Alac,
            CodecId::Vorbis,
        ],
        |fmt| {
            Ok(Box::new(crate::symphonia_decoder::SymphoniaDecoder::new(fmt)?)
                as Box<dyn Decoder>)
        },
    );
    RwLock::new(registry)
});

fn register_ids(
    registry: &mut Registry<u32, DecoderFactory>,
    ids: &[CodecId],
    factory: DecoderFactory,
) {
    for &id in ids {
        registry.register(id.to_u32(), factory);
    }
}

/// Registers an additional decoder factory for the given codec ids.
pub fn register_decoder(ids: &[CodecId], factory: DecoderFactory) {
    let mut registry = DECODER_FACTORIES.write().unwrap();
    register_ids(&mut registry, ids, factory);
}

/// Creates a decoder for the stream format.
///
/// Factories for the codec id are tried in registration order; with none
/// registered this fails with `protocol_not_supported`, and when every
/// factory fails the last error is propagated.
pub fn resolve(fmt: &CodecFormat) -> Result<Box<dyn Decoder>> {
    let registry = DECODER_FACTORIES.read().unwrap();
    registry::try_each(
        registry.find(fmt.codec_id.to_u32()),
        || {
            Error::protocol_not_supported(format!(
                "no audio decoder(s) for codec: {:?}",
                fmt.codec_id.name()
            ))
        },
        |factory| factory(fmt),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use encore_demux::format::{channel, pcm};

    #[test]
    fn lpcm_resolves_to_a_working_decoder() {
        let fmt = CodecFormat {
            codec_id: CodecId::Lpcm,
            sample_rate: 44_100,
            channels: 2,
            channel_layout: channel::STEREO,
            bits_per_sample: 16,
            bytes_per_packet: 4,
            frames_per_packet: 1,
            flags: pcm::SIGNED_INT,
            ..CodecFormat::default()
        };
        let mut decoder = resolve(&fmt).unwrap();

        let mut src = Vec::new();
        for value in [0i16, 16384, -16384, 0] {
            src.extend_from_slice(&value.to_le_bytes());
        }
        decoder.send(&src).unwrap();

        let mut pkt = Packet::new();
        pkt.set_channel_layout(channel::STEREO);
        assert_eq!(decoder.recv(&mut pkt).unwrap(), DecodeStatus::Output);
        assert_eq!(pkt.frames(), 2);
        assert_eq!(decoder.recv(&mut pkt).unwrap(), DecodeStatus::EndOfBuffer);
    }

    #[test]
    fn unknown_codecs_fail_with_protocol_not_supported() {
        let fmt = CodecFormat {
            codec_id: CodecId::TwinVq,
            sample_rate: 44_100,
            channels: 2,
            ..CodecFormat::default()
        };
        let err = match resolve(&fmt) {
            Ok(_) => panic!("expected resolve to fail"),
            Err(err) => err,
        };
        assert_eq!(
            err.kind(),
            encore_common::ErrorKind::ProtocolNotSupported
        );
    }
}
