//! The LPCM decoder: a thin wrapper over the PCM blitter.

use encore_common::Result;
use encore_demux::format::CodecFormat;

use crate::decoder::{DecodeStatus, Decoder};
use crate::packet::Packet;
use crate::pcm::{Blitter, Spec};

pub struct LpcmDecoder {
    blitter: Blitter,
    bytes_per_frame: u32,
    pending: Vec<u8>,
    have_input: bool,
}

impl LpcmDecoder {
    pub fn new(fmt: &CodecFormat) -> Result<Self> {
        Ok(LpcmDecoder {
            blitter: Blitter::new(&Spec::from_format(fmt))?,
            bytes_per_frame: fmt.bytes_per_packet.max(1),
            pending: Vec::new(),
            have_input: false,
        })
    }
}

impl Decoder for LpcmDecoder {
    fn send(&mut self, buf: &[u8]) -> Result<()> {
        self.pending.clear();
        self.pending.extend_from_slice(buf);
        self.have_input = true;
        Ok(())
    }

    fn recv(&mut self, pkt: &mut Packet) -> Result<DecodeStatus> {
        if !self.have_input {
            return Ok(DecodeStatus::EndOfBuffer);
        }
        self.have_input = false;

        let frames = self.pending.len() / self.bytes_per_frame as usize;
        self.blitter.convert(&self.pending, frames, pkt);
        Ok(DecodeStatus::Output)
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.have_input = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encore_demux::format::{channel, pcm, CodecId};

    #[test]
    fn whole_frames_are_converted() {
        let fmt = CodecFormat {
            codec_id: CodecId::Lpcm,
            sample_rate: 48_000,
            channels: 2,
            channel_layout: channel::STEREO,
            bits_per_sample: 16,
            bytes_per_packet: 4,
            frames_per_packet: 1,
            flags: pcm::SIGNED_INT,
            ..CodecFormat::default()
        };
        let mut decoder = LpcmDecoder::new(&fmt).unwrap();

        let mut src = Vec::new();
        for value in [1000i16, -1000, 2000, -2000, 3000, -3000] {
            src.extend_from_slice(&value.to_le_bytes());
        }
        decoder.send(&src).unwrap();

        let mut pkt = Packet::new();
        pkt.set_channel_layout(channel::STEREO);
        assert_eq!(decoder.recv(&mut pkt).unwrap(), DecodeStatus::Output);
        assert_eq!(pkt.frames(), 3);
        assert!((pkt.data()[0] - 1000.0 / 32768.0).abs() < 1e-6);
    }
}
