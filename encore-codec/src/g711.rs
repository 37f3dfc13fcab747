//! G.711 A-law and μ-law decoding via 256-entry expansion tables built at
//! compile time.

use encore_demux::format::{CodecFormat, CodecId};
use encore_common::Result;

use crate::decoder::{DecodeStatus, Decoder};
use crate::packet::Packet;

const fn alaw_to_lpcm(value: u8) -> i16 {
    let v = value ^ 0xd5;
    let mut x = (((v & 0x0f) as i32) << 4) + 8;
    if v & 0x70 != 0 {
        x = (x + 256) << (((v & 0x70) >> 4) - 1);
    }
    if v & 0x80 != 0 {
        -x as i16
    } else {
        x as i16
    }
}

const fn ulaw_to_lpcm(value: u8) -> i16 {
    let v = !value;
    let mut x = ((((v & 0x0f) | 0x10) as i32) << 1) + 1;
    x <<= ((v & 0x70) >> 4) + 2;
    x -= 0x84;
    if v & 0x80 != 0 {
        -x as i16
    } else {
        x as i16
    }
}

const fn make_alaw_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = alaw_to_lpcm(i as u8);
        i += 1;
    }
    table
}

const fn make_ulaw_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = ulaw_to_lpcm(i as u8);
        i += 1;
    }
    table
}

static ALAW_TABLE: [i16; 256] = make_alaw_table();
static ULAW_TABLE: [i16; 256] = make_ulaw_table();

pub struct G711Decoder {
    table: &'static [i16; 256],
    pending: Vec<u8>,
    have_input: bool,
}

impl G711Decoder {
    pub fn new(fmt: &CodecFormat) -> Self {
        G711Decoder {
            table: if fmt.codec_id == CodecId::Alaw {
                &ALAW_TABLE
            } else {
                &ULAW_TABLE
            },
            pending: Vec::new(),
            have_input: false,
        }
    }
}

impl Decoder for G711Decoder {
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

        const SCALE: f32 = 1.0 / 32768.0;
        pkt.resize(self.pending.len());
        for (out, &byte) in pkt.data_mut().iter_mut().zip(&self.pending) {
            *out = f32::from(self.table[usize::from(byte)]) * SCALE;
        }
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

    #[test]
    fn table_fixed_points() {
        // Canonical zero codes.
        assert_eq!(ulaw_to_lpcm(0xff), 0);
        assert_eq!(alaw_to_lpcm(0xd5), 8);

        // Sign symmetry: clearing the sign bit negates the output.
        assert_eq!(ulaw_to_lpcm(0x7f), -ulaw_to_lpcm(0xff));
        assert_eq!(alaw_to_lpcm(0x55), -alaw_to_lpcm(0xd5));
    }

    #[test]
    fn decode_produces_one_sample_per_byte_in_range() {
        let fmt = CodecFormat {
            codec_id: CodecId::Ulaw,
            sample_rate: 8000,
            channels: 1,
            ..CodecFormat::default()
        };
        let mut decoder = G711Decoder::new(&fmt);

        let input: Vec<u8> = (0..=255).collect();
        decoder.send(&input).unwrap();

        let mut pkt = Packet::new();
        pkt.set_channel_layout(0b100);
        assert!(matches!(
            decoder.recv(&mut pkt).unwrap(),
            DecodeStatus::Output
        ));
        assert_eq!(pkt.len(), 256);
        assert!(pkt.data().iter().all(|s| (-1.0..=1.0).contains(s)));

        // A further recv requires another send.
        assert!(matches!(
            decoder.recv(&mut pkt).unwrap(),
            DecodeStatus::EndOfBuffer
        ));
    }
}
