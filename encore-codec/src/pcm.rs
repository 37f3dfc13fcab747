//! The PCM blitter: arbitrary integer/float sample formats to interleaved
//! f32.
//!
//! A 4-bit encoding selector is derived once from the spec, together with
//! a scale factor and a sign-flip mask for unsigned inputs. The kernels
//! are chunked slice loops; the planar path converts each plane and
//! scatters it with a stride, with a single-pass fast path for the common
//! 2-channel case.

use encore_demux::format::{pcm, CodecFormat, MAX_CHANNELS, MIN_CHANNELS};
use encore_common::{Error, Result};

use crate::packet::Packet;

/// Describes a raw PCM sample layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Spec {
    pub bytes_per_sample: u32,
    pub bits_per_sample: u32,
    pub channels: u32,
    pub flags: u32,
}

impl Spec {
    /// Derives the spec from an LPCM codec format.
    pub fn from_format(fmt: &CodecFormat) -> Spec {
        Spec {
            bytes_per_sample: if fmt.channels != 0 {
                fmt.bytes_per_packet / fmt.channels
            } else {
                0
            },
            bits_per_sample: fmt.bits_per_sample,
            channels: fmt.channels,
            flags: fmt.flags,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    I8,
    I16Le,
    I16Be,
    I24Le,
    I24Be,
    I32Le,
    I32Be,
    F32Le,
    F32Be,
    F64Le,
    F64Be,
}

impl Encoding {
    fn sample_size(self) -> usize {
        match self {
            Encoding::I8 => 1,
            Encoding::I16Le | Encoding::I16Be => 2,
            Encoding::I24Le | Encoding::I24Be => 3,
            Encoding::I32Le | Encoding::I32Be | Encoding::F32Le | Encoding::F32Be => 4,
            Encoding::F64Le | Encoding::F64Be => 8,
        }
    }
}

#[derive(Clone, Copy)]
struct State {
    scale: f32,
    sign: u32,
    encoding: Encoding,
}

fn compute_scale(bits: u32) -> f32 {
    1.0 / (1u32 << (bits - 1)) as f32
}

fn make_state(spec: &Spec) -> Result<State> {
    let mut spec = *spec;

    if spec.channels < MIN_CHANNELS || spec.channels > MAX_CHANNELS {
        return Err(Error::unsupported_format(format!(
            "invalid channel count: {}",
            spec.channels
        )));
    }

    if spec.flags & pcm::IEEE_FLOAT != 0 {
        if spec.bytes_per_sample != 4 && spec.bytes_per_sample != 8 {
            return Err(Error::unsupported_format("invalid PCM spec"));
        }
    } else if spec.bytes_per_sample == 1 {
        spec.flags &= !pcm::BIG_ENDIAN;
    } else if !(2..=4).contains(&spec.bytes_per_sample) {
        return Err(Error::unsupported_format("invalid PCM spec"));
    }

    if spec.bits_per_sample == 0 {
        spec.bits_per_sample = spec.bytes_per_sample * 8;
    } else if spec.bits_per_sample > spec.bytes_per_sample * 8 {
        return Err(Error::unsupported_format("invalid PCM spec"));
    }

    let big_endian = spec.flags & pcm::BIG_ENDIAN != 0;
    let encoding = if spec.flags & pcm::IEEE_FLOAT != 0 {
        match (spec.bytes_per_sample, big_endian) {
            (4, false) => Encoding::F32Le,
            (4, true) => Encoding::F32Be,
            (8, false) => Encoding::F64Le,
            (8, true) => Encoding::F64Be,
            _ => unreachable!(),
        }
    } else {
        match (spec.bytes_per_sample, big_endian) {
            (1, _) => Encoding::I8,
            (2, false) => Encoding::I16Le,
            (2, true) => Encoding::I16Be,
            (3, false) => Encoding::I24Le,
            (3, true) => Encoding::I24Be,
            (4, false) => Encoding::I32Le,
            (4, true) => Encoding::I32Be,
            _ => unreachable!(),
        }
    };

    let mut state = State {
        scale: 1.0,
        sign: 0,
        encoding,
    };

    if spec.flags & pcm::IEEE_FLOAT == 0 {
        // The sign-flip mask sits at the top of the sample's container
        // width (bit 31 for 24-bit samples assembled into the high bytes).
        let container_bits = (spec.bytes_per_sample * 8).next_power_of_two();
        state.sign = if spec.flags & pcm::SIGNED_INT != 0 {
            0
        } else {
            1u32 << (container_bits - 1)
        };
        state.scale = if spec.flags & pcm::ALIGNED_HIGH != 0 {
            compute_scale(spec.bytes_per_sample * 8)
        } else {
            compute_scale(spec.bits_per_sample)
        };
    }
    Ok(state)
}

fn convert_samples(state: &State, src: &[u8], dst: &mut [f32]) {
    let scale = state.scale;
    let sign = state.sign;

    match state.encoding {
        Encoding::I8 => {
            let sign = sign as u8;
            for (out, &b) in dst.iter_mut().zip(src) {
                *out = f32::from((b ^ sign) as i8) * scale;
            }
        }
        Encoding::I16Le => {
            let sign = sign as u16;
            for (out, b) in dst.iter_mut().zip(src.chunks_exact(2)) {
                let x = (u16::from_le_bytes([b[0], b[1]]) ^ sign) as i16;
                *out = f32::from(x) * scale;
            }
        }
        Encoding::I16Be => {
            let sign = sign as u16;
            for (out, b) in dst.iter_mut().zip(src.chunks_exact(2)) {
                let x = (u16::from_be_bytes([b[0], b[1]]) ^ sign) as i16;
                *out = f32::from(x) * scale;
            }
        }
        Encoding::I24Le => {
            for (out, b) in dst.iter_mut().zip(src.chunks_exact(3)) {
                let x = (u32::from(b[0]) << 8) | (u32::from(b[1]) << 16) | (u32::from(b[2]) << 24);
                *out = ((x ^ sign) as i32 >> 8) as f32 * scale;
            }
        }
        Encoding::I24Be => {
            for (out, b) in dst.iter_mut().zip(src.chunks_exact(3)) {
                let x = (u32::from(b[0]) << 24) | (u32::from(b[1]) << 16) | (u32::from(b[2]) << 8);
                *out = ((x ^ sign) as i32 >> 8) as f32 * scale;
            }
        }
        Encoding::I32Le => {
            for (out, b) in dst.iter_mut().zip(src.chunks_exact(4)) {
                let x = (u32::from_le_bytes([b[0], b[1], b[2], b[3]]) ^ sign) as i32;
                *out = x as f32 * scale;
            }
        }
        Encoding::I32Be => {
            for (out, b) in dst.iter_mut().zip(src.chunks_exact(4)) {
                let x = (u32::from_be_bytes([b[0], b[1], b[2], b[3]]) ^ sign) as i32;
                *out = x as f32 * scale;
            }
        }
        Encoding::F32Le => {
            for (out, b) in dst.iter_mut().zip(src.chunks_exact(4)) {
                *out = f32::from_bits(u32::from_le_bytes([b[0], b[1], b[2], b[3]]));
            }
        }
        Encoding::F32Be => {
            for (out, b) in dst.iter_mut().zip(src.chunks_exact(4)) {
                *out = f32::from_bits(u32::from_be_bytes([b[0], b[1], b[2], b[3]]));
            }
        }
        Encoding::F64Le => {
            for (out, b) in dst.iter_mut().zip(src.chunks_exact(8)) {
                let bits = u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
                *out = f64::from_bits(bits) as f32;
            }
        }
        Encoding::F64Be => {
            for (out, b) in dst.iter_mut().zip(src.chunks_exact(8)) {
                let bits = u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
                *out = f64::from_bits(bits) as f32;
            }
        }
    }
}

/// Converts raw PCM of one fixed spec into interleaved f32 packets.
pub struct Blitter {
    channels: u32,
    state: State,
    interleaved: bool,
    plane: Vec<f32>,
}

impl Blitter {
    pub fn new(spec: &Spec) -> Result<Self> {
        Ok(Blitter {
            channels: spec.channels,
            state: make_state(spec)?,
            interleaved: spec.flags & pcm::NON_INTERLEAVED == 0,
            plane: Vec::new(),
        })
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    /// Converts `frames` frames of raw samples into `pkt`.
    ///
    /// For non-interleaved input, `src` holds each channel plane
    /// back-to-back.
    pub fn convert(&mut self, src: &[u8], frames: usize, pkt: &mut Packet) {
        if frames == 0 {
            pkt.resize(0);
            return;
        }

        let channels = self.channels as usize;
        let samples = frames * channels;
        pkt.resize(samples);

        if self.interleaved {
            convert_samples(&self.state, src, pkt.data_mut());
            return;
        }

        let plane_bytes = frames * self.state.encoding.sample_size();
        if channels == 1 {
            convert_samples(&self.state, &src[..plane_bytes], pkt.data_mut());
            return;
        }

        if channels == 2 {
            // Single-pass interleave of the two planes.
            self.plane.resize(frames * 2, 0.0);
            let (left, right) = self.plane.split_at_mut(frames);
            convert_samples(&self.state, &src[..plane_bytes], left);
            convert_samples(&self.state, &src[plane_bytes..2 * plane_bytes], right);

            let dst = pkt.data_mut();
            for (i, (&l, &r)) in left.iter().zip(right.iter()).enumerate() {
                dst[i * 2] = l;
                dst[i * 2 + 1] = r;
            }
            return;
        }

        self.plane.resize(frames, 0.0);
        for c in 0..channels {
            let plane_src = &src[c * plane_bytes..(c + 1) * plane_bytes];
            convert_samples(&self.state, plane_src, &mut self.plane);

            let dst = pkt.data_mut();
            for (i, &sample) in self.plane.iter().enumerate() {
                dst[i * channels + c] = sample;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(bytes: u32, bits: u32, channels: u32, flags: u32) -> Spec {
        Spec {
            bytes_per_sample: bytes,
            bits_per_sample: bits,
            channels,
            flags,
        }
    }

    fn convert(spec: &Spec, src: &[u8], frames: usize) -> Vec<f32> {
        let mut blitter = Blitter::new(spec).unwrap();
        let mut pkt = Packet::new();
        blitter.convert(src, frames, &mut pkt);
        pkt.data().to_vec()
    }

    #[test]
    fn produces_frames_times_channels_samples() {
        let out = convert(
            &spec(2, 16, 2, pcm::SIGNED_INT),
            &[0u8; 4 * 7],
            7,
        );
        assert_eq!(out.len(), 14);
    }

    #[test]
    fn signed_16_bit_le_scales_to_unit_range() {
        let mut src = Vec::new();
        for value in [0i16, 16384, -16384, 32767, -32768] {
            src.extend_from_slice(&value.to_le_bytes());
        }
        let out = convert(&spec(2, 16, 1, pcm::SIGNED_INT), &src, 5);
        assert_eq!(out[0], 0.0);
        assert!((out[1] - 0.5).abs() < 1e-6);
        assert!((out[2] + 0.5).abs() < 1e-6);
        assert!(out[3] <= 1.0 && out[3] > 0.9999);
        assert_eq!(out[4], -1.0);
    }

    #[test]
    fn unsigned_8_bit_centers_on_zero() {
        let out = convert(&spec(1, 8, 1, 0), &[0x80, 0x00, 0xff], 3);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], -1.0);
        assert!(out[2] > 0.99);
    }

    #[test]
    fn packed_24_bit_big_endian_converts() {
        // +0x400000 is half scale in signed 24-bit.
        let src = [0x40, 0x00, 0x00, 0xc0, 0x00, 0x00];
        let out = convert(
            &spec(3, 24, 1, pcm::SIGNED_INT | pcm::BIG_ENDIAN),
            &src,
            2,
        );
        assert!((out[0] - 0.5).abs() < 1e-6);
        assert!((out[1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn aligned_high_uses_the_container_width() {
        // 20 significant bits in a 24-bit container, aligned high: the
        // scale follows the container, not the declared bit depth.
        let src = [0x40, 0x00, 0x00];
        let out = convert(
            &spec(
                3,
                20,
                1,
                pcm::SIGNED_INT | pcm::BIG_ENDIAN | pcm::ALIGNED_HIGH,
            ),
            &src,
            1,
        );
        assert!((out[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn float_input_passes_through() {
        let mut src = Vec::new();
        for value in [0.25f32, -0.75] {
            src.extend_from_slice(&value.to_le_bytes());
        }
        let out = convert(&spec(4, 32, 1, pcm::IEEE_FLOAT), &src, 2);
        assert_eq!(out, vec![0.25, -0.75]);

        let mut src = Vec::new();
        for value in [0.5f64, -1.0] {
            src.extend_from_slice(&value.to_be_bytes());
        }
        let out = convert(
            &spec(8, 64, 1, pcm::IEEE_FLOAT | pcm::BIG_ENDIAN),
            &src,
            2,
        );
        assert_eq!(out, vec![0.5, -1.0]);
    }

    #[test]
    fn planar_stereo_interleaves() {
        let mut src = Vec::new();
        for value in [100i16, 200, 300] {
            src.extend_from_slice(&value.to_le_bytes());
        }
        for value in [-100i16, -200, -300] {
            src.extend_from_slice(&value.to_le_bytes());
        }

        let out = convert(
            &spec(2, 16, 2, pcm::SIGNED_INT | pcm::NON_INTERLEAVED),
            &src,
            3,
        );
        let scale = 1.0 / 32768.0;
        let expected: Vec<f32> = [100i16, -100, 200, -200, 300, -300]
            .iter()
            .map(|&v| f32::from(v) * scale)
            .collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn invalid_specs_are_rejected() {
        assert!(Blitter::new(&spec(5, 40, 1, pcm::SIGNED_INT)).is_err());
        assert!(Blitter::new(&spec(2, 24, 1, pcm::SIGNED_INT)).is_err());
        assert!(Blitter::new(&spec(2, 16, 0, pcm::SIGNED_INT)).is_err());
        assert!(Blitter::new(&spec(2, 16, 9, pcm::SIGNED_INT)).is_err());
        assert!(Blitter::new(&spec(3, 24, 1, pcm::IEEE_FLOAT)).is_err());
    }
}
