//! Channel layout remapping through a mixing matrix.
//!
//! The matrix is assembled over the eighteen canonical speaker positions
//! and then compacted to the channels actually present. When the largest
//! row's absolute sum exceeds unity, the whole matrix is rescaled by its
//! reciprocal so mixing can never clip.

use encore_common::{Error, Result};
use encore_demux::format::MAX_CHANNELS;

use encore_codec::Packet;

use crate::filter::{AudioFormat, Filter};

// Position indices, matching the channel bitmask bit order.
const FL: usize = 0;
const FR: usize = 1;
const FC: usize = 2;
#[allow(dead_code)]
const LFE: usize = 3;
const BL: usize = 4;
const BR: usize = 5;
const FLC: usize = 6;
const FRC: usize = 7;
const BC: usize = 8;
const SL: usize = 9;
const SR: usize = 10;
const TFL: usize = 12;
const TFR: usize = 14;
const TBL: usize = 15;
const TBR: usize = 17;

const POSITIONS: usize = 18;
const SQRT1_2: f32 = std::f32::consts::FRAC_1_SQRT_2;

fn bit(position: usize) -> u32 {
    1 << position
}

/// Within each stereo pair, either both or neither position is present.
fn is_pair_balanced(layout: u32, a: usize, b: usize) -> bool {
    let masked = layout & (bit(a) | bit(b));
    masked == 0 || masked.count_ones() == 2
}

fn is_balanced(layout: u32) -> bool {
    layout & (bit(FL) | bit(FR) | bit(FC)) != 0
        && is_pair_balanced(layout, FL, FR)
        && is_pair_balanced(layout, BL, BR)
        && is_pair_balanced(layout, SL, SR)
        && is_pair_balanced(layout, FLC, FRC)
        && is_pair_balanced(layout, TFL, TFR)
        && is_pair_balanced(layout, TBL, TBR)
}

type Matrix = [[f32; MAX_CHANNELS as usize]; MAX_CHANNELS as usize];

fn build_matrix(src_layout: u32, dst_layout: u32) -> Result<Matrix> {
    if !is_balanced(src_layout) || !is_balanced(dst_layout) {
        return Err(Error::unsupported_format(
            "cannot mix unbalanced channel layouts",
        ));
    }

    let same = src_layout & dst_layout;
    let diff = src_layout & !dst_layout;
    let has_src = |p: usize| src_layout & bit(p) != 0;
    let has_dst = |p: usize| dst_layout & bit(p) != 0;

    let mut matrix = [[0f32; POSITIONS]; POSITIONS];
    for i in 0..POSITIONS {
        if same & bit(i) != 0 {
            matrix[i][i] = 1.0;
        }
    }

    if diff & bit(FC) != 0 {
        matrix[FL][FC] += SQRT1_2;
        matrix[FR][FC] += SQRT1_2;
    }

    if diff & bit(FL) != 0 && has_dst(FC) {
        matrix[FC][FL] += SQRT1_2;
        matrix[FC][FR] += SQRT1_2;
        if has_src(FC) {
            matrix[FC][FC] = 1.0;
        }
    }

    if diff & bit(BC) != 0 {
        if has_dst(BL) {
            matrix[BL][BC] += SQRT1_2;
            matrix[BR][BC] += SQRT1_2;
        } else if has_dst(SL) {
            matrix[SL][BC] += SQRT1_2;
            matrix[SR][BC] += SQRT1_2;
        } else if has_dst(FL) {
            matrix[FL][BC] += 0.5;
            matrix[FR][BC] += 0.5;
        } else if has_dst(FC) {
            matrix[FC][BC] += 0.5;
        }
    }

    if diff & bit(BL) != 0 {
        if has_dst(BC) {
            matrix[BC][BL] += SQRT1_2;
            matrix[BC][BR] += SQRT1_2;
        } else if has_dst(SL) {
            if has_src(SL) {
                matrix[SL][BL] += SQRT1_2;
                matrix[SR][BR] += SQRT1_2;
            } else {
                matrix[SL][BL] += 1.0;
                matrix[SR][BR] += 1.0;
            }
        } else if has_dst(FL) {
            matrix[FL][BL] += 0.5;
            matrix[FR][BR] += 0.5;
        } else if has_dst(FC) {
            matrix[FC][BL] += 0.5;
            matrix[FC][BR] += 0.5;
        }
    }

    if diff & bit(SL) != 0 {
        if has_dst(BL) {
            if has_src(BL) {
                matrix[BL][SL] += SQRT1_2;
                matrix[BR][SR] += SQRT1_2;
            } else {
                matrix[BL][SL] += 1.0;
                matrix[BR][SR] += 1.0;
            }
        } else if has_dst(BC) {
            matrix[BC][SL] += SQRT1_2;
            matrix[BC][SR] += SQRT1_2;
        } else if has_dst(FL) {
            matrix[FL][SL] += 0.5;
            matrix[FR][SR] += 0.5;
        } else if has_dst(FC) {
            matrix[FC][SL] += 0.5;
            matrix[FC][SR] += 0.5;
        }
    }

    if diff & bit(FLC) != 0 {
        if has_dst(FL) {
            matrix[FL][FLC] += 1.0;
            matrix[FR][FRC] += 1.0;
        } else if has_dst(FC) {
            matrix[FC][FLC] += SQRT1_2;
            matrix[FC][FRC] += SQRT1_2;
        }
    }

    // Compact to the present channels and find the loudest output row.
    let mut out = [[0f32; MAX_CHANNELS as usize]; MAX_CHANNELS as usize];
    let mut max_coeff = 0f32;
    let mut out_i = 0;

    for i in 0..POSITIONS {
        let mut coeff = 0f32;
        let mut out_j = 0;

        for j in 0..POSITIONS {
            coeff += matrix[i][j].abs();
            if src_layout & bit(j) != 0 {
                out[out_i][out_j] = matrix[i][j];
                out_j += 1;
            }
        }

        max_coeff = max_coeff.max(coeff);
        if dst_layout & bit(i) != 0 {
            out_i += 1;
        }
    }

    if max_coeff > 1.0 {
        let scale = 1.0 / max_coeff;
        for row in &mut out {
            for value in row {
                *value *= scale;
            }
        }
    }
    Ok(out)
}

fn mix(
    src: &[f32],
    dst: &mut [f32],
    matrix: &Matrix,
    src_channels: usize,
    dst_channels: usize,
) {
    for (in_frame, out_frame) in src
        .chunks_exact(src_channels)
        .zip(dst.chunks_exact_mut(dst_channels))
    {
        for (i, out) in out_frame.iter_mut().enumerate() {
            let mut acc = 0f32;
            for (j, &sample) in in_frame.iter().enumerate() {
                acc = sample.mul_add(matrix[i][j], acc);
            }
            *out = acc;
        }
    }
}

pub struct ChannelMixer {
    dst_channels: u32,
    dst_channel_layout: u32,
    src_channels: u32,
    matrix: Matrix,
    tmp: Packet,
}

impl ChannelMixer {
    pub fn new(dst: &AudioFormat) -> Result<Self> {
        Ok(ChannelMixer {
            dst_channels: dst.channels,
            dst_channel_layout: dst.channel_layout,
            src_channels: 0,
            matrix: [[0.0; MAX_CHANNELS as usize]; MAX_CHANNELS as usize],
            tmp: Packet::new(),
        })
    }

    #[cfg(test)]
    fn matrix(&self) -> &Matrix {
        &self.matrix
    }
}

impl Filter for ChannelMixer {
    fn calibrate(&mut self, fmt: &mut AudioFormat) -> Result<()> {
        self.matrix = build_matrix(fmt.channel_layout, self.dst_channel_layout)?;
        self.src_channels = fmt.channels;
        fmt.channels = self.dst_channels;
        fmt.channel_layout = self.dst_channel_layout;
        Ok(())
    }

    fn process(&mut self, pkt: &mut Packet) -> Result<()> {
        let frames = pkt.frames();
        pkt.swap_data(&mut self.tmp);
        pkt.set_bit_rate(self.tmp.bit_rate());
        pkt.set_channel_layout_and_count(self.dst_channel_layout, self.dst_channels);
        pkt.resize(frames * self.dst_channels as usize);

        mix(
            self.tmp.data(),
            pkt.data_mut(),
            &self.matrix,
            self.src_channels as usize,
            self.dst_channels as usize,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encore_demux::format::channel;

    fn stereo() -> AudioFormat {
        AudioFormat {
            sample_rate: 44_100,
            channels: 2,
            channel_layout: channel::STEREO,
        }
    }

    #[test]
    fn five_one_to_stereo_matches_the_reference_matrix() {
        let mut mixer = ChannelMixer::new(&stereo()).unwrap();
        let mut fmt = AudioFormat {
            sample_rate: 44_100,
            channels: 6,
            channel_layout: channel::SURROUND_5_1,
        };
        mixer.calibrate(&mut fmt).unwrap();
        assert_eq!(fmt.channels, 2);
        assert_eq!(fmt.channel_layout, channel::STEREO);

        // Source order: FL FR FC LFE BL BR. Before normalization the rows
        // are FL_out = 1·FL + √½·FC + ½·BL and the FR mirror; the maximum
        // row sum 1 + √½ + ½ rescales every coefficient.
        let matrix = mixer.matrix();
        let scale = 1.0 / (1.0 + SQRT1_2 + 0.5);

        let expect = |value: f32, reference: f32| {
            assert!((value - reference).abs() < 1e-6, "{value} vs {reference}");
        };
        expect(matrix[0][0], 1.0 * scale); // FL ← FL
        expect(matrix[0][2], SQRT1_2 * scale); // FL ← FC
        expect(matrix[0][4], 0.5 * scale); // FL ← BL
        expect(matrix[0][1], 0.0); // FL ← FR
        expect(matrix[0][3], 0.0); // FL ← LFE
        expect(matrix[1][1], 1.0 * scale); // FR ← FR
        expect(matrix[1][2], SQRT1_2 * scale); // FR ← FC
        expect(matrix[1][5], 0.5 * scale); // FR ← BR
    }

    #[test]
    fn mixing_applies_the_matrix_per_frame() {
        let mut mixer = ChannelMixer::new(&stereo()).unwrap();
        let mut fmt = AudioFormat {
            sample_rate: 44_100,
            channels: 3,
            channel_layout: channel::FL | channel::FR | channel::FC,
        };
        mixer.calibrate(&mut fmt).unwrap();

        let mut pkt = Packet::new();
        pkt.set_channel_layout(channel::FL | channel::FR | channel::FC);
        // One frame: FL=0.2, FR=0.4, FC=0.6.
        pkt.append(&[0.2, 0.4, 0.6]);
        mixer.process(&mut pkt).unwrap();

        assert_eq!(pkt.frames(), 1);
        assert_eq!(pkt.channels(), 2);

        let scale = 1.0 / (1.0 + SQRT1_2);
        let expected_l = (0.2 + SQRT1_2 * 0.6) * scale;
        let expected_r = (0.4 + SQRT1_2 * 0.6) * scale;
        assert!((pkt.data()[0] - expected_l).abs() < 1e-6);
        assert!((pkt.data()[1] - expected_r).abs() < 1e-6);
    }

    #[test]
    fn upmix_mono_to_stereo_splits_the_center() {
        let mut mixer = ChannelMixer::new(&stereo()).unwrap();
        let mut fmt = AudioFormat {
            sample_rate: 44_100,
            channels: 1,
            channel_layout: channel::MONO,
        };
        mixer.calibrate(&mut fmt).unwrap();

        let matrix = mixer.matrix();
        assert!((matrix[0][0] - SQRT1_2).abs() < 1e-6);
        assert!((matrix[1][0] - SQRT1_2).abs() < 1e-6);
    }

    #[test]
    fn unbalanced_layouts_are_rejected() {
        let mut mixer = ChannelMixer::new(&stereo()).unwrap();
        let mut fmt = AudioFormat {
            sample_rate: 44_100,
            channels: 2,
            channel_layout: channel::FL | channel::BC, // FR missing
        };
        assert!(mixer.calibrate(&mut fmt).is_err());
    }
}
