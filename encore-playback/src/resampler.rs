//! Sample-rate conversion behind the [`Filter`] contract, backed by the
//! `rubato` sinc resampler.
//!
//! Rubato consumes fixed-size planar chunks, so the filter deinterleaves
//! into per-channel staging buffers and emits whole chunks as they fill.
//! `drain` pads the final partial chunk with silence.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use encore_common::{Error, Result};
use encore_codec::Packet;

use crate::filter::{AudioFormat, Filter};

const CHUNK_FRAMES: usize = 1024;

fn sinc_parameters() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    }
}

fn make_inner(ratio: f64, channels: usize) -> Result<SincFixedIn<f32>> {
    SincFixedIn::<f32>::new(ratio, 8.0, sinc_parameters(), CHUNK_FRAMES, channels)
        .map_err(|e| Error::unsupported_format(format!("cannot resample: {e}")))
}

/// Creates a calibrated resampler filter targeting `dst_rate`.
pub fn make_resampler(fmt: &mut AudioFormat, dst_rate: u32) -> Result<Box<dyn Filter>> {
    let mut filter = ResamplerFilter {
        inner: None,
        channels: 0,
        ratio: 1.0,
        dst_rate,
        input: Vec::new(),
    };
    filter.calibrate(fmt)?;
    Ok(Box::new(filter))
}

pub struct ResamplerFilter {
    inner: Option<SincFixedIn<f32>>,
    channels: usize,
    ratio: f64,
    dst_rate: u32,
    input: Vec<Vec<f32>>,
}

impl ResamplerFilter {
    fn process_chunks(&mut self, pad_tail: bool, out: &mut Vec<f32>) -> Result<()> {
        let inner = match self.inner.as_mut() {
            Some(inner) => inner,
            None => return Ok(()),
        };

        if pad_tail && !self.input[0].is_empty() {
            let missing = CHUNK_FRAMES - self.input[0].len() % CHUNK_FRAMES;
            if missing != CHUNK_FRAMES {
                for plane in &mut self.input {
                    plane.extend(std::iter::repeat(0.0).take(missing));
                }
            }
        }

        while self.input[0].len() >= CHUNK_FRAMES {
            let chunk: Vec<Vec<f32>> = self
                .input
                .iter_mut()
                .map(|plane| plane.drain(..CHUNK_FRAMES).collect())
                .collect();

            let resampled = inner
                .process(&chunk, None)
                .map_err(|e| Error::failure(format!("resampling failed: {e}")))?;

            let frames = resampled[0].len();
            for i in 0..frames {
                for plane in &resampled {
                    out.push(plane[i]);
                }
            }
        }
        Ok(())
    }
}

impl Filter for ResamplerFilter {
    fn calibrate(&mut self, fmt: &mut AudioFormat) -> Result<()> {
        if fmt.sample_rate == 0 {
            return Err(Error::unsupported_format("sample rate must be non-zero"));
        }

        self.channels = fmt.channels as usize;
        self.ratio = f64::from(self.dst_rate) / f64::from(fmt.sample_rate);
        self.inner = Some(make_inner(self.ratio, self.channels)?);
        self.input = vec![Vec::new(); self.channels];

        fmt.sample_rate = self.dst_rate;
        Ok(())
    }

    fn process(&mut self, pkt: &mut Packet) -> Result<()> {
        for frame in pkt.data().chunks_exact(self.channels) {
            for (plane, &sample) in self.input.iter_mut().zip(frame) {
                plane.push(sample);
            }
        }

        let mut out = Vec::new();
        self.process_chunks(false, &mut out)?;

        pkt.resize(out.len());
        pkt.data_mut().copy_from_slice(&out);
        Ok(())
    }

    fn drain(&mut self, pkt: &mut Packet) -> Result<()> {
        let mut out = Vec::new();
        self.process_chunks(true, &mut out)?;
        pkt.append(&out);
        Ok(())
    }

    fn flush(&mut self) {
        for plane in &mut self.input {
            plane.clear();
        }
        // Rebuild the inner resampler so no filter history bleeds across
        // a seek.
        if let Ok(inner) = make_inner(self.ratio, self.channels) {
            self.inner = Some(inner);
        }
    }

    fn latency(&self) -> u64 {
        let pending = self.input.first().map(Vec::len).unwrap_or(0) as f64;
        (pending * self.ratio) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encore_demux::format::channel;

    #[test]
    fn calibration_rewrites_the_sample_rate() {
        let mut fmt = AudioFormat {
            sample_rate: 48_000,
            channels: 2,
            channel_layout: channel::STEREO,
        };
        let _filter = make_resampler(&mut fmt, 44_100).unwrap();
        assert_eq!(fmt.sample_rate, 44_100);
        assert_eq!(fmt.channels, 2);
    }

    #[test]
    fn downsampling_shrinks_the_stream_proportionally() {
        let mut fmt = AudioFormat {
            sample_rate: 48_000,
            channels: 2,
            channel_layout: channel::STEREO,
        };
        let mut filter = make_resampler(&mut fmt, 24_000).unwrap();

        // Feed four seconds' worth of chunks and count output frames.
        let mut produced = 0usize;
        let mut pkt = Packet::new();
        let frames_in = CHUNK_FRAMES * 8;
        for _ in 0..(frames_in / CHUNK_FRAMES) {
            pkt.clear();
            pkt.set_channel_layout(channel::STEREO);
            pkt.append(&vec![0.25f32; CHUNK_FRAMES * 2]);
            filter.process(&mut pkt).unwrap();
            produced += pkt.frames();
        }
        pkt.clear();
        pkt.set_channel_layout(channel::STEREO);
        filter.drain(&mut pkt).unwrap();
        produced += pkt.frames();

        let expected = frames_in / 2;
        let tolerance = CHUNK_FRAMES;
        assert!(
            produced.abs_diff(expected) <= tolerance,
            "{produced} vs {expected}"
        );
    }
}
