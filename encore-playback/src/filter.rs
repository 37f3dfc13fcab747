//! The ordered filter pipeline between decoder and sink.

use std::sync::RwLock;

use once_cell::sync::Lazy;

use encore_common::registry::{self, Registry};
use encore_common::{Error, Result, UStr};
use encore_demux::format::{MAX_CHANNELS, MIN_CHANNELS};

use encore_codec::Packet;

use crate::channel_mixer::ChannelMixer;
use crate::replaygain::{ReplayGainConfig, ReplayGainFilter, ReplayGainInfo};

/// The uncompressed stream format flowing between filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u32,
    pub channel_layout: u32,
}

impl AudioFormat {
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
        if self.channel_layout != 0 && self.channel_layout.count_ones() != self.channels {
            return Err(Error::unsupported_format(
                "channel layout does not match channel count",
            ));
        }
        Ok(())
    }
}

/// One stage of the pipeline.
pub trait Filter: Send {
    /// Validates the input format and mutates it into the output format.
    fn calibrate(&mut self, fmt: &mut AudioFormat) -> Result<()>;

    /// Transforms a packet in place.
    fn process(&mut self, pkt: &mut Packet) -> Result<()>;

    /// Appends any tail samples at end of stream.
    fn drain(&mut self, pkt: &mut Packet) -> Result<()> {
        let _ = pkt;
        Ok(())
    }

    /// Discards internal state after a seek.
    fn flush(&mut self) {}

    /// Frames still owed to downstream.
    fn latency(&self) -> u64 {
        0
    }
}

pub type FilterFactory = fn() -> Box<dyn Filter>;

static FILTER_FACTORIES: Lazy<RwLock<Registry<&'static str, FilterFactory>>> =
    Lazy::new(|| RwLock::new(Registry::new()));

/// Registers a user-selectable filter under an identifier.
pub fn register_filter(id: &'static str, factory: FilterFactory) {
    FILTER_FACTORIES.write().unwrap().register(id, factory);
}

/// Creates a resampler targeting `dst_rate`, calibrating `fmt` through it.
pub type ResamplerFactory = fn(&mut AudioFormat, u32) -> Result<Box<dyn Filter>>;

static RESAMPLER_FACTORIES: Lazy<RwLock<Vec<ResamplerFactory>>> = Lazy::new(|| {
    RwLock::new(vec![crate::resampler::make_resampler as ResamplerFactory])
});

pub fn register_resampler(factory: ResamplerFactory) {
    RESAMPLER_FACTORIES.write().unwrap().push(factory);
}

fn make_resampler(fmt: &mut AudioFormat, dst_rate: u32) -> Result<Box<dyn Filter>> {
    let factories = RESAMPLER_FACTORIES.read().unwrap();
    registry::try_each(
        factories.iter(),
        || Error::failure("no audio resampler available"),
        |factory| factory(fmt, dst_rate),
    )
}

/// The ordered filter pipeline plus the trailing ReplayGain scaler.
#[derive(Default)]
pub struct FilterChain {
    elems: Vec<Box<dyn Filter>>,
    rgain: ReplayGainFilter,
}

impl FilterChain {
    pub fn new() -> Self {
        FilterChain {
            elems: Vec::new(),
            rgain: ReplayGainFilter::new(),
        }
    }

    /// Re-instantiates the user-configured filters and ReplayGain config.
    pub fn rebuild(&mut self, preset: &[UStr], config: ReplayGainConfig) {
        self.elems.clear();
        let registry = FILTER_FACTORIES.read().unwrap();
        for id in preset {
            if let Some(factory) = registry.find(id).next() {
                self.elems.push(factory());
            }
        }
        self.rgain.reset(config);
    }

    /// Calibrates the chain from `src`, appending a channel mixer and a
    /// resampler when the result still differs from the sink's format.
    pub fn calibrate(
        &mut self,
        src: &AudioFormat,
        dst: &AudioFormat,
        info: &ReplayGainInfo,
    ) -> Result<()> {
        let mut fmt = *src;
        fmt.validate()?;

        for elem in &mut self.elems {
            elem.calibrate(&mut fmt)?;
            fmt.validate()?;
        }

        if fmt.channel_layout != dst.channel_layout {
            let mut mixer = Box::new(ChannelMixer::new(dst)?);
            mixer.calibrate(&mut fmt)?;
            self.elems.push(mixer);
        }
        if fmt.sample_rate != dst.sample_rate {
            self.elems.push(make_resampler(&mut fmt, dst.sample_rate)?);
        }
        self.rgain.calibrate(info);
        Ok(())
    }

    pub fn process(&mut self, pkt: &mut Packet) -> Result<()> {
        for elem in &mut self.elems {
            elem.process(pkt)?;
        }
        self.rgain.process(pkt);
        Ok(())
    }

    /// Drains every stage's tail through the remainder of the chain.
    pub fn drain(&mut self, pkt: &mut Packet) -> Result<()> {
        let mut tmp = Packet::new();
        tmp.set_channel_layout_and_count(pkt.channel_layout(), pkt.channels());

        for first in 0..self.elems.len() {
            self.elems[first].drain(&mut tmp)?;

            if !tmp.is_empty() {
                for next in (first + 1)..self.elems.len() {
                    self.elems[next].process(&mut tmp)?;
                }
                pkt.append(tmp.data());
                tmp.clear();
            }
        }
        self.rgain.process(pkt);
        Ok(())
    }

    pub fn flush(&mut self) {
        for elem in &mut self.elems {
            elem.flush();
        }
    }

    pub fn latency(&self) -> u64 {
        self.elems.iter().map(|e| e.latency()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encore_demux::format::channel;

    #[test]
    fn calibrate_appends_mixer_and_resampler_as_needed() {
        let src = AudioFormat {
            sample_rate: 48_000,
            channels: 6,
            channel_layout: channel::SURROUND_5_1,
        };
        let dst = AudioFormat {
            sample_rate: 44_100,
            channels: 2,
            channel_layout: channel::STEREO,
        };

        let mut chain = FilterChain::new();
        chain.rebuild(&[], ReplayGainConfig::default());
        chain
            .calibrate(&src, &dst, &ReplayGainInfo::default())
            .unwrap();

        // Channel mixer plus resampler.
        assert_eq!(chain.elems.len(), 2);
    }

    #[test]
    fn matched_formats_need_no_extra_stages() {
        let fmt = AudioFormat {
            sample_rate: 44_100,
            channels: 2,
            channel_layout: channel::STEREO,
        };

        let mut chain = FilterChain::new();
        chain.rebuild(&[], ReplayGainConfig::default());
        chain
            .calibrate(&fmt, &fmt, &ReplayGainInfo::default())
            .unwrap();
        assert!(chain.elems.is_empty());

        let mut pkt = Packet::new();
        pkt.set_channel_layout(channel::STEREO);
        pkt.append(&[0.1, 0.2, 0.3, 0.4]);
        chain.process(&mut pkt).unwrap();
        assert_eq!(pkt.data(), &[0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn invalid_source_formats_are_rejected() {
        let bad = AudioFormat {
            sample_rate: 0,
            channels: 2,
            channel_layout: channel::STEREO,
        };
        let dst = AudioFormat {
            sample_rate: 44_100,
            channels: 2,
            channel_layout: channel::STEREO,
        };

        let mut chain = FilterChain::new();
        assert!(chain
            .calibrate(&bad, &dst, &ReplayGainInfo::default())
            .is_err());
    }
}
