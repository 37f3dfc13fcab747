//! ReplayGain loudness normalization: tag extraction, scale computation
//! and the in-place scaling filter.

use encore_demux::dict::Dictionary;
use encore_demux::tags;

use encore_codec::Packet;

fn to_amplitude(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

fn parse_gain(dict: &Dictionary, key: &str) -> Option<f32> {
    let value = dict.get(key)?;
    // Values are written as "-6.50 dB"; trailing units are ignored.
    let text = value.as_str().trim();
    let number: String = text
        .chars()
        .take_while(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'))
        .collect();
    let parsed: f32 = number.parse().ok()?;
    parsed.is_finite().then_some(parsed)
}

/// Gain and peak values read from a track's tags.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayGainInfo {
    album_gain: Option<f32>,
    album_peak: Option<f32>,
    track_gain: Option<f32>,
    track_peak: Option<f32>,
}

impl ReplayGainInfo {
    pub fn from_tags(dict: &Dictionary) -> Self {
        ReplayGainInfo {
            album_gain: parse_gain(dict, tags::RG_ALBUM_GAIN),
            album_peak: parse_gain(dict, tags::RG_ALBUM_PEAK),
            track_gain: parse_gain(dict, tags::RG_TRACK_GAIN),
            track_peak: parse_gain(dict, tags::RG_TRACK_PEAK),
        }
    }

    // A missing value falls back to the other dimension, then the default.
    pub fn album_gain(&self) -> f32 {
        self.album_gain.or(self.track_gain).unwrap_or(0.0)
    }

    pub fn album_peak(&self) -> f32 {
        self.album_peak.or(self.track_peak).unwrap_or(1.0)
    }

    pub fn track_gain(&self) -> f32 {
        self.track_gain.or(self.album_gain).unwrap_or(0.0)
    }

    pub fn track_peak(&self) -> f32 {
        self.track_peak.or(self.album_peak).unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayGainMode {
    #[default]
    None,
    Track,
    Album,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayGainConfig {
    pub mode: ReplayGainMode,
    /// Additional gain in dB applied on top of the stored value.
    pub preamp: f32,
}

impl ReplayGainConfig {
    pub fn new(mode: ReplayGainMode, preamp: f32) -> Self {
        ReplayGainConfig { mode, preamp }
    }

    pub fn compute_scale(&self, info: &ReplayGainInfo) -> f32 {
        let (gain, peak) = match self.mode {
            ReplayGainMode::Track => (info.track_gain(), info.track_peak()),
            ReplayGainMode::Album => (info.album_gain(), info.album_peak()),
            ReplayGainMode::None => return 1.0,
        };

        let mut scale = to_amplitude(gain + self.preamp);
        if scale * peak > 1.0 {
            scale = 1.0 / peak;
        }
        scale
    }
}

/// Applies the computed scale and clamps to [-1, 1].
#[derive(Default)]
pub struct ReplayGainFilter {
    scale: f32,
    config: ReplayGainConfig,
}

impl ReplayGainFilter {
    pub fn new() -> Self {
        ReplayGainFilter {
            scale: 1.0,
            config: ReplayGainConfig::default(),
        }
    }

    pub fn reset(&mut self, config: ReplayGainConfig) {
        self.config = config;
    }

    pub fn calibrate(&mut self, info: &ReplayGainInfo) {
        self.scale = self.config.compute_scale(info);
    }

    pub fn process(&self, pkt: &mut Packet) {
        if self.scale == 1.0 {
            return;
        }

        let scale = self.scale;
        for sample in pkt.data_mut() {
            *sample = (*sample * scale).clamp(-1.0, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encore_common::UStr;

    fn tags_with(entries: &[(&str, &str)]) -> Dictionary {
        let mut dict = Dictionary::new();
        for (k, v) in entries {
            dict.insert(UStr::intern(k), UStr::new(*v));
        }
        dict
    }

    #[test]
    fn scale_honors_preamp_and_peak_clip() {
        let info = ReplayGainInfo::from_tags(&tags_with(&[
            (tags::RG_TRACK_GAIN, "-6.0 dB"),
            (tags::RG_TRACK_PEAK, "0.9"),
        ]));

        // -6 dB + 3 dB preamp: scale stays below the peak ceiling.
        let config = ReplayGainConfig::new(ReplayGainMode::Track, 3.0);
        let scale = config.compute_scale(&info);
        assert!((scale - 0.7079).abs() < 1e-3);
        assert!(scale * 0.9 <= 1.0);

        // +9 dB preamp pushes past the peak; clip to 1/peak.
        let config = ReplayGainConfig::new(ReplayGainMode::Track, 9.0);
        let scale = config.compute_scale(&info);
        assert!((scale - 1.0 / 0.9).abs() < 1e-4);
    }

    #[test]
    fn missing_dimension_falls_back_to_the_other() {
        let info = ReplayGainInfo::from_tags(&tags_with(&[
            (tags::RG_ALBUM_GAIN, "-3.5 dB"),
            (tags::RG_ALBUM_PEAK, "0.8"),
        ]));
        assert_eq!(info.track_gain(), -3.5);
        assert_eq!(info.track_peak(), 0.8);

        let info = ReplayGainInfo::from_tags(&Dictionary::new());
        assert_eq!(info.track_gain(), 0.0);
        assert_eq!(info.track_peak(), 1.0);
    }

    #[test]
    fn disabled_mode_is_unity() {
        let config = ReplayGainConfig::default();
        assert_eq!(config.compute_scale(&ReplayGainInfo::default()), 1.0);
    }

    #[test]
    fn processing_clamps_after_scaling() {
        let mut filter = ReplayGainFilter::new();
        filter.reset(ReplayGainConfig::new(ReplayGainMode::Track, 12.0));
        filter.calibrate(&ReplayGainInfo::from_tags(&tags_with(&[
            (tags::RG_TRACK_GAIN, "0.0"),
            // Peak of 0.1 permits a large scale; clamping still applies.
            (tags::RG_TRACK_PEAK, "0.1"),
        ])));

        let mut pkt = Packet::new();
        pkt.set_channel_layout(0b1);
        pkt.append(&[0.5, -0.5, 0.05]);
        filter.process(&mut pkt);

        assert_eq!(pkt.data()[0], 1.0);
        assert_eq!(pkt.data()[1], -1.0);
        assert!(pkt.data()[2] < 0.3);
    }
}
