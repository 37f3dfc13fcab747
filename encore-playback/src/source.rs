//! The playback source: a demuxer/decoder pair producing f32 packets,
//! with encoder priming and seek pre-roll discarded transparently and an
//! optional chapter window clipped onto the stream.

use encore_common::{Result, UStr};
use encore_demux::demuxer::{self, Demuxer, OpenMode};
use encore_demux::format::channel;
use encore_demux::media::Track;

use encore_codec::decoder::{self, DecodeStatus, Decoder};
use encore_codec::Packet;

use crate::filter::AudioFormat;

pub struct Source {
    demuxer: Box<dyn Demuxer>,
    decoder: Box<dyn Decoder>,
    buffer: Vec<u8>,
    format: AudioFormat,
    /// Frames this source presents (window length or whole stream).
    frames: u64,
    /// Start of the presentation window on the stream timeline.
    window_start: u64,
    /// Decoded frames still to drop before presentable output.
    discard: u64,
    /// Presentable frames delivered so far.
    produced: u64,
    eos: bool,
}

impl Source {
    /// Opens a track's stream for playback.
    pub fn open(location: &UStr, track: &Track) -> Result<Self> {
        let demuxer = demuxer::resolve(location, OpenMode::PLAYBACK)?;
        let decoder = decoder::resolve(demuxer.format())?;

        let fmt = demuxer.format();
        let mut layout = fmt.channel_layout;
        if layout == 0 {
            layout = channel::guess(fmt.channels);
        }
        let format = AudioFormat {
            sample_rate: fmt.sample_rate,
            channels: fmt.channels,
            channel_layout: layout,
        };

        // Chapter tracks present a window into the parent stream.
        let (window_start, frames) = if track.chapter != 0 && track.frames != 0 {
            (track.start_offset, track.frames)
        } else {
            (0, demuxer.total_frames())
        };

        let mut source = Source {
            discard: demuxer.start_offset() + u64::from(decoder.decoder_delay()),
            demuxer,
            decoder,
            buffer: Vec::new(),
            format,
            frames,
            window_start,
            produced: 0,
            eos: false,
        };

        if window_start != 0 {
            source.seek(0)?;
        }
        Ok(source)
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn instant_bit_rate(&self) -> u32 {
        self.demuxer.instant_bit_rate()
    }

    /// Reads the next presentable packet; leaves `pkt` empty at the end of
    /// the (windowed) stream.
    pub fn read(&mut self, pkt: &mut Packet) -> Result<()> {
        pkt.clear();
        pkt.set_channel_layout_and_count(self.format.channel_layout, self.format.channels);

        if self.eos || self.produced >= self.frames {
            return Ok(());
        }

        let channels = self.format.channels as usize;
        loop {
            match self.decoder.recv(pkt)? {
                DecodeStatus::Output => {
                    if pkt.is_empty() {
                        continue;
                    }

                    if self.discard > 0 {
                        let drop = self.discard.min(pkt.frames() as u64);
                        pkt.pop_front(drop as usize * channels);
                        self.discard -= drop;
                        if pkt.is_empty() {
                            continue;
                        }
                    }

                    // Clip the tail of a windowed stream.
                    let remaining = self.frames - self.produced;
                    if (pkt.frames() as u64) > remaining {
                        pkt.truncate(remaining as usize * channels);
                    }

                    self.produced += pkt.frames() as u64;
                    pkt.set_bit_rate(self.demuxer.instant_bit_rate());
                    return Ok(());
                }
                DecodeStatus::EndOfBuffer => {
                    if !self.demuxer.feed(&mut self.buffer)? {
                        self.eos = true;
                        pkt.clear();
                        return Ok(());
                    }
                    self.decoder.send(&self.buffer)?;
                }
            }
        }
    }

    /// Seeks to `pts` frames on the presentation timeline.
    pub fn seek(&mut self, pts: u64) -> Result<()> {
        let pos = self.demuxer.seek(self.window_start + pts)?;
        self.decoder.flush();
        self.discard = pos.priming + u64::from(self.decoder.decoder_delay());
        self.produced = pts;
        self.eos = false;
        Ok(())
    }
}

