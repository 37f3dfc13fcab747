//! Per-track sample access: chunk/sample arithmetic over the `stbl` tables
//! plus movie-fragment (`moof`) segments appended behind them.

use std::io::Read;

use encore_common::stream::StreamExt;
use encore_common::{Error, Result, Stream};

use crate::format::{channel, pcm, CodecFormat, CodecId};
use crate::mp4::boxes::{
    BoxData, BoxTree, ElstEntry, SampleEntry, StscEntry, SttsEntry, TrunData,
};

/// QuickTime-style compression id for variable-rate streams.
const COMPRESSION_VARIABLE: i16 = -2;

struct CompressionInfo {
    frames_per_packet: u32,
    bytes_per_packet: u32,
    bits_per_sample: u32,
}

fn implicit_fixed_compression_info(
    kind: [u8; 4],
    entry: &SampleEntry,
) -> Result<CompressionInfo> {
    let channels = u32::from(entry.channels);
    let info = match &kind {
        b"ima4" | b"ms\x00\x11" => CompressionInfo {
            frames_per_packet: 64,
            bytes_per_packet: 34 * channels,
            bits_per_sample: 16,
        },
        b"MAC3" => CompressionInfo {
            frames_per_packet: 6,
            bytes_per_packet: 2 * channels,
            bits_per_sample: 8,
        },
        b"MAC6" => CompressionInfo {
            frames_per_packet: 6,
            bytes_per_packet: channels,
            bits_per_sample: 8,
        },
        b"agsm" => CompressionInfo {
            frames_per_packet: 160,
            bytes_per_packet: 33,
            bits_per_sample: 16,
        },
        b"alaw" | b"ulaw" => CompressionInfo {
            frames_per_packet: 1,
            bytes_per_packet: channels,
            bits_per_sample: 8,
        },
        &[0, 0, 0, 0] | b"NONE" | b"fl32" | b"fl64" | b"in24" | b"in32" | b"lpcm" | b"raw "
        | b"sowt" | b"twos" => CompressionInfo {
            frames_per_packet: 1,
            bytes_per_packet: u32::from(entry.sample_size) * channels / 8,
            bits_per_sample: u32::from(entry.sample_size),
        },
        other => {
            return Err(Error::failure(format!(
                "no implicit parameters for audio sample entry type: {:?}",
                String::from_utf8_lossy(other)
            )));
        }
    };
    Ok(info)
}

fn fixed_compression_info(
    tree: &BoxTree,
    kind: [u8; 4],
    entry: &SampleEntry,
) -> Result<Option<CompressionInfo>> {
    if entry.compression_id == COMPRESSION_VARIABLE {
        return Ok(None);
    }

    // Fixed compression is a QuickTime convention; require a QuickTime
    // brand (or the absence of any file type box).
    let is_qt = match tree.find(0, "ftyp").map(|i| &tree.node(i).data) {
        Some(BoxData::Ftyp {
            major_brand,
            compatible_brands,
        }) => major_brand == b"qt  " || compatible_brands.iter().any(|b| b == b"qt  "),
        _ => true,
    };
    if !is_qt {
        return Ok(None);
    }

    let info = match entry.version {
        0 => implicit_fixed_compression_info(kind, entry)?,
        1 => {
            let v1 = entry.v1.unwrap_or_default();
            CompressionInfo {
                frames_per_packet: v1.samples_per_packet,
                bytes_per_packet: v1.bytes_per_frame,
                bits_per_sample: u32::from(entry.sample_size),
            }
        }
        _ => {
            let v2 = entry.v2.unwrap_or_default();
            CompressionInfo {
                frames_per_packet: v2.const_lpcm_frames_per_audio_packet,
                bytes_per_packet: v2.const_bytes_per_audio_packet,
                bits_per_sample: v2.const_bits_per_channel,
            }
        }
    };
    Ok(Some(info))
}

fn parse_entry_lpcm(
    tree: &BoxTree,
    entry_idx: u32,
    kind: [u8; 4],
    entry: &SampleEntry,
    fmt: &mut CodecFormat,
) -> Result<()> {
    let v2_endian_flags = || -> u32 {
        let found = tree.find_first_of(entry_idx, &["enda", "wave/enda"]);
        match found.map(|i| &tree.node(i).data) {
            Some(BoxData::Enda { little_endian: true }) => 0,
            _ => pcm::BIG_ENDIAN,
        }
    };

    match &kind {
        &[0, 0, 0, 0] | b"NONE" | b"raw " => {
            if entry.sample_size == 16 {
                fmt.flags = pcm::BIG_ENDIAN | pcm::SIGNED_INT;
            }
        }
        b"twos" => fmt.flags = pcm::BIG_ENDIAN | pcm::SIGNED_INT,
        b"sowt" => fmt.flags = pcm::SIGNED_INT,
        b"in24" => {
            fmt.flags = pcm::SIGNED_INT | v2_endian_flags();
            fmt.bits_per_sample = 24;
        }
        b"in32" => {
            fmt.flags = pcm::SIGNED_INT | v2_endian_flags();
            fmt.bits_per_sample = 32;
        }
        b"fl32" => {
            fmt.flags = pcm::IEEE_FLOAT | v2_endian_flags();
            fmt.bits_per_sample = 32;
        }
        b"fl64" => {
            fmt.flags = pcm::IEEE_FLOAT | v2_endian_flags();
            fmt.bits_per_sample = 64;
        }
        b"lpcm" => {
            let v2 = entry.v2.ok_or_else(|| {
                Error::invalid_data_format(
                    "MP4 'lpcm' must be a version 2 sound description box",
                )
            })?;
            if v2.format_specific_flags & 0x1 != 0 {
                fmt.flags |= pcm::IEEE_FLOAT;
            }
            if v2.format_specific_flags & 0x2 != 0 {
                fmt.flags |= pcm::BIG_ENDIAN;
            }
            if v2.format_specific_flags & 0x4 != 0 {
                fmt.flags |= pcm::SIGNED_INT;
            }
            fmt.bits_per_sample = v2.const_bits_per_channel;
        }
        _ => {}
    }

    fmt.codec_id = CodecId::Lpcm;
    fmt.bit_rate = fmt.bits_per_sample * fmt.sample_rate * fmt.channels;
    Ok(())
}

fn apply_format_specific_overrides(fmt: &mut CodecFormat) {
    match fmt.codec_id {
        CodecId::Ac3 | CodecId::Eac3 => fmt.frames_per_packet = 1536,
        CodecId::AmrNb => {
            fmt.frames_per_packet = 160;
            fmt.sample_rate = 8000;
            fmt.channels = 1;
        }
        CodecId::AmrWb => {
            fmt.frames_per_packet = 320;
            fmt.sample_rate = 16_000;
            fmt.channels = 1;
        }
        CodecId::Qcelp => {
            fmt.frames_per_packet = 160;
            fmt.channels = 1;
        }
        CodecId::AdpcmImaMs => fmt.bits_per_sample = 4,
        CodecId::Alac => {
            if fmt.extra.len() >= 16 {
                fmt.frames_per_packet =
                    u32::from_be_bytes([fmt.extra[12], fmt.extra[13], fmt.extra[14], fmt.extra[15]]);
            }
        }
        _ => {}
    }
}

fn codec_for_sample_entry(kind: [u8; 4]) -> Option<CodecId> {
    Some(match &kind {
        b".mp1" => CodecId::MpegLayer1,
        b".mp2" | b"ms\x00\x50" => CodecId::MpegLayer2,
        b".mp3" | b"ms\x00\x55" => CodecId::MpegLayer3,
        b"DTS " | b"dtsc" => CodecId::Dts,
        b"MAC3" => CodecId::Mace3,
        b"MAC6" => CodecId::Mace6,
        b"Qclp" | b"Qclq" | b"sqcp" => CodecId::Qcelp,
        b"ac-3" => CodecId::Ac3,
        b"agsm" => CodecId::Gsm,
        b"alaw" => CodecId::Alaw,
        b"dtse" => CodecId::DtsExpress,
        b"dtsh" | b"dtsl" => CodecId::DtsHd,
        b"ec-3" => CodecId::Eac3,
        b"ima4" => CodecId::AdpcmImaQt,
        b"ms\x00\x02" => CodecId::AdpcmMs,
        b"ms\x00\x11" => CodecId::AdpcmImaMs,
        b"ms\x00\x31" => CodecId::GsmMs,
        b"nmos" => CodecId::Nellymoser,
        b"samr" => CodecId::AmrNb,
        b"sawb" => CodecId::AmrWb,
        b"sawp" => CodecId::AmrWbPlus,
        b"ulaw" => CodecId::Ulaw,
        _ => return None,
    })
}

struct Fragment {
    duration: u64,
    base_data_offset: i64,
    truns: Vec<TrunData>,
}

#[derive(Default)]
struct TrackSegment {
    trafs: Vec<Fragment>,
    traf_number: usize,
    trun_number: usize,
    sample_number: usize,
}

impl TrackSegment {
    fn add_fragment(&mut self, tree: &BoxTree, traf: u32) -> Result<()> {
        let base_data_offset = match tree
            .child(traf, *b"tfhd")
            .map(|i| &tree.node(i).data)
        {
            Some(BoxData::Tfhd(tfhd)) => tfhd.base_data_offset,
            _ => return Err(Error::invalid_data_format("MP4 'tfhd' box is missing")),
        };

        let mut truns = Vec::new();
        let mut duration = 0u64;
        for trun_idx in tree.children_of(traf, *b"trun") {
            if let BoxData::Trun(trun) = &tree.node(trun_idx).data {
                duration += trun
                    .samples
                    .iter()
                    .map(|s| u64::from(s.duration))
                    .sum::<u64>();
                truns.push(trun.clone());
            }
        }

        self.trafs.push(Fragment {
            duration,
            base_data_offset,
            truns,
        });
        Ok(())
    }

    fn duration(&self) -> u64 {
        self.trafs.iter().map(|t| t.duration).sum()
    }

    fn feed(&mut self, file: &mut dyn Stream, dest: &mut Vec<u8>) -> Result<bool> {
        if self.traf_number == self.trafs.len() {
            return Ok(false);
        }

        let traf = &self.trafs[self.traf_number];
        let trun = &traf.truns[self.trun_number];

        if self.sample_number == 0 {
            let offset = traf.base_data_offset + trun.data_offset;
            file.goto(offset as u64)?;
        }

        let size = trun.samples[self.sample_number].size as usize;
        dest.resize(size, 0);
        file.read_exact(dest)?;

        self.sample_number += 1;
        if self.sample_number == trun.samples.len() {
            self.trun_number += 1;
            if self.trun_number == traf.truns.len() {
                self.traf_number += 1;
                self.trun_number = 0;
            }
            self.sample_number = 0;
        }
        Ok(true)
    }

    fn seek(&mut self, file: &mut dyn Stream, mut target: u64, priming: &mut u64) -> Result<()> {
        while self.traf_number != self.trafs.len() {
            let traf = &self.trafs[self.traf_number];
            if target >= traf.duration {
                target -= traf.duration;
                self.traf_number += 1;
                continue;
            }

            self.trun_number = 0;
            while self.trun_number != traf.truns.len() {
                let trun = &traf.truns[self.trun_number];
                let mut offset = traf.base_data_offset + trun.data_offset;

                self.sample_number = 0;
                while self.sample_number != trun.samples.len() {
                    let sample = trun.samples[self.sample_number];
                    if target < u64::from(sample.duration) {
                        *priming += target;
                        file.goto(offset as u64)?;
                        return Ok(());
                    }
                    target -= u64::from(sample.duration);
                    offset += i64::from(sample.size);
                    self.sample_number += 1;
                }
                self.trun_number += 1;
            }
            self.traf_number += 1;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.traf_number = 0;
        self.trun_number = 0;
        self.sample_number = 0;
    }
}

/// One media track: extracted tables plus the read cursor state.
pub struct Track {
    pub track_id: u32,
    pub handler_type: [u8; 4],
    pub time_scale: u32,
    media_duration: u64,
    stco: Vec<u64>,
    stsz_sample_size: u32,
    stsz_sample_count: u32,
    stsz_entries: Vec<u32>,
    stsc: Vec<StscEntry>,
    stts: Vec<SttsEntry>,
    pub elst: Option<Vec<ElstEntry>>,
    avg_bit_rate: u32,
    segment: TrackSegment,
    qtff_sample_size: u32,
    qtff_samples_per_packet: u32,
    sample_number: u32,
    chunk_number: u32,
    last_sample_in_chunk: u32,
}

impl Track {
    pub fn from_tree(tree: &BoxTree, trak: u32) -> Result<Self> {
        let find_data = |path: &str| tree.find(trak, path).map(|i| &tree.node(i).data);

        let track_id = match find_data("tkhd") {
            Some(&BoxData::Tkhd { track_id }) => track_id,
            _ => return Err(Error::invalid_data_format("MP4 'tkhd' box is missing")),
        };
        let (time_scale, media_duration) = match find_data("mdia/mdhd") {
            Some(&BoxData::Mdhd {
                time_scale,
                duration,
            }) => (time_scale, duration),
            _ => return Err(Error::invalid_data_format("MP4 'mdhd' box is missing")),
        };
        let handler_type = match find_data("mdia/hdlr") {
            Some(&BoxData::Hdlr { handler_type }) => handler_type,
            _ => return Err(Error::invalid_data_format("MP4 'hdlr' box is missing")),
        };

        let stbl = tree
            .find(trak, "mdia/minf/stbl")
            .ok_or_else(|| Error::invalid_data_format("MP4 'stbl' box is missing"))?;

        let stco = match tree
            .find_first_of(stbl, &["co64", "stco"])
            .map(|i| &tree.node(i).data)
        {
            Some(BoxData::Stco { entries }) => entries.clone(),
            _ => return Err(Error::invalid_data_format("MP4 'stco' box is missing")),
        };
        let (stsz_sample_size, stsz_sample_count, stsz_entries) = match tree
            .find_first_of(stbl, &["stsz", "stz2"])
            .map(|i| &tree.node(i).data)
        {
            Some(BoxData::Stsz {
                sample_size,
                sample_count,
                entries,
            }) => (*sample_size, *sample_count, entries.clone()),
            _ => return Err(Error::invalid_data_format("MP4 'stsz' box is missing")),
        };
        let stsc = match tree.find(stbl, "stsc").map(|i| &tree.node(i).data) {
            Some(BoxData::Stsc { entries }) => entries.clone(),
            _ => return Err(Error::invalid_data_format("MP4 'stsc' box is missing")),
        };
        let stts = match tree.find(stbl, "stts").map(|i| &tree.node(i).data) {
            Some(BoxData::Stts { entries }) => entries.clone(),
            _ => return Err(Error::invalid_data_format("MP4 'stts' box is missing")),
        };
        if stsc.is_empty() && stsz_sample_count > 0 {
            return Err(Error::invalid_data_format("MP4 'stsc' table is empty"));
        }
        let elst = match tree.find(trak, "edts/elst").map(|i| &tree.node(i).data) {
            Some(BoxData::Elst { entries }) if !entries.is_empty() => Some(entries.clone()),
            _ => None,
        };

        Ok(Track {
            track_id,
            handler_type,
            time_scale,
            media_duration,
            stco,
            stsz_sample_size,
            stsz_sample_count,
            stsz_entries,
            stsc,
            stts,
            elst,
            avg_bit_rate: 0,
            segment: TrackSegment::default(),
            qtff_sample_size: 0,
            qtff_samples_per_packet: 1,
            sample_number: 0,
            chunk_number: 0,
            last_sample_in_chunk: 0,
        })
    }

    pub fn duration(&self) -> u64 {
        self.media_duration + self.segment.duration()
    }

    pub fn media_duration(&self) -> u64 {
        self.media_duration
    }

    pub fn sample_count(&self) -> u32 {
        self.stsz_sample_count
    }

    pub fn average_bit_rate(&self) -> u32 {
        self.avg_bit_rate
    }

    pub fn add_fragment(&mut self, tree: &BoxTree, traf: u32) -> Result<()> {
        self.segment.add_fragment(tree, traf)
    }

    /// Picks the first decodable entry from the sample description box and
    /// derives the stream's codec format from it.
    pub fn select_first_audio_sample_entry(
        &mut self,
        tree: &BoxTree,
        trak: u32,
    ) -> Option<CodecFormat> {
        let stsd = tree.find(trak, "mdia/minf/stbl/stsd")?;
        let entries: Vec<u32> = tree.node(stsd).children.clone();

        for entry_idx in entries {
            match self.try_select(tree, entry_idx) {
                Ok(fmt) => return Some(fmt),
                Err(e) => {
                    log::debug!("skipping MP4 sample entry: {e}");
                }
            }
        }
        None
    }

    fn try_select(&mut self, tree: &BoxTree, entry_idx: u32) -> Result<CodecFormat> {
        let kind = tree.kind(entry_idx);
        let entry = match &tree.node(entry_idx).data {
            BoxData::Soun(entry) => entry.clone(),
            _ => return Err(Error::unsupported_format("not an audio sample entry")),
        };

        let mut fmt = CodecFormat::default();
        match entry.version {
            2 => {
                let v2 = entry.v2.unwrap_or_default();
                fmt.sample_rate = v2.audio_sample_rate as u32;
                fmt.channels = v2.audio_channels;
                fmt.bits_per_sample = v2.const_bits_per_channel;
            }
            1 => {
                let v1 = entry.v1.unwrap_or_default();
                fmt.channels = u32::from(entry.channels);
                fmt.sample_rate = entry.sample_rate >> 16;
                fmt.bits_per_sample = v1.bytes_per_sample * 8;
            }
            _ => {
                fmt.channels = u32::from(entry.channels);
                fmt.sample_rate = entry.sample_rate >> 16;
                fmt.bits_per_sample = u32::from(entry.sample_size);
            }
        }

        match &kind {
            b"mp4a" => {
                let esds = tree
                    .find_first_of(entry_idx, &["esds", "wave/esds"])
                    .ok_or_else(|| Error::unsupported_format("'mp4a' entry without 'esds'"))?;
                match &tree.node(esds).data {
                    BoxData::Esds(dcd) => dcd.setup(&mut fmt)?,
                    _ => return Err(Error::unsupported_format("malformed 'esds' box")),
                }
            }
            b"alac" => {
                let alac = tree
                    .find_first_of(entry_idx, &["alac", "wave/alac"])
                    .ok_or_else(|| Error::unsupported_format("'alac' entry without cookie"))?;
                match &tree.node(alac).data {
                    BoxData::Alac { extra } => {
                        fmt.extra = extra.clone();
                        fmt.codec_id = CodecId::Alac;
                    }
                    _ => return Err(Error::unsupported_format("malformed 'alac' box")),
                }
            }
            b"QDMC" | b"QDM2" => {
                let wave = tree
                    .child(entry_idx, *b"wave")
                    .ok_or_else(|| Error::unsupported_format("QDesign entry without 'wave'"))?;
                match &tree.node(wave).data {
                    BoxData::Wave { extra } => {
                        fmt.extra = extra.clone();
                        fmt.codec_id = if &kind == b"QDMC" {
                            CodecId::Qdesign1
                        } else {
                            CodecId::Qdesign2
                        };
                    }
                    _ => return Err(Error::unsupported_format("malformed 'wave' box")),
                }
            }
            &[0, 0, 0, 0] | b"NONE" | b"fl32" | b"fl64" | b"in24" | b"in32" | b"lpcm"
            | b"raw " | b"sowt" | b"twos" => {
                parse_entry_lpcm(tree, entry_idx, kind, &entry, &mut fmt)?;
            }
            other => {
                fmt.codec_id = codec_for_sample_entry(kind).ok_or_else(|| {
                    Error::unsupported_format(format!(
                        "unsupported audio sample entry type: {:?}",
                        String::from_utf8_lossy(other)
                    ))
                })?;
            }
        }

        if let Some(info) = fixed_compression_info(tree, kind, &entry)? {
            self.qtff_sample_size = info.bytes_per_packet;
            self.qtff_samples_per_packet = info.frames_per_packet;
            fmt.frames_per_packet = info.frames_per_packet;
            if fmt.bits_per_sample == 0 {
                fmt.bits_per_sample = info.bits_per_sample;
            }
        } else {
            self.qtff_samples_per_packet = 1;
            self.qtff_sample_size = self.stsz_sample_size;
        }

        apply_format_specific_overrides(&mut fmt);
        if fmt.bytes_per_packet == 0 {
            fmt.bytes_per_packet = self.qtff_sample_size;
        }
        if fmt.channel_layout == 0 {
            fmt.channel_layout = channel::guess(fmt.channels);
        }
        fmt.validate()?;

        self.avg_bit_rate = self.compute_average_bit_rate(tree, entry_idx);
        Ok(fmt)
    }

    fn compute_average_bit_rate(&self, tree: &BoxTree, entry_idx: u32) -> u32 {
        if let Some(BoxData::Esds(dcd)) = tree
            .find_first_of(entry_idx, &["esds", "wave/esds"])
            .map(|i| &tree.node(i).data)
        {
            if dcd.average_bit_rate != 0 {
                return dcd.average_bit_rate;
            }
        }
        if let Some(BoxData::Alac { extra }) = tree
            .find_first_of(entry_idx, &["alac", "wave/alac"])
            .map(|i| &tree.node(i).data)
        {
            if extra.len() >= 20 {
                return u32::from_be_bytes([extra[16], extra[17], extra[18], extra[19]]);
            }
        }

        if self.media_duration == 0 {
            return 0;
        }

        let bits: u64 = if self.qtff_sample_size != 0 {
            u64::from(self.qtff_sample_size) * u64::from(self.stsz_sample_count)
        } else {
            self.stsz_entries.iter().map(|&s| u64::from(s)).sum()
        };
        (bits * u64::from(self.time_scale) / self.media_duration) as u32
    }

    pub fn feed(&mut self, file: &mut dyn Stream, dest: &mut Vec<u8>) -> Result<bool> {
        if self.sample_number >= self.sample_count() {
            return self.segment.feed(file, dest);
        }

        if self.sample_number >= self.last_sample_in_chunk {
            self.chunk_number += 1;
            if self.chunk_number as usize > self.stco.len() {
                return Err(Error::out_of_bounds(format!(
                    "invalid chunk number: {}/{}",
                    self.chunk_number,
                    self.stco.len()
                )));
            }

            let entry = stsc_entry_for_chunk(&self.stsc, self.chunk_number);
            let offset = self.chunk_number - entry.first_chunk;

            self.last_sample_in_chunk =
                entry.first_sample + entry.samples_per_chunk * (offset + 1);
            file.goto(self.stco[self.chunk_number as usize - 1])?;
        }

        let sample_size = if self.qtff_sample_size != 0 {
            self.qtff_sample_size
        } else {
            self.stsz_entries[self.sample_number as usize]
        };

        dest.resize(sample_size as usize, 0);
        file.read_exact(dest)?;
        self.sample_number += self.qtff_samples_per_packet;
        Ok(true)
    }

    pub fn seek(&mut self, file: &mut dyn Stream, mut pts: u64, priming: &mut u64) -> Result<()> {
        self.segment.reset();
        if pts >= self.media_duration {
            pts -= self.media_duration;
            self.sample_number = self.sample_count();
            return self.segment.seek(file, pts, priming);
        }

        let mut nearest = 0u32;
        for entry in &self.stts {
            let run = u64::from(entry.sample_count) * u64::from(entry.sample_delta);
            if pts < run {
                if entry.sample_delta != 0 {
                    nearest += (pts / u64::from(entry.sample_delta)) as u32;
                    *priming += pts % u64::from(entry.sample_delta);
                }
                break;
            }
            nearest += entry.sample_count;
            pts -= run;
        }

        self.sample_number = nearest;
        let entry = stsc_entry_for_sample(&self.stsc, self.sample_number);
        let spc = entry.samples_per_chunk;

        self.chunk_number =
            entry.first_chunk + (self.sample_number - entry.first_sample) / spc;
        if self.chunk_number as usize > self.stco.len() {
            return Err(Error::out_of_bounds(format!(
                "invalid chunk number: {}/{}",
                self.chunk_number,
                self.stco.len()
            )));
        }

        self.last_sample_in_chunk =
            entry.first_sample + ((self.chunk_number - entry.first_chunk) + 1) * spc;
        let first_sample_in_chunk = self.last_sample_in_chunk - spc;

        let mut file_offset: u64 = if self.qtff_sample_size != 0 {
            u64::from(self.sample_number - first_sample_in_chunk)
                / u64::from(self.qtff_samples_per_packet)
                * u64::from(self.qtff_sample_size)
        } else {
            self.stsz_entries[first_sample_in_chunk as usize..self.sample_number as usize]
                .iter()
                .map(|&s| u64::from(s))
                .sum()
        };

        file_offset += self.stco[self.chunk_number as usize - 1];
        file.goto(file_offset)?;
        Ok(())
    }
}

fn stsc_entry_for_sample(entries: &[StscEntry], sample_number: u32) -> &StscEntry {
    for i in 1..entries.len() {
        if sample_number < entries[i].first_sample {
            return &entries[i - 1];
        }
    }
    entries.last().expect("stsc table cannot be empty")
}

fn stsc_entry_for_chunk(entries: &[StscEntry], chunk_number: u32) -> &StscEntry {
    for i in 1..entries.len() {
        if chunk_number < entries[i].first_chunk {
            return &entries[i - 1];
        }
    }
    entries.last().expect("stsc table cannot be empty")
}
