//! MP4 / QuickTime demultiplexing.
//!
//! The container is parsed into a box tree ([`boxes`]), the selected audio
//! track's sample tables drive packet access ([`track`]), and the iTunes
//! metadata item list supplies tags, cover art and the gapless descriptor
//! ([`ilst`]).

pub mod audio;
pub mod boxes;
pub mod descriptor;
pub mod ilst;
pub mod track;

use encore_common::registry::Registry;
use encore_common::{Error, Result, Stream, UStr};

use crate::demuxer::{register_all, Demuxer, DemuxerFactory, OpenMode, SeekPos};
use crate::dict::Dictionary;
use crate::format::{CodecFormat, CodecId};
use crate::info::{Image, ImageKind, StreamInfo};
use crate::tags;

use boxes::{BoxData, BoxTree, ChplEntry};
use ilst::ITunSmpb;
use track::Track;

pub(crate) fn register(registry: &mut Registry<&'static str, DemuxerFactory>) {
    register_all(
        registry,
        &[
            "3gp", "3g2", "f4a", "f4b", "f4v", "m4a", "m4b", "m4r", "m4v", "mp4v", "mp4", "mov",
            "mqv", "m21", "mp21", "mj2", "mjp2",
        ],
        |s, m| Ok(Box::new(Mp4Demuxer::new(s, m)?) as Box<dyn Demuxer>),
    );
}

struct Movie {
    time_scale: u32,
    has_chpl: bool,
    chapters: Vec<ChplEntry>,
    tags: Dictionary,
    cover: Option<Image>,
    smpb: Option<ITunSmpb>,
}

impl Movie {
    fn from_tree(tree: &BoxTree) -> Result<Self> {
        let moov = tree
            .find(0, "moov")
            .ok_or_else(|| Error::invalid_data_format("MP4 'moov' box is missing"))?;
        let time_scale = match tree.find(moov, "mvhd").map(|i| &tree.node(i).data) {
            Some(&BoxData::Mvhd { time_scale, .. }) => time_scale,
            _ => return Err(Error::invalid_data_format("MP4 'mvhd' box is missing")),
        };

        let mut movie = Movie {
            time_scale,
            has_chpl: false,
            chapters: Vec::new(),
            tags: Dictionary::new(),
            cover: None,
            smpb: None,
        };

        if let Some(BoxData::Chpl { entries }) = tree
            .find(moov, "udta/chpl")
            .map(|i| &tree.node(i).data)
        {
            movie.has_chpl = true;
            movie.chapters = entries.clone();
        }

        // The item list only applies under an iTunes metadata handler.
        if let Some(hdlr) = tree.find(moov, "udta/meta/hdlr") {
            if matches!(
                tree.node(hdlr).data,
                BoxData::Hdlr { handler_type } if &handler_type == b"mdir"
            ) {
                if let Some(BoxData::Ilst(items)) = tree
                    .find(hdlr, "../ilst")
                    .map(|i| &tree.node(i).data)
                {
                    movie.tags = ilst::parse_tags(items);
                    movie.cover = ilst::cover_art(items);
                    movie.smpb = ilst::itun_smpb(items);
                }
            }
        }
        Ok(movie)
    }
}

fn fix_sbr_time_line(
    movie: &Movie,
    track: &Track,
    format: &CodecFormat,
    frames: &mut u64,
    priming: &mut u64,
) {
    let movie_time_scale = movie.time_scale;
    let media_time_scale = track.time_scale;

    if media_time_scale == format.sample_rate / 2 {
        *frames *= 2;
        *priming *= 2;
    }

    let is_fhg_aac =
        movie_time_scale == format.sample_rate && media_time_scale == format.sample_rate;
    let is_nero_aac = movie.has_chpl
        && movie_time_scale == 90_000
        && media_time_scale == format.sample_rate / 2;

    if is_fhg_aac || is_nero_aac {
        // One SBR frame of decoder delay at the doubled rate.
        const SBR_DECODER_DELAY: u64 = (480 + 1) * 2;
        if *priming >= SBR_DECODER_DELAY {
            *priming -= SBR_DECODER_DELAY;
        }
    }
}

fn get_time_line(movie: &Movie, track: &Track, format: &CodecFormat) -> (u64, u64) {
    let mut frames;
    let mut priming = 0u64;

    if let Some(elst) = &track.elst {
        let edit = elst[0];
        frames = if edit.segment_duration == 0 {
            track
                .duration()
                .saturating_sub(edit.media_time.max(0) as u64)
        } else if movie.time_scale != 0 {
            edit.segment_duration * u64::from(track.time_scale) / u64::from(movie.time_scale)
        } else {
            edit.segment_duration
        };
        priming = edit.media_time.max(0) as u64;
    } else if let Some(smpb) = movie.smpb {
        frames = smpb.frames;
        priming = u64::from(smpb.priming);
    } else {
        frames = track.duration();
        if format.codec_id == CodecId::AacLc && frames >= 1024 {
            frames -= 1024;
            priming = 1024;
        }
    }

    if format.codec_id == CodecId::HeAacV1 || format.codec_id == CodecId::HeAacV2 {
        fix_sbr_time_line(movie, track, format, &mut frames, &mut priming);
    }
    (frames, priming)
}

pub struct Mp4Demuxer {
    file: Box<dyn Stream>,
    format: CodecFormat,
    movie: Movie,
    track: Track,
    total_frames: u64,
    encoder_delay: u64,
    average_bit_rate: u32,
    instant_bit_rate: u32,
}

impl Mp4Demuxer {
    pub fn new(mut file: Box<dyn Stream>, mode: OpenMode) -> Result<Self> {
        let tree = boxes::parse_root(&mut *file)?;
        let movie = Movie::from_tree(&tree)?;

        if !mode.contains(OpenMode::PLAYBACK | OpenMode::METADATA) {
            // Only pictures were requested; keep the cheap path.
            let (format, track) = Self::find_audio_track(&tree)?;
            return Ok(Mp4Demuxer {
                file,
                format,
                movie,
                track,
                total_frames: 0,
                encoder_delay: 0,
                average_bit_rate: 0,
                instant_bit_rate: 0,
            });
        }

        let (format, mut track) = Self::find_audio_track(&tree)?;

        for moof in tree.children_of(0, *b"moof").collect::<Vec<_>>() {
            for traf in tree.children_of(moof, *b"traf").collect::<Vec<_>>() {
                let matches_track = matches!(
                    tree.child(traf, *b"tfhd").map(|i| &tree.node(i).data),
                    Some(BoxData::Tfhd(tfhd)) if tfhd.track_id == track.track_id
                );
                if matches_track {
                    track.add_fragment(&tree, traf)?;
                }
            }
        }

        let (total_frames, encoder_delay) = get_time_line(&movie, &track, &format);

        let mut average_bit_rate = track.average_bit_rate();
        if average_bit_rate == 0 {
            average_bit_rate = format.bit_rate;
        }

        let mut movie = movie;
        // Nero chapter starts are stored in 100 ns units.
        for entry in &mut movie.chapters {
            entry.start = entry.start * u64::from(format.sample_rate) / 10_000_000;
        }

        Ok(Mp4Demuxer {
            file,
            format,
            movie,
            track,
            total_frames,
            encoder_delay,
            average_bit_rate,
            instant_bit_rate: average_bit_rate,
        })
    }

    fn find_audio_track(tree: &BoxTree) -> Result<(CodecFormat, Track)> {
        let moov = tree
            .find(0, "moov")
            .ok_or_else(|| Error::invalid_data_format("MP4 'moov' box is missing"))?;

        for trak in tree.children_of(moov, *b"trak").collect::<Vec<_>>() {
            let is_audio = matches!(
                tree.find(trak, "mdia/hdlr").map(|i| &tree.node(i).data),
                Some(BoxData::Hdlr { handler_type }) if handler_type == b"soun"
            );
            if !is_audio {
                continue;
            }

            let mut track = Track::from_tree(tree, trak)?;
            if let Some(format) = track.select_first_audio_sample_entry(tree, trak) {
                return Ok((format, track));
            }
        }
        Err(Error::failure("no audio track(s) found in MP4 file"))
    }
}

impl Demuxer for Mp4Demuxer {
    fn format(&self) -> &CodecFormat {
        &self.format
    }

    fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn start_offset(&self) -> u64 {
        self.encoder_delay
    }

    fn average_bit_rate(&self) -> u32 {
        self.average_bit_rate
    }

    fn instant_bit_rate(&self) -> u32 {
        self.instant_bit_rate
    }

    fn feed(&mut self, dest: &mut Vec<u8>) -> Result<bool> {
        if !self.track.feed(&mut *self.file, dest)? {
            return Ok(false);
        }

        self.instant_bit_rate = if self.format.bit_rate != 0 {
            self.format.bit_rate
        } else if self.format.frames_per_packet != 0 {
            (dest.len() as u64 * u64::from(self.format.sample_rate) * 8
                / u64::from(self.format.frames_per_packet)) as u32
        } else {
            self.average_bit_rate
        };
        Ok(true)
    }

    fn seek(&mut self, pts: u64) -> Result<SeekPos> {
        // HE-AAC tracks keep their tables at half the output rate; shift
        // into the media timeline and reserve one second of SBR preroll.
        let sample_rate = u64::from(self.format.sample_rate);
        let shift = u64::from(sample_rate == 2 * u64::from(self.track.time_scale));
        let preroll = if shift != 0 {
            pts.min(sample_rate)
        } else {
            0
        };

        let mut priming = 0u64;
        self.track
            .seek(&mut *self.file, (pts - preroll) >> shift, &mut priming)?;

        priming = (priming << shift) + preroll + (pts & shift);
        Ok(SeekPos {
            target: pts,
            priming,
        })
    }

    fn get_info(&mut self, chapter: u32) -> Result<StreamInfo> {
        let mut info = StreamInfo::new(&self.format);
        info.average_bit_rate = self.average_bit_rate;
        info.tags = self.movie.tags.clone();
        info.props
            .insert(UStr::intern(tags::CONTAINER), UStr::intern("MP4"));

        if chapter == 0 {
            info.frames = self.total_frames;
            info.start_offset = self.encoder_delay;
            return Ok(info);
        }

        let chapters = &self.movie.chapters;
        let index = (chapter - 1) as usize;
        if index >= chapters.len() {
            return Err(Error::out_of_bounds("chapter number out of range"));
        }

        if !info.tags.contains(tags::TRACK_NUMBER) {
            info.tags
                .insert(UStr::intern(tags::TRACK_NUMBER), UStr::new(chapter.to_string()));
            info.tags.insert(
                UStr::intern(tags::TRACK_TOTAL),
                UStr::new(chapters.len().to_string()),
            );
        }
        if !chapters[index].title.is_empty() {
            info.tags
                .insert(UStr::intern(tags::TITLE), UStr::new(chapters[index].title.clone()));
        }

        info.start_offset = chapters[index].start - chapters[0].start;
        info.frames = if chapter as usize == chapters.len() {
            self.total_frames
        } else {
            chapters[chapter as usize].start - chapters[0].start
        };
        info.frames -= info.start_offset;
        Ok(info)
    }

    fn get_image(&mut self, _kind: ImageKind) -> Result<Option<Image>> {
        Ok(self.movie.cover.clone())
    }

    fn chapter_count(&self) -> u32 {
        self.movie.chapters.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encore_common::MemoryStream;

    fn boxed(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + payload.len());
        out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(payload);
        out
    }

    fn full_box(kind: &[u8; 4], version: u8, payload: &[u8]) -> Vec<u8> {
        let mut body = vec![version, 0, 0, 0];
        body.extend_from_slice(payload);
        boxed(kind, &body)
    }

    fn esds_payload() -> Vec<u8> {
        // AAC-LC, 44.1 kHz stereo ASC.
        vec![
            0x03, 0x19, 0x00, 0x01, 0x00, 0x04, 0x11, 0x40, 0x15, 0x00, 0x00, 0x00, 0x00, 0x01,
            0xf4, 0x00, 0x00, 0x01, 0x77, 0x00, 0x05, 0x02, 0x12, 0x10,
        ]
    }

    fn mp4a_entry() -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&[0; 6]); // reserved
        body.extend_from_slice(&1u16.to_be_bytes()); // data reference index
        body.extend_from_slice(&0i16.to_be_bytes()); // version
        body.extend_from_slice(&0i16.to_be_bytes()); // revision
        body.extend_from_slice(&0u32.to_be_bytes()); // vendor
        body.extend_from_slice(&2u16.to_be_bytes()); // channels
        body.extend_from_slice(&16u16.to_be_bytes()); // sample size
        body.extend_from_slice(&(-2i16).to_be_bytes()); // compression id
        body.extend_from_slice(&0u16.to_be_bytes()); // packet size
        body.extend_from_slice(&(44_100u32 << 16).to_be_bytes()); // 16.16 rate
        body.extend_from_slice(&full_box(b"esds", 0, &esds_payload()));
        boxed(b"mp4a", &body)
    }

    fn stbl(sample_sizes: &[u32], chunk_offsets: &[u64]) -> Vec<u8> {
        let stsd = {
            let mut body = Vec::new();
            body.extend_from_slice(&1u32.to_be_bytes()); // entry count
            body.extend_from_slice(&mp4a_entry());
            full_box(b"stsd", 0, &body)
        };
        let stts = {
            let mut body = Vec::new();
            body.extend_from_slice(&1u32.to_be_bytes());
            body.extend_from_slice(&(sample_sizes.len() as u32).to_be_bytes());
            body.extend_from_slice(&1024u32.to_be_bytes());
            full_box(b"stts", 0, &body)
        };
        let stsc = {
            let mut body = Vec::new();
            body.extend_from_slice(&1u32.to_be_bytes());
            body.extend_from_slice(&1u32.to_be_bytes()); // first chunk
            body.extend_from_slice(&2u32.to_be_bytes()); // samples per chunk
            body.extend_from_slice(&1u32.to_be_bytes()); // description index
            full_box(b"stsc", 0, &body)
        };
        let stsz = {
            let mut body = Vec::new();
            body.extend_from_slice(&0u32.to_be_bytes()); // variable sizes
            body.extend_from_slice(&(sample_sizes.len() as u32).to_be_bytes());
            for &size in sample_sizes {
                body.extend_from_slice(&size.to_be_bytes());
            }
            full_box(b"stsz", 0, &body)
        };
        let stco = {
            let mut body = Vec::new();
            body.extend_from_slice(&(chunk_offsets.len() as u32).to_be_bytes());
            for &offset in chunk_offsets {
                body.extend_from_slice(&(offset as u32).to_be_bytes());
            }
            full_box(b"stco", 0, &body)
        };

        let mut body = Vec::new();
        body.extend_from_slice(&stsd);
        body.extend_from_slice(&stts);
        body.extend_from_slice(&stsc);
        body.extend_from_slice(&stsz);
        body.extend_from_slice(&stco);
        boxed(b"stbl", &body)
    }

    fn m4a_file(sample_data: &[&[u8]], extra_moov_child: Option<Vec<u8>>) -> Vec<u8> {
        let sizes: Vec<u32> = sample_data.iter().map(|s| s.len() as u32).collect();

        let mdhd = {
            let mut body = Vec::new();
            body.extend_from_slice(&[0; 8]); // creation, modification
            body.extend_from_slice(&44_100u32.to_be_bytes()); // time scale
            body.extend_from_slice(&((sizes.len() as u32) * 1024).to_be_bytes());
            body.extend_from_slice(&[0; 4]); // language, quality
            full_box(b"mdhd", 0, &body)
        };
        let hdlr = {
            let mut body = Vec::new();
            body.extend_from_slice(&0u32.to_be_bytes()); // pre_defined
            body.extend_from_slice(b"soun");
            body.extend_from_slice(&[0; 12]);
            full_box(b"hdlr", 0, &body)
        };
        let tkhd = {
            let mut body = Vec::new();
            body.extend_from_slice(&[0; 8]); // creation, modification
            body.extend_from_slice(&1u32.to_be_bytes()); // track id
            body.extend_from_slice(&[0; 8]); // reserved, duration
            full_box(b"tkhd", 0, &body)
        };
        let mvhd = {
            let mut body = Vec::new();
            body.extend_from_slice(&[0; 8]);
            body.extend_from_slice(&600u32.to_be_bytes()); // movie time scale
            body.extend_from_slice(&0u32.to_be_bytes());
            full_box(b"mvhd", 0, &body)
        };

        // Lay the moov after an ftyp, then mdat; chunk offsets follow.
        let ftyp = boxed(b"ftyp", &{
            let mut body = Vec::new();
            body.extend_from_slice(b"M4A ");
            body.extend_from_slice(&0u32.to_be_bytes());
            body.extend_from_slice(b"isom");
            body
        });

        // Two samples per chunk.
        let mut mdat_payload = Vec::new();
        let mut chunk_offsets = Vec::new();
        for (i, data) in sample_data.iter().enumerate() {
            if i % 2 == 0 {
                chunk_offsets.push(mdat_payload.len() as u64);
            }
            mdat_payload.extend_from_slice(data);
        }

        // The mdat position depends on the moov size; build moov with
        // placeholder offsets first to learn its length.
        let build_moov = |offsets: &[u64]| {
            let minf = boxed(b"minf", &stbl(&sizes, offsets));
            let mut mdia_body = Vec::new();
            mdia_body.extend_from_slice(&hdlr);
            mdia_body.extend_from_slice(&mdhd);
            mdia_body.extend_from_slice(&minf);
            let mdia = boxed(b"mdia", &mdia_body);

            let mut trak_body = Vec::new();
            trak_body.extend_from_slice(&tkhd);
            trak_body.extend_from_slice(&mdia);
            let trak = boxed(b"trak", &trak_body);

            let mut moov_body = Vec::new();
            moov_body.extend_from_slice(&mvhd);
            moov_body.extend_from_slice(&trak);
            if let Some(extra) = &extra_moov_child {
                moov_body.extend_from_slice(extra);
            }
            boxed(b"moov", &moov_body)
        };

        let moov_len = build_moov(&chunk_offsets).len();
        let mdat_start = (ftyp.len() + moov_len + 8) as u64;
        let real_offsets: Vec<u64> = chunk_offsets.iter().map(|o| o + mdat_start).collect();

        let mut file = Vec::new();
        file.extend_from_slice(&ftyp);
        file.extend_from_slice(&build_moov(&real_offsets));
        file.extend_from_slice(&boxed(b"mdat", &mdat_payload));
        file
    }

    fn open(data: Vec<u8>) -> Mp4Demuxer {
        Mp4Demuxer::new(Box::new(MemoryStream::new(data)), OpenMode::PLAYBACK).unwrap()
    }

    #[test]
    fn selects_the_aac_track_and_walks_samples() {
        let samples: [&[u8]; 4] = [b"one!", b"two2!", b"three!", b"four!!!"];
        let mut demuxer = open(m4a_file(&samples, None));

        assert_eq!(demuxer.format().codec_id, CodecId::AacLc);
        assert_eq!(demuxer.format().sample_rate, 44_100);
        assert_eq!(demuxer.format().channels, 2);

        let mut packet = Vec::new();
        for expected in samples {
            assert!(demuxer.feed(&mut packet).unwrap());
            assert_eq!(packet, expected);
        }
        assert!(!demuxer.feed(&mut packet).unwrap());
    }

    #[test]
    fn aac_lc_without_gapless_data_assumes_standard_priming() {
        let samples: [&[u8]; 4] = [b"aaaa", b"bbbb", b"cccc", b"dddd"];
        let demuxer = open(m4a_file(&samples, None));

        // mdhd duration is 4096; AAC-LC default priming is one packet.
        assert_eq!(demuxer.total_frames(), 4096 - 1024);
        assert_eq!(demuxer.start_offset(), 1024);
    }

    #[test]
    fn itun_smpb_overrides_the_implicit_timeline() {
        let ilst_item = {
            let mean = full_box(b"mean", 0, b"com.apple.iTunes");
            let name = full_box(b"name", 0, b"iTunSMPB");
            let mut data_body = vec![0, 0, 1, 0, 0, 0, 0, 0];
            data_body.extend_from_slice(
                b" 00000000 00000840 000001C0 00000000005A8B40",
            );
            let data = boxed(b"data", &data_body);

            let mut item = Vec::new();
            item.extend_from_slice(&mean);
            item.extend_from_slice(&name);
            item.extend_from_slice(&data);
            boxed(b"----", &item)
        };
        let hdlr = {
            let mut body = Vec::new();
            body.extend_from_slice(&0u32.to_be_bytes());
            body.extend_from_slice(b"mdir");
            body.extend_from_slice(&[0; 12]);
            full_box(b"hdlr", 0, &body)
        };
        let ilst = boxed(b"ilst", &ilst_item);
        let meta = {
            let mut body = Vec::new();
            body.extend_from_slice(&hdlr);
            body.extend_from_slice(&ilst);
            full_box(b"meta", 0, &body)
        };
        let udta = boxed(b"udta", &meta);

        let samples: [&[u8]; 4] = [b"aaaa", b"bbbb", b"cccc", b"dddd"];
        let demuxer = open(m4a_file(&samples, Some(udta)));

        assert_eq!(demuxer.total_frames(), 5_934_400);
        assert_eq!(demuxer.start_offset(), 2112);
    }

    #[test]
    fn seek_lands_on_the_enclosing_sample() {
        let samples: [&[u8]; 4] = [b"aaaa", b"bbbb", b"cccc", b"dddd"];
        let mut demuxer = open(m4a_file(&samples, None));

        // 2048 + 100 frames is 100 frames into the third sample.
        let pos = demuxer.seek(2 * 1024 + 100).unwrap();
        assert_eq!(pos.priming, 100);

        let mut packet = Vec::new();
        assert!(demuxer.feed(&mut packet).unwrap());
        assert_eq!(packet, b"cccc");
    }

    #[test]
    fn overrunning_handlers_are_rejected() {
        // An esds box whose descriptor claims more payload than the box
        // holds trips the walker's boundary check.
        let mut file = boxed(b"ftyp", b"M4A \0\0\0\0");
        let bogus = full_box(b"mvhd", 0, &[0; 2]); // too small for its reader
        file.extend_from_slice(&boxed(b"moov", &bogus));

        let err = match Mp4Demuxer::new(Box::new(MemoryStream::new(file)), OpenMode::PLAYBACK) {
            Ok(_) => panic!("expected construction to fail"),
            Err(err) => err,
        };
        assert!(matches!(
            err.kind(),
            encore_common::ErrorKind::Failure | encore_common::ErrorKind::EndOfFile
                | encore_common::ErrorKind::InvalidDataFormat
        ));
    }
}
