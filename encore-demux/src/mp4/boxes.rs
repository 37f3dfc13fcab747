//! The MP4 box tree.
//!
//! Boxes are parsed depth-first into an arena of nodes (`parent`/`children`
//! are indices, never pointers). Each handler fully consumes its box; the
//! walker verifies no handler read past its box end and skips forward over
//! whatever a handler left unread. Required/unique child sets are enforced
//! per container.

use byteorder::{ReadBytesExt, BE};

use encore_common::stream::StreamExt;
use encore_common::{Error, Result, Stream};

use crate::mp4::descriptor::DecoderConfigDescriptor;

pub const ROOT_KIND: [u8; 4] = [0; 4];

#[derive(Debug, Clone, Copy)]
pub struct BoxHeader {
    pub kind: [u8; 4],
    pub fpos: u64,
    pub size: u64,
    pub header_size: u32,
}

impl BoxHeader {
    pub fn end(&self) -> u64 {
        self.fpos + self.size
    }

    /// Payload bytes after the box header.
    pub fn payload_size(&self) -> u64 {
        self.size - u64::from(self.header_size)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SttsEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct StscEntry {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
    /// Zero-based index of the first sample covered by this entry.
    pub first_sample: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ElstEntry {
    pub segment_duration: u64,
    pub media_time: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SounV1 {
    pub samples_per_packet: u32,
    pub bytes_per_packet: u32,
    pub bytes_per_frame: u32,
    pub bytes_per_sample: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SounV2 {
    pub audio_sample_rate: f64,
    pub audio_channels: u32,
    pub const_bits_per_channel: u32,
    pub format_specific_flags: u32,
    pub const_bytes_per_audio_packet: u32,
    pub const_lpcm_frames_per_audio_packet: u32,
}

/// An audio sample description entry (`stsd` child).
#[derive(Debug, Clone, Default)]
pub struct SampleEntry {
    pub version: i16,
    pub channels: u16,
    pub sample_size: u16,
    pub compression_id: i16,
    /// 16.16 fixed-point sample rate.
    pub sample_rate: u32,
    pub v1: Option<SounV1>,
    pub v2: Option<SounV2>,
}

#[derive(Debug, Clone)]
pub struct IlstEntry {
    pub kind: [u8; 4],
    pub mean: String,
    pub name: String,
    pub data_type: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ChplEntry {
    pub start: u64,
    pub title: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TrexData {
    pub track_id: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TfhdData {
    pub track_id: u32,
    pub flags: u32,
    pub base_data_offset: i64,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
}

impl TfhdData {
    pub fn default_sample_duration_present(&self) -> bool {
        self.flags & 0x08 != 0
    }

    pub fn default_sample_size_present(&self) -> bool {
        self.flags & 0x10 != 0
    }

    pub fn default_sample_flags_present(&self) -> bool {
        self.flags & 0x20 != 0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TrunSample {
    pub duration: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Default)]
pub struct TrunData {
    pub data_offset: i64,
    pub samples: Vec<TrunSample>,
}

/// Parsed payload of one box, when the walker has a reader for it.
#[derive(Debug, Clone, Default)]
pub enum BoxData {
    #[default]
    None,
    Ftyp {
        major_brand: [u8; 4],
        compatible_brands: Vec<[u8; 4]>,
    },
    Mvhd {
        time_scale: u32,
        duration: u64,
    },
    Tkhd {
        track_id: u32,
    },
    Mdhd {
        time_scale: u32,
        duration: u64,
    },
    Hdlr {
        handler_type: [u8; 4],
    },
    Stts {
        entries: Vec<SttsEntry>,
    },
    Stsd,
    Soun(SampleEntry),
    Esds(DecoderConfigDescriptor),
    Alac {
        extra: Vec<u8>,
    },
    Wave {
        extra: Vec<u8>,
    },
    Frma {
        data_format: [u8; 4],
    },
    Enda {
        little_endian: bool,
    },
    Stsz {
        sample_size: u32,
        sample_count: u32,
        entries: Vec<u32>,
    },
    Stsc {
        entries: Vec<StscEntry>,
    },
    Stco {
        entries: Vec<u64>,
    },
    Elst {
        entries: Vec<ElstEntry>,
    },
    Ilst(Vec<IlstEntry>),
    Chpl {
        entries: Vec<ChplEntry>,
    },
    Mfhd {
        sequence_number: u32,
    },
    Trex(TrexData),
    Tfhd(TfhdData),
    Tfdt {
        base_media_decode_time: u64,
    },
    Trun(TrunData),
}

pub struct BoxNode {
    pub header: BoxHeader,
    pub parent: Option<u32>,
    pub children: Vec<u32>,
    pub data: BoxData,
}

pub struct BoxTree {
    nodes: Vec<BoxNode>,
}

impl BoxTree {
    fn with_root(file_size: u64) -> Self {
        BoxTree {
            nodes: vec![BoxNode {
                header: BoxHeader {
                    kind: ROOT_KIND,
                    fpos: 0,
                    size: file_size,
                    header_size: 0,
                },
                parent: None,
                children: Vec::new(),
                data: BoxData::None,
            }],
        }
    }

    pub fn node(&self, idx: u32) -> &BoxNode {
        &self.nodes[idx as usize]
    }

    fn node_mut(&mut self, idx: u32) -> &mut BoxNode {
        &mut self.nodes[idx as usize]
    }

    pub fn kind(&self, idx: u32) -> [u8; 4] {
        self.node(idx).header.kind
    }

    pub fn end_position(&self, idx: u32) -> u64 {
        self.node(idx).header.end()
    }

    fn add_child(&mut self, parent: u32, header: BoxHeader) -> u32 {
        let idx = self.nodes.len() as u32;
        self.nodes.push(BoxNode {
            header,
            parent: Some(parent),
            children: Vec::new(),
            data: BoxData::None,
        });
        self.nodes[parent as usize].children.push(idx);
        idx
    }

    pub fn children_of<'a>(
        &'a self,
        idx: u32,
        kind: [u8; 4],
    ) -> impl Iterator<Item = u32> + 'a {
        self.node(idx)
            .children
            .iter()
            .copied()
            .filter(move |&c| self.kind(c) == kind)
    }

    pub fn child(&self, idx: u32, kind: [u8; 4]) -> Option<u32> {
        self.children_of(idx, kind).next()
    }

    /// Resolves a slash-separated path of box types. A leading `/` starts
    /// at the root; `..` moves to the parent.
    pub fn find(&self, mut at: u32, path: &str) -> Option<u32> {
        let mut rest = path;
        if let Some(stripped) = rest.strip_prefix('/') {
            at = 0;
            rest = stripped;
        }
        for component in rest.split('/') {
            match component {
                "" | "." => {}
                ".." => at = self.node(at).parent?,
                kind => {
                    let kind: [u8; 4] = kind.as_bytes().try_into().ok()?;
                    at = self.child(at, kind)?;
                }
            }
        }
        Some(at)
    }

    pub fn find_first_of(&self, at: u32, paths: &[&str]) -> Option<u32> {
        paths.iter().find_map(|p| self.find(at, p))
    }
}

fn read_box_header(file: &mut dyn Stream) -> Result<BoxHeader> {
    let fpos = file.tell()?;
    let size32 = file.read_u32::<BE>()?;
    let kind = file.read_fourcc()?;

    let mut header = BoxHeader {
        kind,
        fpos,
        size: u64::from(size32),
        header_size: 8,
    };

    if header.size < u64::from(header.header_size) {
        match size32 {
            0 => header.size = file.size()? - fpos,
            1 => {
                header.size = file.read_u64::<BE>()?;
                header.header_size += 8;
            }
            _ => {}
        }
        if header.size < u64::from(header.header_size) {
            return Err(Error::invalid_data_format(
                "MP4 box cannot be smaller than its header",
            ));
        }
    }
    Ok(header)
}

#[derive(Clone, Copy)]
struct BoxSpec {
    kind: [u8; 4],
    required: bool,
    unique: bool,
}

const fn req(kind: [u8; 4]) -> BoxSpec {
    BoxSpec {
        kind,
        required: true,
        unique: false,
    }
}

const fn req_uniq(kind: [u8; 4]) -> BoxSpec {
    BoxSpec {
        kind,
        required: true,
        unique: true,
    }
}

const fn uniq(kind: [u8; 4]) -> BoxSpec {
    BoxSpec {
        kind,
        required: false,
        unique: true,
    }
}

fn check_specs(tree: &BoxTree, parent: u32, specs: &[BoxSpec]) -> Result<()> {
    for spec in specs {
        let count = tree.children_of(parent, spec.kind).count();
        if spec.required && count == 0 {
            return Err(Error::invalid_data_format(format!(
                "MP4: box '{}' is not present",
                String::from_utf8_lossy(&spec.kind)
            )));
        }
        if spec.unique && count > 1 {
            return Err(Error::invalid_data_format(format!(
                "MP4: box '{}' is not unique",
                String::from_utf8_lossy(&spec.kind)
            )));
        }
    }
    Ok(())
}

type BoxReader = fn(&mut BoxTree, u32, &mut dyn Stream) -> Result<()>;

const LPCM_ENTRY_KINDS: [[u8; 4]; 10] = [
    [0, 0, 0, 0],
    *b"NONE",
    *b"raw ",
    *b"twos",
    *b"sowt",
    *b"in24",
    *b"in32",
    *b"fl32",
    *b"fl64",
    *b"lpcm",
];

fn is_lpcm_entry_kind(kind: [u8; 4]) -> bool {
    LPCM_ENTRY_KINDS.contains(&kind)
}

fn reader_for(parent: [u8; 4], child: [u8; 4]) -> Option<BoxReader> {
    let reader: BoxReader = match (&parent, &child) {
        (&ROOT_KIND, b"ftyp") | (&ROOT_KIND, b"styp") => read_ftyp,
        (&ROOT_KIND, b"moov") => read_moov,
        (&ROOT_KIND, b"moof") => read_moof,
        (b"moov", b"mvhd") => read_mvhd,
        (b"moov", b"trak") => read_trak,
        (b"moov", b"udta") => read_plain_container,
        (b"moov", b"meta") => read_meta,
        (b"moov", b"mvex") => read_mvex,
        (b"mvex", b"trex") => read_trex,
        (b"trak", b"tkhd") => read_tkhd,
        (b"trak", b"edts") => read_edts,
        (b"trak", b"mdia") => read_mdia,
        (b"trak", b"udta") => read_plain_container,
        (b"trak", b"meta") => read_meta,
        (b"edts", b"elst") => read_elst,
        (b"mdia", b"hdlr") | (b"minf", b"hdlr") | (b"meta", b"hdlr") => read_hdlr,
        (b"mdia", b"mdhd") => read_mdhd,
        (b"mdia", b"minf") => read_minf,
        (b"minf", b"stbl") => read_stbl,
        (b"stbl", b"stsd") => read_stsd,
        (b"stbl", b"stsc") => read_stsc,
        (b"stbl", b"stco") => read_stco,
        (b"stbl", b"co64") => read_co64,
        (b"stbl", b"stsz") => read_stsz,
        (b"stbl", b"stz2") => read_stz2,
        (b"stbl", b"stts") => read_stts,
        (b"udta", b"meta") => read_meta,
        (b"udta", b"chpl") => read_chpl,
        (b"meta", b"ilst") => read_ilst,
        (b"mp4a", b"esds") | (b"wave", b"esds") => read_esds,
        (b"mp4a", b"wave") | (b"alac", b"wave") => read_plain_container,
        (b"alac", b"alac") | (b"wave", b"alac") => read_alac,
        (b"QDM2", b"wave") | (b"QDMC", b"wave") => read_wave_blob,
        (b"wave", b"enda") => read_enda,
        (b"wave", b"frma") => read_frma,
        (b"moof", b"mfhd") => read_mfhd,
        (b"moof", b"traf") => read_traf,
        (b"traf", b"tfhd") => read_tfhd,
        (b"traf", b"tfdt") => read_tfdt,
        (b"traf", b"trun") => read_trun,
        _ if is_lpcm_entry_kind(parent) && &child == b"wave" => read_plain_container,
        _ => return None,
    };
    Some(reader)
}

fn read_container(
    tree: &mut BoxTree,
    parent: u32,
    file: &mut dyn Stream,
    specs: &[BoxSpec],
) -> Result<()> {
    let container_end = tree.end_position(parent);
    let parent_kind = tree.kind(parent);
    let mut pos = file.tell()?;

    while pos + 8 <= container_end {
        let header = read_box_header(file)?;
        let idx = tree.add_child(parent, header);

        if let Some(reader) = reader_for(parent_kind, header.kind) {
            reader(tree, idx, file)?;
        }

        pos = file.tell()?;
        let box_end = tree.end_position(idx);
        if pos > box_end {
            return Err(Error::failure(format!(
                "MP4: read outside of box boundaries \
                 (expected file offset={box_end}, actual file offset={pos})"
            )));
        }
        if pos != box_end {
            file.goto(box_end)?;
            pos = box_end;
        }
    }

    check_specs(tree, parent, specs)?;
    file.goto(container_end)?;
    Ok(())
}

fn read_plain_container(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    read_container(tree, idx, file, &[])
}

/// Parses the whole file into a box tree.
pub fn parse_root(file: &mut dyn Stream) -> Result<BoxTree> {
    let size = file.size()?;
    let mut tree = BoxTree::with_root(size);

    const SPEC: &[BoxSpec] = &[uniq(*b"ftyp"), req_uniq(*b"moov"), uniq(*b"mvex"), uniq(*b"pdin")];
    read_container(&mut tree, 0, file, SPEC)?;

    // Movie fragments must carry increasing sequence numbers.
    let mut last_sequence: Option<u32> = None;
    for moof in tree.children_of(0, *b"moof").collect::<Vec<_>>() {
        let mfhd = tree
            .child(moof, *b"mfhd")
            .ok_or_else(|| Error::invalid_data_format("MP4: box 'mfhd' is not present"))?;
        if let BoxData::Mfhd { sequence_number } = tree.node(mfhd).data {
            if last_sequence.is_some_and(|last| sequence_number <= last) {
                return Err(Error::failure(
                    "MP4 movie fragments must be in increasing order",
                ));
            }
            last_sequence = Some(sequence_number);
        }
    }
    Ok(tree)
}

fn version_of(vf: u32) -> u8 {
    (vf >> 24) as u8
}

fn flags_of(vf: u32) -> u32 {
    vf & 0x00ff_ffff
}

fn read_ftyp(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let payload = tree.node(idx).header.payload_size();
    if payload < 8 {
        return Err(Error::invalid_data_format("MP4 'ftyp' box is too small"));
    }

    let major_brand = file.read_fourcc()?;
    let _minor_version = file.read_u32::<BE>()?;

    let count = ((payload - 8) / 4) as usize;
    let mut compatible_brands = Vec::with_capacity(count);
    for _ in 0..count {
        compatible_brands.push(file.read_fourcc()?);
    }

    tree.node_mut(idx).data = BoxData::Ftyp {
        major_brand,
        compatible_brands,
    };
    Ok(())
}

fn read_moov(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    const SPEC: &[BoxSpec] = &[req_uniq(*b"mvhd"), req(*b"trak"), uniq(*b"udta")];
    read_container(tree, idx, file, SPEC)
}

fn read_moof(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    const SPEC: &[BoxSpec] = &[req_uniq(*b"mfhd"), req(*b"traf")];
    read_container(tree, idx, file, SPEC)
}

fn read_trak(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    const SPEC: &[BoxSpec] = &[
        uniq(*b"edts"),
        req_uniq(*b"mdia"),
        req_uniq(*b"tkhd"),
        uniq(*b"tref"),
        uniq(*b"udta"),
    ];
    read_container(tree, idx, file, SPEC)
}

fn read_edts(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    const SPEC: &[BoxSpec] = &[req_uniq(*b"elst")];
    read_container(tree, idx, file, SPEC)
}

fn read_mdia(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    const SPEC: &[BoxSpec] = &[req_uniq(*b"hdlr"), req_uniq(*b"mdhd"), req_uniq(*b"minf")];
    read_container(tree, idx, file, SPEC)
}

fn read_minf(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    const SPEC: &[BoxSpec] = &[req_uniq(*b"stbl")];
    read_container(tree, idx, file, SPEC)
}

fn read_stbl(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    const SPEC: &[BoxSpec] = &[
        uniq(*b"co64"),
        uniq(*b"stco"),
        uniq(*b"stsz"),
        uniq(*b"stz2"),
        req_uniq(*b"stsc"),
        req_uniq(*b"stsd"),
        req_uniq(*b"stts"),
    ];
    read_container(tree, idx, file, SPEC)?;

    if tree.find_first_of(idx, &["stco", "co64"]).is_none() {
        return Err(Error::invalid_data_format("MP4 'stbl.stco' box is missing"));
    }
    if tree.find_first_of(idx, &["stsz", "stz2"]).is_none() {
        return Err(Error::invalid_data_format("MP4 'stbl.stsz' box is missing"));
    }
    Ok(())
}

fn read_mvex(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    const SPEC: &[BoxSpec] = &[uniq(*b"mehd"), req(*b"trex")];
    read_container(tree, idx, file, SPEC)
}

fn read_mvhd(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let vf = file.read_u32::<BE>()?;
    let (time_scale, duration) = if version_of(vf) == 1 {
        file.skip(16)?;
        let ts = file.read_u32::<BE>()?;
        (ts, file.read_u64::<BE>()?)
    } else {
        file.skip(8)?;
        let ts = file.read_u32::<BE>()?;
        (ts, u64::from(file.read_u32::<BE>()?))
    };
    tree.node_mut(idx).data = BoxData::Mvhd {
        time_scale,
        duration,
    };
    Ok(())
}

fn read_tkhd(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let vf = file.read_u32::<BE>()?;
    if version_of(vf) == 1 {
        file.skip(16)?;
    } else {
        file.skip(8)?;
    }
    let track_id = file.read_u32::<BE>()?;
    tree.node_mut(idx).data = BoxData::Tkhd { track_id };
    Ok(())
}

fn read_mdhd(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let vf = file.read_u32::<BE>()?;
    let (time_scale, duration) = if version_of(vf) == 1 {
        file.skip(16)?;
        let ts = file.read_u32::<BE>()?;
        (ts, file.read_u64::<BE>()?)
    } else {
        file.skip(8)?;
        let ts = file.read_u32::<BE>()?;
        (ts, u64::from(file.read_u32::<BE>()?))
    };
    tree.node_mut(idx).data = BoxData::Mdhd {
        time_scale,
        duration,
    };
    Ok(())
}

fn read_hdlr(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let _vf = file.read_u32::<BE>()?;
    let _pre_defined = file.read_u32::<BE>()?;
    let handler_type = file.read_fourcc()?;
    tree.node_mut(idx).data = BoxData::Hdlr { handler_type };
    Ok(())
}

fn read_meta(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let _vf = file.read_u32::<BE>()?;
    read_container(tree, idx, file, &[])
}

fn read_stts(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let _vf = file.read_u32::<BE>()?;
    let count = file.read_u32::<BE>()?;

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        entries.push(SttsEntry {
            sample_count: file.read_u32::<BE>()?,
            sample_delta: file.read_u32::<BE>()?,
        });
    }
    tree.node_mut(idx).data = BoxData::Stts { entries };
    Ok(())
}

fn read_stsd(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    // The sample description is only parsed for audio tracks; the media
    // handler reference box fixes the track type and must precede it.
    let hdlr = tree.find(idx, "../../../hdlr").ok_or_else(|| {
        Error::failure(
            "MP4 sample table description box cannot appear before the \
             media handler reference box",
        )
    })?;
    match tree.node(hdlr).data {
        BoxData::Hdlr { handler_type } if &handler_type == b"soun" => {}
        _ => return Ok(()),
    }

    tree.node_mut(idx).data = BoxData::Stsd;
    let _vf = file.read_u32::<BE>()?;
    let mut count = file.read_u32::<BE>()?;

    while count > 0 {
        count -= 1;
        let header = read_box_header(file)?;
        if header.kind == [0; 4] && header.size == u64::from(header.header_size) {
            break;
        }

        let entry = tree.add_child(idx, header);
        read_soun(tree, entry, file)?;
        file.goto(header.end())?;
    }
    Ok(())
}

fn read_soun(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    file.skip(6)?; // reserved
    let _data_reference_index = file.read_u16::<BE>()?;

    let mut entry = SampleEntry {
        version: file.read_i16::<BE>()?,
        ..SampleEntry::default()
    };
    let _revision = file.read_i16::<BE>()?;
    let _vendor = file.read_u32::<BE>()?;
    entry.channels = file.read_u16::<BE>()?;
    entry.sample_size = file.read_u16::<BE>()?;
    entry.compression_id = file.read_i16::<BE>()?;
    let _packet_size = file.read_u16::<BE>()?;
    entry.sample_rate = file.read_u32::<BE>()?;

    match entry.version {
        2 => {
            let _size_of_struct_only = file.read_u32::<BE>()?;
            entry.v2 = Some(SounV2 {
                audio_sample_rate: file.read_f64::<BE>()?,
                audio_channels: file.read_u32::<BE>()?,
                const_bits_per_channel: {
                    let _always_7f000000 = file.read_u32::<BE>()?;
                    file.read_u32::<BE>()?
                },
                format_specific_flags: file.read_u32::<BE>()?,
                const_bytes_per_audio_packet: file.read_u32::<BE>()?,
                const_lpcm_frames_per_audio_packet: file.read_u32::<BE>()?,
            });
        }
        1 => {
            entry.v1 = Some(SounV1 {
                samples_per_packet: file.read_u32::<BE>()?,
                bytes_per_packet: file.read_u32::<BE>()?,
                bytes_per_frame: file.read_u32::<BE>()?,
                bytes_per_sample: file.read_u32::<BE>()?,
            });
        }
        0 => {}
        other => {
            return Err(Error::failure(format!(
                "invalid MPEG-4 audio sample entry box version: {other}"
            )));
        }
    }

    tree.node_mut(idx).data = BoxData::Soun(entry);
    read_container(tree, idx, file, &[])
}

fn read_esds(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let _vf = file.read_u32::<BE>()?;
    let payload = tree.node(idx).header.payload_size();
    if payload <= 4 {
        return Err(Error::invalid_data_format("MP4 'esds' box is too small"));
    }

    let body = file.read_vec((payload - 4) as usize)?;
    let dcd = DecoderConfigDescriptor::parse(&body)?;
    tree.node_mut(idx).data = BoxData::Esds(dcd);
    Ok(())
}

fn read_alac(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let _vf = file.read_u32::<BE>()?;
    let payload = tree.node(idx).header.payload_size();
    let extra = file.read_vec((payload - 4) as usize)?;
    tree.node_mut(idx).data = BoxData::Alac { extra };
    Ok(())
}

fn read_wave_blob(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let payload = tree.node(idx).header.payload_size();
    let extra = file.read_vec(payload as usize)?;
    tree.node_mut(idx).data = BoxData::Wave { extra };
    Ok(())
}

fn read_frma(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let data_format = file.read_fourcc()?;
    tree.node_mut(idx).data = BoxData::Frma { data_format };
    Ok(())
}

fn read_enda(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let little_endian = file.read_i16::<BE>()? != 0;
    tree.node_mut(idx).data = BoxData::Enda { little_endian };
    Ok(())
}

fn read_stsz(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let _vf = file.read_u32::<BE>()?;
    let sample_size = file.read_u32::<BE>()?;
    let sample_count = file.read_u32::<BE>()?;

    let mut entries = Vec::new();
    if sample_size == 0 {
        entries.reserve(sample_count as usize);
        for _ in 0..sample_count {
            entries.push(file.read_u32::<BE>()?);
        }
    }
    tree.node_mut(idx).data = BoxData::Stsz {
        sample_size,
        sample_count,
        entries,
    };
    Ok(())
}

fn read_stz2(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let _vf = file.read_u32::<BE>()?;
    file.skip(3)?;
    let field_size = file.read_u8()?;
    let sample_count = file.read_u32::<BE>()?;

    let mut entries = Vec::with_capacity(sample_count as usize);
    match field_size {
        16 => {
            for _ in 0..sample_count {
                entries.push(u32::from(file.read_u16::<BE>()?));
            }
        }
        8 => {
            for _ in 0..sample_count {
                entries.push(u32::from(file.read_u8()?));
            }
        }
        4 => {
            let mut i = 0;
            while i + 2 <= sample_count {
                let byte = file.read_u8()?;
                entries.push(u32::from(byte >> 4));
                entries.push(u32::from(byte & 0xf));
                i += 2;
            }
            if sample_count & 1 != 0 {
                entries.push(u32::from(file.read_u8()? >> 4));
            }
        }
        other => {
            return Err(Error::failure(format!(
                "MP4: invalid 'stz2' field size: {other}"
            )));
        }
    }

    tree.node_mut(idx).data = BoxData::Stsz {
        sample_size: 0,
        sample_count,
        entries,
    };
    Ok(())
}

fn read_stsc(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let _vf = file.read_u32::<BE>()?;
    let count = file.read_u32::<BE>()?;

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        entries.push(StscEntry {
            first_chunk: file.read_u32::<BE>()?,
            samples_per_chunk: file.read_u32::<BE>()?,
            sample_description_index: file.read_u32::<BE>()?,
            first_sample: 0,
        });
    }

    let mut sample = 0u32;
    for i in 0..entries.len() {
        entries[i].first_sample = sample;
        if i + 1 < entries.len() {
            sample += (entries[i + 1].first_chunk - entries[i].first_chunk)
                * entries[i].samples_per_chunk;
        }
    }

    tree.node_mut(idx).data = BoxData::Stsc { entries };
    Ok(())
}

fn read_stco(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let _vf = file.read_u32::<BE>()?;
    let count = file.read_u32::<BE>()?;

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        entries.push(u64::from(file.read_u32::<BE>()?));
    }
    tree.node_mut(idx).data = BoxData::Stco { entries };
    Ok(())
}

fn read_co64(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let _vf = file.read_u32::<BE>()?;
    let count = file.read_u32::<BE>()?;

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        entries.push(file.read_u64::<BE>()?);
    }
    tree.node_mut(idx).data = BoxData::Stco { entries };
    Ok(())
}

fn read_elst(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let vf = file.read_u32::<BE>()?;
    let count = file.read_u32::<BE>()?;

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (segment_duration, media_time) = if version_of(vf) == 1 {
            (file.read_u64::<BE>()?, file.read_i64::<BE>()?)
        } else {
            (
                u64::from(file.read_u32::<BE>()?),
                i64::from(file.read_i32::<BE>()?),
            )
        };
        let _media_rate = file.read_u32::<BE>()?;
        entries.push(ElstEntry {
            segment_duration,
            media_time,
        });
    }
    tree.node_mut(idx).data = BoxData::Elst { entries };
    Ok(())
}

fn read_ilst(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let end_pos = tree.end_position(idx);
    let mut items = Vec::new();

    while file.tell()? < end_pos {
        let item_header = read_box_header(file)?;
        let item_end = item_header.end();

        let mut item = IlstEntry {
            kind: item_header.kind,
            mean: String::new(),
            name: String::new(),
            data_type: 0,
            data: Vec::new(),
        };

        while file.tell()? < item_end {
            let header = read_box_header(file)?;
            let remain = header.payload_size();

            match &header.kind {
                b"mean" | b"name" => {
                    file.skip(4)?;
                    let text = file.read_vec((remain - 4) as usize)?;
                    let text = String::from_utf8_lossy(&text).into_owned();
                    if &header.kind == b"mean" {
                        item.mean = text;
                    } else {
                        item.name = text;
                    }
                }
                b"data" => {
                    file.skip(2)?;
                    let _type_set_identifier = file.read_u8()?;
                    item.data_type = file.read_u8()?;
                    let _locale_country = file.read_u16::<BE>()?;
                    let _locale_language = file.read_u16::<BE>()?;
                    item.data = file.read_vec((remain - 8) as usize)?;
                }
                _ => file.skip(remain)?,
            }
        }

        file.goto(item_end)?;
        items.push(item);
    }

    tree.node_mut(idx).data = BoxData::Ilst(items);
    Ok(())
}

fn read_chpl(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let vf = file.read_u32::<BE>()?;

    let count = if version_of(vf) == 1 {
        file.skip(1)?;
        file.read_u32::<BE>()?
    } else {
        u32::from(file.read_u8()?)
    };

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let start = file.read_u64::<BE>()?;
        let title_length = file.read_u8()?;
        let title = file.read_vec(usize::from(title_length))?;
        entries.push(ChplEntry {
            start,
            title: String::from_utf8_lossy(&title).into_owned(),
        });
    }
    tree.node_mut(idx).data = BoxData::Chpl { entries };
    Ok(())
}

fn read_mfhd(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let _vf = file.read_u32::<BE>()?;
    let sequence_number = file.read_u32::<BE>()?;
    tree.node_mut(idx).data = BoxData::Mfhd { sequence_number };
    Ok(())
}

fn read_trex(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let _vf = file.read_u32::<BE>()?;
    let track_id = file.read_u32::<BE>()?;
    let _default_sample_description_index = file.read_u32::<BE>()?;
    let default_sample_duration = file.read_u32::<BE>()?;
    let default_sample_size = file.read_u32::<BE>()?;
    let default_sample_flags = file.read_u32::<BE>()?;

    tree.node_mut(idx).data = BoxData::Trex(TrexData {
        track_id,
        default_sample_duration,
        default_sample_size,
        default_sample_flags,
    });
    Ok(())
}

fn read_traf(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    const SPEC: &[BoxSpec] = &[req_uniq(*b"tfhd")];
    read_container(tree, idx, file, SPEC)
}

fn read_tfhd(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let vf = file.read_u32::<BE>()?;
    let flags = flags_of(vf);

    let mut tfhd = TfhdData {
        track_id: file.read_u32::<BE>()?,
        flags,
        ..TfhdData::default()
    };

    if flags & 0x1 != 0 {
        tfhd.base_data_offset = file.read_i64::<BE>()?;
    } else if flags & 0x20000 != 0 {
        // default-base-is-moof: offsets are relative to the moof start.
        let moof = tree.node(idx).parent.and_then(|traf| tree.node(traf).parent);
        if let Some(moof) = moof {
            tfhd.base_data_offset = tree.node(moof).header.fpos as i64;
        }
    }

    if flags & 0x2 != 0 {
        let _sample_description_index = file.read_u32::<BE>()?;
    }
    if tfhd.default_sample_duration_present() {
        tfhd.default_sample_duration = file.read_u32::<BE>()?;
    }
    if tfhd.default_sample_size_present() {
        tfhd.default_sample_size = file.read_u32::<BE>()?;
    }
    if tfhd.default_sample_flags_present() {
        tfhd.default_sample_flags = file.read_u32::<BE>()?;
    }

    tree.node_mut(idx).data = BoxData::Tfhd(tfhd);
    Ok(())
}

fn read_tfdt(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let vf = file.read_u32::<BE>()?;
    let base_media_decode_time = if version_of(vf) != 0 {
        file.read_u64::<BE>()?
    } else {
        u64::from(file.read_u32::<BE>()?)
    };
    tree.node_mut(idx).data = BoxData::Tfdt {
        base_media_decode_time,
    };
    Ok(())
}

fn read_trun(tree: &mut BoxTree, idx: u32, file: &mut dyn Stream) -> Result<()> {
    let vf = file.read_u32::<BE>()?;
    let flags = flags_of(vf);
    let sample_count = file.read_u32::<BE>()?;

    let tfhd = match tree
        .find(idx, "../tfhd")
        .map(|i| &tree.node(i).data)
    {
        Some(BoxData::Tfhd(tfhd)) => *tfhd,
        _ => {
            return Err(Error::invalid_data_format(
                "MP4 'trun' box requires a preceding 'tfhd' box",
            ));
        }
    };

    let trex = tree
        .find(idx, "/moov/mvex")
        .into_iter()
        .flat_map(|mvex| tree.children_of(mvex, *b"trex").collect::<Vec<_>>())
        .find_map(|i| match &tree.node(i).data {
            BoxData::Trex(trex) if trex.track_id == tfhd.track_id => Some(*trex),
            _ => None,
        })
        .ok_or_else(|| {
            Error::invalid_data_format(format!(
                "MP4 'trex' box is missing for track ID {}",
                tfhd.track_id
            ))
        })?;

    let default_duration = if tfhd.default_sample_duration_present() {
        tfhd.default_sample_duration
    } else {
        trex.default_sample_duration
    };
    let default_size = if tfhd.default_sample_size_present() {
        tfhd.default_sample_size
    } else {
        trex.default_sample_size
    };

    let mut trun = TrunData::default();
    if flags & 0x1 != 0 {
        trun.data_offset = i64::from(file.read_i32::<BE>()?);
    }
    if flags & 0x4 != 0 {
        let _first_sample_flags = file.read_u32::<BE>()?;
    }

    trun.samples.reserve(sample_count as usize);
    for _ in 0..sample_count {
        let duration = if flags & 0x100 != 0 {
            file.read_u32::<BE>()?
        } else {
            default_duration
        };
        let size = if flags & 0x200 != 0 {
            file.read_u32::<BE>()?
        } else {
            default_size
        };
        if flags & 0x400 != 0 {
            let _sample_flags = file.read_u32::<BE>()?;
        }
        if flags & 0x800 != 0 {
            let _composition_time_offset = file.read_u32::<BE>()?;
        }
        trun.samples.push(TrunSample { duration, size });
    }

    tree.node_mut(idx).data = BoxData::Trun(trun);
    Ok(())
}
