//! iTunes-style metadata: the `ilst` item list, freeform atoms, cover art
//! and the iTunSMPB gapless descriptor.

use encore_common::io::ByteReader;
use encore_common::UStr;

use byteorder::BE;

use crate::dict::Dictionary;
use crate::info::Image;
use crate::mp4::boxes::IlstEntry;
use crate::tags;

// The classic ID3v1 genre list, indexed by the 'gnre' atom.
const GENRES: [&str; 80] = [
    "Blues", "Classic Rock", "Country", "Dance", "Disco", "Funk", "Grunge", "Hip-Hop", "Jazz",
    "Metal", "New Age", "Oldies", "Other", "Pop", "R&B", "Rap", "Reggae", "Rock", "Techno",
    "Industrial", "Alternative", "Ska", "Death Metal", "Pranks", "Soundtrack", "Euro-Techno",
    "Ambient", "Trip-Hop", "Vocal", "Jazz+Funk", "Fusion", "Trance", "Classical", "Instrumental",
    "Acid", "House", "Game", "Sound Clip", "Gospel", "Noise", "Alternative Rock", "Bass", "Soul",
    "Punk", "Space", "Meditative", "Instrumental Pop", "Instrumental Rock", "Ethnic", "Gothic",
    "Darkwave", "Techno-Industrial", "Electronic", "Pop-Folk", "Eurodance", "Dream",
    "Southern Rock", "Comedy", "Cult", "Gangsta", "Top 40", "Christian Rap", "Pop/Funk", "Jungle",
    "Native American", "Cabaret", "New Wave", "Psychedelic", "Rave", "Showtunes", "Trailer",
    "Lo-Fi", "Tribal", "Acid Punk", "Acid Jazz", "Polka", "Retro", "Musical", "Rock & Roll",
    "Hard Rock",
];

/// Encoder priming, trailing padding and valid frame count, as written by
/// iTunes into the `----:com.apple.iTunes:iTunSMPB` freeform atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ITunSmpb {
    pub priming: u32,
    pub padding: u32,
    pub frames: u64,
}

fn read_string(data: &[u8]) -> Option<String> {
    std::str::from_utf8(data).ok().map(str::to_owned)
}

fn read_integer(data: &[u8]) -> Option<String> {
    let mut r = ByteReader::new(data);
    let value = if data.len() >= 4 {
        r.get::<u32, BE>().ok()?
    } else {
        u32::from(r.get::<u16, BE>().ok()?)
    };
    Some(value.to_string())
}

fn read_boolean(data: &[u8]) -> Option<String> {
    data.first()
        .map(|&b| if b != 0 { "Yes" } else { "No" }.to_owned())
}

fn read_pair(data: &[u8]) -> Option<String> {
    let mut r = ByteReader::new(data);
    r.skip(2).ok()?;
    let part = r.get::<u16, BE>().ok()?;
    match r.get::<u16, BE>() {
        Ok(total) if total != 0 => Some(format!("{part}/{total}")),
        _ => Some(part.to_string()),
    }
}

fn read_genre(data: &[u8]) -> Option<String> {
    let mut r = ByteReader::new(data);
    let index = r.get::<u16, BE>().ok()?;
    let index = index.checked_sub(1)? as usize;
    GENRES.get(index).map(|&g| g.to_owned())
}

fn read_rating(data: &[u8]) -> Option<String> {
    match data.first()? {
        0 => Some("None".to_owned()),
        2 => Some("Clean".to_owned()),
        4 => Some("Explicit".to_owned()),
        _ => None,
    }
}

fn parser_for(kind: [u8; 4]) -> Option<(&'static str, fn(&[u8]) -> Option<String>)> {
    Some(match &kind {
        b"aART" => (tags::ALBUM_ARTIST, read_string),
        b"cpil" => (tags::COMPILATION, read_boolean),
        b"cprt" => (tags::COPYRIGHT, read_string),
        b"desc" => (tags::DESCRIPTION, read_string),
        b"disk" => (tags::DISC_NUMBER, read_pair),
        b"gnre" => (tags::GENRE, read_genre),
        b"rtng" => (tags::RATING, read_rating),
        b"soaa" => (tags::ALBUM_ARTIST_SORT, read_string),
        b"soal" => (tags::ALBUM_SORT, read_string),
        b"soar" => (tags::ARTIST_SORT, read_string),
        b"soco" => (tags::COMPOSER_SORT, read_string),
        b"sonm" => (tags::TITLE_SORT, read_string),
        b"tmpo" => (tags::BPM, read_integer),
        b"trkn" => (tags::TRACK_NUMBER, read_pair),
        b"\xa9ART" => (tags::ARTIST, read_string),
        b"\xa9alb" => (tags::ALBUM, read_string),
        b"\xa9cmt" => (tags::COMMENT, read_string),
        b"\xa9com" | b"\xa9wrt" => (tags::COMPOSER, read_string),
        b"\xa9cpy" => (tags::COPYRIGHT, read_string),
        b"\xa9day" => (tags::DATE, read_string),
        b"\xa9enc" | b"\xa9swr" => (tags::ENCODER, read_string),
        b"\xa9gen" => (tags::GENRE, read_string),
        b"\xa9grp" => (tags::GROUP, read_string),
        b"\xa9lyr" => (tags::LYRICS, read_string),
        b"\xa9nam" => (tags::TITLE, read_string),
        b"\xa9ope" => (tags::ORIGINAL_ARTIST, read_string),
        b"\xa9too" => (tags::ENCODED_BY, read_string),
        _ => return None,
    })
}

fn read_freeform(item: &IlstEntry, dict: &mut Dictionary) {
    // Freeform keys follow '----:mean:name'. Values are usually UTF-8
    // text; binary payloads (gapless/normalization data) are skipped.
    if item.mean != "com.apple.iTunes"
        || item.name == "Encoding Params"
        || item.name == "iTunSMPB"
        || item.name == "iTunNORM"
        || item.name == "iTunMOVI"
    {
        return;
    }
    if let Ok(text) = std::str::from_utf8(&item.data) {
        dict.insert(tags::map_common_key(&item.name), UStr::new(text));
    }
}

pub fn parse_tags(items: &[IlstEntry]) -> Dictionary {
    let mut dict = Dictionary::new();
    for item in items {
        if item.data.is_empty() {
            continue;
        }
        if let Some((key, read)) = parser_for(item.kind) {
            if let Some(value) = read(&item.data) {
                if !value.is_empty() {
                    dict.insert(UStr::intern(key), UStr::new(value));
                }
            }
        } else if &item.kind == b"----" {
            read_freeform(item, &mut dict);
        }
    }
    dict
}

pub fn cover_art(items: &[IlstEntry]) -> Option<Image> {
    let covr = items.iter().find(|item| &item.kind == b"covr")?;

    let mime_type = match covr.data_type {
        0x0d => "image/jpeg",
        0x0e => "image/png",
        0x1b => "image/bmp",
        other => {
            log::warn!("invalid MP4 'covr' data type: {other:#x}");
            return None;
        }
    };

    Some(Image {
        mime_type: UStr::intern(mime_type),
        data: covr.data.clone(),
    })
}

pub fn itun_smpb(items: &[IlstEntry]) -> Option<ITunSmpb> {
    for item in items {
        if &item.kind != b"----" || item.mean != "com.apple.iTunes" || item.name != "iTunSMPB" {
            continue;
        }

        let text = std::str::from_utf8(&item.data).ok()?;
        let mut fields = text.split_whitespace();
        let _reserved = fields.next()?;
        let priming = u32::from_str_radix(fields.next()?, 16).ok()?;
        let padding = u32::from_str_radix(fields.next()?, 16).ok()?;
        let frames = u64::from_str_radix(fields.next()?, 16).ok()?;
        return Some(ITunSmpb {
            priming,
            padding,
            frames,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn freeform(name: &str, data: &[u8]) -> IlstEntry {
        IlstEntry {
            kind: *b"----",
            mean: "com.apple.iTunes".to_owned(),
            name: name.to_owned(),
            data_type: 1,
            data: data.to_vec(),
        }
    }

    #[test]
    fn itun_smpb_parses_the_itunes_field_layout() {
        let items = [freeform(
            "iTunSMPB",
            b" 00000000 00000840 000001C0 00000000005A8B40 00000000 00000000",
        )];
        let smpb = itun_smpb(&items).unwrap();
        assert_eq!(smpb.priming, 2112);
        assert_eq!(smpb.padding, 448);
        assert_eq!(smpb.frames, 5_934_400);
    }

    #[test]
    fn typed_items_map_to_canonical_keys() {
        let items = [
            IlstEntry {
                kind: *b"\xa9nam",
                mean: String::new(),
                name: String::new(),
                data_type: 1,
                data: b"A Title".to_vec(),
            },
            IlstEntry {
                kind: *b"trkn",
                mean: String::new(),
                name: String::new(),
                data_type: 0,
                data: vec![0, 0, 0, 3, 0, 12, 0, 0],
            },
            IlstEntry {
                kind: *b"gnre",
                mean: String::new(),
                name: String::new(),
                data_type: 0,
                data: vec![0, 9],
            },
        ];
        let dict = parse_tags(&items);
        assert_eq!(dict.get(tags::TITLE).unwrap().as_str(), "A Title");
        assert_eq!(dict.get(tags::TRACK_NUMBER).unwrap().as_str(), "3/12");
        assert_eq!(dict.get(tags::GENRE).unwrap().as_str(), "Jazz");
    }

    #[test]
    fn binary_freeform_atoms_are_not_tags() {
        let items = [freeform("iTunNORM", b"\x00\x01binary")];
        assert!(parse_tags(&items).is_empty());
    }
}
