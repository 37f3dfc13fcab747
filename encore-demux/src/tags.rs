//! The canonical tag-key vocabulary and the translation table that folds
//! container-specific key spellings onto it.

use encore_common::UStr;

pub const ARTIST: &str = "artist";
pub const ALBUM: &str = "album";
pub const ALBUM_ARTIST: &str = "album_artist";
pub const ALBUM_ARTIST_SORT: &str = "album_artist_sort";
pub const ALBUM_SORT: &str = "album_sort";
pub const ARTIST_SORT: &str = "artist_sort";
pub const TITLE: &str = "title";
pub const TITLE_SORT: &str = "title_sort";
pub const TRACK_NUMBER: &str = "track_number";
pub const TRACK_TOTAL: &str = "track_total";
pub const DISC_NUMBER: &str = "disc_number";
pub const DISC_TOTAL: &str = "disc_total";
pub const DATE: &str = "date";
pub const ORIGINAL_DATE: &str = "original_date";
pub const GENRE: &str = "genre";
pub const COMPOSER: &str = "composer";
pub const COMPOSER_SORT: &str = "composer_sort";
pub const CONDUCTOR: &str = "conductor";
pub const PERFORMER: &str = "performer";
pub const COMMENT: &str = "comment";
pub const DESCRIPTION: &str = "description";
pub const ENCODED_BY: &str = "encoded_by";
pub const ENCODER: &str = "encoder";
pub const COPYRIGHT: &str = "copyright";
pub const BPM: &str = "bpm";
pub const ISRC: &str = "isrc";
pub const UPC: &str = "upc";
pub const BARCODE: &str = "barcode";
pub const CATALOG_NUMBER: &str = "catalog_number";
pub const LABEL: &str = "label";
pub const LYRICIST: &str = "lyricist";
pub const LYRICS: &str = "lyrics";
pub const WRITER: &str = "writer";
pub const MOOD: &str = "mood";
pub const GROUP: &str = "group";
pub const COMPILATION: &str = "compilation";
pub const RATING: &str = "rating";
pub const CUE_SHEET: &str = "cue_sheet";
pub const ORIGINAL_ARTIST: &str = "original_artist";
pub const ORIGINAL_ALBUM: &str = "original_album";

pub const RG_TRACK_GAIN: &str = "replaygain_track_gain";
pub const RG_TRACK_PEAK: &str = "replaygain_track_peak";
pub const RG_ALBUM_GAIN: &str = "replaygain_album_gain";
pub const RG_ALBUM_PEAK: &str = "replaygain_album_peak";

pub const MB_ALBUM_ARTIST_ID: &str = "musicbrainz_album_artist_id";
pub const MB_ALBUM_ID: &str = "musicbrainz_album_id";
pub const MB_ARTIST_ID: &str = "musicbrainz_artist_id";
pub const MB_RELEASE_COUNTRY: &str = "musicbrainz_release_country";
pub const MB_TRACK_ID: &str = "musicbrainz_track_id";
pub const MB_WORK_ID: &str = "musicbrainz_work_id";

// Stream-property keys, kept alongside the tags for display purposes.
pub const CONTAINER: &str = "container";
pub const CODEC: &str = "codec";
pub const CODEC_PROFILE: &str = "codec_profile";
pub const TAG_TYPE: &str = "tag_type";
pub const ENCODING_SETTINGS: &str = "encoding_settings";

/// Container-specific key spellings, matched case-insensitively.
const COMMON_KEYS: &[(&str, &str)] = &[
    ("album", ALBUM),
    ("album artist", ALBUM_ARTIST),
    ("albumartist", ALBUM_ARTIST),
    ("albumartistsort", ALBUM_ARTIST_SORT),
    ("albumsort", ALBUM_SORT),
    ("artist", ARTIST),
    ("artistsort", ARTIST_SORT),
    ("author", WRITER),
    ("barcode", BARCODE),
    ("bpm", BPM),
    ("catalog", CATALOG_NUMBER),
    ("catalognumber", CATALOG_NUMBER),
    ("comment", COMMENT),
    ("compilation", COMPILATION),
    ("composer", COMPOSER),
    ("composersort", COMPOSER_SORT),
    ("conductor", CONDUCTOR),
    ("copyright", COPYRIGHT),
    ("cuesheet", CUE_SHEET),
    ("date", DATE),
    ("description", DESCRIPTION),
    ("disc", DISC_NUMBER),
    ("discnumber", DISC_NUMBER),
    ("disctotal", DISC_TOTAL),
    ("encoded-by", ENCODED_BY),
    ("encodedby", ENCODED_BY),
    ("encoder", ENCODER),
    ("genre", GENRE),
    ("grouping", GROUP),
    ("isrc", ISRC),
    ("label", LABEL),
    ("lyricist", LYRICIST),
    ("lyrics", LYRICS),
    ("mood", MOOD),
    ("musicbrainz album artist id", MB_ALBUM_ARTIST_ID),
    ("musicbrainz album id", MB_ALBUM_ID),
    ("musicbrainz artist id", MB_ARTIST_ID),
    ("musicbrainz release country", MB_RELEASE_COUNTRY),
    ("musicbrainz track id", MB_TRACK_ID),
    ("musicbrainz work id", MB_WORK_ID),
    ("organization", LABEL),
    ("originaldate", ORIGINAL_DATE),
    ("performer", PERFORMER),
    ("rating", RATING),
    ("replaygain_album_gain", RG_ALBUM_GAIN),
    ("replaygain_album_peak", RG_ALBUM_PEAK),
    ("replaygain_track_gain", RG_TRACK_GAIN),
    ("replaygain_track_peak", RG_TRACK_PEAK),
    ("songwriter", WRITER),
    ("tempo", BPM),
    ("title", TITLE),
    ("titlesort", TITLE_SORT),
    ("totaldiscs", DISC_TOTAL),
    ("totaltracks", TRACK_TOTAL),
    ("track", TRACK_NUMBER),
    ("tracknumber", TRACK_NUMBER),
    ("tracktotal", TRACK_TOTAL),
    ("upc", UPC),
    ("writer", WRITER),
    ("year", DATE),
];

/// Folds a container-specific key spelling onto the canonical vocabulary.
///
/// Unknown keys pass through unchanged (lowercased) so no metadata is lost.
pub fn map_common_key(key: &str) -> UStr {
    for (variant, canonical) in COMMON_KEYS {
        if variant.eq_ignore_ascii_case(key) {
            return UStr::intern(canonical);
        }
    }
    UStr::intern(&key.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_keys_normalize_case_insensitively() {
        assert_eq!(map_common_key("AlbumArtist").as_str(), ALBUM_ARTIST);
        assert_eq!(map_common_key("YEAR").as_str(), DATE);
        assert_eq!(map_common_key("Tempo").as_str(), BPM);
        assert_eq!(map_common_key("TRACKNUMBER").as_str(), TRACK_NUMBER);
    }

    #[test]
    fn unknown_keys_pass_through_lowercased() {
        assert_eq!(map_common_key("X-Custom-Key").as_str(), "x-custom-key");
    }

    #[test]
    fn canonical_keys_are_interned() {
        let a = map_common_key("artist");
        let b = map_common_key("ARTIST");
        assert!(UStr::ptr_eq(&a, &b));
    }
}
