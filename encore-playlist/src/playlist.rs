//! The in-memory playlist: an ordered list of tracks, a cursor, and a
//! playback-order generator.

use std::path::{Path, PathBuf};

use encore_common::{Error, Result};
use encore_demux::media::Track;
use encore_demux::tags;

use crate::binary::{self, IndexEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackOrder {
    #[default]
    Linear,
    Random,
    Repeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

pub struct Playlist {
    path: PathBuf,
    id: u32,
    tracks: Vec<Track>,
    position: usize,
    order: PlaybackOrder,
    unsaved_changes: bool,
}

impl Playlist {
    /// Opens (or creates) the playlist stored at `path`.
    pub fn open(path: impl Into<PathBuf>, id: u32) -> Result<Self> {
        let path = path.into();
        let tracks = binary::load_playlist(&path)?;
        Ok(Playlist {
            path,
            id,
            tracks,
            position: 0,
            order: PlaybackOrder::Linear,
            unsaved_changes: false,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn playing(&self) -> Option<&Track> {
        self.tracks.get(self.position)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position >= self.tracks.len() {
            return Err(Error::out_of_bounds(format!(
                "target position ({position}) equals or exceeds size ({})",
                self.tracks.len()
            )));
        }
        self.position = position;
        Ok(())
    }

    pub fn set_playback_order(&mut self, order: PlaybackOrder) {
        self.order = order;
    }

    fn generate_position(&self, pos: usize, forward: bool) -> usize {
        debug_assert!(!self.is_empty());
        match self.order {
            PlaybackOrder::Linear => {
                if forward {
                    if pos + 1 < self.len() {
                        pos + 1
                    } else {
                        0
                    }
                } else if pos > 0 {
                    pos - 1
                } else {
                    self.len() - 1
                }
            }
            PlaybackOrder::Repeat => pos,
            PlaybackOrder::Random => fastrand::usize(..self.len()),
        }
    }

    pub fn next(&self, pos: usize) -> usize {
        self.generate_position(pos, true)
    }

    pub fn prev(&self, pos: usize) -> usize {
        self.generate_position(pos, false)
    }

    pub fn push(&mut self, track: Track) {
        self.tracks.push(track);
        self.unsaved_changes = true;
    }

    pub fn insert(&mut self, index: usize, tracks: impl IntoIterator<Item = Track>) {
        let mut index = index.min(self.tracks.len());
        for track in tracks {
            self.tracks.insert(index, track);
            index += 1;
        }
        self.unsaved_changes = true;
    }

    pub fn erase(&mut self, range: std::ops::Range<usize>) {
        if range.is_empty() {
            return;
        }
        self.tracks.drain(range);
        if self.position >= self.tracks.len() {
            self.position = self.tracks.len().saturating_sub(1);
        }
        self.unsaved_changes = true;
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.position = 0;
        self.unsaved_changes = true;
    }

    /// Stable-sorts by a tag key, falling back to the location for
    /// missing titles.
    pub fn sort(&mut self, key: &str, order: SortOrder) {
        let sort_value = |track: &Track| -> String {
            if let Some(value) = track.tags.get(key) {
                return value.as_str().to_owned();
            }
            if key == tags::TITLE {
                return track.location.as_str().to_owned();
            }
            String::new()
        };

        self.tracks.sort_by(|a, b| {
            let ordering = sort_value(a).cmp(&sort_value(b));
            match order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            }
        });
        self.unsaved_changes = true;
    }

    /// Writes the playlist back out if anything changed.
    pub fn save(&mut self) -> Result<()> {
        if self.unsaved_changes {
            binary::save_playlist(&self.path, &self.tracks)?;
            self.unsaved_changes = false;
        }
        Ok(())
    }

    pub fn remove(&mut self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        self.unsaved_changes = false;
        Ok(())
    }
}

/// The ordered list of playlists plus the active selection.
#[derive(Debug, Default)]
pub struct PlaylistIndex {
    pub entries: Vec<IndexEntry>,
    pub selection: u32,
}

impl PlaylistIndex {
    pub fn load(path: &Path) -> Result<Self> {
        let (entries, selection) = binary::load_index(path)?;
        Ok(PlaylistIndex { entries, selection })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        binary::save_index(path, &self.entries, self.selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encore_common::UStr;

    fn track(location: &str, title: &str) -> Track {
        let mut track = Track {
            location: UStr::new(location),
            sample_rate: 44_100,
            frames: 44_100,
            ..Track::default()
        };
        if !title.is_empty() {
            track
                .tags
                .insert(UStr::intern(tags::TITLE), UStr::new(title));
        }
        track
    }

    fn scratch_playlist() -> Playlist {
        let dir = tempfile::tempdir().unwrap();
        let mut playlist = Playlist::open(dir.path().join("0001.ampl"), 1).unwrap();
        playlist.push(track("/music/a.wav", "Alpha"));
        playlist.push(track("/music/b.wav", "Beta"));
        playlist.push(track("/music/c.wav", "Gamma"));
        playlist
    }

    #[test]
    fn linear_order_wraps_both_directions() {
        let playlist = scratch_playlist();
        assert_eq!(playlist.next(0), 1);
        assert_eq!(playlist.next(2), 0);
        assert_eq!(playlist.prev(0), 2);
        assert_eq!(playlist.prev(2), 1);
    }

    #[test]
    fn repeat_order_stays_put() {
        let mut playlist = scratch_playlist();
        playlist.set_playback_order(PlaybackOrder::Repeat);
        assert_eq!(playlist.next(1), 1);
        assert_eq!(playlist.prev(1), 1);
    }

    #[test]
    fn random_order_stays_in_bounds() {
        let mut playlist = scratch_playlist();
        playlist.set_playback_order(PlaybackOrder::Random);
        for _ in 0..50 {
            assert!(playlist.next(0) < playlist.len());
        }
    }

    #[test]
    fn erase_clamps_the_cursor() {
        let mut playlist = scratch_playlist();
        playlist.set_position(2).unwrap();
        playlist.erase(1..3);
        assert_eq!(playlist.len(), 1);
        assert_eq!(playlist.position(), 0);
    }

    #[test]
    fn out_of_bounds_positions_are_rejected() {
        let mut playlist = scratch_playlist();
        assert!(playlist.set_position(3).is_err());
    }

    #[test]
    fn sorting_by_title_is_stable_and_reversible() {
        let mut playlist = scratch_playlist();
        playlist.sort(tags::TITLE, SortOrder::Descending);
        let titles: Vec<String> = playlist
            .tracks()
            .iter()
            .map(|t| t.tags.get(tags::TITLE).unwrap().as_str().to_owned())
            .collect();
        assert_eq!(titles, vec!["Gamma", "Beta", "Alpha"]);
    }

    #[test]
    fn windowed_tracks_split_one_file() {
        // Two entries over a single ten-second 44.1 kHz file, split at
        // five seconds, the way a cue sheet would describe it.
        let mut first = track("/music/album.wav", "Part one");
        first.start_offset = 0;
        first.frames = 220_500;
        first.chapter = 1;

        let mut second = track("/music/album.wav", "Part two");
        second.start_offset = 220_500;
        second.frames = 220_500;
        second.chapter = 2;

        let dir = tempfile::tempdir().unwrap();
        let mut playlist = Playlist::open(dir.path().join("cue.ampl"), 3).unwrap();
        playlist.push(first);
        playlist.push(second);

        assert_eq!(playlist.len(), 2);
        assert_eq!(playlist.get(0).unwrap().length_ms(), 5000);
        assert_eq!(playlist.get(1).unwrap().start_offset, 220_500);
        assert_ne!(playlist.get(0).unwrap(), playlist.get(1).unwrap());
    }

    #[test]
    fn save_and_reload_preserve_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0009.ampl");

        let mut playlist = Playlist::open(&path, 9).unwrap();
        playlist.push(track("/music/a.wav", "Alpha"));
        playlist.save().unwrap();

        let reloaded = Playlist::open(&path, 9).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get(0).unwrap().location.as_str(), "/music/a.wav");
    }
}
