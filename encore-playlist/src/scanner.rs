//! The background metadata scanner.
//!
//! Newly added locations are probed on a worker thread; each becomes one
//! track per chapter (or one track for chapterless streams). Failures are
//! collected and reported once at the end rather than interrupting the
//! scan.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{unbounded, Receiver, Sender};

use encore_common::UStr;
use encore_demux::demuxer::{self, OpenMode};
use encore_demux::media::Track;

pub enum ScanEvent {
    /// One scanned track, ready to append to a playlist.
    Track(Track),
    /// The scan finished; failed locations are aggregated here.
    Done { errors: Vec<String> },
}

pub struct Scanner {
    thread: Option<thread::JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
}

impl Scanner {
    /// Scans `locations` in the background, streaming results to the
    /// returned channel.
    pub fn spawn(locations: Vec<String>) -> (Self, Receiver<ScanEvent>) {
        let (sender, receiver) = unbounded();
        let cancel = Arc::new(AtomicBool::new(false));

        let thread = {
            let cancel = cancel.clone();
            thread::Builder::new()
                .name("encore-scanner".to_owned())
                .spawn(move || scan_worker(locations, sender, cancel))
                .expect("failed to spawn the scanner thread")
        };

        (
            Scanner {
                thread: Some(thread),
                cancel,
            },
            receiver,
        )
    }

    /// Stops the scan and waits for the worker to wind down.
    pub fn cancel(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .map(|t| t.is_finished())
            .unwrap_or(true)
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn scan_worker(locations: Vec<String>, sender: Sender<ScanEvent>, cancel: Arc<AtomicBool>) {
    let mut errors = Vec::new();

    for location in locations {
        if cancel.load(Ordering::Relaxed) {
            break;
        }

        match scan_location(&location) {
            Ok(tracks) => {
                for track in tracks {
                    if sender.send(ScanEvent::Track(track)).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                log::warn!("cannot scan {location:?}: {e}");
                errors.push(format!("{location}: {e}"));
            }
        }
    }

    let _ = sender.send(ScanEvent::Done { errors });
}

fn scan_location(location: &str) -> encore_common::Result<Vec<Track>> {
    let mut demuxer = demuxer::resolve(location, OpenMode::METADATA)?;

    let chapter_count = demuxer.chapter_count();
    let chapters: Vec<u32> = if chapter_count == 0 {
        vec![0]
    } else {
        (1..=chapter_count).collect()
    };

    let mut tracks = Vec::with_capacity(chapters.len());
    for chapter in chapters {
        let info = demuxer.get_info(chapter)?;
        tracks.push(Track {
            location: UStr::intern(location),
            tags: info.tags,
            info: info.props,
            start_offset: info.start_offset,
            frames: info.frames,
            sample_rate: info.sample_rate,
            channel_layout: info.channel_layout,
            chapter,
        });
    }
    Ok(tracks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn write_wav(path: &std::path::Path, frames: u32) {
        let body_len = frames * 4;
        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(b"RIFF").unwrap();
        file.write_all(&(36 + body_len).to_le_bytes()).unwrap();
        file.write_all(b"WAVE").unwrap();
        file.write_all(b"fmt ").unwrap();
        file.write_all(&16u32.to_le_bytes()).unwrap();
        file.write_all(&1u16.to_le_bytes()).unwrap();
        file.write_all(&2u16.to_le_bytes()).unwrap();
        file.write_all(&44_100u32.to_le_bytes()).unwrap();
        file.write_all(&176_400u32.to_le_bytes()).unwrap();
        file.write_all(&4u16.to_le_bytes()).unwrap();
        file.write_all(&16u16.to_le_bytes()).unwrap();
        file.write_all(b"data").unwrap();
        file.write_all(&body_len.to_le_bytes()).unwrap();
        file.write_all(&vec![0u8; body_len as usize]).unwrap();
    }

    #[test]
    fn scans_tracks_and_aggregates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.wav");
        write_wav(&good, 4410);
        let bad = dir.path().join("bad.wav");
        std::fs::write(&bad, b"not a wave file at all").unwrap();

        let (_scanner, events) = Scanner::spawn(vec![
            good.to_string_lossy().into_owned(),
            bad.to_string_lossy().into_owned(),
        ]);

        let mut tracks = Vec::new();
        let mut errors = Vec::new();
        loop {
            match events.recv_timeout(Duration::from_secs(10)).unwrap() {
                ScanEvent::Track(track) => tracks.push(track),
                ScanEvent::Done { errors: e } => {
                    errors = e;
                    break;
                }
            }
        }

        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].frames, 4410);
        assert_eq!(tracks[0].sample_rate, 44_100);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("bad.wav"));
    }
}
