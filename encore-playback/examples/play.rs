//! Plays an audio file from the command line.
//!
//! ```text
//! cargo run --example play -- /path/to/song.m4a
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use encore_demux::demuxer::{self, OpenMode};
use encore_demux::media::Track;
use encore_playback::{Player, PlayerDelegate};

struct Console;

impl PlayerDelegate for Console {
    fn track_complete(&self) {
        println!("track complete");
    }

    fn error_occurred(&self, error: &encore_common::Error) {
        eprintln!("playback error: {error}");
        std::process::exit(1);
    }
}

fn main() -> Result<()> {
    let path = match std::env::args().nth(1) {
        Some(path) => path,
        None => bail!("usage: play <file>"),
    };

    let mut probe = demuxer::resolve(&path, OpenMode::METADATA)
        .with_context(|| format!("cannot open {path:?}"))?;
    let info = probe.get_info(0)?;
    drop(probe);

    let track = Track {
        location: path.as_str().into(),
        tags: info.tags.clone(),
        frames: info.frames,
        sample_rate: info.sample_rate,
        channel_layout: info.channel_layout,
        ..Track::default()
    };

    let total = Duration::from_millis(track.length_ms());
    println!(
        "playing {:?} ({}.{:03} s, {} Hz)",
        path,
        total.as_secs(),
        total.subsec_millis(),
        info.sample_rate
    );

    let mut player = Player::new(Arc::new(Console));
    player.insert_track(track);
    player.start();

    loop {
        std::thread::sleep(Duration::from_millis(500));
        let position = player.position();
        print!(
            "\r{}.{:03} / {}.{:03}",
            position.as_secs(),
            position.subsec_millis(),
            total.as_secs(),
            total.subsec_millis()
        );
        use std::io::Write;
        std::io::stdout().flush().ok();

        if position >= total && total != Duration::ZERO {
            println!();
            break;
        }
    }

    player.stop();
    Ok(())
}
