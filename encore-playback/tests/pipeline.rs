//! End-to-end decode pipeline checks over a real file on disk: container
//! → packets → decoder → f32 frames, with and without seeking.

use std::io::Write;

use encore_codec::Packet;
use encore_playback::source::Source;
use encore_demux::media::Track;

fn write_wav(path: &std::path::Path, samples: &[i16]) {
    assert_eq!(samples.len() % 2, 0);
    let body_len = (samples.len() * 2) as u32;

    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(b"RIFF").unwrap();
    file.write_all(&(36 + body_len).to_le_bytes()).unwrap();
    file.write_all(b"WAVE").unwrap();
    file.write_all(b"fmt ").unwrap();
    file.write_all(&16u32.to_le_bytes()).unwrap();
    file.write_all(&1u16.to_le_bytes()).unwrap(); // PCM
    file.write_all(&2u16.to_le_bytes()).unwrap(); // stereo
    file.write_all(&44_100u32.to_le_bytes()).unwrap();
    file.write_all(&176_400u32.to_le_bytes()).unwrap();
    file.write_all(&4u16.to_le_bytes()).unwrap();
    file.write_all(&16u16.to_le_bytes()).unwrap();
    file.write_all(b"data").unwrap();
    file.write_all(&body_len.to_le_bytes()).unwrap();
    for &sample in samples {
        file.write_all(&sample.to_le_bytes()).unwrap();
    }
}

fn ramp(frames: usize) -> Vec<i16> {
    let mut samples = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        let value = ((i % 4000) as i32 - 2000) as i16;
        samples.push(value);
        samples.push(-value);
    }
    samples
}

fn read_all(source: &mut Source) -> Vec<f32> {
    let mut out = Vec::new();
    let mut pkt = Packet::new();
    loop {
        source.read(&mut pkt).unwrap();
        if pkt.is_empty() {
            break;
        }
        out.extend_from_slice(pkt.data());
    }
    out
}

#[test]
fn full_decode_produces_every_declared_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ramp.wav");
    let frames = 44_100;
    write_wav(&path, &ramp(frames));

    let location = encore_common::UStr::new(path.to_string_lossy().into_owned());
    let mut source = Source::open(&location, &Track::default()).unwrap();

    assert_eq!(source.frames(), frames as u64);
    assert_eq!(source.format().sample_rate, 44_100);
    assert_eq!(source.format().channels, 2);

    let samples = read_all(&mut source);
    assert_eq!(samples.len(), frames * 2);
    assert!(samples.iter().all(|s| (-1.0..=1.0).contains(s)));

    // Spot-check the waveform against the source data.
    let scale = 1.0 / 32768.0;
    assert_eq!(samples[0], 0.0f32 - 2000.0 * scale);
    assert_eq!(samples[2 * 100], (100.0 - 2000.0) * scale);
}

#[test]
fn seeking_reproduces_the_tail_bit_for_bit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seek.wav");
    let frames = 22_050;
    write_wav(&path, &ramp(frames));

    let location = encore_common::UStr::new(path.to_string_lossy().into_owned());

    // Decode straight through.
    let mut source = Source::open(&location, &Track::default()).unwrap();
    let all = read_all(&mut source);

    // Seek to an arbitrary frame and decode the rest.
    let target = 12_345u64;
    let mut source = Source::open(&location, &Track::default()).unwrap();
    source.seek(target).unwrap();
    let tail = read_all(&mut source);

    assert_eq!(tail.len(), (frames as u64 - target) as usize * 2);
    assert_eq!(&all[target as usize * 2..], &tail[..]);
}
