//! The player engine: one dedicated thread owns the demuxer, decoder,
//! filter chain and ring-buffer producer; commands arrive over an SPSC
//! channel and the wall clock is derived from the sink's pending-sample
//! count, which keeps track rotation gapless.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, Sender};

use encore_common::num::muldiv;
use encore_common::{Error, Result, UStr};
use encore_demux::media::Track;

use encore_codec::Packet;

use crate::event::AutoResetEvent;
use crate::filter::FilterChain;
use crate::replaygain::{ReplayGainConfig, ReplayGainInfo};
use crate::sink::{resolve_output, SinkContext};
use crate::source::Source;

const NANOS_PER_SEC: u64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Playing,
    Paused,
    Stopped,
}

/// Receives track-boundary and failure notifications from the player
/// thread.
pub trait PlayerDelegate: Send + Sync {
    fn track_complete(&self);
    fn error_occurred(&self, error: &Error);
}

enum Command {
    Seek(u64),
    State,
    Pause,
    Stop,
    Volume(f32),
}

// Event bits, combined while draining the command queue.
const EVENT_SEEK: u32 = 1 << 0;
const EVENT_STATE: u32 = 1 << 1;
const EVENT_STOP: u32 = 1 << 2;
const EVENT_PAUSE: u32 = 1 << 3;

type PresetState = (Vec<UStr>, ReplayGainConfig);

pub struct Player {
    delegate: Arc<dyn PlayerDelegate>,
    commands: Sender<Command>,
    command_queue: Option<Receiver<Command>>,
    tracks: Sender<Track>,
    track_queue: Option<Receiver<Track>>,
    thread: Option<thread::JoinHandle<()>>,
    position_ns: Arc<AtomicU64>,
    bit_rate: Arc<AtomicU32>,
    preset: Arc<Mutex<PresetState>>,
    session_id: String,
    device_id: String,
    volume: f32,
    state: PlayerState,
}

impl Player {
    pub fn new(delegate: Arc<dyn PlayerDelegate>) -> Self {
        let (commands, command_queue) = unbounded();
        let (tracks, track_queue) = unbounded();

        Player {
            delegate,
            commands,
            command_queue: Some(command_queue),
            tracks,
            track_queue: Some(track_queue),
            thread: None,
            position_ns: Arc::new(AtomicU64::new(0)),
            bit_rate: Arc::new(AtomicU32::new(0)),
            preset: Arc::new(Mutex::new((Vec::new(), ReplayGainConfig::default()))),
            session_id: String::new(),
            device_id: String::new(),
            volume: 1.0,
            state: PlayerState::Stopped,
        }
    }

    /// Selects the output plugin and device for subsequent playback.
    pub fn set_output(&mut self, session_id: &str, device_id: &str) -> Result<()> {
        if !self.is_stopped() {
            return Err(Error::failure("cannot change outputs while playing"));
        }
        self.session_id = session_id.to_owned();
        self.device_id = device_id.to_owned();
        Ok(())
    }

    pub fn set_preset(&mut self, preset: Vec<UStr>, config: ReplayGainConfig) {
        *self.preset.lock().unwrap() = (preset, config);
        if !self.is_stopped() {
            let _ = self.commands.send(Command::State);
        }
    }

    pub fn insert_track(&self, track: Track) {
        let _ = self.tracks.send(track);
    }

    pub fn start(&mut self) {
        debug_assert!(self.is_stopped(), "cannot play unless stopped");

        let worker = Worker {
            commands: self.command_queue.take().expect("player was not stopped"),
            tracks: self.track_queue.take().expect("player was not stopped"),
            delegate: self.delegate.clone(),
            position_ns: self.position_ns.clone(),
            bit_rate: self.bit_rate.clone(),
            preset: self.preset.clone(),
            session_id: self.session_id.clone(),
            device_id: self.device_id.clone(),
            volume: self.volume,
        };

        let delegate = self.delegate.clone();
        self.thread = Some(
            thread::Builder::new()
                .name("encore-player".to_owned())
                .spawn(move || {
                    if let Err(e) = worker.run() {
                        log::error!("playback stopped on error: {e}");
                        delegate.error_occurred(&e);
                    }
                })
                .expect("failed to spawn the player thread"),
        );
        self.state = PlayerState::Playing;
    }

    pub fn pause(&mut self) {
        debug_assert!(!self.is_stopped(), "cannot pause while stopped");
        let _ = self.commands.send(Command::Pause);
        self.state = if self.is_playing() {
            PlayerState::Paused
        } else {
            PlayerState::Playing
        };
    }

    pub fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.commands.send(Command::Stop);
            let _ = thread.join();
        }

        // Drain both queues into fresh channels.
        let (commands, command_queue) = unbounded();
        let (tracks, track_queue) = unbounded();
        self.commands = commands;
        self.command_queue = Some(command_queue);
        self.tracks = tracks;
        self.track_queue = Some(track_queue);

        self.position_ns.store(0, Ordering::Relaxed);
        self.bit_rate.store(0, Ordering::Relaxed);
        self.state = PlayerState::Stopped;
    }

    pub fn seek(&self, position: Duration) {
        debug_assert!(!self.is_stopped(), "cannot seek while stopped");
        let _ = self
            .commands
            .send(Command::Seek(position.as_nanos() as u64));
    }

    pub fn set_volume(&mut self, level: f32) {
        self.volume = level;
        if !self.is_stopped() {
            let _ = self.commands.send(Command::Volume(level));
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn position(&self) -> Duration {
        Duration::from_nanos(self.position_ns.load(Ordering::Relaxed))
    }

    pub fn bit_rate(&self) -> u32 {
        self.bit_rate.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayerState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.state == PlayerState::Paused
    }

    pub fn is_stopped(&self) -> bool {
        self.state == PlayerState::Stopped
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

struct SourceCtx {
    source: Source,
    rg_info: ReplayGainInfo,
    frames: u64,
}

impl SourceCtx {
    fn open(track: &Track) -> Result<Self> {
        let source = Source::open(&track.location, track)?;
        let frames = if track.frames != 0 {
            track.frames
        } else {
            source.frames()
        };
        Ok(SourceCtx {
            source,
            rg_info: ReplayGainInfo::from_tags(&track.tags),
            frames,
        })
    }
}

struct Worker {
    commands: Receiver<Command>,
    tracks: Receiver<Track>,
    delegate: Arc<dyn PlayerDelegate>,
    position_ns: Arc<AtomicU64>,
    bit_rate: Arc<AtomicU32>,
    preset: Arc<Mutex<PresetState>>,
    session_id: String,
    device_id: String,
    volume: f32,
}

struct Pipeline {
    sink: SinkContext,
    chain: FilterChain,
    source: Option<SourceCtx>,
    pending: Option<SourceCtx>,
    pkt: Packet,
    sample: u64,
    sink_rate: u64,
    wait: Duration,
}

impl Worker {
    fn run(self) -> Result<()> {
        let mut session = resolve_output(&self.session_id)?;
        let mut stream = session.activate(&self.device_id)?;
        stream.set_volume(self.volume);

        let ready = Arc::new(AutoResetEvent::new());
        let sink = SinkContext::new(stream, ready);

        let mut chain = FilterChain::new();
        {
            let (preset, config) = self.preset.lock().unwrap().clone();
            chain.rebuild(&preset, config);
        }

        let sink_rate = u64::from(sink.format.sample_rate) * u64::from(sink.format.channels);
        let wait = sink.wait_timeout();
        let mut pipeline = Pipeline {
            sink,
            chain,
            source: None,
            pending: None,
            pkt: Packet::new(),
            sample: 0,
            sink_rate,
            wait,
        };

        // Build the first source before audio starts flowing.
        let ret = self.prepare_track_change(&mut pipeline)?;
        if ret & EVENT_STOP != 0 {
            return Ok(());
        }
        self.commit_track_change(&mut pipeline);

        pipeline.sink.start()?;
        loop {
            let ret = self.process_packet(&mut pipeline)?;
            if ret & EVENT_STOP != 0 {
                return Ok(());
            }
            if ret & EVENT_PAUSE != 0 {
                pipeline.sink.pause()?;
                loop {
                    let command = match self.commands.recv() {
                        Ok(command) => Some(command),
                        Err(_) => return Ok(()),
                    };
                    let ret = self.process_commands(&mut pipeline, command)?;
                    if ret & EVENT_STOP != 0 {
                        return Ok(());
                    }
                    if ret & EVENT_PAUSE != 0 {
                        pipeline.sink.start()?;
                        break;
                    }
                }
            }
        }
    }

    fn commit_track_change(&self, pipeline: &mut Pipeline) {
        if pipeline.pending.take().is_some() {
            self.delegate.track_complete();
        }
    }

    fn cancel_track_change(&self, pipeline: &mut Pipeline) -> Result<()> {
        if let Some(pending) = pipeline.pending.take() {
            pipeline.source = Some(pending);
            self.calibrate(pipeline)?;
        }
        Ok(())
    }

    fn calibrate(&self, pipeline: &mut Pipeline) -> Result<()> {
        let ctx = pipeline.source.as_ref().expect("source must be open");
        pipeline
            .chain
            .calibrate(ctx.source.format(), &pipeline.sink.format, &ctx.rg_info)
    }

    fn sync_clock(&self, pipeline: &mut Pipeline, delta: u64) {
        pipeline.sample += delta;

        let delay = pipeline.sink.delay();
        let position = if pipeline.pending.is_none() {
            muldiv(
                pipeline.sample.saturating_sub(delay),
                NANOS_PER_SEC,
                pipeline.sink_rate,
            )
        } else if pipeline.sample >= delay {
            // The previous track has fully drained from the sink.
            self.commit_track_change(pipeline);
            muldiv(
                pipeline.sample.saturating_sub(delay),
                NANOS_PER_SEC,
                pipeline.sink_rate,
            )
        } else {
            self.position_ns.load(Ordering::Relaxed)
                + muldiv(delta, NANOS_PER_SEC, pipeline.sink_rate)
        };
        self.position_ns.store(position, Ordering::Relaxed);
    }

    fn process_commands(
        &self,
        pipeline: &mut Pipeline,
        first: Option<Command>,
    ) -> Result<u32> {
        let mut ret = 0u32;
        let mut seek_ns = 0u64;

        let mut apply = |command: Command, sink: &mut SinkContext| match command {
            Command::Seek(ns) => {
                seek_ns = ns;
                ret |= EVENT_SEEK;
            }
            Command::State => ret |= EVENT_STATE,
            Command::Stop => ret |= EVENT_STOP,
            Command::Pause => ret ^= EVENT_PAUSE,
            Command::Volume(level) => sink.set_volume(level),
        };

        if let Some(command) = first {
            apply(command, &mut pipeline.sink);
        }
        while let Ok(command) = self.commands.try_recv() {
            apply(command, &mut pipeline.sink);
        }

        if ret & EVENT_STOP != 0 {
            return Ok(ret);
        }
        if ret & EVENT_STATE != 0 {
            let (preset, config) = self.preset.lock().unwrap().clone();
            pipeline.chain.rebuild(&preset, config);
            self.calibrate(pipeline)?;
        }
        if ret & EVENT_SEEK != 0 {
            self.cancel_track_change(pipeline)?;

            let ctx = pipeline.source.as_mut().expect("source must be open");
            let src_rate = u64::from(ctx.source.format().sample_rate);

            let mut pos = muldiv(seek_ns, src_rate, NANOS_PER_SEC);
            pos = pos.min(ctx.frames.saturating_sub(1));

            pipeline.sample = muldiv(pos, pipeline.sink_rate, src_rate);
            self.position_ns.store(
                muldiv(pipeline.sample, NANOS_PER_SEC, pipeline.sink_rate),
                Ordering::Relaxed,
            );

            ctx.source.seek(pos)?;
            pipeline.chain.flush();
            pipeline.sink.flush()?;
            pipeline.pkt.clear();
        }
        Ok(ret)
    }

    fn poll(&self, pipeline: &mut Pipeline, timeout: Duration) -> Result<u32> {
        match self.commands.recv_timeout(timeout) {
            Ok(command) => self.process_commands(pipeline, Some(command)),
            Err(_) => Ok(0),
        }
    }

    fn prepare_track_change(&self, pipeline: &mut Pipeline) -> Result<u32> {
        if pipeline.pending.is_some() {
            self.commit_track_change(pipeline);
        }

        let next = loop {
            crossbeam::channel::select! {
                recv(self.tracks) -> track => match track {
                    Ok(track) => break track,
                    Err(_) => return Ok(EVENT_STOP),
                },
                recv(self.commands) -> command => {
                    let ret = self.process_commands(pipeline, command.ok())?;
                    if ret != 0 {
                        return Ok(ret);
                    }
                }
            }
        };

        pipeline.pending = pipeline.source.take();
        pipeline.source = Some(SourceCtx::open(&next)?);
        self.calibrate(pipeline)?;
        pipeline.sample = 0;
        Ok(0)
    }

    fn receive_packet(&self, pipeline: &mut Pipeline) -> Result<u32> {
        let ctx = pipeline.source.as_mut().expect("source must be open");
        ctx.source.read(&mut pipeline.pkt)?;

        if pipeline.pkt.is_empty() {
            let Pipeline { chain, pkt, .. } = pipeline;
            chain.drain(pkt)?;
            return self.prepare_track_change(pipeline);
        }

        self.bit_rate
            .store(pipeline.pkt.bit_rate(), Ordering::Relaxed);
        let Pipeline { chain, pkt, .. } = pipeline;
        chain.process(pkt)?;
        self.process_commands(pipeline, None)
    }

    fn process_packet(&self, pipeline: &mut Pipeline) -> Result<u32> {
        while pipeline.pkt.is_empty() {
            let ret = self.receive_packet(pipeline)?;
            if ret != 0 {
                return Ok(ret);
            }
        }

        loop {
            let written = {
                let Pipeline { sink, pkt, .. } = pipeline;
                sink.write(pkt.data())
            };
            self.sync_clock(pipeline, written as u64);
            pipeline.pkt.pop_front(written);

            if pipeline.pkt.is_empty() {
                return Ok(0);
            }

            let ret = self.poll(pipeline, pipeline.wait)?;
            if ret != 0 {
                return Ok(ret);
            }
        }
    }
}
