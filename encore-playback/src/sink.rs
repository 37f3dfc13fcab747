//! The output contract, the cpal-backed default implementation, and the
//! sink context that couples an output stream to the ring buffer.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use once_cell::sync::Lazy;

use encore_common::registry::{self, Registry};
use encore_common::{Error, Result};
use encore_demux::format::channel;

use crate::event::AutoResetEvent;
use crate::filter::AudioFormat;
use crate::ring::{self, Consumer, Producer};

/// Fills `data` with rendered samples; invoked on the device's thread.
pub type RenderCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// An opened output stream in pull mode.
pub trait OutputStream {
    fn start(&mut self, callback: RenderCallback) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn stop(&mut self);
    fn format(&self) -> AudioFormat;
    fn set_volume(&mut self, level: f32);
    fn volume(&self) -> f32;
}

/// A session against one audio backend, able to enumerate devices and
/// activate streams.
pub trait OutputSession {
    /// Opens an output stream; an empty id selects the system default.
    fn activate(&mut self, device_id: &str) -> Result<Box<dyn OutputStream>>;

    /// `(id, display name)` pairs for the available output devices.
    fn devices(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

pub type OutputFactory = fn() -> Result<Box<dyn OutputSession>>;

static OUTPUT_FACTORIES: Lazy<RwLock<Registry<&'static str, OutputFactory>>> =
    Lazy::new(|| {
        let mut registry: Registry<&'static str, OutputFactory> = Registry::new();
        registry.register("cpal", (|| {
            Ok(Box::new(CpalSession::new()) as Box<dyn OutputSession>)
        }) as OutputFactory);
        RwLock::new(registry)
    });

pub fn register_output(id: &'static str, factory: OutputFactory) {
    OUTPUT_FACTORIES.write().unwrap().register(id, factory);
}

/// Resolves an output session; an empty id selects the default backend.
pub fn resolve_output(session_id: &str) -> Result<Box<dyn OutputSession>> {
    let id = if session_id.is_empty() {
        "cpal"
    } else {
        session_id
    };
    let registry = OUTPUT_FACTORIES.read().unwrap();
    registry::try_each(
        registry.find(id),
        || Error::failure(format!("no such output plugin: {id:?}")),
        |factory| factory(),
    )
}

// ---------------------------------------------------------------------------
// cpal backend
// ---------------------------------------------------------------------------

pub struct CpalSession {
    host: cpal::Host,
}

impl CpalSession {
    pub fn new() -> Self {
        CpalSession {
            host: cpal::default_host(),
        }
    }

    fn find_device(&self, device_id: &str) -> Result<cpal::Device> {
        if device_id.is_empty() {
            return self
                .host
                .default_output_device()
                .ok_or_else(|| Error::failure("no default audio output device"));
        }

        let mut devices = self
            .host
            .output_devices()
            .map_err(|e| Error::with_source(encore_common::ErrorKind::Failure,
                "cannot enumerate output devices", e))?;
        devices
            .find(|d| d.name().map(|n| n == device_id).unwrap_or(false))
            .ok_or_else(|| Error::failure(format!("no such output device: {device_id:?}")))
    }
}

impl Default for CpalSession {
    fn default() -> Self {
        CpalSession::new()
    }
}

impl OutputSession for CpalSession {
    fn activate(&mut self, device_id: &str) -> Result<Box<dyn OutputStream>> {
        let device = self.find_device(device_id)?;
        let default_config = device.default_output_config().map_err(|e| {
            Error::with_source(
                encore_common::ErrorKind::Failure,
                "cannot query the device's output config",
                e,
            )
        })?;

        let config = default_config.config();
        let format = AudioFormat {
            sample_rate: config.sample_rate.0,
            channels: u32::from(config.channels),
            channel_layout: channel::guess(u32::from(config.channels)),
        };

        Ok(Box::new(CpalStream {
            device,
            config,
            format,
            stream: None,
            volume: Arc::new(AtomicU32::new(1.0f32.to_bits())),
        }))
    }

    fn devices(&self) -> Vec<(String, String)> {
        match self.host.output_devices() {
            Ok(devices) => devices
                .filter_map(|d| d.name().ok())
                .map(|name| (name.clone(), name))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

pub struct CpalStream {
    device: cpal::Device,
    config: cpal::StreamConfig,
    format: AudioFormat,
    stream: Option<cpal::Stream>,
    volume: Arc<AtomicU32>,
}

impl OutputStream for CpalStream {
    fn start(&mut self, mut callback: RenderCallback) -> Result<()> {
        let volume = self.volume.clone();

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    callback(data);
                    let level = f32::from_bits(volume.load(Ordering::Relaxed));
                    if level != 1.0 {
                        for sample in data.iter_mut() {
                            *sample *= level;
                        }
                    }
                },
                |err| log::error!("audio output stream error: {err}"),
                None,
            )
            .map_err(|e| {
                Error::with_source(
                    encore_common::ErrorKind::Failure,
                    "could not build the output stream",
                    e,
                )
            })?;

        stream.play().map_err(|e| {
            Error::with_source(
                encore_common::ErrorKind::Failure,
                "could not start the output stream",
                e,
            )
        })?;

        self.stream = Some(stream);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            // Not every backend supports pausing; dropping the stream on
            // stop covers those.
            let _ = stream.pause();
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.stream = None;
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn set_volume(&mut self, level: f32) {
        self.volume
            .store(level.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }
}

// ---------------------------------------------------------------------------
// Sink context
// ---------------------------------------------------------------------------

/// Couples an output stream to the SPSC ring the player thread fills.
///
/// The render callback drains the ring on the device's thread, zero-fills
/// any shortfall, and posts the producer-wake event.
pub struct SinkContext {
    pub format: AudioFormat,
    producer: Producer,
    consumer: Arc<Mutex<Consumer>>,
    ready: Arc<AutoResetEvent>,
    stream: Box<dyn OutputStream>,
    paused: bool,
}

impl SinkContext {
    /// Creates a context with one second of buffering.
    pub fn new(stream: Box<dyn OutputStream>, ready: Arc<AutoResetEvent>) -> Self {
        let format = stream.format();
        let capacity = (format.sample_rate * format.channels) as usize;
        let (producer, consumer) = ring::ring_buffer(capacity);

        SinkContext {
            format,
            producer,
            consumer: Arc::new(Mutex::new(consumer)),
            ready,
            stream,
            paused: false,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        let consumer = self.consumer.clone();
        let ready = self.ready.clone();

        let callback: RenderCallback = Box::new(move |data: &mut [f32]| {
            // try_lock keeps the render thread from ever blocking; the
            // mutex is only held by the player while the stream is down.
            match consumer.try_lock() {
                Ok(mut consumer) => {
                    let n = consumer.read(data);
                    data[n..].fill(0.0);
                }
                Err(_) => data.fill(0.0),
            }
            ready.post();
        });

        self.stream.start(callback)?;
        self.paused = false;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.stream.pause()?;
        self.paused = true;
        Ok(())
    }

    /// Empties the ring, stopping the stream around the drain when it is
    /// currently rendering.
    pub fn flush(&mut self) -> Result<()> {
        if !self.paused {
            self.stream.stop();
        }
        self.consumer.lock().unwrap().read_flush();
        if !self.paused {
            self.start()?;
        }
        Ok(())
    }

    /// Queues samples; returns how many fit.
    pub fn write(&mut self, src: &[f32]) -> usize {
        self.producer.write(src)
    }

    /// Samples queued but not yet rendered.
    pub fn delay(&self) -> u64 {
        self.producer.fill() as u64
    }

    /// How long the producer should sleep when the ring is full: half the
    /// ring's duration.
    pub fn wait_timeout(&self) -> Duration {
        let samples_per_sec = u64::from(self.format.sample_rate) * u64::from(self.format.channels);
        let capacity = self.producer.capacity() as u64;
        Duration::from_nanos(capacity * 1_000_000_000 / samples_per_sec.max(1) / 2)
    }

    pub fn set_volume(&mut self, level: f32) {
        self.stream.set_volume(level);
    }

    pub fn volume(&self) -> f32 {
        self.stream.volume()
    }
}

impl Drop for SinkContext {
    fn drop(&mut self) {
        self.stream.stop();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// An output stream that renders into thin air on a timer-less pull:
    /// tests drive the callback by hand.
    pub struct NullStream {
        format: AudioFormat,
        pub callback: Arc<Mutex<Option<RenderCallback>>>,
        volume: f32,
    }

    impl NullStream {
        pub fn new(format: AudioFormat) -> (Self, Arc<Mutex<Option<RenderCallback>>>) {
            let callback = Arc::new(Mutex::new(None));
            (
                NullStream {
                    format,
                    callback: callback.clone(),
                    volume: 1.0,
                },
                callback,
            )
        }
    }

    impl OutputStream for NullStream {
        fn start(&mut self, callback: RenderCallback) -> Result<()> {
            *self.callback.lock().unwrap() = Some(callback);
            Ok(())
        }

        fn pause(&mut self) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self) {
            *self.callback.lock().unwrap() = None;
        }

        fn format(&self) -> AudioFormat {
            self.format
        }

        fn set_volume(&mut self, level: f32) {
            self.volume = level;
        }

        fn volume(&self) -> f32 {
            self.volume
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::NullStream;
    use super::*;
    use encore_demux::format::channel;

    fn test_format() -> AudioFormat {
        AudioFormat {
            sample_rate: 8_000,
            channels: 2,
            channel_layout: channel::STEREO,
        }
    }

    #[test]
    fn render_callback_drains_the_ring_and_zero_fills() {
        let (stream, callback) = NullStream::new(test_format());
        let ready = Arc::new(AutoResetEvent::new());
        let mut sink = SinkContext::new(Box::new(stream), ready.clone());

        sink.start().unwrap();
        let written = sink.write(&[0.5f32; 100]);
        assert_eq!(written, 100);
        assert_eq!(sink.delay(), 100);

        let mut buf = vec![1.0f32; 128];
        (callback.lock().unwrap().as_mut().unwrap())(&mut buf);

        assert!(buf[..100].iter().all(|&s| s == 0.5));
        assert!(buf[100..].iter().all(|&s| s == 0.0));
        assert_eq!(sink.delay(), 0);
        assert!(ready.wait_timeout(Duration::from_millis(100)));
    }

    #[test]
    fn flush_discards_queued_samples() {
        let (stream, _callback) = NullStream::new(test_format());
        let mut sink = SinkContext::new(Box::new(stream), Arc::new(AutoResetEvent::new()));

        sink.start().unwrap();
        sink.write(&[0.5f32; 512]);
        assert_eq!(sink.delay(), 512);

        sink.flush().unwrap();
        assert_eq!(sink.delay(), 0);
    }

    #[test]
    fn wait_timeout_is_half_the_ring_duration() {
        let (stream, _callback) = NullStream::new(test_format());
        let sink = SinkContext::new(Box::new(stream), Arc::new(AutoResetEvent::new()));

        // 16384 samples at 16k samples/s is ~1.02 s; half of that.
        let timeout = sink.wait_timeout();
        assert!(timeout >= Duration::from_millis(400));
        assert!(timeout <= Duration::from_millis(600));
    }
}
