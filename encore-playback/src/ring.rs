//! A lock-free single-producer/single-consumer ring buffer of f32 samples.
//!
//! Capacity is rounded up to a power of two. The producer owns `head`, the
//! consumer owns `tail`, and the shared `fill` count is published with a
//! release store on commit and observed with an acquire load on the
//! consumer side. Copy operations span the wrap point internally, so a
//! caller always works with one contiguous slice.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Shared {
    data: Box<[UnsafeCell<f32>]>,
    capacity: usize,
    fill: AtomicUsize,
}

// One producer writes only the free region and one consumer reads only the
// filled region; the `fill` release/acquire pair orders those accesses, so
// the two sides never touch a cell concurrently.
unsafe impl Sync for Shared {}
unsafe impl Send for Shared {}

/// Creates a ring of at least `min_capacity` samples.
pub fn ring_buffer(min_capacity: usize) -> (Producer, Consumer) {
    let capacity = min_capacity.max(2).next_power_of_two();
    let data: Box<[UnsafeCell<f32>]> =
        (0..capacity).map(|_| UnsafeCell::new(0.0)).collect();

    let shared = Arc::new(Shared {
        data,
        capacity,
        fill: AtomicUsize::new(0),
    });

    (
        Producer {
            shared: shared.clone(),
            head: 0,
        },
        Consumer { shared, tail: 0 },
    )
}

pub struct Producer {
    shared: Arc<Shared>,
    head: usize,
}

impl Producer {
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Free samples, without synchronizing with the consumer.
    pub fn write_avail(&self) -> usize {
        self.shared.capacity - self.shared.fill.load(Ordering::Relaxed)
    }

    /// Free samples, synchronized against the consumer's releases.
    pub fn write_prepare(&self) -> usize {
        self.shared.capacity - self.shared.fill.load(Ordering::Acquire)
    }

    /// Samples currently queued (the sink's pending delay).
    pub fn fill(&self) -> usize {
        self.shared.fill.load(Ordering::Relaxed)
    }

    /// Copies as much of `src` as fits and returns the amount written.
    pub fn write(&mut self, src: &[f32]) -> usize {
        let n = src.len().min(self.write_prepare());
        if n == 0 {
            return 0;
        }

        let mask = self.shared.capacity - 1;
        for (i, &sample) in src[..n].iter().enumerate() {
            let slot = (self.head + i) & mask;
            // Safety: slots in [head, head + free) are not visible to the
            // consumer until the release store below.
            unsafe { *self.shared.data[slot].get() = sample };
        }

        self.head = (self.head + n) & mask;
        self.shared.fill.fetch_add(n, Ordering::Release);
        n
    }
}

pub struct Consumer {
    shared: Arc<Shared>,
    tail: usize,
}

impl Consumer {
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Queued samples, without synchronizing with the producer.
    pub fn read_avail(&self) -> usize {
        self.shared.fill.load(Ordering::Relaxed)
    }

    /// Queued samples, synchronized against the producer's commits.
    pub fn read_acquire(&self) -> usize {
        self.shared.fill.load(Ordering::Acquire)
    }

    /// Copies up to `dst.len()` samples out and returns the amount read.
    pub fn read(&mut self, dst: &mut [f32]) -> usize {
        let n = dst.len().min(self.read_acquire());
        if n == 0 {
            return 0;
        }

        let mask = self.shared.capacity - 1;
        for (i, out) in dst[..n].iter_mut().enumerate() {
            let slot = (self.tail + i) & mask;
            // Safety: slots in [tail, tail + fill) were published by the
            // producer's release store.
            *out = unsafe { *self.shared.data[slot].get() };
        }

        self.tail = (self.tail + n) & mask;
        self.shared.fill.fetch_sub(n, Ordering::Release);
        n
    }

    /// Discards everything currently queued.
    pub fn read_flush(&mut self) {
        let n = self.read_acquire();
        if n != 0 {
            self.tail = (self.tail + n) & (self.shared.capacity - 1);
            self.shared.fill.fetch_sub(n, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_rounds_up_to_a_power_of_two() {
        let (producer, _consumer) = ring_buffer(1000);
        assert_eq!(producer.capacity(), 1024);
    }

    #[test]
    fn wrapped_writes_read_back_in_order() {
        // Write 700, read 700, write 700: the second write wraps, and the
        // consumer must see all 1400 samples without a discontinuity.
        let (mut producer, mut consumer) = ring_buffer(1024);

        let first: Vec<f32> = (0..700).map(|i| i as f32).collect();
        assert_eq!(producer.write(&first), 700);

        let mut out = vec![0.0f32; 700];
        assert_eq!(consumer.read(&mut out), 700);
        assert_eq!(out, first);

        let second: Vec<f32> = (700..1400).map(|i| i as f32).collect();
        assert_eq!(producer.write(&second), 700);
        assert_eq!(consumer.read(&mut out), 700);
        assert_eq!(out, second);

        assert_eq!(consumer.read_avail(), 0);
        assert_eq!(producer.write_avail(), producer.capacity());
    }

    #[test]
    fn write_then_read_restores_the_initial_state() {
        let (mut producer, mut consumer) = ring_buffer(64);
        let samples: Vec<f32> = (0..48).map(|i| i as f32 * 0.5).collect();

        for _ in 0..10 {
            assert_eq!(producer.write(&samples), 48);
            let mut out = vec![0.0f32; 48];
            assert_eq!(consumer.read(&mut out), 48);
            assert_eq!(out, samples);
            assert_eq!(consumer.read_avail(), 0);
        }
    }

    #[test]
    fn writes_clip_to_free_space() {
        let (mut producer, mut consumer) = ring_buffer(16);
        let samples = vec![1.0f32; 20];
        assert_eq!(producer.write(&samples), 16);
        assert_eq!(producer.write(&samples), 0);

        consumer.read_flush();
        assert_eq!(producer.write_prepare(), 16);
    }

    #[test]
    fn concurrent_producer_and_consumer_preserve_order() {
        use std::thread;

        let (mut producer, mut consumer) = ring_buffer(256);
        let total = 100_000usize;

        let writer = thread::spawn(move || {
            let mut next = 0usize;
            while next < total {
                let batch: Vec<f32> = (next..(next + 64).min(total))
                    .map(|i| i as f32)
                    .collect();
                let mut written = 0;
                while written < batch.len() {
                    written += producer.write(&batch[written..]);
                }
                next += batch.len();
            }
        });

        let mut expected = 0usize;
        let mut buf = [0.0f32; 64];
        while expected < total {
            let n = consumer.read(&mut buf);
            for &sample in &buf[..n] {
                assert_eq!(sample, expected as f32);
                expected += 1;
            }
        }
        writer.join().unwrap();
    }
}
