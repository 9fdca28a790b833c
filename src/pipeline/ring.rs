use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

use crate::error::ConfigError;
use crate::timestamp::Timestamp;
use crate::uvc::FillMode;

/// One RGB and one depth frame captured close together
///
/// Payload storage is allocated once, sized for the configured resolutions.
#[derive(Debug, Clone)]
pub struct MergedFrame {
    pub rgb_timestamp: Timestamp,
    pub depth_timestamp: Timestamp,
    /// Depth frame sequence number as reported by the driver
    pub sequence: u32,
    rgb: Vec<u8>,
    rgb_len: usize,
    depth: Vec<u8>,
    depth_len: usize,
}

impl MergedFrame {
    pub fn new(rgb_size: usize, depth_size: usize) -> Self {
        MergedFrame {
            rgb_timestamp: Timestamp::default(),
            depth_timestamp: Timestamp::default(),
            sequence: 0,
            rgb: vec![0; rgb_size],
            rgb_len: 0,
            depth: vec![0; depth_size],
            depth_len: 0,
        }
    }

    pub fn rgb(&self) -> &[u8] {
        &self.rgb[..self.rgb_len]
    }

    pub fn depth(&self) -> &[u8] {
        &self.depth[..self.depth_len]
    }

    /// The half of the frame selected by `mode`
    pub fn payload(&self, mode: FillMode) -> &[u8] {
        match mode {
            FillMode::Rgb => self.rgb(),
            FillMode::Depth => self.depth(),
        }
    }

    /// Copies an RGB payload, truncated to the slot size
    ///
    /// Returns the number of bytes stored.
    pub fn set_rgb(&mut self, data: &[u8]) -> usize {
        self.rgb_len = copy_bounded(&mut self.rgb, data);
        self.rgb_len
    }

    /// Copies a depth payload, truncated to the slot size
    pub fn set_depth(&mut self, data: &[u8]) -> usize {
        self.depth_len = copy_bounded(&mut self.depth, data);
        self.depth_len
    }
}

fn copy_bounded(dst: &mut [u8], src: &[u8]) -> usize {
    let len = src.len().min(dst.len());
    dst[..len].copy_from_slice(&src[..len]);
    len
}

/// Ring counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    pub pushed: u64,
    /// Frames discarded because the ring was full
    pub dropped: u64,
    pub popped: u64,
    /// Pops that found the ring empty
    pub underruns: u64,
}

struct Inner {
    slots: Box<[UnsafeCell<MergedFrame>]>,
    mask: usize,

    // Free-running counters; slot = counter & mask. Only the producer stores `head`, only the
    // consumer stores `tail`.
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,

    pushed: AtomicU64,
    dropped: AtomicU64,
    popped: AtomicU64,
    underruns: AtomicU64,
}

// A slot is only ever accessed by the side that currently owns it: the producer owns
// [tail + len, tail + capacity), the consumer owns the slot at `tail` while head != tail.
// Ownership changes hands through the release store / acquire load of head and tail.
unsafe impl Sync for Inner {}

impl Inner {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    fn stats(&self) -> RingStats {
        RingStats {
            pushed: self.pushed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            popped: self.popped.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
        }
    }
}

/// Fixed capacity single-producer single-consumer ring of [`MergedFrame`]s
///
/// Pushing into a full ring drops the new frame, popping from an empty ring leaves the
/// destination alone. Neither side ever blocks.
///
/// # Example
///
/// ```
/// use rgbd_uvc::pipeline::FrameRing;
///
/// let (mut tx, mut rx) = FrameRing::with_capacity(4, 8, 8).unwrap();
/// assert!(tx.try_push(|frame| {
///     frame.set_rgb(&[1, 2, 3]);
/// }));
///
/// let mut out = Vec::new();
/// assert!(rx.try_pop(|frame| out.extend_from_slice(frame.rgb())));
/// assert_eq!(out, vec![1, 2, 3]);
/// ```
pub struct FrameRing;

impl FrameRing {
    /// Creates a ring holding up to `capacity` frames
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of slots, a power of two of at least 2
    /// * `rgb_size` - Maximum RGB payload per frame
    /// * `depth_size` - Maximum depth payload per frame
    pub fn with_capacity(
        capacity: usize,
        rgb_size: usize,
        depth_size: usize,
    ) -> Result<(Producer, Consumer), ConfigError> {
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "ring capacity {} is not a power of two >= 2",
                capacity
            )));
        }

        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MergedFrame::new(rgb_size, depth_size)))
            .collect();
        let inner = Arc::new(Inner {
            slots,
            mask: capacity - 1,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            popped: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
        });

        Ok((
            Producer {
                inner: Arc::clone(&inner),
            },
            Consumer { inner },
        ))
    }
}

/// Writing end of a [`FrameRing`]
pub struct Producer {
    inner: Arc<Inner>,
}

impl Producer {
    /// Lets `write` fill the next free slot and publishes it
    ///
    /// Returns `false` without calling `write` if the ring is full.
    pub fn try_push<F: FnOnce(&mut MergedFrame)>(&mut self, write: F) -> bool {
        let inner = &*self.inner;
        let head = inner.head.load(Ordering::Relaxed);
        let tail = inner.tail.load(Ordering::Acquire);

        if head.wrapping_sub(tail) == inner.capacity() {
            inner.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        // SAFETY: the slot at `head` is outside [tail, head) and thus owned by the producer
        let slot = unsafe { &mut *inner.slots[head & inner.mask].get() };
        write(slot);

        inner.head.store(head.wrapping_add(1), Ordering::Release);
        inner.pushed.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Number of frames waiting to be consumed
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    pub fn stats(&self) -> RingStats {
        self.inner.stats()
    }
}

/// Reading end of a [`FrameRing`]
pub struct Consumer {
    inner: Arc<Inner>,
}

impl Consumer {
    /// Lets `read` look at the oldest frame and frees its slot
    ///
    /// Returns `false` without calling `read` if the ring is empty.
    pub fn try_pop<F: FnOnce(&MergedFrame)>(&mut self, read: F) -> bool {
        let inner = &*self.inner;
        let tail = inner.tail.load(Ordering::Relaxed);
        let head = inner.head.load(Ordering::Acquire);

        if head == tail {
            inner.underruns.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        // SAFETY: the slot at `tail` was published by the producer and is not reused until
        // `tail` moves past it
        let slot = unsafe { &*inner.slots[tail & inner.mask].get() };
        read(slot);

        inner.tail.store(tail.wrapping_add(1), Ordering::Release);
        inner.popped.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RingStats {
        self.inner.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn ring(capacity: usize) -> (Producer, Consumer) {
        FrameRing::with_capacity(capacity, 16, 8).unwrap()
    }

    #[test]
    fn full_ring_drops_new_frames() {
        let (mut tx, mut rx) = ring(4);

        let pushed: Vec<bool> = (0..5u32)
            .map(|seq| tx.try_push(|frame| frame.sequence = seq))
            .collect();
        assert_eq!(pushed, vec![true, true, true, true, false]);
        assert_eq!(tx.len(), 4);
        assert!(tx.is_full());
        assert_eq!(tx.stats().dropped, 1);

        let mut seen = Vec::new();
        while rx.try_pop(|frame| seen.push(frame.sequence)) {}
        // the fifth frame never made it in
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn empty_ring_leaves_destination_untouched() {
        let (_tx, mut rx) = ring(4);
        let mut dst = [0x5Au8; 16];

        for _ in 0..2 {
            let popped = rx.try_pop(|frame| {
                dst[..frame.rgb().len()].copy_from_slice(frame.rgb());
            });
            assert!(!popped);
        }

        assert_eq!(dst, [0x5Au8; 16]);
        assert_eq!(rx.stats().underruns, 2);
    }

    #[test]
    fn occupancy_stays_within_capacity() {
        let (mut tx, mut rx) = ring(4);
        let mut outstanding: i64 = 0;
        let mut state: u32 = 0x1234_5678;

        for _ in 0..10_000 {
            // xorshift, roughly balanced push/pop mix
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;

            if state & 1 == 0 {
                if tx.try_push(|_| {}) {
                    outstanding += 1;
                }
            } else if rx.try_pop(|_| {}) {
                outstanding -= 1;
            }

            assert!((0..=4).contains(&outstanding));
            assert_eq!(rx.len() as i64, outstanding);
        }
    }

    #[test]
    fn payloads_are_truncated_to_the_slot() {
        let (mut tx, mut rx) = ring(2);
        assert!(tx.try_push(|frame| {
            assert_eq!(frame.set_rgb(&[7u8; 20]), 16);
            assert_eq!(frame.set_depth(&[1, 2]), 2);
        }));
        assert!(rx.try_pop(|frame| {
            assert_eq!(frame.payload(FillMode::Rgb), &[7u8; 16][..]);
            assert_eq!(frame.payload(FillMode::Depth), &[1, 2][..]);
        }));
    }

    #[test]
    fn rejects_bad_capacity() {
        assert!(FrameRing::with_capacity(0, 1, 1).is_err());
        assert!(FrameRing::with_capacity(1, 1, 1).is_err());
        assert!(FrameRing::with_capacity(6, 1, 1).is_err());
    }

    #[test]
    fn frames_cross_threads_intact_and_in_order() {
        const FRAMES: u32 = 20_000;
        let (mut tx, mut rx) = ring(4);

        let producer = thread::spawn(move || {
            let mut seq = 0;
            while seq < FRAMES {
                if tx.try_push(|frame| {
                    frame.sequence = seq;
                    frame.set_rgb(&[seq as u8; 16]);
                }) {
                    seq += 1;
                } else {
                    thread::yield_now();
                }
            }
        });

        let mut expected = 0;
        while expected < FRAMES {
            let popped = rx.try_pop(|frame| {
                assert_eq!(frame.sequence, expected);
                assert!(frame.rgb().iter().all(|&b| b == expected as u8));
            });
            if popped {
                expected += 1;
            } else {
                thread::yield_now();
            }
        }

        producer.join().unwrap();
    }
}
