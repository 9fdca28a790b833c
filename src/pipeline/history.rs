use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::timestamp::Timestamp;

/// Number of frames kept
pub const HISTORY_SLOTS: usize = 32;

#[derive(Debug)]
struct Slot {
    timestamp: Timestamp,
    data: Vec<u8>,
    len: usize,
}

/// The most recent RGB frames together with their capture timestamps
///
/// Written by the RGB capture thread, read by the depth thread when merging. Each slot sits
/// behind its own lock; the writer only ever touches the slot after the newest one, so the
/// locks are uncontended unless the reader falls 32 frames behind.
#[derive(Debug)]
pub struct RgbHistory {
    slots: Box<[Mutex<Slot>]>,
    written: AtomicU64,
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    // a panicking writer leaves at worst a partially copied frame behind
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RgbHistory {
    /// Creates a history for frames of up to `frame_size` bytes
    pub fn new(frame_size: usize) -> Self {
        let slots = (0..HISTORY_SLOTS)
            .map(|_| {
                Mutex::new(Slot {
                    timestamp: Timestamp::default(),
                    data: vec![0; frame_size],
                    len: 0,
                })
            })
            .collect();

        RgbHistory {
            slots,
            written: AtomicU64::new(0),
        }
    }

    /// Stores a frame in the next slot and makes it the newest one
    ///
    /// Frames larger than the configured size are truncated. Meant for a single writer.
    pub fn publish(&self, data: &[u8], timestamp: Timestamp) {
        let n = self.written.load(Ordering::Relaxed);
        {
            let mut slot = lock(&self.slots[(n as usize) & (HISTORY_SLOTS - 1)]);
            let len = data.len().min(slot.data.len());
            slot.data[..len].copy_from_slice(&data[..len]);
            slot.len = len;
            slot.timestamp = timestamp;
        }
        self.written.store(n + 1, Ordering::Release);
    }

    /// Runs `read` on the newest completed frame
    ///
    /// Returns `None` while nothing has been published yet.
    pub fn latest<R, F: FnOnce(&[u8], Timestamp) -> R>(&self, read: F) -> Option<R> {
        let n = self.written.load(Ordering::Acquire);
        if n == 0 {
            return None;
        }

        let slot = lock(&self.slots[((n - 1) as usize) & (HISTORY_SLOTS - 1)]);
        Some(read(&slot.data[..slot.len], slot.timestamp))
    }

    /// Total number of frames published
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn empty_history() {
        let history = RgbHistory::new(4);
        assert_eq!(history.latest(|data, _| data.len()), None);
    }

    #[test]
    fn latest_follows_the_writer_across_wraps() {
        let history = RgbHistory::new(4);
        for i in 0..40u8 {
            history.publish(&[i; 4], Timestamp::new(i as i64, 0));
        }

        assert_eq!(history.written(), 40);
        let (data, ts) = history.latest(|data, ts| (data.to_vec(), ts)).unwrap();
        assert_eq!(data, vec![39; 4]);
        assert_eq!(ts, Timestamp::new(39, 0));
    }

    #[test]
    fn oversized_frames_are_truncated() {
        let history = RgbHistory::new(2);
        history.publish(&[1, 2, 3], Timestamp::default());
        assert_eq!(history.latest(|data, _| data.to_vec()), Some(vec![1, 2]));
    }

    #[test]
    fn reader_never_sees_a_torn_frame() {
        let history = Arc::new(RgbHistory::new(1024));

        let writer = {
            let history = Arc::clone(&history);
            thread::spawn(move || {
                for i in 0..5_000u32 {
                    history.publish(&[i as u8; 1024], Timestamp::new(i as i64, 0));
                }
            })
        };

        while history.written() < 5_000 {
            history.latest(|data, ts| {
                assert!(data.iter().all(|&b| b == ts.sec as u8));
            });
        }

        writer.join().unwrap();
    }
}
