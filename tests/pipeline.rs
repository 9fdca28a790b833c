use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use rgbd_uvc::pipeline::{FrameRing, RgbHistory};
use rgbd_uvc::session::RingSource;
use rgbd_uvc::uvc::{FillMode, FrameSource};
use rgbd_uvc::Timestamp;

#[test]
fn fifth_frame_is_dropped_when_nobody_drains() {
    let (mut tx, rx) = FrameRing::with_capacity(4, 8, 4).unwrap();

    let mut accepted = 0;
    for seq in 0..5u8 {
        if tx.try_push(|frame| {
            frame.set_rgb(&[seq; 8]);
        }) {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 4);
    assert_eq!(tx.stats().dropped, 1);

    let mut source = RingSource::new(rx);
    let mut dst = [0u8; 8];
    for seq in 0..4u8 {
        assert!(source.fill(FillMode::Rgb, &mut dst));
        assert_eq!(dst, [seq; 8]);
    }
}

#[test]
fn empty_ring_repeats_previous_contents() {
    let (_tx, rx) = FrameRing::with_capacity(4, 8, 4).unwrap();
    let mut source = RingSource::new(rx);

    let mut dst = *b"previous";
    assert!(!source.fill(FillMode::Rgb, &mut dst));
    assert!(!source.fill(FillMode::Rgb, &mut dst));
    assert_eq!(&dst, b"previous");
}

#[test]
fn rgb_and_depth_threads_feed_the_gadget() {
    const DEPTH_FRAMES: u32 = 2_000;

    let history = Arc::new(RgbHistory::new(64));
    let (mut tx, rx) = FrameRing::with_capacity(4, 64, 16).unwrap();
    let rgb_done = Arc::new(AtomicBool::new(false));

    let rgb = {
        let history = Arc::clone(&history);
        let done = Arc::clone(&rgb_done);
        thread::spawn(move || {
            let mut n: u32 = 0;
            while !done.load(Ordering::Acquire) {
                history.publish(&[n as u8; 64], Timestamp::new(n as i64, 0));
                n = n.wrapping_add(1);
            }
        })
    };

    let depth = {
        let history = Arc::clone(&history);
        thread::spawn(move || {
            let mut seq = 0;
            while seq < DEPTH_FRAMES {
                let pushed = history
                    .latest(|rgb, ts| {
                        tx.try_push(|frame| {
                            frame.set_rgb(rgb);
                            frame.rgb_timestamp = ts;
                            frame.set_depth(&[seq as u8; 16]);
                            frame.sequence = seq;
                        })
                    })
                    .unwrap_or(false);
                if pushed {
                    seq += 1;
                } else {
                    thread::yield_now();
                }
            }
        })
    };

    // gadget side: pull until the last depth frame went out
    let mut source = RingSource::new(rx);
    let mut rgb_buf = [0u8; 64];
    let mut served = 0;
    while served < DEPTH_FRAMES {
        if source.fill(FillMode::Rgb, &mut rgb_buf) {
            // every byte comes from the same rgb frame
            assert!(rgb_buf.iter().all(|&b| b == rgb_buf[0]));
            served += 1;
        } else {
            thread::yield_now();
        }
    }

    depth.join().unwrap();
    rgb_done.store(true, Ordering::Release);
    rgb.join().unwrap();
    assert!(history.written() > 0);
}
