//! Pipeline counters shared between the arrival path and the processing thread

use crate::types::StreamStats;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Number of recent frames used for the emission rate
pub const FPS_WINDOW: usize = 30;

/// Lock-free counters updated from both pipeline threads
#[derive(Debug, Default)]
pub struct StreamCounters {
    pub frames_received: AtomicU64,
    pub frames_accepted: AtomicU64,
    pub frames_dropped_inactive: AtomicU64,
    pub frames_dropped_overflow: AtomicU64,
    pub overflow_events: AtomicU64,
    pub frames_emitted: AtomicU64,
    pub conversion_failures: AtomicU64,
    pub subscriber_failures: AtomicU64,
    pub geometry_detections: AtomicU64,
    emitted_fps_bits: AtomicU64,
}

impl StreamCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub fn set_emitted_fps(&self, fps: f64) {
        self.emitted_fps_bits.store(fps.to_bits(), Ordering::Relaxed);
    }

    pub fn emitted_fps(&self) -> f64 {
        f64::from_bits(self.emitted_fps_bits.load(Ordering::Relaxed))
    }

    /// Snapshot the counters; `queue_depth` is supplied by the caller
    pub fn snapshot(&self, queue_depth: usize) -> StreamStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StreamStats {
            frames_received: load(&self.frames_received),
            frames_accepted: load(&self.frames_accepted),
            frames_dropped_inactive: load(&self.frames_dropped_inactive),
            frames_dropped_overflow: load(&self.frames_dropped_overflow),
            overflow_events: load(&self.overflow_events),
            frames_emitted: load(&self.frames_emitted),
            conversion_failures: load(&self.conversion_failures),
            subscriber_failures: load(&self.subscriber_failures),
            geometry_detections: load(&self.geometry_detections),
            queue_depth,
            emitted_fps: self.emitted_fps(),
        }
    }
}

/// Frame rate over a sliding window of frame times
#[derive(Debug)]
pub struct FrameRateMeter {
    times: VecDeque<Instant>,
    window: usize,
}

impl FrameRateMeter {
    pub fn new(window: usize) -> Self {
        let window = window.max(2);
        Self {
            times: VecDeque::with_capacity(window),
            window,
        }
    }

    /// Record a frame at `now` and return the current rate in Hz
    pub fn tick(&mut self, now: Instant) -> f64 {
        self.times.push_back(now);
        if self.times.len() > self.window {
            self.times.pop_front();
        }
        self.fps()
    }

    pub fn fps(&self) -> f64 {
        match (self.times.front(), self.times.back()) {
            (Some(first), Some(last)) if self.times.len() >= 2 => {
                let elapsed = last.duration_since(*first).as_secs_f64();
                if elapsed > 0.0 {
                    (self.times.len() - 1) as f64 / elapsed
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }
}

impl Default for FrameRateMeter {
    fn default() -> Self {
        Self::new(FPS_WINDOW)
    }
}
