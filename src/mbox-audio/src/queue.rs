//! Fallback buffer for frames no kernel-side handler claimed, drained by a
//! polling user-space reader.
//!
//! Overflow policy: when the queue is full, the *entire* backlog is dropped
//! before the new frame is appended. A full queue means the reader died or
//! wedged; keeping its stale backlog would only delay noticing. Deliberately
//! blunt, kept as-is for behavioral compatibility with existing consumers.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::wire::Frame;

pub const DEFAULT_CAPACITY: usize = 32;

pub struct PendingQueue {
    frames: Mutex<VecDeque<Frame>>,
    readable: Condvar,
    capacity: usize,
}

impl PendingQueue {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "pending queue capacity must be positive");
        PendingQueue {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            readable: Condvar::new(),
            capacity,
        }
    }

    /// Appends a frame, first bulk-dropping the backlog if at capacity, and
    /// wakes blocked readers. Never fails.
    pub fn enqueue(&self, frame: Frame) {
        let mut frames = self.frames.lock().unwrap();
        if frames.len() >= self.capacity {
            tracing::warn!(
                "pending queue overflow, dropping {} undelivered frames",
                frames.len()
            );
            frames.clear();
        }
        frames.push_back(frame);
        drop(frames);
        self.readable.notify_all();
    }

    /// Pops up to `max_frames` entries in FIFO order. Non-blocking.
    pub fn drain(&self, max_frames: usize) -> Vec<Frame> {
        let mut frames = self.frames.lock().unwrap();
        let n = max_frames.min(frames.len());
        frames.drain(..n).collect()
    }

    /// Blocks until the queue is non-empty or `timeout` elapses. Returns
    /// whether data is available.
    pub fn wait_for_data(&self, timeout: Duration) -> bool {
        let frames = self.frames.lock().unwrap();
        let (frames, _) = self
            .readable
            .wait_timeout_while(frames, timeout, |f| f.is_empty())
            .unwrap();
        !frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{CommandType, Core, Usage};

    fn frame(word: u32) -> Frame {
        Frame::new(Usage::Set, Core::Main, CommandType::Effect, 0, &[word]).unwrap()
    }

    #[test]
    fn fifo_drain() {
        let q = PendingQueue::new(8);
        for i in 0..5 {
            q.enqueue(frame(i));
        }
        let drained = q.drain(3);
        assert_eq!(
            drained.iter().map(|f| f.payload.as_slice()[0]).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn overflow_drops_backlog_keeps_newest() {
        let q = PendingQueue::new(4);
        for i in 0..4 {
            q.enqueue(frame(i));
        }
        assert_eq!(q.len(), 4);
        q.enqueue(frame(99));
        assert_eq!(q.len(), 1);
        assert_eq!(q.drain(10)[0].payload.as_slice(), &[99]);
    }

    #[test]
    fn wait_for_data_times_out_when_empty() {
        let q = PendingQueue::new(4);
        assert!(!q.wait_for_data(Duration::from_millis(10)));
    }

    #[test]
    fn wait_for_data_wakes_on_enqueue() {
        use std::sync::Arc;
        let q = Arc::new(PendingQueue::new(4));
        crossbeam::thread::scope(|s| {
            let q2 = Arc::clone(&q);
            let reader = s.spawn(move |_| q2.wait_for_data(Duration::from_secs(5)));
            std::thread::sleep(Duration::from_millis(10));
            q.enqueue(frame(1));
            assert!(reader.join().unwrap());
        })
        .unwrap();
    }
}
