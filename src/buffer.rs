//! Bounded frame buffer (§4.6 "Bounded buffer").
//!
//! No single pack crate implements "replace oldest on full" SPSC semantics
//! (`crossbeam-channel`'s bounded channel blocks or errs on a full queue, it
//! never evicts), so this is hand-rolled the way `worker.rs`'s `MediaWorker`
//! hand-rolls its latest-wins scrub slot: a `Mutex` + `Condvar` guarding a
//! plain `VecDeque`, rather than reaching for a channel that doesn't fit.

use crate::config::DropPolicy;
use crate::frame::Frame;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

struct Inner {
    queue: VecDeque<Frame>,
    closed: bool,
}

/// Outcome of a `push` (§4.6 per-policy counters).
pub enum PushOutcome {
    Inserted,
    /// `DropOldest`: the evicted frame's seq, for the `frames_dropped_queue` counter.
    ReplacedOldest(u64),
    /// `DropNewest`: the rejected frame's seq.
    RejectedNewest(u64),
}

/// Single-producer/single-consumer bounded queue between the Frame Source
/// and the analysis worker.
pub struct FrameBuffer {
    capacity: usize,
    policy: DropPolicy,
    state: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl FrameBuffer {
    pub fn new(capacity: usize, policy: DropPolicy) -> Self {
        Self {
            capacity: capacity.max(1),
            policy,
            state: Mutex::new(Inner { queue: VecDeque::new(), closed: false }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Push a frame under the configured `drop_policy`. `Block` waits up to
    /// `stall_timeout`; callers treat an unmet `Block` wait as a producer-side
    /// stall, not a dropped frame (§5 "Capture thread blocks on buffer
    /// insertion ... with `stall_timeout`").
    pub fn push(&self, frame: Frame, stall_timeout: Duration) -> PushOutcome {
        let mut inner = self.state.lock().expect("frame buffer mutex poisoned");

        if inner.queue.len() < self.capacity {
            let seq = frame.seq;
            inner.queue.push_back(frame);
            drop(inner);
            self.not_empty.notify_one();
            return PushOutcome::Inserted;
        }

        match self.policy {
            DropPolicy::DropOldest => {
                let evicted = inner.queue.pop_front().map(|f| f.seq).unwrap_or(frame.seq);
                inner.queue.push_back(frame);
                drop(inner);
                self.not_empty.notify_one();
                PushOutcome::ReplacedOldest(evicted)
            }
            DropPolicy::DropNewest => PushOutcome::RejectedNewest(frame.seq),
            DropPolicy::Block => {
                let seq = frame.seq;
                let (mut guard, timed_out) = self
                    .not_full
                    .wait_timeout_while(inner, stall_timeout, |i| i.queue.len() >= self.capacity && !i.closed)
                    .expect("frame buffer mutex poisoned");
                if timed_out.timed_out() || guard.closed {
                    return PushOutcome::RejectedNewest(seq);
                }
                guard.queue.push_back(frame);
                drop(guard);
                self.not_empty.notify_one();
                PushOutcome::Inserted
            }
        }
    }

    /// Pop the next frame, waiting up to `pull_timeout` (§5 "Analysis worker
    /// blocks on buffer pull"). Returns `None` on timeout or once closed and
    /// drained.
    pub fn pop(&self, pull_timeout: Duration) -> Option<Frame> {
        let inner = self.state.lock().expect("frame buffer mutex poisoned");
        let (mut guard, timed_out) = self
            .not_empty
            .wait_timeout_while(inner, pull_timeout, |i| i.queue.is_empty() && !i.closed)
            .expect("frame buffer mutex poisoned");
        if timed_out.timed_out() && guard.queue.is_empty() {
            return None;
        }
        let frame = guard.queue.pop_front();
        drop(guard);
        self.not_full.notify_one();
        frame
    }

    /// Marks the buffer closed and wakes any waiters; used during
    /// cancellation to unblock a `Block`-mode producer or an idle consumer.
    pub fn close(&self) {
        let mut inner = self.state.lock().expect("frame buffer mutex poisoned");
        inner.closed = true;
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Drains and discards all buffered frames (§4.6 "Cancellation": "the
    /// buffer drained").
    pub fn drain(&self) -> usize {
        let mut inner = self.state.lock().expect("frame buffer mutex poisoned");
        let n = inner.queue.len();
        inner.queue.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("frame buffer mutex poisoned").queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use opencv::core::Mat;
    use opencv::prelude::*;

    fn frame(seq: u64) -> Frame {
        Frame::new(seq, Utc::now(), Duration::from_secs(0), Mat::default())
    }

    #[test]
    fn drop_oldest_evicts_front_when_full() {
        let buf = FrameBuffer::new(2, DropPolicy::DropOldest);
        buf.push(frame(1), Duration::from_millis(10));
        buf.push(frame(2), Duration::from_millis(10));
        let outcome = buf.push(frame(3), Duration::from_millis(10));
        assert!(matches!(outcome, PushOutcome::ReplacedOldest(1)));
        assert_eq!(buf.pop(Duration::from_millis(10)).unwrap().seq, 2);
        assert_eq!(buf.pop(Duration::from_millis(10)).unwrap().seq, 3);
    }

    #[test]
    fn drop_newest_rejects_when_full() {
        let buf = FrameBuffer::new(1, DropPolicy::DropNewest);
        buf.push(frame(1), Duration::from_millis(10));
        let outcome = buf.push(frame(2), Duration::from_millis(10));
        assert!(matches!(outcome, PushOutcome::RejectedNewest(2)));
        assert_eq!(buf.pop(Duration::from_millis(10)).unwrap().seq, 1);
    }

    #[test]
    fn pop_times_out_when_empty() {
        let buf = FrameBuffer::new(4, DropPolicy::DropOldest);
        assert!(buf.pop(Duration::from_millis(10)).is_none());
    }
}
