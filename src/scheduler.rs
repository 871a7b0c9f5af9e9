//! Smart Scheduler primitives (§4.6): adaptive sampling rate and the
//! cross-worker cancellation token.
//!
//! No single teacher file owns this — `vision_pipeline.rs`'s `watch::Sender<bool>`
//! stop signal is the closest analogue, generalized here to a `Condvar`-backed
//! token so blocking waiters (buffer pull, stall timeout) can be woken
//! immediately on cancellation instead of polling a `watch` receiver.

use crate::config::SessionConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Shared cancellation signal (§5 "Cancellation and timeouts").
#[derive(Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let _guard = self.lock.lock().expect("cancellation token mutex poisoned");
        self.cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep up to `timeout`, waking early if cancelled. Used by any worker
    /// suspension point so cancellation never waits out a full timeout.
    pub fn wait_timeout(&self, timeout: Duration) {
        if self.is_cancelled() {
            return;
        }
        let guard = self.lock.lock().expect("cancellation token mutex poisoned");
        let _ = self.cond.wait_timeout_while(guard, timeout, |_| !self.is_cancelled());
    }
}

/// Multiplicative adaptive-rate controller (§4.6 "Adaptive sampling";
/// §9 notes the source's formula is inconsistent across files and tells
/// implementers to build a clean controller instead of mirroring it).
pub struct AdaptiveRate {
    fps_min: f64,
    fps_max: f64,
    rate_up: f64,
    rate_down: f64,
    stable_windows_needed: u32,
    decision_window: Duration,
    current_fps: f64,
    window_start: Instant,
    window_had_change: bool,
    consecutive_changed_windows: u32,
    consecutive_stable_windows: u32,
}

impl AdaptiveRate {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            fps_min: config.fps_min,
            fps_max: config.fps_max,
            rate_up: config.rate_up,
            rate_down: config.rate_down,
            stable_windows_needed: config.stable_windows,
            decision_window: Duration::from_millis(config.decision_window_ms),
            current_fps: config.fps_min,
            window_start: Instant::now(),
            window_had_change: false,
            consecutive_changed_windows: 0,
            consecutive_stable_windows: 0,
        }
    }

    pub fn current_fps(&self) -> f64 {
        self.current_fps
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.current_fps.max(0.001))
    }

    /// Record whether the most recent analyzed frame was `Changed`; rolls the
    /// decision window and adjusts the target rate when a window closes.
    pub fn record(&mut self, changed: bool) {
        self.window_had_change |= changed;
        if self.window_start.elapsed() < self.decision_window {
            return;
        }

        if self.window_had_change {
            self.consecutive_changed_windows += 1;
            self.consecutive_stable_windows = 0;
        } else {
            self.consecutive_stable_windows += 1;
            self.consecutive_changed_windows = 0;
        }

        if self.consecutive_changed_windows >= 2 {
            self.current_fps = (self.current_fps * self.rate_up).min(self.fps_max);
        } else if self.consecutive_stable_windows >= self.stable_windows_needed {
            self.current_fps = (self.current_fps * self.rate_down).max(self.fps_min);
        }

        self.window_start = Instant::now();
        self.window_had_change = false;
    }

    /// Forces the rate down to `fps_min` (§4.4 "Failure semantics":
    /// describer degradation lowers the analyze rate).
    pub fn force_minimum(&mut self) {
        self.current_fps = self.fps_min;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn config_with_window(ms: u64) -> SessionConfig {
        let mut cfg = SessionConfig::default();
        cfg.decision_window_ms = ms;
        cfg.fps_min = 1.0;
        cfg.fps_max = 8.0;
        cfg.rate_up = 2.0;
        cfg.rate_down = 0.5;
        cfg.stable_windows = 2;
        cfg
    }

    #[test]
    fn rate_increases_after_two_changed_windows() {
        let cfg = config_with_window(1);
        let mut rate = AdaptiveRate::new(&cfg);
        rate.record(true);
        thread::sleep(Duration::from_millis(2));
        rate.record(true);
        thread::sleep(Duration::from_millis(2));
        rate.record(true);
        assert!(rate.current_fps() > cfg.fps_min);
    }

    #[test]
    fn rate_never_exceeds_fps_max() {
        let cfg = config_with_window(1);
        let mut rate = AdaptiveRate::new(&cfg);
        for _ in 0..20 {
            rate.record(true);
            thread::sleep(Duration::from_millis(2));
        }
        assert!(rate.current_fps() <= cfg.fps_max);
    }

    #[test]
    fn force_minimum_drops_to_fps_min() {
        let cfg = config_with_window(1000);
        let mut rate = AdaptiveRate::new(&cfg);
        rate.force_minimum();
        assert_eq!(rate.current_fps(), cfg.fps_min);
    }

    #[test]
    fn cancellation_wakes_waiters_immediately() {
        let token = std::sync::Arc::new(CancellationToken::new());
        let t2 = token.clone();
        let handle = thread::spawn(move || {
            t2.wait_timeout(Duration::from_secs(5));
        });
        thread::sleep(Duration::from_millis(5));
        token.cancel();
        handle.join().unwrap();
    }
}
