//! Event model (§3, §4.5).
//!
//! No direct teacher analogue — `scene_buffer.rs`'s `ObjectEvent`/`MinuteBatch`
//! is the closest prior art for "something emitted downstream", but this
//! crate's ordering/priority contract (§5 "Ordering guarantees") has no
//! counterpart in the teacher, so it's built from the spec directly and
//! styled after the teacher's plain-struct, `Clone`-everywhere data model.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// §4.5 "Ordering": events are ordered first by `frame_seq`, then by kind
/// priority, `Exit < Enter < Count < Move < Describe < Heartbeat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Exit,
    Enter,
    Count,
    Move,
    Describe,
    Trigger,
    Heartbeat,
}

impl EventKind {
    fn priority(self) -> u8 {
        match self {
            EventKind::Exit => 0,
            EventKind::Enter => 1,
            EventKind::Count => 2,
            EventKind::Move => 3,
            EventKind::Describe => 4,
            EventKind::Trigger => 5,
            EventKind::Heartbeat => 6,
        }
    }
}

/// Optional structured data carried by an `Event` (§3).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPayload {
    pub track_id: Option<u64>,
    pub class: Option<String>,
    pub bbox: Option<(i32, i32, i32, i32)>,
    pub count: Option<u32>,
    pub reason: Option<String>,
}

/// The emitted unit (§3 `Event`). Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
    pub payload: EventPayload,
    pub frame_seq: u64,
}

impl Event {
    pub fn new(kind: EventKind, frame_seq: u64, summary: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            summary: summary.into(),
            payload,
            frame_seq,
        }
    }

    /// Total ordering key per §5 "Ordering guarantees": `(frame_seq, kind priority)`.
    pub fn order_key(&self) -> (u64, u8) {
        (self.frame_seq, self.kind.priority())
    }
}

/// Sorts a batch of same-or-mixed-frame events into the canonical order
/// (§4.5 "Ordering"). Used by the emission stage before handing events to
/// sinks; a stable sort so events that tie on `order_key` keep insertion order.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by_key(Event::order_key);
}

/// Atomic, lock-free counters exposed via `SessionHandle::counters` (§4.6 Observability).
#[derive(Debug, Default)]
pub struct Counters {
    pub frames_captured: std::sync::atomic::AtomicU64,
    pub frames_analyzed: std::sync::atomic::AtomicU64,
    pub frames_dropped_source: std::sync::atomic::AtomicU64,
    pub frames_dropped_queue: std::sync::atomic::AtomicU64,
    pub detections_total: std::sync::atomic::AtomicU64,
    pub vlm_calls: std::sync::atomic::AtomicU64,
    pub vlm_failures: std::sync::atomic::AtomicU64,
    pub guarder_suppressions: std::sync::atomic::AtomicU64,
    events_emitted: std::sync::Mutex<HashMap<&'static str, u64>>,
}

/// Point-in-time snapshot of `Counters`, safe to hand across thread/API boundaries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountersSnapshot {
    pub frames_captured: u64,
    pub frames_analyzed: u64,
    pub frames_dropped_source: u64,
    pub frames_dropped_queue: u64,
    pub detections_total: u64,
    pub vlm_calls: u64,
    pub vlm_failures: u64,
    pub guarder_suppressions: u64,
    pub events_emitted: HashMap<&'static str, u64>,
}

impl Counters {
    pub fn record_event(&self, kind: EventKind) {
        let label = match kind {
            EventKind::Exit => "exit",
            EventKind::Enter => "enter",
            EventKind::Count => "count",
            EventKind::Move => "move",
            EventKind::Describe => "describe",
            EventKind::Trigger => "trigger",
            EventKind::Heartbeat => "heartbeat",
        };
        let mut guard = self.events_emitted.lock().expect("counters mutex poisoned");
        *guard.entry(label).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        use std::sync::atomic::Ordering::Relaxed;
        CountersSnapshot {
            frames_captured: self.frames_captured.load(Relaxed),
            frames_analyzed: self.frames_analyzed.load(Relaxed),
            frames_dropped_source: self.frames_dropped_source.load(Relaxed),
            frames_dropped_queue: self.frames_dropped_queue.load(Relaxed),
            detections_total: self.detections_total.load(Relaxed),
            vlm_calls: self.vlm_calls.load(Relaxed),
            vlm_failures: self.vlm_failures.load(Relaxed),
            guarder_suppressions: self.guarder_suppressions.load(Relaxed),
            events_emitted: self.events_emitted.lock().expect("counters mutex poisoned").clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(kind: EventKind, frame_seq: u64) -> Event {
        Event::new(kind, frame_seq, "test", EventPayload::default())
    }

    #[test]
    fn sorts_by_frame_seq_then_priority() {
        let mut events = vec![
            ev(EventKind::Heartbeat, 1),
            ev(EventKind::Exit, 1),
            ev(EventKind::Enter, 1),
            ev(EventKind::Describe, 0),
        ];
        sort_events(&mut events);
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Describe, EventKind::Exit, EventKind::Enter, EventKind::Heartbeat]);
    }

    #[test]
    fn counters_snapshot_reflects_recorded_events() {
        let counters = Counters::default();
        counters.record_event(EventKind::Enter);
        counters.record_event(EventKind::Enter);
        counters.record_event(EventKind::Exit);
        let snap = counters.snapshot();
        assert_eq!(snap.events_emitted.get("enter"), Some(&2));
        assert_eq!(snap.events_emitted.get("exit"), Some(&1));
    }
}
