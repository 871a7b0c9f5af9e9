//! Boundary-condition and property-style tests (spec "universal invariants"
//! and "boundary behaviors"), exercised against the public API surface.

use std::collections::HashSet;
use std::time::Duration;
use vigilcore::{
    apply_focus_filter, guard, should_describe, sort_events, BBox, CancellationToken, Detection, Error, Event,
    EventKind, EventPayload, GuarderClient, Mode,
};

fn det(class: &str, bbox: BBox) -> Detection {
    Detection { bbox, class: class.to_string(), confidence: 0.5, track_id: None }
}

/// IoU of two boxes that touch at exactly one edge (zero-area intersection)
/// must be zero, not a small positive epsilon.
#[test]
fn iou_of_edge_touching_boxes_is_zero() {
    let a = BBox { x: 0, y: 0, w: 10, h: 10 };
    let b = BBox { x: 10, y: 0, w: 10, h: 10 };
    assert_eq!(a.iou(&b), 0.0);
}

/// IoU of a box fully contained in another is `area(small) / area(large)`,
/// not 1.0 — a common off-by-one in naive IoU implementations.
#[test]
fn iou_of_nested_boxes_is_area_ratio() {
    let outer = BBox { x: 0, y: 0, w: 10, h: 10 };
    let inner = BBox { x: 2, y: 2, w: 2, h: 2 };
    let expected = inner.area() / outer.area();
    assert!((outer.iou(&inner) - expected).abs() < 1e-9);
}

/// A zero-area box (degenerate detection) never divides by zero.
#[test]
fn iou_of_zero_area_box_is_zero_not_nan() {
    let degenerate = BBox { x: 5, y: 5, w: 0, h: 0 };
    let normal = BBox { x: 0, y: 0, w: 10, h: 10 };
    let result = degenerate.iou(&normal);
    assert_eq!(result, 0.0);
    assert!(!result.is_nan());
}

/// `apply_focus_filter` with a focus set that matches nothing drops every
/// detection, but never panics on an empty detections list either.
#[test]
fn focus_filter_on_empty_detections_is_empty() {
    let focus: HashSet<String> = ["dog".to_string()].into_iter().collect();
    assert!(apply_focus_filter(Vec::new(), &focus).is_empty());
}

#[test]
fn focus_filter_keeps_only_matching_classes_among_several() {
    let dets = vec![
        det("car", BBox { x: 0, y: 0, w: 1, h: 1 }),
        det("person", BBox { x: 1, y: 1, w: 1, h: 1 }),
        det("person", BBox { x: 2, y: 2, w: 1, h: 1 }),
    ];
    let focus: HashSet<String> = ["person".to_string()].into_iter().collect();
    let kept = apply_focus_filter(dets, &focus);
    assert_eq!(kept.len(), 2);
    assert!(kept.iter().all(|d| d.class == "person"));
}

/// `should_describe` at exactly the skip threshold: confidence equal to the
/// threshold does not count as "below" it, so Track mode should skip.
#[test]
fn should_describe_boundary_at_exact_threshold_skips() {
    assert!(!should_describe(Mode::Track, Some(0.7), 0.7, false));
}

#[test]
fn should_describe_just_below_threshold_describes() {
    assert!(should_describe(Mode::Track, Some(0.699), 0.7, false));
}

#[test]
fn count_mode_does_not_force_describe_on_high_confidence() {
    assert!(!should_describe(Mode::Count, Some(1.0), 0.7, false));
}

struct NeverCalled;
impl GuarderClient for NeverCalled {
    fn classify(&self, _text: &str, _prev: Option<&str>, _model: &str, _timeout: Duration) -> Result<bool, Error> {
        panic!("guarder must not be called once the noise pre-filter already rejected the text");
    }
}

/// The regex pre-filter must short-circuit before the remote guarder is ever
/// invoked — a panicking guarder double here proves it's unreachable.
#[test]
fn noise_pre_filter_short_circuits_before_remote_call() {
    let significant = guard(Some(&NeverCalled), "Nothing has changed in the scene.", None, true, "m", Duration::from_secs(1));
    assert!(!significant);
}

struct Rejects;
impl GuarderClient for Rejects {
    fn classify(&self, _text: &str, _prev: Option<&str>, _model: &str, _timeout: Duration) -> Result<bool, Error> {
        Ok(false)
    }
}

/// A description that doesn't match any noise pattern but the guarder
/// rejects anyway is suppressed — guarder verdicts are not overridden.
#[test]
fn non_noise_text_can_still_be_suppressed_by_guarder() {
    let significant = guard(Some(&Rejects), "A red car is parked in the driveway.", None, true, "m", Duration::from_secs(1));
    assert!(!significant);
}

/// Events sharing a `frame_seq` sort by kind priority
/// (`Exit < Enter < Count < Move < Describe < Trigger < Heartbeat`); events
/// from different frames always sort by `frame_seq` first regardless of kind.
#[test]
fn event_ordering_is_frame_seq_major_kind_minor() {
    let mut events = vec![
        Event::new(EventKind::Exit, 5, "late exit", EventPayload::default()),
        Event::new(EventKind::Heartbeat, 1, "early heartbeat", EventPayload::default()),
        Event::new(EventKind::Trigger, 1, "early trigger", EventPayload::default()),
        Event::new(EventKind::Enter, 1, "early enter", EventPayload::default()),
    ];
    sort_events(&mut events);
    let order: Vec<(u64, EventKind)> = events.iter().map(|e| (e.frame_seq, e.kind)).collect();
    assert_eq!(
        order,
        vec![
            (1, EventKind::Enter),
            (1, EventKind::Trigger),
            (1, EventKind::Heartbeat),
            (5, EventKind::Exit),
        ]
    );
}

/// Sorting is stable: two events with an identical `order_key` keep their
/// relative insertion order.
#[test]
fn event_ordering_is_stable_for_ties() {
    let mut events = vec![
        Event::new(EventKind::Count, 2, "first", EventPayload::default()),
        Event::new(EventKind::Count, 2, "second", EventPayload::default()),
    ];
    sort_events(&mut events);
    assert_eq!(events[0].summary, "first");
    assert_eq!(events[1].summary, "second");
}

/// `CancellationToken::wait_timeout` must return promptly once cancelled even
/// if the timeout passed in is much longer (no busy-polling, no missed wakeups).
#[test]
fn cancellation_token_is_idempotent_across_repeated_cancels() {
    let token = CancellationToken::new();
    assert!(!token.is_cancelled());
    token.cancel();
    token.cancel();
    assert!(token.is_cancelled());
}
