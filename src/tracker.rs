//! Tracker (§4.3).
//!
//! Grounded on `vision_tracker.rs`'s `Tracker`/`ActiveTrack` (greedy IoU
//! association, age-based retirement), generalized from "retire after
//! `max_age` and hand back crop snapshots" to the spec's explicit
//! `{New, Stable, Lost}` state machine and `Enter`/`Move`/`Exit` event
//! contract. Crop/JPEG extraction moved out to the describer, which is the
//! only component that actually needs encoded bytes.

use crate::config::SessionConfig;
use crate::detector::{BBox, Detection};
use crate::events::{Event, EventKind, EventPayload};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    New,
    Stable,
    Lost,
}

/// Persistent per-object state (§3 `Track`).
#[derive(Debug, Clone)]
pub struct Track {
    pub id: u64,
    pub class: String,
    pub state: TrackState,
    pub bbox: BBox,
    pub history: VecDeque<(u64, BBox)>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub frames_observed: u32,
    consecutive_matches: u32,
    lost_for_frames: u32,
    last_move_at: Option<DateTime<Utc>>,
    last_move_centroid: (f64, f64),
    history_cap: usize,
    /// Set the moment `Enter` is emitted; a track that never confirms (and
    /// so never enters) is dropped silently on timeout rather than retired
    /// with a dangling `Exit`.
    was_ever_stable: bool,
}

impl Track {
    fn new(id: u64, det: &Detection, frame_seq: u64, now: DateTime<Utc>, history_cap: usize) -> Self {
        let mut history = VecDeque::with_capacity(history_cap.max(1));
        history.push_back((frame_seq, det.bbox));
        Self {
            id,
            class: det.class.clone(),
            state: TrackState::New,
            bbox: det.bbox,
            history,
            first_seen: now,
            last_seen: now,
            frames_observed: 1,
            consecutive_matches: 1,
            lost_for_frames: 0,
            last_move_at: None,
            last_move_centroid: det.bbox.centroid(),
            history_cap,
            was_ever_stable: false,
        }
    }
}

/// IoU-based multi-object tracker. Owned exclusively by the analysis worker
/// (§5 "Shared resources").
pub struct Tracker {
    tracks: Vec<Track>,
    next_id: u64,
    track_match_iou: f64,
    new_track_confirm_frames: u32,
    track_buffer: u32,
    track_timeout: Duration,
    move_epsilon: f64,
    move_min_interval: Duration,
    track_history_len: usize,
}

impl Tracker {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 0,
            track_match_iou: config.track_match_iou as f64,
            new_track_confirm_frames: config.new_track_confirm_frames,
            track_buffer: config.track_buffer,
            track_timeout: config.track_timeout,
            move_epsilon: config.move_epsilon as f64,
            move_min_interval: config.move_min_interval,
            track_history_len: config.track_history_len,
        }
    }

    pub fn live_tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// `update(detections, frame_seq, timestamp) -> [Event]` (§4.3). Writes
    /// the assigned/matched track id back onto each `Detection` (§3
    /// "an optional track ID assigned by the tracker").
    pub fn update(&mut self, detections: &mut [Detection], frame_seq: u64, timestamp: DateTime<Utc>) -> Vec<Event> {
        let mut events = Vec::new();
        let track_count = self.tracks.len();
        let det_count = detections.len();

        // ── 1. Greedy IoU association, deterministic iteration order ──────
        let mut pairs: Vec<(usize, usize, f64)> = Vec::new();
        for ti in 0..track_count {
            for di in 0..det_count {
                let iou = self.tracks[ti].bbox.iou(&detections[di].bbox);
                if iou >= self.track_match_iou {
                    pairs.push((ti, di, iou));
                }
            }
        }
        pairs.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let class_match_a = self.tracks[a.0].class == detections[a.1].class;
                    let class_match_b = self.tracks[b.0].class == detections[b.1].class;
                    class_match_b.cmp(&class_match_a)
                })
                .then_with(|| {
                    let (ctx, cty) = self.tracks[a.0].bbox.centroid();
                    let (cdx, cdy) = detections[a.1].bbox.centroid();
                    let da = ((ctx - cdx).powi(2) + (cty - cdy).powi(2)).sqrt();
                    let (ctx2, cty2) = self.tracks[b.0].bbox.centroid();
                    let (cdx2, cdy2) = detections[b.1].bbox.centroid();
                    let db = ((ctx2 - cdx2).powi(2) + (cty2 - cdy2).powi(2)).sqrt();
                    da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
                })
        });

        let mut matched_track = vec![false; track_count];
        let mut matched_det = vec![false; det_count];
        let mut track_to_det: Vec<Option<usize>> = vec![None; track_count];
        for (ti, di, _) in pairs {
            if matched_track[ti] || matched_det[di] {
                continue;
            }
            matched_track[ti] = true;
            matched_det[di] = true;
            track_to_det[ti] = Some(di);
        }

        // ── 2. Apply matches ───────────────────────────────────────────────
        for ti in 0..track_count {
            let Some(di) = track_to_det[ti] else { continue };
            let det_bbox = detections[di].bbox;

            let track = &mut self.tracks[ti];
            let was_lost = track.state == TrackState::Lost;

            track.bbox = det_bbox;
            track.last_seen = timestamp;
            track.frames_observed += 1;
            track.lost_for_frames = 0;
            track.history.push_back((frame_seq, det_bbox));
            while track.history.len() > track.history_cap.max(1) {
                track.history.pop_front();
            }

            if was_lost {
                // §4.3 step 4: Lost → Stable, no event, treated as continuation.
                track.state = TrackState::Stable;
                track.consecutive_matches += 1;
            } else if track.state == TrackState::New {
                track.consecutive_matches += 1;
                if track.consecutive_matches >= self.new_track_confirm_frames {
                    track.state = TrackState::Stable;
                    track.was_ever_stable = true;
                    events.push(Event::new(
                        EventKind::Enter,
                        frame_seq,
                        format!("{} entered", track.class),
                        EventPayload {
                            track_id: Some(track.id),
                            class: Some(track.class.clone()),
                            bbox: Some((det_bbox.x, det_bbox.y, det_bbox.w, det_bbox.h)),
                            ..Default::default()
                        },
                    ));
                }
            } else {
                track.consecutive_matches += 1;
            }

            let centroid = det_bbox.centroid();
            let moved_enough = {
                let (px, py) = track.last_move_centroid;
                ((centroid.0 - px).powi(2) + (centroid.1 - py).powi(2)).sqrt() > self.move_epsilon
            };
            let interval_ok = track.last_move_at.map_or(true, |last| {
                (timestamp - last).to_std().map(|d| d >= self.move_min_interval).unwrap_or(true)
            });

            if track.state == TrackState::Stable && moved_enough && interval_ok {
                track.last_move_at = Some(timestamp);
                track.last_move_centroid = centroid;
                events.push(Event::new(
                    EventKind::Move,
                    frame_seq,
                    format!("{} moved", track.class),
                    EventPayload {
                        track_id: Some(track.id),
                        class: Some(track.class.clone()),
                        bbox: Some((det_bbox.x, det_bbox.y, det_bbox.w, det_bbox.h)),
                        ..Default::default()
                    },
                ));
            }

            detections[di].track_id = Some(track.id);
        }

        // ── 3. Age unmatched existing tracks, retire stale ones ────────────
        let mut retained = Vec::with_capacity(track_count);
        for (ti, mut track) in self.tracks.drain(..).enumerate() {
            if !matched_track[ti] {
                track.lost_for_frames += 1;
                track.state = TrackState::Lost;
            }

            let wall_clock_timed_out = (timestamp - track.last_seen)
                .to_std()
                .map(|d| d >= self.track_timeout)
                .unwrap_or(false);
            let frame_timed_out = track.lost_for_frames > self.track_buffer;
            let timed_out = track.state == TrackState::Lost && (wall_clock_timed_out || frame_timed_out);

            if timed_out && track.was_ever_stable {
                events.push(Event::new(
                    EventKind::Exit,
                    frame_seq,
                    format!("{} exited", track.class),
                    EventPayload {
                        track_id: Some(track.id),
                        class: Some(track.class.clone()),
                        ..Default::default()
                    },
                ));
            } else if !timed_out {
                retained.push(track);
            }
            // `timed_out && !was_ever_stable`: an unconfirmed track that
            // never reached `Stable` is dropped with no `Exit` (§8
            // "`Exit` is never emitted without a prior `Enter`").
        }
        self.tracks = retained;

        // ── 4. New tracks for unmatched detections ─────────────────────────
        for di in 0..det_count {
            if matched_det[di] {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            let mut track = Track::new(id, &detections[di], frame_seq, timestamp, self.track_history_len);
            if self.new_track_confirm_frames <= 1 {
                track.state = TrackState::Stable;
                track.was_ever_stable = true;
                events.push(Event::new(
                    EventKind::Enter,
                    frame_seq,
                    format!("{} entered", track.class),
                    EventPayload {
                        track_id: Some(id),
                        class: Some(track.class.clone()),
                        bbox: Some((track.bbox.x, track.bbox.y, track.bbox.w, track.bbox.h)),
                        ..Default::default()
                    },
                ));
            }
            detections[di].track_id = Some(id);
            self.tracks.push(track);
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;

    fn det(class: &str, x: i32) -> Detection {
        Detection {
            bbox: BBox { x, y: 0, w: 10, h: 10 },
            class: class.to_string(),
            confidence: 0.9,
            track_id: None,
        }
    }

    #[test]
    fn new_track_confirms_after_threshold_and_emits_enter() {
        let mut cfg = SessionConfig::default();
        cfg.new_track_confirm_frames = 2;
        let mut tracker = Tracker::new(&cfg);
        let now = Utc::now();

        let events_frame1 = tracker.update(&mut [det("person", 0)], 1, now);
        assert!(events_frame1.iter().all(|e| e.kind != EventKind::Enter));

        let events_frame2 = tracker.update(&mut [det("person", 1)], 2, now);
        assert!(events_frame2.iter().any(|e| e.kind == EventKind::Enter));
    }

    #[test]
    fn unmatched_track_exits_after_track_buffer_frames() {
        let mut cfg = SessionConfig::default();
        cfg.new_track_confirm_frames = 1;
        cfg.track_buffer = 2;
        cfg.track_timeout = Duration::from_secs(3600);
        let mut tracker = Tracker::new(&cfg);
        let now = Utc::now();

        tracker.update(&mut [det("person", 0)], 1, now);
        tracker.update(&mut [], 2, now);
        tracker.update(&mut [], 3, now);
        let events = tracker.update(&mut [], 4, now);
        assert!(events.iter().any(|e| e.kind == EventKind::Exit));
    }

    /// A detection that appears for exactly one frame, never reaching
    /// `consecutive_matches >= new_track_confirm_frames`, must age out
    /// silently: no `Enter` was ever emitted for it, so no `Exit` may be
    /// emitted either.
    #[test]
    fn unconfirmed_track_ages_out_without_exit() {
        let mut cfg = SessionConfig::default();
        cfg.new_track_confirm_frames = 2;
        cfg.track_buffer = 2;
        cfg.track_timeout = Duration::from_secs(3600);
        let mut tracker = Tracker::new(&cfg);
        let now = Utc::now();

        let events_frame1 = tracker.update(&mut [det("person", 0)], 1, now);
        assert!(events_frame1.iter().all(|e| e.kind != EventKind::Enter));

        for seq in 2..=5u64 {
            let events = tracker.update(&mut [], seq, now);
            assert!(events.iter().all(|e| e.kind != EventKind::Exit), "unconfirmed track must never exit");
        }
        assert!(tracker.live_tracks().is_empty());
    }
}
