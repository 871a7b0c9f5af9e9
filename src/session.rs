//! Session API (§6) and Smart Scheduler wiring (§4.6, §5).
//!
//! Thread shape is grounded on `vision_pipeline.rs::Pipeline::start` (one
//! blocking capture+detect loop, one background worker for the
//! slower/remote stage, a stop signal shared across both) but moved onto
//! plain `std::thread`s per §5's "exactly: one capture thread, one analysis
//! worker, one optional describer worker, one emission thread" rather than
//! the teacher's `tokio::spawn` + `spawn_blocking` split, since nothing else
//! in this crate's worker loops is `async`.

use crate::buffer::{FrameBuffer, PushOutcome};
use crate::config::{Mode, SessionConfig, SourceKind};
use crate::describer::{Describer, DescribeContext, TrackSummary, VisionModelClient};
use crate::detector::{apply_focus_filter, ObjectDetector};
use crate::error::Error;
use crate::events::{sort_events, Counters, CountersSnapshot, Event, EventKind, EventPayload};
use crate::guarder::{guard, GuarderClient};
use crate::motion::{MotionGate, MotionVerdict};
use crate::scheduler::{AdaptiveRate, CancellationToken};
use crate::sinks::{ChannelSink, EventSink};
use crate::source::{FrameSource, NextFrameOutcome, OpenParams};
use crate::tracker::{Track, TrackState, Tracker};
use opencv::imgcodecs;
use opencv::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// Which event kinds / focus classes a subscriber wants (§6 `subscribe_events`).
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub kinds: Option<std::collections::HashSet<EventKind>>,
    pub focus: Option<std::collections::HashSet<String>>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    fn matches(&self, event: &Event) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(focus) = &self.focus {
            if let Some(class) = &event.payload.class {
                if !focus.contains(class) {
                    return false;
                }
            }
        }
        true
    }
}

/// Lazy, finite, non-restartable sequence of events (§6 `subscribe_events`).
pub struct EventStream {
    receiver: crossbeam_channel::Receiver<Event>,
    filter: EventFilter,
    cancel: Arc<CancellationToken>,
}

impl Iterator for EventStream {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        loop {
            let timeout = Duration::from_millis(200);
            match self.receiver.recv_timeout(timeout) {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Some(event);
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    if self.cancel.is_cancelled() {
                        match self.receiver.try_recv() {
                            Ok(event) if self.filter.matches(&event) => return Some(event),
                            Ok(_) => continue,
                            Err(_) => return None,
                        }
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

/// Handle returned by `start_session` (§6). Cloneable cheaply; every clone
/// refers to the same underlying session.
pub struct SessionHandle {
    cancel: Arc<CancellationToken>,
    counters: Arc<Counters>,
    running: Arc<AtomicBool>,
    last_fatal: Arc<Mutex<Option<Error>>>,
    event_rx: crossbeam_channel::Receiver<Event>,
    threads: Arc<Mutex<Vec<JoinHandle<()>>>>,
    shutdown_grace: Duration,
}

impl SessionHandle {
    pub fn subscribe_events(&self, filter: EventFilter) -> EventStream {
        EventStream { receiver: self.event_rx.clone(), filter, cancel: self.cancel.clone() }
    }

    /// Signals cancellation and blocks up to `shutdown_grace` (§6).
    /// Calling this twice is a no-op the second time (§8 idempotence).
    pub fn stop_session(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        let deadline = Instant::now() + self.shutdown_grace;
        let mut threads = self.threads.lock().expect("session threads mutex poisoned");
        for handle in threads.drain(..) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("shutdown_grace exceeded, abandoning remaining worker threads");
                *self.last_fatal.lock().expect("last_fatal mutex poisoned") = Some(Error::ShutdownTimeout);
                break;
            }
            // std::thread has no join-with-timeout; workers themselves poll
            // the cancellation token on every suspension point, so join()
            // returns promptly once cancelled.
            let _ = handle.join();
        }
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn last_fatal(&self) -> Option<Error> {
        self.last_fatal.lock().expect("last_fatal mutex poisoned").clone()
    }
}

/// A describe request handed off to the dedicated describer worker when
/// `parallel_vlm` is enabled (§5 "one optional describer worker"). The JPEG
/// is encoded on the analysis thread so the only thing crossing the channel
/// is plain bytes, not an `opencv::core::Mat`.
struct DescribeJob {
    frame_seq: u64,
    jpeg: Vec<u8>,
    context: DescribeContext,
}

/// How the describer stage runs relative to the analysis thread (§5, §9
/// "Exactly one in-flight call per pipeline unless `parallel_vlm` is
/// enabled"). `Inline` runs synchronously inside `run_analysis_step`,
/// folding the describer into the analysis thread exactly as the teacher's
/// single-worker pipeline does; `Parallel` hands frames off to a dedicated
/// worker thread so a slow VLM never stalls detection/tracking.
enum DescribePath {
    None,
    Inline { describer: Describer<Box<dyn VisionModelClient>>, guarder_client: Option<Box<dyn GuarderClient>> },
    Parallel { job_tx: crossbeam_channel::Sender<DescribeJob> },
}

/// Everything the analysis worker needs that isn't owned by another thread.
struct AnalysisContext {
    config: SessionConfig,
    gate: MotionGate,
    detector: Box<dyn ObjectDetector>,
    tracker: Tracker,
    describe_path: DescribePath,
    rate: AdaptiveRate,
    previous_description: Arc<Mutex<Option<String>>>,
    degraded: Arc<AtomicBool>,
    last_heartbeat: Instant,
    last_stable_count_by_class: HashMap<String, usize>,
}

/// `start_session(config) -> SessionHandle` (§6), extended with the
/// pluggable collaborators §6/§9 require components to depend on as
/// interfaces: the video input, the (local) detector, and the two remote
/// model clients. `sinks` are wired into the emission thread in addition to
/// the handle's own `subscribe_events` channel.
#[allow(clippy::too_many_arguments)]
pub fn start_session(
    config: SessionConfig,
    source_kind: SourceKind,
    source_url: String,
    open_params: OpenParams,
    detector: Box<dyn ObjectDetector>,
    vision_client: Option<Box<dyn VisionModelClient>>,
    guarder_client: Option<Box<dyn GuarderClient>>,
    mut sinks: Vec<Box<dyn EventSink>>,
) -> Result<SessionHandle, Error> {
    let mut source = FrameSource::open(
        source_kind,
        &source_url,
        &open_params,
        config.open_timeout,
        config.stall_timeout,
        config.hard_stall_timeout,
        config.reconnect_base,
        config.reconnect_max,
        config.reconnect_reset_window,
        config.max_reconnect_attempts,
    )?;

    let cancel = Arc::new(CancellationToken::new());
    let counters = Arc::new(Counters::default());
    let running = Arc::new(AtomicBool::new(true));
    let last_fatal: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));
    let buffer = Arc::new(FrameBuffer::new(config.buffer_capacity, config.drop_policy));
    let gap_pending = Arc::new(AtomicBool::new(false));
    let (event_tx, event_rx) = crossbeam_channel::bounded::<Event>(config.sink_buffer);

    let previous_description: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let degraded = Arc::new(AtomicBool::new(false));

    // ── Describer worker (optional) ─────────────────────────────────────
    // Folded into the analysis thread unless `parallel_vlm` asks for a
    // dedicated worker, per §5's "same thread as analysis if `parallel_vlm`
    // is false".
    let mut describer_handle: Option<JoinHandle<()>> = None;
    let describe_path = match vision_client {
        None => DescribePath::None,
        Some(client) => {
            let describer = Describer::new(client, config.vlm_fail_threshold);
            if config.parallel_vlm {
                let (job_tx, job_rx) = crossbeam_channel::bounded::<DescribeJob>(1);
                let desc_cancel = cancel.clone();
                let desc_event_tx = event_tx.clone();
                let desc_counters = counters.clone();
                let desc_prev = previous_description.clone();
                let desc_degraded = degraded.clone();
                let desc_guarder = guarder_client;
                let vlm_timeout = config.vlm_timeout;
                let guarder_timeout = config.guarder_timeout;
                let guarder_model = config.guarder_model.clone();
                let use_guarder = config.use_guarder;
                let vision_model = config.vision_model.clone();
                describer_handle = Some(std::thread::spawn(move || {
                    let mut describer = describer;
                    loop {
                        match job_rx.recv_timeout(Duration::from_millis(200)) {
                            Ok(job) => {
                                desc_counters.vlm_calls.fetch_add(1, Ordering::Relaxed);
                                let prev = desc_prev.lock().expect("previous_description mutex poisoned").clone();
                                let mut context = job.context;
                                context.previous_description = prev;
                                match describer.describe(&job.jpeg, &context, &vision_model, job.frame_seq, vlm_timeout) {
                                    Ok(description) => {
                                        let significant = guard(
                                            desc_guarder.as_ref(),
                                            &description.text,
                                            context.previous_description.as_deref(),
                                            use_guarder,
                                            &guarder_model,
                                            guarder_timeout,
                                        );
                                        if significant {
                                            let _ = desc_event_tx.try_send(Event::new(
                                                EventKind::Describe,
                                                job.frame_seq,
                                                description.text.clone(),
                                                EventPayload::default(),
                                            ));
                                        } else {
                                            desc_counters.guarder_suppressions.fetch_add(1, Ordering::Relaxed);
                                        }
                                        *desc_prev.lock().expect("previous_description mutex poisoned") = Some(description.text);
                                    }
                                    Err(_) => {
                                        desc_counters.vlm_failures.fetch_add(1, Ordering::Relaxed);
                                        if describer.is_degraded() {
                                            desc_degraded.store(true, Ordering::SeqCst);
                                            let _ = desc_event_tx.try_send(Event::new(
                                                EventKind::Heartbeat,
                                                job.frame_seq,
                                                "describer degraded",
                                                EventPayload { reason: Some("degraded".to_string()), ..Default::default() },
                                            ));
                                        }
                                    }
                                }
                            }
                            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                                if desc_cancel.is_cancelled() {
                                    break;
                                }
                            }
                            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                        }
                    }
                }));
                DescribePath::Parallel { job_tx }
            } else {
                DescribePath::Inline { describer, guarder_client }
            }
        }
    };

    let mut ctx = AnalysisContext {
        gate: MotionGate::new(&config).map_err(|e| Error::DetectorFatal(e.to_string()))?,
        detector,
        tracker: Tracker::new(&config),
        describe_path,
        rate: AdaptiveRate::new(&config),
        previous_description,
        degraded,
        last_heartbeat: Instant::now(),
        last_stable_count_by_class: HashMap::new(),
        config: config.clone(),
    };

    // ── Capture thread ──────────────────────────────────────────────────
    let capture_cancel = cancel.clone();
    let capture_counters = counters.clone();
    let capture_buffer = buffer.clone();
    let capture_gap = gap_pending.clone();
    let capture_fatal = last_fatal.clone();
    let stall_timeout = config.stall_timeout;
    let capture_handle = std::thread::spawn(move || {
        loop {
            if capture_cancel.is_cancelled() {
                break;
            }
            match source.next_frame() {
                Ok(NextFrameOutcome::Frame(frame)) => {
                    capture_counters.frames_captured.fetch_add(1, Ordering::Relaxed);
                    match capture_buffer.push(frame, stall_timeout) {
                        PushOutcome::Inserted => {}
                        PushOutcome::ReplacedOldest(_) | PushOutcome::RejectedNewest(_) => {
                            capture_counters.frames_dropped_queue.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                Ok(NextFrameOutcome::TransientGap) => {
                    capture_gap.store(true, Ordering::SeqCst);
                }
                Ok(NextFrameOutcome::Stalled) | Ok(NextFrameOutcome::Disconnected) => {
                    capture_cancel.wait_timeout(Duration::from_millis(50));
                }
                Ok(NextFrameOutcome::EndOfStream) => {
                    break;
                }
                Err(err) => {
                    error!(%err, "frame source failed fatally");
                    *capture_fatal.lock().expect("last_fatal mutex poisoned") = Some(err);
                    capture_cancel.cancel();
                    break;
                }
            }
        }
        source.close();
        capture_buffer.close();
    });

    // ── Analysis worker ─────────────────────────────────────────────────
    let analysis_cancel = cancel.clone();
    let analysis_counters = counters.clone();
    let analysis_buffer = buffer.clone();
    let analysis_gap = gap_pending.clone();
    let analysis_event_tx = event_tx.clone();
    let pull_timeout = config.pull_timeout;
    let heartbeat_interval = config.heartbeat_interval;
    let analysis_handle = std::thread::spawn(move || {
        let mut last_analyzed: Option<Instant> = None;
        loop {
            if analysis_cancel.is_cancelled() {
                break;
            }

            if ctx.last_heartbeat.elapsed() >= heartbeat_interval {
                ctx.last_heartbeat = Instant::now();
                let _ = analysis_event_tx.try_send(Event::new(
                    EventKind::Heartbeat,
                    0,
                    "heartbeat",
                    EventPayload::default(),
                ));
            }

            // §4.6 step 2: pull at the current target rate rather than as
            // fast as frames arrive; frames that pile up faster than the
            // rate are shed by the buffer's own `drop_policy` on push
            // instead of being pulled and discarded here.
            if let Some(last) = last_analyzed {
                let interval = ctx.rate.interval();
                let elapsed = last.elapsed();
                if elapsed < interval {
                    analysis_cancel.wait_timeout(interval - elapsed);
                    continue;
                }
            }

            let Some(frame) = analysis_buffer.pop(pull_timeout) else {
                continue;
            };
            last_analyzed = Some(Instant::now());
            analysis_counters.frames_analyzed.fetch_add(1, Ordering::Relaxed);

            if analysis_gap.swap(false, Ordering::SeqCst) {
                ctx.gate.invalidate();
            }

            let verdict = match ctx.gate.evaluate(&frame) {
                Ok(v) => v,
                Err(e) => {
                    warn!(%e, "motion gate failed, treating frame as changed");
                    MotionVerdict::Changed(1.0)
                }
            };
            ctx.rate.record(matches!(verdict, MotionVerdict::Changed(_)));

            if verdict.is_stable() && ctx.config.mode != Mode::Full {
                continue;
            }

            let mut events = run_analysis_step(&mut ctx, &frame, &analysis_counters);
            if ctx.degraded.load(Ordering::SeqCst) {
                ctx.rate.force_minimum();
            }
            sort_events(&mut events);
            for event in events {
                analysis_counters.record_event(event.kind);
                let _ = analysis_event_tx.try_send(event);
            }
        }

        let _ = analysis_event_tx.try_send(Event::new(
            EventKind::Heartbeat,
            0,
            "shutdown",
            EventPayload { reason: Some("shutdown".to_string()), ..Default::default() },
        ));
        analysis_buffer.close();
    });

    // ── Emission thread ─────────────────────────────────────────────────
    // `subscribe_events` is backed by its own `ChannelSink`, wired in as just
    // another sink (§6: "the host drains the sink"), so events fan out to it
    // the same way they fan out to any externally supplied sink.
    let subscriber_sink = ChannelSink::new(config.sink_buffer);
    let subscriber_rx = subscriber_sink.receiver();
    sinks.push(Box::new(subscriber_sink));

    let emission_handle = std::thread::spawn(move || {
        for event in event_rx.iter() {
            for sink in &sinks {
                let _ = sink.try_push(&event);
            }
        }
    });

    let mut thread_list = vec![capture_handle, analysis_handle];
    if let Some(handle) = describer_handle {
        thread_list.push(handle);
    }
    thread_list.push(emission_handle);
    let threads = Arc::new(Mutex::new(thread_list));

    Ok(SessionHandle {
        cancel,
        counters,
        running,
        last_fatal,
        event_rx: subscriber_rx,
        threads,
        shutdown_grace: config.shutdown_grace,
    })
}

/// Runs Detector → Tracker → (Describer) → Guarder → Count for one analyzed
/// frame (§4.6 "Per-frame decision", steps 5-7).
fn run_analysis_step(ctx: &mut AnalysisContext, frame: &crate::frame::Frame, counters: &Counters) -> Vec<Event> {
    let mut events = Vec::new();

    let detections = match ctx.detector.detect(frame) {
        Ok(dets) => dets,
        Err(e) => {
            warn!(%e, "detector failure for frame");
            Vec::new()
        }
    };
    let mut detections = apply_focus_filter(detections, &ctx.config.focus);
    counters.detections_total.fetch_add(detections.len() as u64, Ordering::Relaxed);

    let best_confidence = detections.iter().map(|d| d.confidence).fold(None, |acc, c| {
        Some(acc.map_or(c, |a: f32| a.max(c)))
    });

    events.extend(ctx.tracker.update(&mut detections, frame.seq, frame.wall_clock));

    if !matches!(ctx.describe_path, DescribePath::None) {
        let trigger_fired = false;
        if crate::describer::should_describe(ctx.config.mode, best_confidence, ctx.config.skip_llm_threshold, trigger_fired) {
            let tracks: Vec<TrackSummary> = ctx
                .tracker
                .live_tracks()
                .iter()
                .filter(|t| t.state == TrackState::Stable)
                .map(|t: &Track| TrackSummary {
                    track_id: t.id,
                    class: t.class.clone(),
                    bbox: (t.bbox.x, t.bbox.y, t.bbox.w, t.bbox.h),
                })
                .collect();
            let prev = ctx.previous_description.lock().expect("previous_description mutex poisoned").clone();
            let context = DescribeContext {
                mode: ctx.config.mode,
                focus: ctx.config.focus.iter().cloned().collect(),
                tracks,
                previous_description: prev,
            };

            match encode_jpeg(frame) {
                Ok(jpeg) => match &mut ctx.describe_path {
                    DescribePath::None => unreachable!(),
                    DescribePath::Parallel { job_tx } => {
                        // Dropped under backpressure rather than queued, so a
                        // slow VLM never piles up stale describe jobs (§9
                        // "exactly one in-flight call per pipeline unless
                        // `parallel_vlm` is enabled" — one job in flight, one
                        // queued at most).
                        let _ = job_tx.try_send(DescribeJob { frame_seq: frame.seq, jpeg, context });
                    }
                    DescribePath::Inline { describer, guarder_client } => {
                        counters.vlm_calls.fetch_add(1, Ordering::Relaxed);
                        match describer.describe(&jpeg, &context, &ctx.config.vision_model, frame.seq, ctx.config.vlm_timeout) {
                            Ok(description) => {
                                let significant = guard(
                                    guarder_client.as_ref(),
                                    &description.text,
                                    context.previous_description.as_deref(),
                                    ctx.config.use_guarder,
                                    &ctx.config.guarder_model,
                                    ctx.config.guarder_timeout,
                                );
                                if !significant {
                                    counters.guarder_suppressions.fetch_add(1, Ordering::Relaxed);
                                } else {
                                    events.push(Event::new(
                                        EventKind::Describe,
                                        frame.seq,
                                        description.text.clone(),
                                        EventPayload::default(),
                                    ));
                                }
                                *ctx.previous_description.lock().expect("previous_description mutex poisoned") =
                                    Some(description.text);
                            }
                            Err(_) => {
                                counters.vlm_failures.fetch_add(1, Ordering::Relaxed);
                                if describer.is_degraded() {
                                    ctx.degraded.store(true, Ordering::SeqCst);
                                    events.push(Event::new(
                                        EventKind::Heartbeat,
                                        frame.seq,
                                        "describer degraded",
                                        EventPayload { reason: Some("degraded".to_string()), ..Default::default() },
                                    ));
                                }
                            }
                        }
                    }
                },
                Err(e) => warn!(%e, "jpeg encode failed, skipping describer for this frame"),
            }
        }
    }

    // §4.5 "A Count event is emitted whenever the number of Stable tracks of
    // any focused class changes."
    let mut live_counts: HashMap<String, usize> = HashMap::new();
    for track in ctx.tracker.live_tracks() {
        if track.state == TrackState::Stable {
            *live_counts.entry(track.class.clone()).or_insert(0) += 1;
        }
    }
    for (class, count) in &live_counts {
        if ctx.last_stable_count_by_class.get(class) != Some(count) {
            events.push(Event::new(
                EventKind::Count,
                frame.seq,
                format!("{count} {class}(s) in view"),
                EventPayload { class: Some(class.clone()), count: Some(*count as u32), ..Default::default() },
            ));
        }
    }
    ctx.last_stable_count_by_class = live_counts;

    events
}

fn encode_jpeg(frame: &crate::frame::Frame) -> opencv::Result<Vec<u8>> {
    let mut buf = opencv::core::Vector::<u8>::new();
    let params = opencv::core::Vector::from_iter([imgcodecs::IMWRITE_JPEG_QUALITY, 80]);
    imgcodecs::imencode(".jpg", frame.image(), &mut buf, &params)?;
    Ok(buf.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ev(kind: EventKind, class: Option<&str>) -> Event {
        Event::new(
            kind,
            0,
            "test",
            EventPayload { class: class.map(String::from), ..Default::default() },
        )
    }

    #[test]
    fn event_filter_all_matches_everything() {
        let filter = EventFilter::all();
        assert!(filter.matches(&ev(EventKind::Heartbeat, None)));
        assert!(filter.matches(&ev(EventKind::Enter, Some("person"))));
    }

    #[test]
    fn event_filter_by_kind_excludes_other_kinds() {
        let mut kinds = HashSet::new();
        kinds.insert(EventKind::Enter);
        let filter = EventFilter { kinds: Some(kinds), focus: None };
        assert!(filter.matches(&ev(EventKind::Enter, None)));
        assert!(!filter.matches(&ev(EventKind::Exit, None)));
    }

    #[test]
    fn event_filter_by_focus_excludes_other_classes() {
        let mut focus = HashSet::new();
        focus.insert("person".to_string());
        let filter = EventFilter { kinds: None, focus: Some(focus) };
        assert!(filter.matches(&ev(EventKind::Enter, Some("person"))));
        assert!(!filter.matches(&ev(EventKind::Enter, Some("car"))));
    }

    #[test]
    fn event_filter_by_focus_keeps_events_without_a_class() {
        // A Heartbeat has no `payload.class`; a focus filter must not reject
        // it outright, since it isn't the kind of event focus is meant to scope.
        let mut focus = HashSet::new();
        focus.insert("person".to_string());
        let filter = EventFilter { kinds: None, focus: Some(focus) };
        assert!(filter.matches(&ev(EventKind::Heartbeat, None)));
    }

    fn fake_handle(shutdown_grace: Duration, worker_sleep: Duration) -> SessionHandle {
        let cancel = Arc::new(CancellationToken::new());
        let worker_cancel = cancel.clone();
        let worker = std::thread::spawn(move || {
            while !worker_cancel.is_cancelled() {
                worker_cancel.wait_timeout(worker_sleep);
            }
        });
        let (_tx, rx) = crossbeam_channel::bounded::<Event>(1);
        SessionHandle {
            cancel,
            counters: Arc::new(Counters::default()),
            running: Arc::new(AtomicBool::new(true)),
            last_fatal: Arc::new(Mutex::new(None)),
            event_rx: rx,
            threads: Arc::new(Mutex::new(vec![worker])),
            shutdown_grace,
        }
    }

    /// Scenario F (clean shutdown): `stop_session` signals cancellation, the
    /// worker notices and exits within `shutdown_grace`, and a second call is
    /// a no-op rather than blocking again.
    #[test]
    fn stop_session_is_clean_and_idempotent() {
        let handle = fake_handle(Duration::from_secs(2), Duration::from_millis(10));
        assert!(handle.is_running());
        handle.stop_session();
        assert!(!handle.is_running());
        assert!(handle.last_fatal().is_none());
        handle.stop_session();
        assert!(!handle.is_running());
    }

    /// A worker that ignores cancellation for longer than `shutdown_grace`
    /// is abandoned and recorded as a `ShutdownTimeout`, rather than hanging
    /// `stop_session` forever.
    #[test]
    fn stop_session_past_grace_records_shutdown_timeout() {
        let cancel = Arc::new(CancellationToken::new());
        let worker = std::thread::spawn(|| {
            std::thread::sleep(Duration::from_millis(300));
        });
        let (_tx, rx) = crossbeam_channel::bounded::<Event>(1);
        let handle = SessionHandle {
            cancel,
            counters: Arc::new(Counters::default()),
            running: Arc::new(AtomicBool::new(true)),
            last_fatal: Arc::new(Mutex::new(None)),
            event_rx: rx,
            threads: Arc::new(Mutex::new(vec![worker])),
            shutdown_grace: Duration::ZERO,
        };
        handle.stop_session();
        assert!(matches!(handle.last_fatal(), Some(Error::ShutdownTimeout)));
    }
}
