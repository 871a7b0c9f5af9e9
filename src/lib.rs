//! Real-time video analysis core: Frame Source → Motion Gate → Object
//! Detector/Tracker → Vision Describer → Response Guarder, wired together by
//! the Smart Scheduler and exposed through the Session API (§6).
//!
//! This crate has no binary target (§2 Non-goals): hosts embed it, supply
//! the pluggable collaborators (`ObjectDetector`, `VisionModelClient`,
//! `GuarderClient`, `EventSink`), and drive it through `start_session`.

pub mod buffer;

pub mod config;
pub mod describer;
pub mod detector;
pub mod error;
pub mod events;
pub mod frame;
pub mod guarder;
pub mod motion;
pub mod scheduler;
pub mod session;
pub mod sinks;
pub mod source;
pub mod tracker;

pub use buffer::{FrameBuffer, PushOutcome};
pub use config::{DropPolicy, Mode, SessionConfig, SourceKind};
pub use describer::{should_describe, DescribeContext, Describer, Description, HttpVisionClient, TrackSummary, VisionModelClient};
pub use detector::{apply_focus_filter, BBox, Detection, Detector, ObjectDetector};
pub use error::{Error, Result};
pub use events::{sort_events, Counters, CountersSnapshot, Event, EventKind, EventPayload};
pub use frame::{Frame, PixelFormat};
pub use guarder::{guard, GuarderClient, HttpGuarderClient};
pub use motion::{MotionGate, MotionVerdict};
pub use scheduler::{AdaptiveRate, CancellationToken};
pub use session::{start_session, EventFilter, EventStream, SessionHandle};
pub use sinks::{ChannelSink, EventSink, LogSink, PushResult};
pub use source::{FrameSource, NextFrameOutcome, OpenParams};
pub use tracker::{Track, TrackState, Tracker};

/// Convenience `tracing` initializer for hosts, tests, and examples that
/// don't already install their own subscriber. The library itself never
/// calls this — it only ever emits events through the ambient `tracing`
/// macros (§9 "Global mutable state": no process-wide setup inside the core).
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vigilcore=info,warn")))
        .compact()
        .try_init();
}
