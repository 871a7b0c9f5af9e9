//! Frame data model (§3).
//!
//! Grounded on `TODO/capture.rs`/`vision_pipeline.rs`, which pass
//! `opencv::core::Mat` end to end through capture → motion → detector →
//! tracker. `Frame` wraps that `Mat` directly rather than re-encoding pixels
//! into a crate-private buffer type; width/height/pixel format are read off
//! the `Mat` lazily.

use chrono::{DateTime, Utc};
use opencv::core::Mat;
use opencv::prelude::*;
use std::time::Duration;

/// Pixel layout of a `Frame`'s image bytes. Every `FrameSource` adapter
/// normalizes to `Bgr8` before publishing, since that's the OpenCV default
/// and every downstream stage (motion, detector, tracker) expects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Bgr8,
}

/// One immutable decoded frame, owned by whichever stage currently holds it.
pub struct Frame {
    /// Strictly increasing, dense within a session (assigned by the Source).
    pub seq: u64,
    pub wall_clock: DateTime<Utc>,
    /// Time since session start, per the Source's own clock.
    pub capture_ts: Duration,
    pub pixel_format: PixelFormat,
    pub(crate) image: Mat,
}

impl Frame {
    pub fn new(seq: u64, wall_clock: DateTime<Utc>, capture_ts: Duration, image: Mat) -> Self {
        Self {
            seq,
            wall_clock,
            capture_ts,
            pixel_format: PixelFormat::Bgr8,
            image,
        }
    }

    pub fn width(&self) -> i32 {
        self.image.cols()
    }

    pub fn height(&self) -> i32 {
        self.image.rows()
    }

    pub fn image(&self) -> &Mat {
        &self.image
    }

    /// Clone the underlying pixel buffer. Used by the tracker (crop
    /// extraction) and the describer (JPEG encode) which need their own copy
    /// once the frame has otherwise been consumed by the gate/detector.
    pub fn image_owned(&self) -> opencv::Result<Mat> {
        let mut out = Mat::default();
        self.image.copy_to(&mut out)?;
        Ok(out)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("seq", &self.seq)
            .field("wall_clock", &self.wall_clock)
            .field("capture_ts", &self.capture_ts)
            .field("pixel_format", &self.pixel_format)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}
