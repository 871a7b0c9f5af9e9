//! Motion Gate (§4.2).
//!
//! Grounded on `vision_motion.rs`'s `MotionDetector` (MOG2 background
//! subtractor, elliptical-kernel open/close, contour area filtering), but
//! generalized from "return a list of moving-object crops" to the spec's
//! verdict-only contract: the gate classifies the whole frame and leaves
//! object extraction to the Detector. `history` is pinned to 1 frame so the
//! subtractor behaves like the EMA-updated single reference frame the spec
//! describes, rather than the teacher's long rolling background model.

use crate::config::SessionConfig;
use crate::frame::Frame;
use opencv::core::{Mat, Point, Scalar, Size, Vector, BORDER_DEFAULT};
use opencv::imgproc::{self, CHAIN_APPROX_SIMPLE, MORPH_CLOSE, MORPH_ELLIPSE, MORPH_OPEN, RETR_EXTERNAL};
use opencv::prelude::*;
use opencv::video::{create_background_subtractor_mog2, BackgroundSubtractor, BackgroundSubtractorMOG2};

/// Outcome of gating a single frame (§3 `MotionVerdict`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionVerdict {
    Stable,
    Changed(f64),
    PeriodicForced,
}

impl MotionVerdict {
    pub fn is_stable(&self) -> bool {
        matches!(self, MotionVerdict::Stable)
    }
}

/// Per-stream gate state. One instance per session, owned by the analysis worker.
pub struct MotionGate {
    subtractor: opencv::core::Ptr<dyn BackgroundSubtractorMOG2>,
    kernel: Mat,
    motion_threshold: f64,
    min_region_px: f64,
    periodic_interval: u32,
    bg_alpha: f64,
    frames_since_forced: u32,
    reference_size: Option<(i32, i32)>,
    initialized: bool,
}

impl MotionGate {
    pub fn new(config: &SessionConfig) -> opencv::Result<Self> {
        let subtractor = create_background_subtractor_mog2(1, 16.0, false)?;
        let kernel = imgproc::get_structuring_element(MORPH_ELLIPSE, Size::new(5, 5), Point::new(-1, -1))?;
        Ok(Self {
            subtractor,
            kernel,
            motion_threshold: config.motion_threshold,
            min_region_px: config.min_region_px as f64,
            periodic_interval: config.periodic_interval,
            bg_alpha: config.bg_alpha,
            frames_since_forced: 0,
            reference_size: None,
            initialized: false,
        })
    }

    /// Reinitialize the reference frame, e.g. after a `TransientGap` (§4.2
    /// "the reference is invalidated and reinitialized on the next frame").
    pub fn invalidate(&mut self) {
        self.initialized = false;
    }

    pub fn evaluate(&mut self, frame: &Frame) -> opencv::Result<MotionVerdict> {
        let size = (frame.width(), frame.height());
        let resolution_changed = self.reference_size.is_some_and(|(w, h)| size.0 < w || size.1 < h);
        if resolution_changed {
            self.invalidate();
        }
        self.reference_size = Some(size);

        let first_frame = !self.initialized;
        if first_frame {
            self.initialized = true;
            self.frames_since_forced = 0;
            // Prime the subtractor with the first frame as the reference; its
            // own learning rate handles the EMA update internally.
            let mut discard = Mat::default();
            BackgroundSubtractor::apply(self.subtractor.as_mut(), frame.image(), &mut discard, 1.0)?;
            return Ok(MotionVerdict::PeriodicForced);
        }

        // learning_rate 0: compute the mask against the current model without
        // mutating it. The model is updated explicitly below, only on Stable
        // frames, per §4.2's EMA-on-stable-only rule.
        let mut fg_mask = Mat::default();
        BackgroundSubtractor::apply(self.subtractor.as_mut(), frame.image(), &mut fg_mask, 0.0)?;

        let mut binary = Mat::default();
        imgproc::threshold(&fg_mask, &mut binary, 200.0, 255.0, imgproc::THRESH_BINARY)?;

        let mut closed = Mat::default();
        imgproc::morphology_ex(
            &binary,
            &mut closed,
            MORPH_CLOSE,
            &self.kernel,
            Point::new(-1, -1),
            2,
            BORDER_DEFAULT,
            Scalar::default(),
        )?;
        let mut opened = Mat::default();
        imgproc::morphology_ex(
            &closed,
            &mut opened,
            MORPH_OPEN,
            &self.kernel,
            Point::new(-1, -1),
            1,
            BORDER_DEFAULT,
            Scalar::default(),
        )?;

        let changed_pixels = opencv::core::count_non_zero(&opened)? as f64;
        let total_pixels = (opened.rows() * opened.cols()).max(1) as f64;
        let changed_fraction = changed_pixels / total_pixels;

        let mut contours: Vector<Vector<Point>> = Vector::new();
        imgproc::find_contours(&mut opened, &mut contours, RETR_EXTERNAL, CHAIN_APPROX_SIMPLE, Point::new(0, 0))?;
        let mut largest_region = 0.0;
        for cnt in contours.iter() {
            let area = imgproc::contour_area(&cnt, false)?;
            if area > largest_region {
                largest_region = area;
            }
        }

        self.frames_since_forced += 1;
        let forced = self.frames_since_forced >= self.periodic_interval;
        let changed = changed_fraction >= self.motion_threshold && largest_region >= self.min_region_px;

        let verdict = if changed {
            MotionVerdict::Changed(changed_fraction)
        } else if forced {
            MotionVerdict::PeriodicForced
        } else {
            MotionVerdict::Stable
        };

        if matches!(verdict, MotionVerdict::PeriodicForced) {
            self.frames_since_forced = 0;
        }

        if matches!(verdict, MotionVerdict::Stable) {
            // Only update the background model on Stable frames, per §4.2,
            // so moving foreground never bleeds into the reference.
            let mut discard = Mat::default();
            BackgroundSubtractor::apply(self.subtractor.as_mut(), frame.image(), &mut discard, self.bg_alpha)?;
        }

        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_is_stable_helper() {
        assert!(MotionVerdict::Stable.is_stable());
        assert!(!MotionVerdict::Changed(0.5).is_stable());
        assert!(!MotionVerdict::PeriodicForced.is_stable());
    }
}
