//! Even-spread frame selection.
//!
//! Sampling already bounds frames to roughly one per second of video, but a
//! long walkthrough still yields far more frames than one collage should
//! carry. The selector thins the set to a configured cap while preserving
//! chronological order and coverage of the whole video.

use std::path::PathBuf;
use tracing::debug;

/// Selects an evenly spaced subset of sampled frames.
#[derive(Debug, Clone)]
pub struct FrameSelector {
    max_frames: usize,
}

impl FrameSelector {
    pub fn new(max_frames: usize) -> Self {
        Self { max_frames }
    }

    /// Thin a chronological frame list down to at most the configured cap.
    ///
    /// Keeps every stride-th frame starting from the first, where the stride
    /// is the frame count divided by the cap, rounded up. The first frame is
    /// always kept; relative order never changes. Lists at or under the cap
    /// pass through untouched.
    pub fn select(&self, frames: Vec<PathBuf>) -> Vec<PathBuf> {
        let cap = self.max_frames.max(1);
        let total = frames.len();

        if total <= cap {
            return frames;
        }

        let stride = (total + cap - 1) / cap;
        let selected: Vec<PathBuf> = frames.into_iter().step_by(stride).take(cap).collect();

        debug!(
            total,
            selected = selected.len(),
            stride,
            cap,
            "Thinned frame set for collage"
        );

        selected
    }
}
