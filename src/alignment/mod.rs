//! Text to speech alignment.
//!
//! An [`AlignmentProvider`] maps character offsets of the clean narration
//! text to times in the synthesized audio. Three variants are provided:
//!
//! | Provider | Cost | Accuracy |
//! |---|---|---|
//! | [`ManualAligner`] | none | whatever the caller supplies |
//! | [`InterpolationAligner`] | none | assumes a uniform speech rate |
//! | [`ModelAligner`] | runs a forced-alignment model | word/character level |
//!
//! Different purposes (bookmarks, subcaptions) may use different providers
//! within the same narration.

pub mod interpolation;
pub mod manual;
pub mod model;

pub use interpolation::InterpolationAligner;
pub use manual::ManualAligner;
pub use model::{ForcedAligner, ModelAligner, TimedSpan};

use serde::{Deserialize, Serialize};

use crate::error::{NarrationError, Result};
use crate::AudioAsset;

/// One `(char_offset, time)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentPoint {
    pub char_offset: usize,
    /// Seconds from the start of the audio.
    pub time: f64,
}

impl AlignmentPoint {
    pub fn new(char_offset: usize, time: f64) -> Self {
        Self { char_offset, time }
    }
}

/// Ordered mapping from text positions to audio times.
///
/// Points are non-decreasing in both fields. Offsets between two points are
/// resolved by linear interpolation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentMap {
    points: Vec<AlignmentPoint>,
}

impl AlignmentMap {
    /// Validate points as given.
    pub fn new(points: Vec<AlignmentPoint>) -> Result<Self> {
        for point in &points {
            if !point.time.is_finite() || point.time < 0.0 {
                return Err(NarrationError::AlignmentProvider(format!(
                    "invalid time {} at offset {}",
                    point.time, point.char_offset
                )));
            }
        }
        if let Some(pair) = points
            .windows(2)
            .find(|w| w[1].char_offset < w[0].char_offset || w[1].time < w[0].time)
        {
            return Err(NarrationError::AlignmentProvider(format!(
                "alignment is not monotonic: ({}, {:.3}s) is followed by ({}, {:.3}s)",
                pair[0].char_offset, pair[0].time, pair[1].char_offset, pair[1].time
            )));
        }
        Ok(Self { points })
    }

    /// Validate points and extend them to cover offset 0 and `char_len`.
    ///
    /// Missing boundaries map to the start of the audio and to its end.
    pub fn covering(
        mut points: Vec<AlignmentPoint>,
        char_len: usize,
        duration: f64,
    ) -> Result<Self> {
        if let Some(beyond) = points.iter().find(|p| p.char_offset > char_len) {
            return Err(NarrationError::AlignmentProvider(format!(
                "offset {} is beyond the end of the text ({char_len} characters)",
                beyond.char_offset
            )));
        }
        if points.first().map_or(true, |p| p.char_offset > 0) {
            points.insert(0, AlignmentPoint::new(0, 0.0));
        }
        if points.last().map_or(true, |p| p.char_offset < char_len) {
            let last_time = points.last().map_or(0.0, |p| p.time);
            points.push(AlignmentPoint::new(char_len, duration.max(last_time)));
        }
        Self::new(points)
    }

    pub fn points(&self) -> &[AlignmentPoint] {
        &self.points
    }

    /// Whether `offset` has a point of its own.
    pub fn contains(&self, offset: usize) -> bool {
        self.points.iter().any(|p| p.char_offset == offset)
    }

    /// Time for `offset`, interpolated between the surrounding points.
    ///
    /// `None` when the offset lies outside the mapped range.
    pub fn time_at(&self, offset: usize) -> Option<f64> {
        let idx = self.points.partition_point(|p| p.char_offset < offset);
        let after = self.points.get(idx)?;
        if after.char_offset == offset {
            return Some(after.time);
        }
        let before = self.points.get(idx.checked_sub(1)?)?;
        let span = (after.char_offset - before.char_offset) as f64;
        let fraction = (offset - before.char_offset) as f64 / span;
        Some(before.time + (after.time - before.time) * fraction)
    }
}

/// Common interface for alignment providers.
pub trait AlignmentProvider: Send + Sync {
    /// Short provider name used in logs.
    fn identity(&self) -> &str;

    /// Align `text` against `audio`.
    ///
    /// The returned map covers offset 0, `text.chars().count()` and every
    /// offset in `required`.
    fn align(&self, text: &str, audio: &AudioAsset, required: &[usize]) -> Result<AlignmentMap>;
}
