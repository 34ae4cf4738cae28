use serde::{Deserialize, Serialize};

use crate::error::{BoxError, NarrationError, Result};
use crate::AudioAsset;

use super::{AlignmentMap, AlignmentPoint, AlignmentProvider};

/// A span of text and the audio interval in which it is spoken.
///
/// Character offsets are half-open (`start_char..end_char`), times in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedSpan {
    pub start_char: usize,
    pub end_char: usize,
    pub start_time: f64,
    pub end_time: f64,
}

/// A forced-alignment model (CTC, wav2vec2, MMS...) matching known text
/// against its audio.
pub trait ForcedAligner: Send + Sync {
    /// Model identifier, e.g. `"mms-300m-forced-aligner"`.
    fn identity(&self) -> &str;

    /// Token or character level timings for `text` in `audio`, in text order.
    fn align_spans(
        &self,
        text: &str,
        audio: &AudioAsset,
    ) -> std::result::Result<Vec<TimedSpan>, BoxError>;
}

/// Alignment provider reducing a forced aligner's fine-grained timings to an
/// [`AlignmentMap`].
///
/// Offsets falling between emitted timings are linearly interpolated from the
/// nearest surrounding ones.
pub struct ModelAligner<A: ForcedAligner> {
    aligner: A,
}

impl<A: ForcedAligner> ModelAligner<A> {
    pub fn new(aligner: A) -> Self {
        Self { aligner }
    }

    pub fn inner(&self) -> &A {
        &self.aligner
    }
}

/// Sort span boundaries by offset, keep the earliest time per offset and make
/// times non-decreasing.
fn reduce_spans(spans: &[TimedSpan], char_len: usize, duration: f64) -> Vec<AlignmentPoint> {
    let mut points: Vec<AlignmentPoint> = spans
        .iter()
        .flat_map(|s| {
            [
                AlignmentPoint::new(s.start_char, s.start_time),
                AlignmentPoint::new(s.end_char, s.end_time),
            ]
        })
        .filter(|p| p.time.is_finite())
        .map(|p| AlignmentPoint::new(p.char_offset.min(char_len), p.time.clamp(0.0, duration)))
        .collect();
    points.sort_by(|a, b| {
        a.char_offset
            .cmp(&b.char_offset)
            .then(a.time.total_cmp(&b.time))
    });
    points.dedup_by_key(|p| p.char_offset);

    let mut latest = 0.0f64;
    for point in &mut points {
        latest = latest.max(point.time);
        point.time = latest;
    }
    points
}

impl<A: ForcedAligner> AlignmentProvider for ModelAligner<A> {
    fn identity(&self) -> &str {
        self.aligner.identity()
    }

    fn align(&self, text: &str, audio: &AudioAsset, required: &[usize]) -> Result<AlignmentMap> {
        log::info!(
            "Running forced alignment with {} ({} offset(s))",
            self.aligner.identity(),
            required.len()
        );
        let spans = self.aligner.align_spans(text, audio).map_err(|e| {
            NarrationError::AlignmentProvider(format!("{}: {e}", self.aligner.identity()))
        })?;
        if spans.is_empty() {
            return Err(NarrationError::AlignmentProvider(format!(
                "{} returned no timings",
                self.aligner.identity()
            )));
        }

        let char_len = text.chars().count();
        let points = reduce_spans(&spans, char_len, audio.duration());
        let map = AlignmentMap::covering(points, char_len, audio.duration())?;
        if let Some(&offset) = required.iter().find(|&&o| map.time_at(o).is_none()) {
            return Err(NarrationError::IncompleteAlignment { offset });
        }
        Ok(map)
    }
}
