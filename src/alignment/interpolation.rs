use crate::error::{NarrationError, Result};
use crate::AudioAsset;

use super::{AlignmentMap, AlignmentPoint, AlignmentProvider};

/// Maps character offsets to times proportionally to the text length.
///
/// Assumes a uniform speech rate: `time = duration * offset / len(text)`.
/// Empty text maps everything to 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterpolationAligner;

impl InterpolationAligner {
    pub fn new() -> Self {
        Self
    }

    pub fn time_for(offset: usize, char_len: usize, duration: f64) -> f64 {
        if char_len == 0 {
            return 0.0;
        }
        duration * offset as f64 / char_len as f64
    }
}

impl AlignmentProvider for InterpolationAligner {
    fn identity(&self) -> &str {
        "interpolation"
    }

    fn align(&self, text: &str, audio: &AudioAsset, required: &[usize]) -> Result<AlignmentMap> {
        let char_len = text.chars().count();
        let duration = audio.duration();

        let mut offsets: Vec<usize> = Vec::with_capacity(required.len() + 2);
        offsets.push(0);
        offsets.extend_from_slice(required);
        offsets.push(char_len);
        offsets.sort_unstable();
        offsets.dedup();

        if let Some(&beyond) = offsets.last().filter(|&&o| o > char_len) {
            return Err(NarrationError::AlignmentProvider(format!(
                "offset {beyond} is beyond the end of the text ({char_len} characters)"
            )));
        }

        let points = offsets
            .into_iter()
            .map(|o| AlignmentPoint::new(o, Self::time_for(o, char_len, duration)))
            .collect();
        AlignmentMap::new(points)
    }
}
