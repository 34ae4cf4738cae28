use std::fmt;
use std::sync::Arc;

use crate::error::{NarrationError, Result};
use crate::markers::ParsedNarration;
use crate::AudioAsset;

use super::{AlignmentMap, AlignmentPoint, AlignmentProvider};

type OffsetFn = dyn Fn(usize) -> f64 + Send + Sync;

enum Source {
    Points(Vec<AlignmentPoint>),
    Function(Arc<OffsetFn>),
}

/// Alignment supplied by the caller instead of computed.
///
/// Built either from explicit points or from a function of the character
/// offset. With explicit points, every offset the narration needs must be
/// present unless a fallback provider is configured to fill the gaps.
pub struct ManualAligner {
    source: Source,
    fallback: Option<Arc<dyn AlignmentProvider>>,
}

impl ManualAligner {
    pub fn new(points: Vec<AlignmentPoint>) -> Self {
        Self {
            source: Source::Points(points),
            fallback: None,
        }
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(usize) -> f64 + Send + Sync + 'static,
    {
        Self {
            source: Source::Function(Arc::new(f)),
            fallback: None,
        }
    }

    /// Every offset at the very beginning of the speech, leaving the timing
    /// entirely to explicit waits in the caller.
    pub fn zeroed() -> Self {
        Self::from_fn(|_| 0.0)
    }

    /// Points for named bookmarks of an already parsed narration.
    pub fn from_bookmarks(parsed: &ParsedNarration, times: &[(&str, f64)]) -> Result<Self> {
        let mut points = times
            .iter()
            .map(|&(name, time)| {
                parsed
                    .offset_of(name)
                    .map(|offset| AlignmentPoint::new(offset, time))
                    .ok_or_else(|| NarrationError::UnknownBookmark(name.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        points.sort_by_key(|p| p.char_offset);
        Ok(Self::new(points))
    }

    /// Provider consulted for offsets the supplied points do not cover.
    pub fn with_fallback(mut self, fallback: Arc<dyn AlignmentProvider>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    fn fill_gaps(
        &self,
        mut points: Vec<AlignmentPoint>,
        text: &str,
        audio: &AudioAsset,
        required: &[usize],
    ) -> Result<Vec<AlignmentPoint>> {
        let missing: Vec<usize> = required
            .iter()
            .copied()
            .filter(|&o| !points.iter().any(|p| p.char_offset == o))
            .collect();
        if missing.is_empty() {
            return Ok(points);
        }

        let Some(fallback) = &self.fallback else {
            return Err(NarrationError::IncompleteAlignment { offset: missing[0] });
        };
        log::debug!(
            "Filling {} manual alignment gap(s) with {}",
            missing.len(),
            fallback.identity()
        );
        let estimated = fallback.align(text, audio, &missing)?;
        for offset in missing {
            let time = estimated
                .time_at(offset)
                .ok_or(NarrationError::IncompleteAlignment { offset })?;
            points.push(AlignmentPoint::new(offset, time));
        }
        points.sort_by(|a, b| {
            a.char_offset
                .cmp(&b.char_offset)
                .then(a.time.total_cmp(&b.time))
        });
        Ok(points)
    }
}

impl fmt::Debug for ManualAligner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            Source::Points(points) => format!("{} point(s)", points.len()),
            Source::Function(_) => "function".to_string(),
        };
        f.debug_struct("ManualAligner")
            .field("source", &source)
            .field("fallback", &self.fallback.as_ref().map(|p| p.identity()))
            .finish()
    }
}

impl AlignmentProvider for ManualAligner {
    fn identity(&self) -> &str {
        "manual"
    }

    fn align(&self, text: &str, audio: &AudioAsset, required: &[usize]) -> Result<AlignmentMap> {
        let char_len = text.chars().count();
        match &self.source {
            Source::Points(points) => {
                let points = self.fill_gaps(points.clone(), text, audio, required)?;
                AlignmentMap::covering(points, char_len, audio.duration())
            }
            Source::Function(f) => {
                let mut offsets: Vec<usize> = required.to_vec();
                offsets.push(0);
                offsets.push(char_len);
                offsets.sort_unstable();
                offsets.dedup();
                let points = offsets
                    .into_iter()
                    .map(|o| AlignmentPoint::new(o, f(o)))
                    .collect();
                AlignmentMap::covering(points, char_len, audio.duration())
            }
        }
    }
}
