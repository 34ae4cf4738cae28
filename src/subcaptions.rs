//! Timed subcaptions for a narration.
//!
//! Caption text is split into units no longer than `max_len` characters,
//! preferably right after punctuation, and each unit is timed with an
//! alignment provider.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::alignment::AlignmentProvider;
use crate::error::{NarrationError, Result};
use crate::AudioAsset;

/// How caption text is cut into units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
#[builder(
    default,
    build_fn(validate = "Self::validate", error = "NarrationError")
)]
pub struct SubcaptionOptions {
    /// Maximum number of characters per caption unit.
    pub max_len: usize,
    /// Seconds of silence left between consecutive units.
    pub buffer: f64,
    /// Characters to preferentially split after. Empty disables preferred
    /// splitting; units are then only word-wrapped.
    #[builder(setter(into))]
    pub split_after: String,
}

impl Default for SubcaptionOptions {
    fn default() -> Self {
        Self {
            max_len: 70,
            buffer: 0.3,
            split_after: ".!?,;:".to_string(),
        }
    }
}

impl SubcaptionOptions {
    pub fn builder() -> SubcaptionOptionsBuilder {
        SubcaptionOptionsBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        check(Some(self.max_len), Some(self.buffer))
    }
}

impl SubcaptionOptionsBuilder {
    fn validate(&self) -> Result<()> {
        check(self.max_len, self.buffer)
    }
}

fn check(max_len: Option<usize>, buffer: Option<f64>) -> Result<()> {
    if max_len == Some(0) {
        return Err(NarrationError::InvalidConfig(
            "subcaption max_len must be positive".to_string(),
        ));
    }
    if let Some(buffer) = buffer.filter(|b| !b.is_finite() || *b < 0.0) {
        return Err(NarrationError::InvalidConfig(format!(
            "subcaption buffer must be a non-negative number of seconds, got {buffer}"
        )));
    }
    Ok(())
}

/// One caption unit and when to show it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subcaption {
    pub text: String,
    /// Seconds from the start of the narration.
    pub start: f64,
    pub end: f64,
}

impl Subcaption {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split after words ending with one of `chars`. Consecutive split characters
/// stay together: `"Hello, world!!!"` with `",!"` gives `["Hello,", "world!!!"]`.
pub fn split_after_characters(text: &str, chars: &str) -> Vec<String> {
    if chars.is_empty() {
        return vec![text.split_whitespace().collect::<Vec<_>>().join(" ")];
    }
    let mut splits = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for word in text.split_whitespace() {
        current.push(word);
        if word.chars().last().is_some_and(|c| chars.contains(c)) {
            splits.push(current.join(" "));
            current.clear();
        }
    }
    if !current.is_empty() {
        splits.push(current.join(" "));
    }
    splits
}

/// Greedily join consecutive splits with a space while the result fits in
/// `max_len`. Splits already longer than `max_len` are kept on their own.
pub fn regroup_splits(splits: &[String], max_len: usize) -> Vec<String> {
    let mut regrouped = Vec::new();
    let mut group = String::new();

    for split in splits.iter().filter(|s| !s.is_empty()) {
        let len = char_len(split);
        if len > max_len {
            if !group.is_empty() {
                regrouped.push(std::mem::take(&mut group));
            }
            regrouped.push(split.clone());
        } else if group.is_empty() {
            group = split.clone();
        } else if char_len(&group) + 1 + len <= max_len {
            group.push(' ');
            group.push_str(split);
        } else {
            regrouped.push(std::mem::replace(&mut group, split.clone()));
        }
    }
    if !group.is_empty() {
        regrouped.push(group);
    }
    regrouped
}

/// Word-wrap to lines of at most `width` characters, breaking words that are
/// longer than a line.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > width {
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            let rest = word.split_off(width);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        let word: String = word.into_iter().collect();
        if line.is_empty() {
            line = word;
        } else if char_len(&line) + 1 + char_len(&word) <= width {
            line.push(' ');
            line.push_str(&word);
        } else {
            lines.push(std::mem::replace(&mut line, word));
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

/// Caption units of `text` with their character offsets in the
/// whitespace-normalised text.
pub fn plan_units(text: &str, options: &SubcaptionOptions) -> Vec<(usize, String)> {
    let splits = split_after_characters(text, &options.split_after);
    let units: Vec<String> = regroup_splits(&splits, options.max_len)
        .iter()
        .flat_map(|group| wrap(group, options.max_len))
        .collect();

    // Units are the normalised text cut at spaces or inside long words.
    let normalized: Vec<char> = normalize(text).chars().collect();
    let mut cursor = 0usize;
    let mut planned = Vec::with_capacity(units.len());
    for unit in units {
        if normalized.get(cursor) == Some(&' ') {
            cursor += 1;
        }
        planned.push((cursor, unit.clone()));
        cursor += char_len(&unit);
    }
    planned
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Time caption units of `text` against `audio`.
///
/// Text that fits in one unit spans the whole clip and needs no alignment.
pub fn build_subcaptions(
    text: &str,
    audio: &AudioAsset,
    aligner: &dyn AlignmentProvider,
    options: &SubcaptionOptions,
) -> Result<Vec<Subcaption>> {
    options.validate()?;
    let normalized = normalize(text);
    if normalized.is_empty() {
        return Ok(Vec::new());
    }
    if char_len(&normalized) <= options.max_len {
        return Ok(vec![Subcaption {
            text: normalized,
            start: 0.0,
            end: audio.duration(),
        }]);
    }

    let units = plan_units(&normalized, options);
    let offsets: Vec<usize> = units.iter().map(|(offset, _)| *offset).collect();
    log::info!(
        "Aligning {} subcaption unit(s) with {}",
        units.len(),
        aligner.identity()
    );
    let map = aligner.align(&normalized, audio, &offsets)?;

    let starts = offsets
        .iter()
        .map(|&offset| {
            map.time_at(offset)
                .ok_or(NarrationError::IncompleteAlignment { offset })
        })
        .collect::<Result<Vec<f64>>>()?;

    let captions = units
        .into_iter()
        .enumerate()
        .map(|(i, (_, text))| {
            let start = starts[i];
            let next = starts.get(i + 1).copied().unwrap_or(audio.duration());
            Subcaption {
                text,
                start,
                end: (next - options.buffer).max(start),
            }
        })
        .collect();
    Ok(captions)
}
