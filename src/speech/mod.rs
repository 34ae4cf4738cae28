//! Speech synthesis providers.
//!
//! Two families implement [`SpeechProvider`](crate::SpeechProvider):
//! - [`OnlineSpeech`] - adapts a network API client ([`SpeechApi`])
//! - [`OfflineSpeech`] - adapts a local model ([`SpeechModel`]) and encodes its
//!   samples as WAV
//!
//! Both reject text with nothing to speak before calling their collaborator.

pub mod offline;
pub mod online;

pub use offline::{OfflineSpeech, SpeechModel, SynthesisResult};
pub use online::{ApiAudio, OnlineSpeech, OnlineSpeechConfig, SpeechApi};

use serde::Serialize;

use crate::error::{NarrationError, Result};

const LOG_TEXT_WIDTH: usize = 70;

pub(crate) fn ensure_speakable(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(NarrationError::Synthesis(
            "cannot synthesize empty text".to_string(),
        ));
    }
    Ok(())
}

/// Provider settings as the JSON value that feeds the cache fingerprint.
pub(crate) fn render_config(identity: &str, settings: &impl Serialize) -> Result<serde_json::Value> {
    serde_json::to_value(settings).map_err(|e| {
        NarrationError::InvalidConfig(format!("{identity}: cannot render settings: {e}"))
    })
}

/// Shorten text for log lines.
pub(crate) fn shorten(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= LOG_TEXT_WIDTH {
        return collapsed;
    }
    let mut short: String = collapsed.chars().take(LOG_TEXT_WIDTH - 5).collect();
    short.push_str(" [...]");
    short
}
