//! # narration-rs
//!
//! Spoken narration for animation tools, with animation timing synchronised to
//! words in the speech.
//!
//! ## Features
//!
//! - **Timing markers**: `<bookmark mark='NAME'/>` tags embedded in narration text
//! - **Pluggable providers**: speech synthesis and text/audio alignment behind traits,
//!   registered by name
//! - **Audio cache**: one synthesis per text and provider configuration, shared
//!   safely between threads
//! - **Duration queries**: total length, time until a bookmark, remaining time while
//!   the narration is being played
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use narration_rs::{
//!     alignment::InterpolationAligner, AudioCache, NarrationRequest, Narrator,
//!     ProviderRegistry,
//! };
//!
//! let registry = Arc::new(ProviderRegistry::new());
//! registry.register_speech("en", my_speech_provider);
//! registry.register_alignment("rough", InterpolationAligner::new());
//!
//! let narrator = Narrator::new(registry, Arc::new(AudioCache::new()));
//! let request = NarrationRequest::builder()
//!     .text("Hi <bookmark mark='a'/>there")
//!     .build()?;
//!
//! let narrated = narrator.narrate(&request, |session| {
//!     let wait = session.wait_until_bookmark("a", 0.0)?;
//!     // drive the host timeline for `wait` seconds, then animate
//!     Ok(wait)
//! })?;
//! println!("wait {:.2}s after the block", narrated.tail_wait);
//! # Ok::<(), narration_rs::NarrationError>(())
//! ```

pub mod alignment;
pub mod cache;
pub mod config;
pub mod error;
pub mod markers;
pub mod registry;
pub mod session;
pub mod speech;
pub mod subcaptions;

use std::path::Path;

pub use alignment::{AlignmentMap, AlignmentPoint, AlignmentProvider};
pub use cache::{AudioCache, CacheKey, CacheStats};
pub use config::NarrationConfig;
pub use error::{NarrationError, ProviderKind, Result};
pub use markers::{parse, Marker, MarkerParser, ParsedNarration};
pub use registry::ProviderRegistry;
pub use session::{Narrated, NarrationRequest, NarrationSession, Narrator, SessionState};
pub use subcaptions::{Subcaption, SubcaptionOptions};

/// Synthesized speech as handed out by the audio cache.
///
/// `duration` is what the provider reported and is authoritative for all
/// timing arithmetic; it is never re-derived from `bytes`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioAsset {
    bytes: Vec<u8>,
    sample_rate: u32,
    duration: f64,
}

impl AudioAsset {
    /// Wrap encoded audio, rejecting a zero sample rate or a negative or
    /// non-finite duration.
    pub fn new(bytes: Vec<u8>, sample_rate: u32, duration: f64) -> Result<Self> {
        if sample_rate == 0 {
            return Err(NarrationError::Synthesis(
                "provider reported a sample rate of 0".to_string(),
            ));
        }
        if !duration.is_finite() || duration < 0.0 {
            return Err(NarrationError::Synthesis(format!(
                "provider reported an invalid duration: {duration}"
            )));
        }
        Ok(Self {
            bytes,
            sample_rate,
            duration,
        })
    }

    /// Encoded audio (container format is the provider's choice).
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration of the clip in seconds.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Write the encoded audio to disk, e.g. for the host's sound track.
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, &self.bytes)
    }
}

/// Common interface for speech synthesis providers.
///
/// Identical `(text, identity, config)` triples must produce cache-equivalent
/// audio. Failures are reported as [`NarrationError::Synthesis`] and are never
/// retried by the core.
pub trait SpeechProvider: Send + Sync {
    /// Stable name of the provider implementation, part of the cache fingerprint.
    fn identity(&self) -> &str;

    /// Provider configuration (language, voice, model...), part of the cache
    /// fingerprint. Opaque to the core. A configuration that cannot be
    /// rendered is a [`NarrationError::InvalidConfig`] error.
    fn config(&self) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    /// Synthesize speech for tag-free text.
    fn synthesize(&self, text: &str) -> Result<AudioAsset>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_sample_rate() {
        let err = AudioAsset::new(vec![], 0, 1.0).unwrap_err();
        assert!(matches!(err, NarrationError::Synthesis(_)));
    }

    #[test]
    fn rejects_non_finite_duration() {
        assert!(AudioAsset::new(vec![], 16_000, f64::NAN).is_err());
        assert!(AudioAsset::new(vec![], 16_000, -0.5).is_err());
        assert!(AudioAsset::new(vec![], 16_000, 0.0).is_ok());
    }

    #[test]
    fn writes_bytes_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("speech.wav");
        let asset = AudioAsset::new(vec![1, 2, 3], 24_000, 0.5).unwrap();
        asset.write_to(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3]);
    }
}
