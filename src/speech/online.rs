use serde::{Deserialize, Serialize};

use crate::error::{BoxError, NarrationError, Result};
use crate::{AudioAsset, SpeechProvider};

use super::{ensure_speakable, render_config, shorten};

/// Configuration forwarded unchanged to an online speech API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineSpeechConfig {
    /// Language code understood by the service (e.g. `"en"`, `"fr"`).
    pub language: String,
    /// Voice name; `None` lets the service pick its default.
    #[serde(default)]
    pub voice: Option<String>,
    /// Model or engine identifier for services offering several.
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for OnlineSpeechConfig {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            voice: None,
            model: None,
        }
    }
}

/// Audio returned by a speech API.
#[derive(Debug, Clone)]
pub struct ApiAudio {
    pub bytes: Vec<u8>,
    pub sample_rate: u32,
    /// Duration in seconds as reported by the service.
    pub duration: f64,
}

/// Client for a text-to-speech web service.
///
/// Networking, authentication and decoding are the client's concern.
pub trait SpeechApi: Send + Sync {
    /// Short service name, e.g. `"gtts"`.
    fn service_name(&self) -> &str;

    fn supports_language(&self, _language: &str) -> bool {
        true
    }

    fn request(
        &self,
        text: &str,
        config: &OnlineSpeechConfig,
    ) -> std::result::Result<ApiAudio, BoxError>;
}

/// Speech provider backed by an online API.
///
/// Byte-identical output is not guaranteed across calls; the audio cache
/// treats identical `(text, config)` requests as equivalent anyway.
pub struct OnlineSpeech<C: SpeechApi> {
    identity: String,
    client: C,
    config: OnlineSpeechConfig,
}

impl<C: SpeechApi> OnlineSpeech<C> {
    pub fn new(client: C, config: OnlineSpeechConfig) -> Self {
        Self {
            identity: format!("online:{}", client.service_name()),
            client,
            config,
        }
    }

    pub fn settings(&self) -> &OnlineSpeechConfig {
        &self.config
    }
}

impl<C: SpeechApi> SpeechProvider for OnlineSpeech<C> {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn config(&self) -> Result<serde_json::Value> {
        render_config(&self.identity, &self.config)
    }

    fn synthesize(&self, text: &str) -> Result<AudioAsset> {
        ensure_speakable(text)?;
        if !self.client.supports_language(&self.config.language) {
            return Err(NarrationError::Synthesis(format!(
                "{} does not support language '{}'",
                self.identity, self.config.language
            )));
        }

        log::info!("Requesting speech from {}: '{}'", self.identity, shorten(text));
        let audio = self
            .client
            .request(text, &self.config)
            .map_err(|e| NarrationError::Synthesis(format!("{}: {e}", self.identity)))?;
        if audio.bytes.is_empty() {
            return Err(NarrationError::Synthesis(format!(
                "{} returned no audio",
                self.identity
            )));
        }

        AudioAsset::new(audio.bytes, audio.sample_rate, audio.duration)
    }
}
