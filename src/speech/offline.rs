use std::io::Cursor;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{BoxError, NarrationError, Result};
use crate::{AudioAsset, SpeechProvider};

use super::{ensure_speakable, render_config, shorten};

/// Raw output of a local speech model.
///
/// Contains f32 samples and the sample rate of the output audio.
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    /// Raw audio samples as f32 values
    pub samples: Vec<f32>,
    /// Sample rate of the audio
    pub sample_rate: u32,
}

impl SynthesisResult {
    /// Encode the samples as a mono 32-bit float WAV file in memory.
    pub fn to_wav_bytes(&self) -> std::result::Result<Vec<u8>, hound::Error> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
            for &sample in &self.samples {
                writer.write_sample(sample)?;
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// A locally loaded speech model.
///
/// Models typically keep mutable inference state, hence `&mut self`.
pub trait SpeechModel: Send {
    /// Parameters for a synthesis request (voice, speed, etc.)
    type Params: Serialize + Clone + Send + Sync;

    /// Stable name of the model, e.g. `"kokoro-82m"`.
    fn identity(&self) -> &str;

    /// Synthesize speech samples from the given text.
    fn synthesize(
        &mut self,
        text: &str,
        params: &Self::Params,
    ) -> std::result::Result<SynthesisResult, BoxError>;
}

/// Speech provider backed by a local model.
pub struct OfflineSpeech<M: SpeechModel> {
    identity: String,
    model: Mutex<M>,
    params: M::Params,
}

impl<M: SpeechModel> OfflineSpeech<M> {
    pub fn new(model: M, params: M::Params) -> Self {
        Self {
            identity: format!("offline:{}", model.identity()),
            model: Mutex::new(model),
            params,
        }
    }

    pub fn params(&self) -> &M::Params {
        &self.params
    }
}

impl<M: SpeechModel> SpeechProvider for OfflineSpeech<M> {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn config(&self) -> Result<serde_json::Value> {
        render_config(&self.identity, &self.params)
    }

    fn synthesize(&self, text: &str) -> Result<AudioAsset> {
        ensure_speakable(text)?;
        log::info!("Synthesizing with {}: '{}'", self.identity, shorten(text));

        let result = self
            .model
            .lock()
            .synthesize(text, &self.params)
            .map_err(NarrationError::synthesis)?;
        if result.samples.is_empty() {
            return Err(NarrationError::Synthesis(format!(
                "{} produced no audio",
                self.identity
            )));
        }

        let bytes = result.to_wav_bytes().map_err(NarrationError::synthesis)?;
        log::debug!(
            "{} produced {} samples at {}Hz",
            self.identity,
            result.samples.len(),
            result.sample_rate
        );
        AudioAsset::new(bytes, result.sample_rate, result.duration_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Debug, Clone, Serialize)]
    struct ToneParams {
        voice: String,
        samples_per_char: usize,
    }

    struct ToneModel {
        calls: usize,
    }

    impl SpeechModel for ToneModel {
        type Params = ToneParams;

        fn identity(&self) -> &str {
            "tone"
        }

        fn synthesize(
            &mut self,
            text: &str,
            params: &ToneParams,
        ) -> std::result::Result<SynthesisResult, BoxError> {
            self.calls += 1;
            if params.voice == "missing" {
                return Err("voice 'missing' not found".into());
            }
            Ok(SynthesisResult {
                samples: vec![0.25; text.chars().count() * params.samples_per_char],
                sample_rate: 100,
            })
        }
    }

    fn provider(voice: &str) -> OfflineSpeech<ToneModel> {
        OfflineSpeech::new(
            ToneModel { calls: 0 },
            ToneParams {
                voice: voice.to_string(),
                samples_per_char: 10,
            },
        )
    }

    #[test]
    fn encodes_samples_as_wav() {
        let asset = provider("a").synthesize("Hi there").unwrap();
        assert_eq!(asset.sample_rate(), 100);
        assert!((asset.duration() - 0.8).abs() < 1e-9);
        assert_eq!(&asset.bytes()[0..4], b"RIFF");

        let reader = hound::WavReader::new(Cursor::new(asset.bytes().to_vec())).unwrap();
        assert_eq!(reader.len(), 80);
    }

    #[test]
    fn empty_text_never_reaches_the_model() {
        let speech = provider("a");
        assert!(matches!(
            speech.synthesize("   "),
            Err(NarrationError::Synthesis(_))
        ));
        assert_eq!(speech.model.lock().calls, 0);
    }

    #[test]
    fn model_failure_is_a_synthesis_error() {
        let err = provider("missing").synthesize("Hello").unwrap_err();
        assert_eq!(
            err,
            NarrationError::Synthesis("voice 'missing' not found".to_string())
        );
    }

    struct GainModel;

    impl SpeechModel for GainModel {
        type Params = std::collections::HashMap<(u8, u8), f32>;

        fn identity(&self) -> &str {
            "gain"
        }

        fn synthesize(
            &mut self,
            _text: &str,
            _params: &Self::Params,
        ) -> std::result::Result<SynthesisResult, BoxError> {
            Ok(SynthesisResult {
                samples: vec![0.0; 10],
                sample_rate: 10,
            })
        }
    }

    #[test]
    fn unrenderable_params_have_no_cache_key() {
        let cache = crate::AudioCache::new();
        for (pair, gain) in [((1, 2), 1.0), ((3, 4), 2.0)] {
            let speech = OfflineSpeech::new(GainModel, [(pair, gain)].into_iter().collect());
            assert!(matches!(
                speech.config(),
                Err(NarrationError::InvalidConfig(_))
            ));
            assert!(matches!(
                cache.key_for("Hi", &speech),
                Err(NarrationError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn config_reflects_params() {
        let speech = provider("af_heart");
        assert_eq!(speech.identity(), "offline:tone");
        assert_eq!(speech.config().unwrap()["voice"], "af_heart");
    }
}
