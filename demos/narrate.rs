use std::f32::consts::PI;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use narration_rs::{
    alignment::InterpolationAligner,
    speech::{OfflineSpeech, SpeechModel, SynthesisResult},
    AudioCache, NarrationConfig, NarrationRequest, Narrator, ProviderRegistry,
};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
struct ToneParams {
    pitch_hz: f32,
    chars_per_second: f32,
}

/// Stand-in speech model: a sine tone lasting as long as the text would take
/// to read aloud.
struct ToneModel {
    sample_rate: u32,
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
    ) -> Result<SynthesisResult, narration_rs::error::BoxError> {
        let seconds = text.chars().count() as f32 / params.chars_per_second;
        let len = (seconds * self.sample_rate as f32) as usize;
        let samples = (0..len)
            .map(|i| {
                let t = i as f32 / self.sample_rate as f32;
                0.2 * (2.0 * PI * params.pitch_hz * t).sin()
            })
            .collect();
        Ok(SynthesisResult {
            samples,
            sample_rate: self.sample_rate,
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let registry = Arc::new(ProviderRegistry::new());
    registry.register_speech(
        "tone",
        OfflineSpeech::new(
            ToneModel {
                sample_rate: 24_000,
            },
            ToneParams {
                pitch_hz: 220.0,
                chars_per_second: 15.0,
            },
        ),
    );
    registry.register_alignment("rough", InterpolationAligner::new());

    let config = NarrationConfig::from_json_str(r#"{"subcaptions": {"max_len": 40}}"#)?;
    let cache = Arc::new(AudioCache::with_config(&config.cache));
    let narrator = Narrator::with_config(registry, cache, config)?;

    let request = NarrationRequest::builder()
        .text(
            "First we draw a circle. <bookmark mark='circle'/>Then, \
             a square appears next to it. <bookmark mark='square'/>Done!",
        )
        .subcaptions(true)
        .min_wait(1.0 / 30.0)
        .build()?;

    let start = Instant::now();
    let narrated = narrator.narrate(&request, |session| {
        println!("Narration lasts {:.2}s", session.duration()?);
        let circle = session.wait_until_bookmark("circle", 0.0)?;
        println!("Wait {circle:.2}s, then draw the circle");
        let square = session.wait_until_bookmark("square", 0.0)?;
        println!("Wait {square:.2}s, then draw the square");
        Ok(Arc::clone(session.audio()))
    })?;
    println!("Synthesized and aligned in {:.2?}", start.elapsed());

    let output = PathBuf::from("narration.wav");
    narrated.value.write_to(&output)?;
    println!("Saved to {}", output.display());
    println!("Wait {:.2}s for the narration to end", narrated.tail_wait);

    for caption in &narrated.subcaptions {
        println!("[{:5.2} - {:5.2}] {}", caption.start, caption.end, caption.text);
    }

    // The same text again comes straight from the cache.
    narrator.narrate(&request, |_| Ok(()))?;
    println!("Cache: {:?}", narrator.cache().stats());
    Ok(())
}
