//! Narration sessions.
//!
//! A [`Narrator`] turns a [`NarrationRequest`] into a [`NarrationSession`]:
//! it parses the markers, fetches the audio from the cache (synthesizing on a
//! miss) and resolves the alignment providers. Alignment itself runs lazily on
//! the first query that needs it, so narrations without bookmarks or
//! subcaptions never call an aligner.
//!
//! Sessions move through `Open -> AudioReady -> Aligned -> Closed`. Once closed,
//! every query fails with [`NarrationError::SessionClosed`].

use std::fmt;
use std::sync::Arc;

use derive_builder::Builder;

use crate::alignment::{AlignmentMap, AlignmentProvider};
use crate::cache::{AudioCache, CacheKey};
use crate::config::NarrationConfig;
use crate::error::{NarrationError, Result};
use crate::markers::{strip_tags, MarkerParser, ParsedNarration};
use crate::registry::ProviderRegistry;
use crate::speech::shorten;
use crate::subcaptions::{build_subcaptions, Subcaption, SubcaptionOptions};
use crate::AudioAsset;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Markers parsed, audio not yet available.
    Open,
    /// Audio available, bookmark alignment not computed yet.
    AudioReady,
    /// Bookmark times known (or not needed).
    Aligned,
    Closed,
}

/// What to narrate and with which providers.
///
/// Provider names left unset resolve to the first provider registered for
/// that kind.
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(build_fn(error = "NarrationError"))]
pub struct NarrationRequest {
    /// Narration text, possibly containing bookmark tags.
    #[builder(setter(into))]
    pub text: String,
    #[builder(default, setter(into, strip_option))]
    pub speech: Option<String>,
    /// Aligner for bookmark queries.
    #[builder(default, setter(into, strip_option))]
    pub alignment: Option<String>,
    /// Aligner for subcaptions; falls back to `alignment`.
    #[builder(default, setter(into, strip_option))]
    pub subcaption_alignment: Option<String>,
    /// Generate subcaptions for this narration.
    #[builder(default)]
    pub subcaptions: bool,
    /// Overrides the narrator's configured subcaption options.
    #[builder(default, setter(strip_option))]
    pub subcaption_options: Option<SubcaptionOptions>,
    /// Caption text to show instead of the spoken text. Defaults to the
    /// spoken text with every tag removed.
    #[builder(default, setter(into, strip_option))]
    pub subcaption_text: Option<String>,
    /// Lower bound in seconds for every wait the session hands out.
    #[builder(default)]
    pub min_wait: f64,
}

impl NarrationRequest {
    pub fn builder() -> NarrationRequestBuilder {
        NarrationRequestBuilder::default()
    }
}

struct SubcaptionPlan {
    text: String,
    options: SubcaptionOptions,
    aligner: Arc<dyn AlignmentProvider>,
    built: Option<Vec<Subcaption>>,
}

/// One narration block: the audio, its bookmark timings and the playback
/// cursor.
pub struct NarrationSession {
    parsed: ParsedNarration,
    audio: Arc<AudioAsset>,
    cache_key: CacheKey,
    bookmark_aligner: Option<Arc<dyn AlignmentProvider>>,
    alignment: Option<AlignmentMap>,
    subcaptions: Option<SubcaptionPlan>,
    cursor: f64,
    last_bookmark: Option<String>,
    min_wait: f64,
    state: SessionState,
}

impl fmt::Debug for NarrationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NarrationSession")
            .field("text", &shorten(self.parsed.clean_text()))
            .field("cache_key", &self.cache_key)
            .field("duration", &self.audio.duration())
            .field("cursor", &self.cursor)
            .field("state", &self.state)
            .finish()
    }
}

impl NarrationSession {
    fn transition(&mut self, to: SessionState) {
        log::debug!("Narration {}: {:?} -> {:?}", self.cache_key, self.state, to);
        self.state = to;
    }

    /// Floor every wait handed out by this session at `seconds`, e.g. one
    /// frame of the host's timeline.
    pub fn with_min_wait(mut self, seconds: f64) -> Self {
        self.min_wait = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub fn parsed(&self) -> &ParsedNarration {
        &self.parsed
    }

    /// Shared handle on the cached audio.
    pub fn audio(&self) -> &Arc<AudioAsset> {
        &self.audio
    }

    pub fn cache_key(&self) -> &CacheKey {
        &self.cache_key
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(NarrationError::SessionClosed);
        }
        Ok(())
    }

    fn ensure_aligned(&mut self) -> Result<()> {
        if self.state == SessionState::Aligned {
            return Ok(());
        }
        if let Some(aligner) = self.bookmark_aligner.clone() {
            log::info!(
                "Aligning {} bookmark(s) with {}",
                self.parsed.markers().len(),
                aligner.identity()
            );
            let map = aligner.align(
                self.parsed.clean_text(),
                &self.audio,
                &self.parsed.offsets(),
            )?;
            self.alignment = Some(map);
        }
        self.transition(SessionState::Aligned);
        Ok(())
    }

    /// Total length of the narration in seconds.
    pub fn duration(&self) -> Result<f64> {
        self.ensure_open()?;
        Ok(self.audio.duration())
    }

    /// Time from the start of the narration to bookmark `name`.
    pub fn duration_until_bookmark(&mut self, name: &str) -> Result<f64> {
        self.ensure_open()?;
        let offset = self
            .parsed
            .offset_of(name)
            .ok_or_else(|| NarrationError::UnknownBookmark(name.to_string()))?;
        self.ensure_aligned()?;
        self.alignment
            .as_ref()
            .and_then(|map| map.time_at(offset))
            .ok_or(NarrationError::IncompleteAlignment { offset })
    }

    /// Narration time not consumed yet, never negative.
    pub fn remaining_duration(&self) -> Result<f64> {
        self.ensure_open()?;
        Ok((self.audio.duration() - self.cursor).max(0.0))
    }

    /// How long the caller should wait so that its next action lands
    /// `offset` seconds after bookmark `name`. Moves the cursor to that time.
    ///
    /// Bookmarks may be consumed in any order; the cursor always holds the
    /// last consumed time, and the returned wait is never negative. When the
    /// minimum wait lengthens a wait, the cursor moves by the returned wait
    /// instead, so the waits of a session add up to its duration.
    pub fn wait_until_bookmark(&mut self, name: &str, offset: f64) -> Result<f64> {
        let target = self.duration_until_bookmark(name)? + offset;
        let wait = target - self.cursor;
        if wait < 0.0 {
            log::warn!(
                "Bookmark '{name}' at {target:.3}s is before the cursor at {:.3}s; not waiting",
                self.cursor
            );
        }
        let natural = wait.max(0.0);
        let returned = natural.max(self.min_wait);
        let next = if returned > natural {
            self.cursor + returned
        } else {
            target.max(0.0)
        };
        log::debug!("Cursor {:.3}s -> {next:.3}s ('{name}')", self.cursor);
        self.cursor = next;
        self.last_bookmark = Some(name.to_string());
        Ok(returned)
    }

    /// Record `elapsed` seconds of playback that did not go through
    /// [`wait_until_bookmark`](Self::wait_until_bookmark). Returns the new cursor.
    pub fn advance(&mut self, elapsed: f64) -> Result<f64> {
        self.ensure_open()?;
        if !elapsed.is_finite() || elapsed < 0.0 {
            return Err(NarrationError::InvalidConfig(format!(
                "elapsed time must be a non-negative number of seconds, got {elapsed}"
            )));
        }
        self.cursor += elapsed;
        log::debug!("Cursor advanced by {elapsed:.3}s to {:.3}s", self.cursor);
        Ok(self.cursor)
    }

    /// Time consumed so far, in seconds.
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn last_bookmark(&self) -> Option<&str> {
        self.last_bookmark.as_deref()
    }

    /// Timed captions for this narration; empty unless the request asked for
    /// subcaptions. Computed once per session.
    pub fn subcaptions(&mut self) -> Result<&[Subcaption]> {
        self.ensure_open()?;
        let audio = Arc::clone(&self.audio);
        let Some(plan) = self.subcaptions.as_mut() else {
            return Ok(&[]);
        };
        if plan.built.is_none() {
            let captions = build_subcaptions(&plan.text, &audio, plan.aligner.as_ref(), &plan.options)?;
            plan.built = Some(captions);
        }
        Ok(plan.built.as_deref().unwrap_or_default())
    }

    /// Close the session and return the wait that lets the rest of the
    /// narration play out.
    pub fn finish(&mut self) -> Result<f64> {
        let remaining = self.remaining_duration()?;
        self.close();
        Ok(remaining.max(self.min_wait))
    }

    pub fn close(&mut self) {
        if !self.is_closed() {
            self.transition(SessionState::Closed);
        }
    }
}

impl Drop for NarrationSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Result of [`Narrator::narrate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Narrated<T> {
    /// What the block returned.
    pub value: T,
    /// Narration time left when the block ended.
    pub tail_wait: f64,
    pub subcaptions: Vec<Subcaption>,
}

/// Opens narration sessions against a shared registry and cache.
pub struct Narrator {
    registry: Arc<ProviderRegistry>,
    cache: Arc<AudioCache>,
    parser: MarkerParser,
    config: NarrationConfig,
}

impl Narrator {
    pub fn new(registry: Arc<ProviderRegistry>, cache: Arc<AudioCache>) -> Self {
        Self {
            registry,
            cache,
            parser: MarkerParser::default(),
            config: NarrationConfig::default(),
        }
    }

    pub fn with_config(
        registry: Arc<ProviderRegistry>,
        cache: Arc<AudioCache>,
        config: NarrationConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            cache,
            parser: config.marker_parser(),
            config,
        })
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<AudioCache> {
        &self.cache
    }

    pub fn config(&self) -> &NarrationConfig {
        &self.config
    }

    /// Parse, synthesize (or reuse) the audio and resolve the aligners.
    ///
    /// Parse, provider and synthesis failures are returned here and no
    /// session is created.
    pub fn open(&self, request: &NarrationRequest) -> Result<NarrationSession> {
        let parsed = self.parser.parse(&request.text)?;
        let speech = self.registry.resolve_speech(request.speech.as_deref())?;
        let cache_key = self.cache.key_for(parsed.clean_text(), speech.as_ref())?;
        log::debug!("Opening narration {cache_key}: {}", shorten(parsed.clean_text()));

        let audio = self
            .cache
            .get_or_synthesize(&cache_key, || speech.synthesize(parsed.clean_text()))?;

        let mut session = NarrationSession {
            parsed,
            audio,
            cache_key,
            bookmark_aligner: None,
            alignment: None,
            subcaptions: None,
            cursor: 0.0,
            last_bookmark: None,
            min_wait: 0.0,
            state: SessionState::Open,
        }
        .with_min_wait(request.min_wait);
        session.transition(SessionState::AudioReady);

        // Named aligners must exist even when nothing ends up aligned.
        let named = request
            .alignment
            .as_deref()
            .map(|name| self.registry.resolve_alignment(Some(name)))
            .transpose()?;
        if let Some(name) = request.subcaption_alignment.as_deref() {
            self.registry.resolve_alignment(Some(name))?;
        }
        if session.parsed.has_markers() {
            session.bookmark_aligner = match named {
                Some(aligner) => Some(aligner),
                None => Some(self.registry.resolve_alignment(None)?),
            };
        }
        if request.subcaptions {
            let options = request
                .subcaption_options
                .clone()
                .unwrap_or_else(|| self.config.subcaptions.clone());
            options.validate()?;
            let name = request
                .subcaption_alignment
                .as_deref()
                .or(request.alignment.as_deref());
            session.subcaptions = Some(SubcaptionPlan {
                text: request
                    .subcaption_text
                    .clone()
                    .unwrap_or_else(|| strip_tags(session.parsed.clean_text())),
                options,
                aligner: self.registry.resolve_alignment(name)?,
                built: None,
            });
        }
        if session.bookmark_aligner.is_none() {
            session.transition(SessionState::Aligned);
        }
        Ok(session)
    }

    /// Run `block` inside a narration session.
    ///
    /// The session is closed on every exit path. On success the block's value
    /// is returned with the tail wait and the subcaptions, if requested.
    pub fn narrate<T, F>(&self, request: &NarrationRequest, block: F) -> Result<Narrated<T>>
    where
        F: FnOnce(&mut NarrationSession) -> Result<T>,
    {
        let mut session = self.open(request)?;
        let value = match block(&mut session) {
            Ok(value) => value,
            Err(err) => {
                session.close();
                return Err(err);
            }
        };
        let subcaptions = session.subcaptions()?.to_vec();
        let tail_wait = session.finish()?;
        Ok(Narrated {
            value,
            tail_wait,
            subcaptions,
        })
    }
}
