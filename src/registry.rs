//! Named speech and alignment providers.
//!
//! Each kind has its own table. Lookups without a name return the first
//! provider registered for that kind. Registering under an existing name
//! replaces the provider in place (keeping its position) for later lookups;
//! sessions that already resolved it keep their reference.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::alignment::{AlignmentProvider, InterpolationAligner};
use crate::error::{NarrationError, ProviderKind, Result};
use crate::SpeechProvider;

struct ProviderTable<P: ?Sized> {
    kind: ProviderKind,
    entries: RwLock<Vec<(String, Arc<P>)>>,
}

impl<P: ?Sized> ProviderTable<P> {
    fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            entries: RwLock::new(Vec::new()),
        }
    }

    fn register(&self, name: String, provider: Arc<P>) -> Option<Arc<P>> {
        let mut entries = self.entries.write();
        if let Some(slot) = entries.iter_mut().find(|(n, _)| *n == name) {
            log::debug!("Replacing {} provider '{name}'", self.kind);
            return Some(std::mem::replace(&mut slot.1, provider));
        }
        log::debug!("Registered {} provider '{name}'", self.kind);
        entries.push((name, provider));
        None
    }

    fn resolve(&self, name: Option<&str>) -> Result<Arc<P>> {
        let entries = self.entries.read();
        let found = match name {
            Some(name) => entries.iter().find(|(n, _)| n == name),
            None => entries.first(),
        };
        found
            .map(|(_, provider)| Arc::clone(provider))
            .ok_or_else(|| NarrationError::UnknownProvider {
                kind: self.kind,
                name: name.unwrap_or("<default>").to_string(),
            })
    }

    fn names(&self) -> Vec<String> {
        self.entries.read().iter().map(|(n, _)| n.clone()).collect()
    }
}

/// Provider lookup shared by every narration of a scene.
pub struct ProviderRegistry {
    speech: ProviderTable<dyn SpeechProvider>,
    alignment: ProviderTable<dyn AlignmentProvider>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Registry with no providers at all.
    pub fn new() -> Self {
        Self {
            speech: ProviderTable::new(ProviderKind::Speech),
            alignment: ProviderTable::new(ProviderKind::Alignment),
        }
    }

    /// Registry whose alignment table starts with an [`InterpolationAligner`]
    /// named `"default"`.
    pub fn with_default_alignment() -> Self {
        let registry = Self::new();
        registry.register_alignment("default", InterpolationAligner::new());
        registry
    }

    /// Register a speech provider, returning the one it replaced.
    pub fn register_speech<P>(
        &self,
        name: impl Into<String>,
        provider: P,
    ) -> Option<Arc<dyn SpeechProvider>>
    where
        P: SpeechProvider + 'static,
    {
        self.speech.register(name.into(), Arc::new(provider))
    }

    pub fn register_speech_shared(
        &self,
        name: impl Into<String>,
        provider: Arc<dyn SpeechProvider>,
    ) -> Option<Arc<dyn SpeechProvider>> {
        self.speech.register(name.into(), provider)
    }

    /// Register an alignment provider, returning the one it replaced.
    pub fn register_alignment<P>(
        &self,
        name: impl Into<String>,
        provider: P,
    ) -> Option<Arc<dyn AlignmentProvider>>
    where
        P: AlignmentProvider + 'static,
    {
        self.alignment.register(name.into(), Arc::new(provider))
    }

    pub fn register_alignment_shared(
        &self,
        name: impl Into<String>,
        provider: Arc<dyn AlignmentProvider>,
    ) -> Option<Arc<dyn AlignmentProvider>> {
        self.alignment.register(name.into(), provider)
    }

    /// Speech provider by name, or the first registered one.
    pub fn resolve_speech(&self, name: Option<&str>) -> Result<Arc<dyn SpeechProvider>> {
        self.speech.resolve(name)
    }

    /// Alignment provider by name, or the first registered one.
    pub fn resolve_alignment(&self, name: Option<&str>) -> Result<Arc<dyn AlignmentProvider>> {
        self.alignment.resolve(name)
    }

    /// Speech provider names in registration order.
    pub fn speech_names(&self) -> Vec<String> {
        self.speech.names()
    }

    /// Alignment provider names in registration order.
    pub fn alignment_names(&self) -> Vec<String> {
        self.alignment.names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::ManualAligner;
    use crate::AudioAsset;

    struct Named(&'static str);

    impl SpeechProvider for Named {
        fn identity(&self) -> &str {
            self.0
        }

        fn synthesize(&self, _text: &str) -> Result<AudioAsset> {
            AudioAsset::new(vec![], 8_000, 1.0)
        }
    }

    #[test]
    fn default_is_first_registered() {
        let registry = ProviderRegistry::new();
        registry.register_speech("en", Named("english"));
        registry.register_speech("fr", Named("french"));
        assert_eq!(registry.resolve_speech(None).unwrap().identity(), "english");
        assert_eq!(
            registry.resolve_speech(Some("fr")).unwrap().identity(),
            "french"
        );
        assert_eq!(registry.speech_names(), vec!["en", "fr"]);
    }

    #[test]
    fn unknown_names_fail() {
        let registry = ProviderRegistry::new();
        registry.register_speech("en", Named("english"));
        assert_eq!(
            registry.resolve_speech(Some("de")).err(),
            Some(NarrationError::UnknownProvider {
                kind: ProviderKind::Speech,
                name: "de".to_string()
            })
        );
        assert!(matches!(
            registry.resolve_alignment(None),
            Err(NarrationError::UnknownProvider {
                kind: ProviderKind::Alignment,
                ..
            })
        ));
    }

    #[test]
    fn replacing_keeps_position_and_old_references() {
        let registry = ProviderRegistry::new();
        registry.register_speech("en", Named("v1"));
        registry.register_speech("fr", Named("french"));
        let held = registry.resolve_speech(Some("en")).unwrap();

        let replaced = registry.register_speech("en", Named("v2"));
        assert_eq!(replaced.map(|p| p.identity().to_string()), Some("v1".into()));
        assert_eq!(held.identity(), "v1");
        assert_eq!(registry.resolve_speech(None).unwrap().identity(), "v2");
        assert_eq!(registry.speech_names(), vec!["en", "fr"]);
    }

    #[test]
    fn kinds_are_independent() {
        let registry = ProviderRegistry::with_default_alignment();
        registry.register_alignment("manual", ManualAligner::zeroed());
        assert_eq!(
            registry.resolve_alignment(None).unwrap().identity(),
            "interpolation"
        );
        assert!(registry.resolve_speech(None).is_err());
        assert_eq!(registry.alignment_names(), vec!["default", "manual"]);
    }
}
