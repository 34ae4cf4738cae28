use std::fmt;

/// Which provider table a lookup went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Speech,
    Alignment,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Speech => f.write_str("speech"),
            ProviderKind::Alignment => f.write_str("alignment"),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum NarrationError {
    #[error("Malformed marker at byte {position}: {reason}")]
    MalformedMarker { position: usize, reason: String },
    #[error("Marker '{0}' is declared more than once. Each bookmark needs a unique name.")]
    DuplicateMarker(String),
    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),
    #[error("Alignment provider failed: {0}")]
    AlignmentProvider(String),
    #[error("No alignment for character offset {offset} and no fallback configured")]
    IncompleteAlignment { offset: usize },
    #[error("Bookmark '{0}' is not declared in the narration text")]
    UnknownBookmark(String),
    #[error("'{name}' is not a registered {kind} provider")]
    UnknownProvider { kind: ProviderKind, name: String },
    #[error("Narration session is closed")]
    SessionClosed,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl NarrationError {
    /// True for the errors raised while parsing markers.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            NarrationError::MalformedMarker { .. } | NarrationError::DuplicateMarker(_)
        )
    }

    pub(crate) fn synthesis(err: impl fmt::Display) -> Self {
        NarrationError::Synthesis(err.to_string())
    }
}

impl From<derive_builder::UninitializedFieldError> for NarrationError {
    fn from(err: derive_builder::UninitializedFieldError) -> Self {
        NarrationError::InvalidConfig(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NarrationError>;

/// Failure type returned by external speech, model and alignment collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_are_classified() {
        assert!(NarrationError::DuplicateMarker("a".into()).is_parse_error());
        assert!(NarrationError::MalformedMarker {
            position: 0,
            reason: "x".into()
        }
        .is_parse_error());
        assert!(!NarrationError::SessionClosed.is_parse_error());
    }

    #[test]
    fn unknown_provider_names_the_kind() {
        let err = NarrationError::UnknownProvider {
            kind: ProviderKind::Speech,
            name: "de".into(),
        };
        assert_eq!(err.to_string(), "'de' is not a registered speech provider");
    }
}
