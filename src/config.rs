//! Narration settings.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration:
//!
//! ```
//! use narration_rs::NarrationConfig;
//!
//! let config = NarrationConfig::from_json_str(r#"{"cache": {"max_entries": 64}}"#)?;
//! assert_eq!(config.cache.max_entries, Some(64));
//! assert_eq!(config.tags.bookmark, "bookmark");
//! # Ok::<(), narration_rs::NarrationError>(())
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{NarrationError, Result};
use crate::markers::{MarkerParser, DEFAULT_TAG};
use crate::subcaptions::SubcaptionOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Length of the hex fingerprint; zero or negative keeps the full digest.
    pub hash_len: i32,
    /// Upper bound on stored clips, least recently used evicted first.
    pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            hash_len: -1,
            max_entries: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagsConfig {
    /// Tag name used for bookmarks.
    pub bookmark: String,
}

impl Default for TagsConfig {
    fn default() -> Self {
        Self {
            bookmark: DEFAULT_TAG.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrationConfig {
    pub cache: CacheConfig,
    pub tags: TagsConfig,
    pub subcaptions: SubcaptionOptions,
}

impl NarrationConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| NarrationError::InvalidConfig(format!("Failed to parse JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tags.bookmark.trim().is_empty() {
            return Err(NarrationError::InvalidConfig(
                "tags.bookmark must not be empty".to_string(),
            ));
        }
        self.subcaptions.validate()
    }

    pub fn marker_parser(&self) -> MarkerParser {
        if self.tags.bookmark == DEFAULT_TAG {
            MarkerParser::default()
        } else {
            MarkerParser::new(&self.tags.bookmark)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let config = NarrationConfig::from_json_str("{}").unwrap();
        assert_eq!(config, NarrationConfig::default());
        assert_eq!(config.cache.hash_len, -1);
        assert_eq!(config.subcaptions.max_len, 70);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = NarrationConfig::from_json_str(
            r#"{"tags": {"bookmark": "mark"}, "subcaptions": {"buffer": 0.1}}"#,
        )
        .unwrap();
        assert_eq!(config.tags.bookmark, "mark");
        assert_eq!(config.subcaptions.buffer, 0.1);
        assert_eq!(config.subcaptions.split_after, ".!?,;:");
        assert_eq!(config.marker_parser().tag(), "mark");
    }

    #[test]
    fn rejects_bad_json() {
        assert!(matches!(
            NarrationConfig::from_json_str("{"),
            Err(NarrationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_empty_tag_and_zero_caption_length() {
        assert!(NarrationConfig::from_json_str(r#"{"tags": {"bookmark": " "}}"#).is_err());
        assert!(NarrationConfig::from_json_str(r#"{"subcaptions": {"max_len": 0}}"#).is_err());
    }
}
