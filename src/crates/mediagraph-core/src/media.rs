//! Media result types: the output of one node execution.
//!
//! A [`MediaResult`] records what a node produced — the urls under which the
//! blob store serves the artifact, the exact prompt that was sent to the
//! backend, and a snapshot of the generation parameters. The producing node
//! owns its result; the blob store owns the underlying bytes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// The kind of media a node produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Video,
    Audio,
    Text,
}

impl MediaType {
    /// Wire/persistence string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Text => "text",
        }
    }
}

/// Where the blob store serves an artifact from.
///
/// For text results the content itself is inlined into both fields so
/// clients never need a second fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaUrls {
    pub original: String,
    pub thumbnail: String,
}

impl MediaUrls {
    pub fn new(original: impl Into<String>, thumbnail: impl Into<String>) -> Self {
        Self {
            original: original.into(),
            thumbnail: thumbnail.into(),
        }
    }

    /// Urls where original and thumbnail are the same artifact.
    pub fn single(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            original: url.clone(),
            thumbnail: url,
        }
    }
}

/// Optional dimensions/duration/format facts about an artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// The output of one node execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaResult {
    /// Stable result id.
    pub id: String,
    /// Unix timestamp (seconds) of production.
    pub timestamp: i64,
    pub media_type: MediaType,
    pub urls: MediaUrls,
    /// The exact prompt sent to the backend.
    pub prompt: String,
    /// The composed prompt before enrichment rewrote it, when enrichment ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_prompt: Option<String>,
    #[serde(default)]
    pub metadata: MediaMetadata,
    /// Snapshot of the node params at generation time.
    #[serde(default)]
    pub generation_params: Map<String, Value>,
}

impl MediaResult {
    /// Build a result stamped with a fresh id and the current time.
    pub fn new(
        media_type: MediaType,
        urls: MediaUrls,
        prompt: impl Into<String>,
        generation_params: Map<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            media_type,
            urls,
            prompt: prompt.into(),
            original_prompt: None,
            metadata: MediaMetadata::default(),
            generation_params,
        }
    }

    /// Record the pre-enrichment prompt.
    pub fn with_original_prompt(mut self, original: impl Into<String>) -> Self {
        self.original_prompt = Some(original.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_serializes_to_snake_case() {
        assert_eq!(serde_json::to_string(&MediaType::Image).unwrap(), "\"image\"");
        assert_eq!(MediaType::Audio.as_str(), "audio");
    }

    #[test]
    fn result_round_trips_through_json() {
        let result = MediaResult::new(
            MediaType::Text,
            MediaUrls::single("hello world"),
            "say hello",
            Map::new(),
        );
        let json = serde_json::to_string(&result).unwrap();
        let back: MediaResult = serde_json::from_str(&json).unwrap();
        assert_eq!(result, back);
    }
}
