//! Gemini client configuration: API key, endpoints, and model names.

use std::time::Duration;

/// Configuration for [`GeminiClient`](crate::GeminiClient).
///
/// Model names default to the current production set and can be overridden
/// per deployment.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    /// REST base, `https://generativelanguage.googleapis.com/v1beta`.
    pub base_url: String,
    /// Websocket host for realtime music.
    pub ws_host: String,
    pub text_model: String,
    pub vision_model: String,
    /// Imagen-style model used for text-to-image `:predict` calls.
    pub image_model: String,
    /// Multimodal image model that accepts source images; when set,
    /// image transformation happens in a single call.
    pub image_edit_model: Option<String>,
    pub video_model: String,
    pub tts_model: String,
    pub music_model: String,
    /// Delay between long-running-operation polls (video).
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            ws_host: "generativelanguage.googleapis.com".to_string(),
            text_model: "gemini-2.5-flash".to_string(),
            vision_model: "gemini-2.5-flash".to_string(),
            image_model: "imagen-3.0-generate-002".to_string(),
            image_edit_model: Some("gemini-2.5-flash-image".to_string()),
            video_model: "veo-3.1-generate-preview".to_string(),
            tts_model: "gemini-2.5-flash-preview-tts".to_string(),
            music_model: "models/lyria-realtime-exp".to_string(),
            poll_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(120),
        }
    }
}
