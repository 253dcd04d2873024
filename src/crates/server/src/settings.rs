//! Deployment settings, read from flags or environment variables.

use clap::Parser;
use genai::GeminiConfig;

/// mediagraph server configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "mediagraph-server", about = "Graph execution engine for media-generation pipelines")]
pub struct Settings {
    #[arg(long, env = "GEMINI_API_KEY", default_value = "", hide_env_values = true)]
    pub gemini_api_key: String,

    /// Root directory for media blobs and persisted graphs.
    #[arg(long, env = "STORAGE_PATH", default_value = "./storage")]
    pub storage_path: String,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Rewrite prompts through the enrichment pass before generation.
    #[arg(
        long,
        env = "ENRICHMENT_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub enrichment_enabled: bool,

    // Model overrides; defaults come from the genai crate.
    #[arg(long, env = "TEXT_MODEL")]
    pub text_model: Option<String>,
    #[arg(long, env = "VISION_MODEL")]
    pub vision_model: Option<String>,
    #[arg(long, env = "IMAGE_MODEL")]
    pub image_model: Option<String>,
    #[arg(long, env = "IMAGE_EDIT_MODEL")]
    pub image_edit_model: Option<String>,
    #[arg(long, env = "VIDEO_MODEL")]
    pub video_model: Option<String>,
    #[arg(long, env = "TTS_MODEL")]
    pub tts_model: Option<String>,
    #[arg(long, env = "MUSIC_MODEL")]
    pub music_model: Option<String>,
}

impl Settings {
    /// Build the Gemini client configuration with any model overrides
    /// applied.
    pub fn gemini_config(&self) -> GeminiConfig {
        let mut config = GeminiConfig::new(&self.gemini_api_key);
        if let Some(model) = &self.text_model {
            config.text_model = model.clone();
        }
        if let Some(model) = &self.vision_model {
            config.vision_model = model.clone();
        }
        if let Some(model) = &self.image_model {
            config.image_model = model.clone();
        }
        if let Some(model) = &self.image_edit_model {
            config.image_edit_model = Some(model.clone());
        }
        if let Some(model) = &self.video_model {
            config.video_model = model.clone();
        }
        if let Some(model) = &self.tts_model {
            config.tts_model = model.clone();
        }
        if let Some(model) = &self.music_model {
            config.music_model = model.clone();
        }
        config
    }
}
