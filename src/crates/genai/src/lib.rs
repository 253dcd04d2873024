//! # genai — Gemini backend for mediagraph
//!
//! Implements the engine's [`GenerationBackend`] and [`PromptEnricher`]
//! contracts against the Google Generative Language API:
//!
//! - text and vision via `generateContent` (with structured-output schemas
//!   when a node asks for JSON);
//! - image generation via Imagen prediction, or a multimodal model when a
//!   source image is attached;
//! - video via long-running Veo operations, polled every few seconds;
//! - speech via the TTS response modality (raw PCM out);
//! - music via the Lyria realtime websocket.
//!
//! [`GenerationBackend`]: mediagraph_core::traits::GenerationBackend
//! [`PromptEnricher`]: mediagraph_core::traits::PromptEnricher

pub mod config;
pub mod enrich;
pub mod gemini;
pub mod music;

pub use config::GeminiConfig;
pub use enrich::HybridEnricher;
pub use gemini::GeminiClient;
