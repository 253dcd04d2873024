//! Per-node-type handlers: bridge resolved inputs and node params into one
//! backend call, persist the artifact, and return a [`MediaResult`].
//!
//! Every generating handler shares the same pre-step: compose the effective
//! prompt from the graph's canvas memory, the joined upstream texts, and the
//! node's own prompt, then optionally run the enrichment pass
//! (`params.enrich`, default true). Enrichment is a decorator around the
//! handler, not a node type of its own — it runs inside the owning node's
//! semaphore slot, so the per-type rate-limit math stays honest.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::audio::pcm_to_wav;
use crate::error::{EngineError, Result};
use crate::media::{MediaResult, MediaType, MediaUrls};
use crate::node::{Node, NodeType};
use crate::resolver::ResolvedInputs;
use crate::traits::{GenerationBackend, MediaStore, PromptEnricher, TextInputs, VideoImageInput};

/// A handler executes one node type against the backend.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn execute(
        &self,
        node: &Node,
        inputs: &ResolvedInputs,
        canvas_memory: &str,
    ) -> Result<MediaResult>;
}

/// Shared collaborators for all handlers.
#[derive(Clone)]
struct HandlerCtx {
    backend: Arc<dyn GenerationBackend>,
    store: Arc<dyn MediaStore>,
    enricher: Arc<dyn PromptEnricher>,
}

/// Concatenate canvas memory (as a "Context:" prefix), upstream texts, and
/// the node's own prompt, skipping empty parts.
fn compose_prompt(canvas_memory: &str, upstream_texts: &str, node_prompt: &str) -> String {
    let context = if canvas_memory.is_empty() {
        String::new()
    } else {
        format!("Context: {canvas_memory}")
    };
    [context.as_str(), upstream_texts, node_prompt]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n")
}

impl HandlerCtx {
    /// Run the enrichment pass when the node asks for it. Returns the
    /// prompt to send and, when enrichment rewrote it, the original text.
    async fn effective_prompt(
        &self,
        node: &Node,
        composed: String,
    ) -> Result<(String, Option<String>)> {
        if !node.params().enrich() || composed.is_empty() {
            return Ok((composed, None));
        }
        let enriched = self.enricher.enrich(&composed, node.node_type).await?;
        if enriched == composed {
            Ok((composed, None))
        } else {
            Ok((enriched, Some(composed)))
        }
    }

    fn result(
        &self,
        node: &Node,
        media_type: MediaType,
        urls: MediaUrls,
        prompt: String,
        original: Option<String>,
    ) -> MediaResult {
        let mut result = MediaResult::new(media_type, urls, prompt, node.params.clone());
        if let Some(original) = original {
            result = result.with_original_prompt(original);
        }
        result
    }
}

struct TextHandler(HandlerCtx);

#[async_trait]
impl NodeHandler for TextHandler {
    async fn execute(
        &self,
        node: &Node,
        inputs: &ResolvedInputs,
        canvas_memory: &str,
    ) -> Result<MediaResult> {
        let ctx = &self.0;
        let composed = compose_prompt(canvas_memory, &inputs.joined_texts(), node.params().prompt());
        let (prompt, original) = ctx.effective_prompt(node, composed).await?;
        let text = ctx
            .backend
            .generate_text(
                &prompt,
                &node.params,
                TextInputs {
                    images: &inputs.images,
                    audios: &inputs.audios,
                    videos: &inputs.videos,
                },
            )
            .await?;
        let urls = ctx.store.upload_text(&node.id, &text).await?;
        Ok(ctx.result(node, MediaType::Text, urls, prompt, original))
    }
}

struct ImageHandler(HandlerCtx);

#[async_trait]
impl NodeHandler for ImageHandler {
    async fn execute(
        &self,
        node: &Node,
        inputs: &ResolvedInputs,
        canvas_memory: &str,
    ) -> Result<MediaResult> {
        let ctx = &self.0;
        let composed = compose_prompt(canvas_memory, &inputs.joined_texts(), node.params().prompt());
        let (prompt, original) = ctx.effective_prompt(node, composed).await?;
        let bytes = ctx
            .backend
            .generate_image(&prompt, &node.params, &inputs.images)
            .await?;
        let urls = ctx.store.upload_image(&node.id, &bytes, "png").await?;
        Ok(ctx.result(node, MediaType::Image, urls, prompt, original))
    }
}

struct VideoHandler(HandlerCtx);

#[async_trait]
impl NodeHandler for VideoHandler {
    async fn execute(
        &self,
        node: &Node,
        inputs: &ResolvedInputs,
        canvas_memory: &str,
    ) -> Result<MediaResult> {
        let ctx = &self.0;
        let composed = compose_prompt(canvas_memory, &inputs.joined_texts(), node.params().prompt());
        let (prompt, original) = ctx.effective_prompt(node, composed).await?;

        let image_input = if node.params().reference_mode() && !inputs.images.is_empty() {
            let count = inputs.images.len().min(3);
            VideoImageInput::References(&inputs.images[..count])
        } else if let Some(first) = inputs.images.first() {
            VideoImageInput::FirstFrame(first)
        } else {
            VideoImageInput::None
        };

        let bytes = ctx
            .backend
            .generate_video(&prompt, &node.params, image_input)
            .await?;
        let urls = ctx.store.upload_video(&node.id, &bytes, "mp4").await?;
        Ok(ctx.result(node, MediaType::Video, urls, prompt, original))
    }
}

struct SpeechHandler(HandlerCtx);

#[async_trait]
impl NodeHandler for SpeechHandler {
    async fn execute(
        &self,
        node: &Node,
        inputs: &ResolvedInputs,
        canvas_memory: &str,
    ) -> Result<MediaResult> {
        let ctx = &self.0;
        let composed = compose_prompt(canvas_memory, &inputs.joined_texts(), node.params().prompt());
        let (text, original) = ctx.effective_prompt(node, composed).await?;
        let pcm = ctx.backend.generate_speech(&text, &node.params).await?;
        let wav = pcm_to_wav(&pcm, 24_000, 1, 2);
        let urls = ctx.store.upload_audio(&node.id, &wav, "wav").await?;
        Ok(ctx.result(node, MediaType::Audio, urls, text, original))
    }
}

struct MusicHandler(HandlerCtx);

#[async_trait]
impl NodeHandler for MusicHandler {
    async fn execute(
        &self,
        node: &Node,
        inputs: &ResolvedInputs,
        canvas_memory: &str,
    ) -> Result<MediaResult> {
        let ctx = &self.0;
        let composed = compose_prompt(canvas_memory, &inputs.joined_texts(), node.params().prompt());
        let (prompt, original) = ctx.effective_prompt(node, composed).await?;
        let pcm = ctx.backend.generate_music(&prompt, &node.params).await?;
        let wav = pcm_to_wav(&pcm, 48_000, 2, 2);
        let urls = ctx.store.upload_audio(&node.id, &wav, "wav").await?;
        Ok(ctx.result(node, MediaType::Audio, urls, prompt, original))
    }
}

struct AnalyzeImageHandler(HandlerCtx);

#[async_trait]
impl NodeHandler for AnalyzeImageHandler {
    async fn execute(
        &self,
        node: &Node,
        inputs: &ResolvedInputs,
        canvas_memory: &str,
    ) -> Result<MediaResult> {
        let ctx = &self.0;
        let image = inputs
            .images
            .first()
            .ok_or_else(|| EngineError::invariant("analyze_image requires an image input"))?;

        let base_prompt = match node.params().prompt() {
            "" => "Describe this image in detail.",
            prompt => prompt,
        };
        let prompt = compose_prompt(canvas_memory, "", base_prompt);

        let text = ctx.backend.analyze_image(image, &prompt, &node.params).await?;
        let urls = ctx.store.upload_text(&node.id, &text).await?;
        Ok(ctx.result(node, MediaType::Text, urls, prompt, None))
    }
}

struct TransformImageHandler(HandlerCtx);

#[async_trait]
impl NodeHandler for TransformImageHandler {
    async fn execute(
        &self,
        node: &Node,
        inputs: &ResolvedInputs,
        canvas_memory: &str,
    ) -> Result<MediaResult> {
        let ctx = &self.0;
        let image = inputs
            .images
            .first()
            .ok_or_else(|| EngineError::invariant("transform_image requires an image input"))?;

        let (prompt, original, bytes) = if ctx.backend.supports_image_input() {
            // Image-capable model: one multimodal call with prompt + source.
            let composed = compose_prompt(canvas_memory, "", node.params().prompt());
            let (prompt, original) = ctx.effective_prompt(node, composed).await?;
            let bytes = ctx
                .backend
                .generate_image(&prompt, &node.params, std::slice::from_ref(image))
                .await?;
            (prompt, original, bytes)
        } else {
            // Describe-then-generate fallback for image-only models.
            let description = ctx
                .backend
                .analyze_image(image, "Describe this image concisely.", &node.params)
                .await?;
            let combined = match node.params().prompt() {
                "" => description,
                prompt => format!("{description}. {prompt}"),
            };
            let composed = compose_prompt(canvas_memory, "", &combined);
            let (prompt, original) = ctx.effective_prompt(node, composed).await?;
            let bytes = ctx.backend.generate_image(&prompt, &node.params, &[]).await?;
            (prompt, original, bytes)
        };

        let urls = ctx.store.upload_image(&node.id, &bytes, "png").await?;
        Ok(ctx.result(node, MediaType::Image, urls, prompt, original))
    }
}

/// Dispatches node execution to the registered handler for its type.
pub struct NodeDispatcher {
    handlers: HashMap<NodeType, Box<dyn NodeHandler>>,
}

impl NodeDispatcher {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        store: Arc<dyn MediaStore>,
        enricher: Arc<dyn PromptEnricher>,
    ) -> Self {
        let ctx = HandlerCtx {
            backend,
            store,
            enricher,
        };
        let mut handlers: HashMap<NodeType, Box<dyn NodeHandler>> = HashMap::new();
        handlers.insert(NodeType::GenerateText, Box::new(TextHandler(ctx.clone())));
        handlers.insert(NodeType::GenerateImage, Box::new(ImageHandler(ctx.clone())));
        handlers.insert(NodeType::GenerateVideo, Box::new(VideoHandler(ctx.clone())));
        handlers.insert(NodeType::GenerateSpeech, Box::new(SpeechHandler(ctx.clone())));
        handlers.insert(NodeType::GenerateMusic, Box::new(MusicHandler(ctx.clone())));
        handlers.insert(NodeType::AnalyzeImage, Box::new(AnalyzeImageHandler(ctx.clone())));
        handlers.insert(NodeType::TransformImage, Box::new(TransformImageHandler(ctx)));
        Self { handlers }
    }

    /// Execute one node. Any error is reported by the caller as a node
    /// failure; it never aborts the surrounding run.
    pub async fn execute(
        &self,
        node: &Node,
        inputs: &ResolvedInputs,
        canvas_memory: &str,
    ) -> Result<MediaResult> {
        let handler = self.handlers.get(&node.node_type).ok_or_else(|| {
            EngineError::invariant(format!("no handler for node type {}", node.node_type.as_str()))
        })?;
        handler.execute(node, inputs, canvas_memory).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_joins_non_empty_parts() {
        assert_eq!(
            compose_prompt("brand voice", "upstream", "prompt"),
            "Context: brand voice\nupstream\nprompt"
        );
    }

    #[test]
    fn compose_skips_empty_parts() {
        assert_eq!(compose_prompt("", "", "just a prompt"), "just a prompt");
        assert_eq!(compose_prompt("ctx", "", ""), "Context: ctx");
        assert_eq!(compose_prompt("", "", ""), "");
    }
}
