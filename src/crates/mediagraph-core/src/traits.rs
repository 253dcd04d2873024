//! External collaborator contracts.
//!
//! The engine is written against these traits; concrete implementations
//! (the Gemini client, the local blob store, the JSON repository) live in
//! their own crates. Tests substitute scripted fakes.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::graph::Graph;
use crate::media::MediaUrls;
use crate::node::NodeType;

/// Multimodal inputs forwarded to text generation.
#[derive(Debug, Default)]
pub struct TextInputs<'a> {
    pub images: &'a [Vec<u8>],
    pub audios: &'a [Vec<u8>],
    pub videos: &'a [Vec<u8>],
}

/// How upstream images condition a video generation call.
#[derive(Debug)]
pub enum VideoImageInput<'a> {
    /// Pure text-to-video.
    None,
    /// One image seeds the first frame.
    FirstFrame(&'a [u8]),
    /// Up to three images attached as reference assets.
    References(&'a [Vec<u8>]),
}

/// Contract for the external content-generation backend.
///
/// One call = one generative model invocation, returning bytes or text.
/// Long-running operations (video) poll internally and only return once the
/// artifact is downloadable.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate text, optionally conditioned on multimodal inputs.
    /// Structured-output mode (JSON matching a schema from `params`) is
    /// selected via the params bag.
    async fn generate_text(
        &self,
        prompt: &str,
        params: &Map<String, Value>,
        inputs: TextInputs<'_>,
    ) -> Result<String>;

    /// Generate an image. Image-capable models may consume the upstream
    /// `images` as visual context; image-only models ignore them.
    async fn generate_image(
        &self,
        prompt: &str,
        params: &Map<String, Value>,
        images: &[Vec<u8>],
    ) -> Result<Vec<u8>>;

    /// Whether the configured image model accepts a source image, enabling
    /// single-call image transformation.
    fn supports_image_input(&self) -> bool;

    /// Generate a video clip. Polls the remote operation until done, then
    /// downloads the bytes.
    async fn generate_video(
        &self,
        prompt: &str,
        params: &Map<String, Value>,
        image: VideoImageInput<'_>,
    ) -> Result<Vec<u8>>;

    /// Text-to-speech. Returns raw PCM (16-bit, 24 kHz, mono).
    async fn generate_speech(&self, text: &str, params: &Map<String, Value>) -> Result<Vec<u8>>;

    /// Text-to-music. Returns raw PCM (16-bit, 48 kHz, stereo), streamed in
    /// chunks and concatenated until `params.duration` seconds elapsed.
    async fn generate_music(&self, prompt: &str, params: &Map<String, Value>) -> Result<Vec<u8>>;

    /// Vision: describe or analyze one image.
    async fn analyze_image(
        &self,
        image: &[u8],
        prompt: &str,
        params: &Map<String, Value>,
    ) -> Result<String>;
}

/// Contract for the media blob store.
///
/// Artifacts are stored per `(node, generation)`; urls follow
/// `/media/{node_id}/{generation_id}/{original|thumbnail}.{ext}`.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn upload_image(&self, node_id: &str, bytes: &[u8], fmt: &str) -> Result<MediaUrls>;

    /// Text content is inlined into the url fields to avoid a re-fetch.
    async fn upload_text(&self, node_id: &str, text: &str) -> Result<MediaUrls>;

    async fn upload_video(&self, node_id: &str, bytes: &[u8], fmt: &str) -> Result<MediaUrls>;

    async fn upload_audio(&self, node_id: &str, bytes: &[u8], fmt: &str) -> Result<MediaUrls>;

    /// Read back the original bytes for a `/media/...` url. Returns `None`
    /// when the url does not resolve to a stored artifact.
    async fn read_media_bytes(&self, url: &str) -> Result<Option<Vec<u8>>>;

    async fn delete_node_media(&self, node_id: &str) -> Result<()>;

    async fn duplicate_node_media(&self, source_node_id: &str, target_node_id: &str)
        -> Result<()>;
}

/// Contract for graph persistence.
#[async_trait]
pub trait GraphRepository: Send + Sync {
    async fn save(&self, graph: &Graph) -> Result<()>;
    async fn load(&self, graph_id: &str) -> Result<Option<Graph>>;
    async fn delete(&self, graph_id: &str) -> Result<()>;
    async fn list_all(&self) -> Result<Vec<Graph>>;
}

/// Contract for resolving a graph's canvas memory before a run.
#[async_trait]
pub trait CanvasMemory: Send + Sync {
    async fn resolve(&self, graph: &Graph) -> Result<String>;
}

/// Default canvas-memory resolver: the graph's stored string, as-is.
pub struct StaticCanvasMemory;

#[async_trait]
impl CanvasMemory for StaticCanvasMemory {
    async fn resolve(&self, graph: &Graph) -> Result<String> {
        Ok(graph.canvas_memory.clone())
    }
}

/// Contract for the prompt-enrichment pass that may rewrite a composed
/// prompt before the real generation call.
#[async_trait]
pub trait PromptEnricher: Send + Sync {
    /// Rewrite `prompt` for the given node type. Types without an
    /// enrichment profile return the prompt unchanged.
    async fn enrich(&self, prompt: &str, node_type: NodeType) -> Result<String>;
}

/// Enricher that passes prompts through untouched.
pub struct NoopEnricher;

#[async_trait]
impl PromptEnricher for NoopEnricher {
    async fn enrich(&self, prompt: &str, _node_type: NodeType) -> Result<String> {
        Ok(prompt.to_string())
    }
}
