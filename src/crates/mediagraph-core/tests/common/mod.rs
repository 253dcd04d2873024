//! Shared test doubles: a scripted generation backend, an in-memory blob
//! store, and an in-memory graph repository.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use mediagraph_core::error::{EngineError, Result};
use mediagraph_core::graph::{Edge, Graph};
use mediagraph_core::media::MediaUrls;
use mediagraph_core::node::{Node, NodeType, Position};
use mediagraph_core::traits::{
    GenerationBackend, GraphRepository, MediaStore, TextInputs, VideoImageInput,
};

/// Tracks how many calls of one kind are in flight and the highest
/// concurrency ever observed.
#[derive(Default)]
pub struct ConcurrencyGauge {
    active: AtomicUsize,
    high_water: AtomicUsize,
}

impl ConcurrencyGauge {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }
}

/// Scripted backend: every call succeeds with deterministic output unless
/// the prompt contains one of the failure markers.
#[derive(Default)]
pub struct MockBackend {
    /// Prompts containing any of these substrings fail.
    pub fail_markers: Vec<String>,
    /// Injected latency per call, to force overlap in concurrency tests.
    pub call_delay: Option<Duration>,
    pub video_gauge: ConcurrencyGauge,
    pub text_gauge: ConcurrencyGauge,
    calls: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_markers: vec![marker.to_string()],
            ..Self::default()
        }
    }

    pub fn failing_on_all(markers: &[&str]) -> Self {
        Self {
            fail_markers: markers.iter().map(|m| m.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            call_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn check(&self, prompt: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.call_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_markers.iter().any(|m| prompt.contains(m)) {
            return Err(EngineError::Backend(format!("scripted failure for: {prompt}")));
        }
        Ok(())
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    async fn generate_text(
        &self,
        prompt: &str,
        _params: &Map<String, Value>,
        _inputs: TextInputs<'_>,
    ) -> Result<String> {
        self.text_gauge.enter();
        let outcome = self.check(prompt).await;
        self.text_gauge.exit();
        outcome?;
        Ok(format!("text for [{prompt}]"))
    }

    async fn generate_image(
        &self,
        prompt: &str,
        _params: &Map<String, Value>,
        _images: &[Vec<u8>],
    ) -> Result<Vec<u8>> {
        self.check(prompt).await?;
        Ok(b"png-bytes".to_vec())
    }

    fn supports_image_input(&self) -> bool {
        true
    }

    async fn generate_video(
        &self,
        prompt: &str,
        _params: &Map<String, Value>,
        _image: VideoImageInput<'_>,
    ) -> Result<Vec<u8>> {
        self.video_gauge.enter();
        let outcome = self.check(prompt).await;
        self.video_gauge.exit();
        outcome?;
        Ok(b"mp4-bytes".to_vec())
    }

    async fn generate_speech(&self, text: &str, _params: &Map<String, Value>) -> Result<Vec<u8>> {
        self.check(text).await?;
        Ok(vec![0u8; 32])
    }

    async fn generate_music(&self, prompt: &str, _params: &Map<String, Value>) -> Result<Vec<u8>> {
        self.check(prompt).await?;
        Ok(vec![0u8; 64])
    }

    async fn analyze_image(
        &self,
        _image: &[u8],
        prompt: &str,
        _params: &Map<String, Value>,
    ) -> Result<String> {
        self.check(prompt).await?;
        Ok("a described image".to_string())
    }
}

/// In-memory blob store with the production url layout.
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    uploads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn put(&self, node_id: &str, bytes: &[u8], ext: &str) -> MediaUrls {
        let generation = self.uploads.fetch_add(1, Ordering::SeqCst);
        let url = format!("/media/{node_id}/{generation}/original.{ext}");
        self.blobs.lock().insert(url.clone(), bytes.to_vec());
        MediaUrls::single(url)
    }
}

#[async_trait]
impl MediaStore for MemoryStore {
    async fn upload_image(&self, node_id: &str, bytes: &[u8], fmt: &str) -> Result<MediaUrls> {
        Ok(self.put(node_id, bytes, fmt))
    }

    async fn upload_text(&self, _node_id: &str, text: &str) -> Result<MediaUrls> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(MediaUrls::single(text))
    }

    async fn upload_video(&self, node_id: &str, bytes: &[u8], fmt: &str) -> Result<MediaUrls> {
        Ok(self.put(node_id, bytes, fmt))
    }

    async fn upload_audio(&self, node_id: &str, bytes: &[u8], fmt: &str) -> Result<MediaUrls> {
        Ok(self.put(node_id, bytes, fmt))
    }

    async fn read_media_bytes(&self, url: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().get(url).cloned())
    }

    async fn delete_node_media(&self, node_id: &str) -> Result<()> {
        let prefix = format!("/media/{node_id}/");
        self.blobs.lock().retain(|url, _| !url.starts_with(&prefix));
        Ok(())
    }

    async fn duplicate_node_media(&self, source_node_id: &str, target_node_id: &str) -> Result<()> {
        let prefix = format!("/media/{source_node_id}/");
        let mut blobs = self.blobs.lock();
        let copies: Vec<(String, Vec<u8>)> = blobs
            .iter()
            .filter(|(url, _)| url.starts_with(&prefix))
            .map(|(url, bytes)| {
                (
                    url.replacen(source_node_id, target_node_id, 1),
                    bytes.clone(),
                )
            })
            .collect();
        blobs.extend(copies);
        Ok(())
    }
}

/// In-memory graph repository that counts saves.
#[derive(Default)]
pub struct MemoryRepo {
    graphs: Mutex<HashMap<String, Graph>>,
    saves: AtomicUsize,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GraphRepository for MemoryRepo {
    async fn save(&self, graph: &Graph) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.graphs.lock().insert(graph.id.clone(), graph.clone());
        Ok(())
    }

    async fn load(&self, graph_id: &str) -> Result<Option<Graph>> {
        Ok(self.graphs.lock().get(graph_id).cloned())
    }

    async fn delete(&self, graph_id: &str) -> Result<()> {
        self.graphs.lock().remove(graph_id);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Graph>> {
        Ok(self.graphs.lock().values().cloned().collect())
    }
}

/// Add a node with a prompt that identifies it in backend calls.
pub fn add_node(graph: &mut Graph, id: &str, node_type: NodeType) {
    let mut params = Map::new();
    params.insert("prompt".to_string(), Value::String(format!("{id}-prompt")));
    // Keep tests deterministic: no enrichment round-trips.
    params.insert("enrich".to_string(), Value::Bool(false));
    graph.add_node(Node::new(id, node_type, id, params, Position::default()));
}

/// Connect `from`'s sole output port to `to`'s input port.
pub fn connect(graph: &mut Graph, from: &str, to: &str) {
    let from_port = graph
        .get_node(from)
        .and_then(|n| n.output_ports.first().map(|p| p.id.clone()))
        .expect("source node with output port");
    let to_port = graph
        .get_node(to)
        .and_then(|n| n.input_ports.first().map(|p| p.id.clone()))
        .expect("target node with input port");
    graph
        .add_edge(Edge::from_ports(from, from_port, to, to_port))
        .expect("edge is valid");
}
