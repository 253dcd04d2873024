//! Input resolution: gather upstream outputs for a node's input ports.
//!
//! For each input port the resolver enumerates every edge targeting it,
//! looks up the source node's result among the run's completed results, and
//! buckets the materialized data by kind. Binary media is fetched from the
//! blob store via the result's canonical url; text results carry their
//! content inline. Sources that are absent from `results` are silently
//! skipped — the scheduler guarantees all dependencies are finished before
//! a node is dispatched, so a missing source can only be a node outside the
//! required set.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::graph::{Edge, Graph};
use crate::media::{MediaResult, MediaType};
use crate::node::Node;
use crate::traits::MediaStore;

/// Upstream outputs grouped by semantic bucket.
#[derive(Debug, Default)]
pub struct ResolvedInputs {
    pub images: Vec<Vec<u8>>,
    pub videos: Vec<Vec<u8>>,
    pub audios: Vec<Vec<u8>>,
    pub texts: Vec<String>,
}

impl ResolvedInputs {
    /// Upstream texts joined for prompt assembly.
    pub fn joined_texts(&self) -> String {
        self.texts.join("\n")
    }
}

/// Resolves a node's input data from its upstream node results.
#[derive(Clone)]
pub struct InputResolver {
    store: Arc<dyn MediaStore>,
}

impl InputResolver {
    pub fn new(store: Arc<dyn MediaStore>) -> Self {
        Self { store }
    }

    /// Resolve inputs for a node inside its graph.
    pub async fn resolve(
        &self,
        graph: &Graph,
        node_id: &str,
        results: &HashMap<String, MediaResult>,
    ) -> Result<ResolvedInputs> {
        match graph.get_node(node_id) {
            Some(node) => self.resolve_node(node, graph.edges(), results).await,
            None => Ok(ResolvedInputs::default()),
        }
    }

    /// Resolve inputs from an explicit node/edge snapshot. Used by the
    /// batch scheduler, whose workers operate on owned copies instead of a
    /// shared graph borrow.
    pub async fn resolve_node(
        &self,
        node: &Node,
        edges: &[Edge],
        results: &HashMap<String, MediaResult>,
    ) -> Result<ResolvedInputs> {
        let mut inputs = ResolvedInputs::default();

        for port in &node.input_ports {
            let incoming = edges
                .iter()
                .filter(|e| e.connection.to_node_id == node.id && e.connection.to_port_id == port.id);

            for edge in incoming {
                let Some(source) = results.get(&edge.connection.from_node_id) else {
                    continue;
                };
                match source.media_type {
                    MediaType::Image => {
                        if let Some(bytes) = self.read_bytes(source).await? {
                            inputs.images.push(bytes);
                        }
                    }
                    MediaType::Video => {
                        if let Some(bytes) = self.read_bytes(source).await? {
                            inputs.videos.push(bytes);
                        }
                    }
                    MediaType::Audio => {
                        if let Some(bytes) = self.read_bytes(source).await? {
                            inputs.audios.push(bytes);
                        }
                    }
                    MediaType::Text => {
                        inputs.texts.push(source.urls.original.clone());
                    }
                }
            }
        }

        Ok(inputs)
    }

    async fn read_bytes(&self, result: &MediaResult) -> Result<Option<Vec<u8>>> {
        self.store.read_media_bytes(&result.urls.original).await
    }
}
