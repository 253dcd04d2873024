//! Nodes: the units of work in a media pipeline.
//!
//! Each node invokes exactly one external generative operation. The node
//! type fixes the set of input/output ports and which handler runs it; the
//! free-form `params` bag carries per-type generation settings (prompt,
//! aspect ratio, voice, duration, ...). Typed access to the bag goes through
//! [`Node::params`], which returns a read-only view with typed getters —
//! the raw map is only touched at persistence/wire boundaries.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::media::MediaResult;
use crate::port::{Port, PortDirection, PortType};

/// The generative operation a node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    GenerateText,
    GenerateImage,
    GenerateVideo,
    GenerateSpeech,
    GenerateMusic,
    AnalyzeImage,
    TransformImage,
}

impl NodeType {
    /// All node types, in scheduling-table order.
    pub const ALL: [NodeType; 7] = [
        Self::GenerateText,
        Self::GenerateImage,
        Self::GenerateVideo,
        Self::GenerateSpeech,
        Self::GenerateMusic,
        Self::AnalyzeImage,
        Self::TransformImage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GenerateText => "generate_text",
            Self::GenerateImage => "generate_image",
            Self::GenerateVideo => "generate_video",
            Self::GenerateSpeech => "generate_speech",
            Self::GenerateMusic => "generate_music",
            Self::AnalyzeImage => "analyze_image",
            Self::TransformImage => "transform_image",
        }
    }

    /// Fixed port layout for this node type: `(inputs, outputs)` as
    /// `(name, port type, description)` triples.
    fn port_spec(
        &self,
    ) -> (
        &'static [(&'static str, PortType, &'static str)],
        &'static [(&'static str, PortType, &'static str)],
    ) {
        const IN_ANY: &[(&str, PortType, &str)] =
            &[("in", PortType::Any, "Input from upstream node")];
        match self {
            Self::GenerateText => (IN_ANY, &[("text", PortType::Text, "Generated text")]),
            Self::GenerateImage => (IN_ANY, &[("image", PortType::Image, "Generated image")]),
            Self::GenerateVideo => (IN_ANY, &[("video", PortType::Video, "Generated video")]),
            Self::GenerateSpeech => (IN_ANY, &[("audio", PortType::Audio, "Generated speech")]),
            Self::GenerateMusic => (IN_ANY, &[("audio", PortType::Audio, "Generated music")]),
            Self::AnalyzeImage => (IN_ANY, &[("text", PortType::Text, "Image description")]),
            Self::TransformImage => (IN_ANY, &[("image", PortType::Image, "Modified image")]),
        }
    }
}

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Idle,
    Queued,
    Running,
    Completed,
    Failed,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self::Idle
    }
}

/// Canvas position, persisted for clients; the engine never reads it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A processing node with typed input/output ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub label: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub position: Position,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default)]
    pub input_ports: Vec<Port>,
    #[serde(default)]
    pub output_ports: Vec<Port>,
    /// Latest successful generation, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<MediaResult>,
    /// Every successful generation, oldest first.
    #[serde(default)]
    pub generation_history: Vec<MediaResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Set when this node or an upstream content-affecting field changed;
    /// a stale node is never skipped by the executor.
    #[serde(default)]
    pub stale: bool,
}

fn default_provider() -> String {
    "gemini".to_string()
}

impl Node {
    /// Create an idle node with ports derived from the type's fixed spec.
    pub fn new(
        id: impl Into<String>,
        node_type: NodeType,
        label: impl Into<String>,
        params: Map<String, Value>,
        position: Position,
    ) -> Self {
        let id = id.into();
        let (inputs, outputs) = node_type.port_spec();
        let input_ports = inputs
            .iter()
            .map(|(name, port_type, desc)| Port {
                id: format!("{id}_input_{name}"),
                name: (*name).to_string(),
                port_type: *port_type,
                direction: PortDirection::Input,
                required: true,
                description: (*desc).to_string(),
            })
            .collect();
        let output_ports = outputs
            .iter()
            .map(|(name, port_type, desc)| Port {
                id: format!("{id}_output_{name}"),
                name: (*name).to_string(),
                port_type: *port_type,
                direction: PortDirection::Output,
                required: true,
                description: (*desc).to_string(),
            })
            .collect();
        Self {
            id,
            node_type,
            label: label.into(),
            params,
            position,
            provider: default_provider(),
            status: NodeStatus::Idle,
            input_ports,
            output_ports,
            result: None,
            generation_history: Vec::new(),
            error_message: None,
            stale: false,
        }
    }

    pub fn get_input_port(&self, port_id: &str) -> Option<&Port> {
        self.input_ports.iter().find(|p| p.id == port_id)
    }

    pub fn get_output_port(&self, port_id: &str) -> Option<&Port> {
        self.output_ports.iter().find(|p| p.id == port_id)
    }

    /// Record a successful generation: append to history, set as current
    /// result, mark completed and not stale.
    pub fn add_generation(&mut self, result: MediaResult) {
        self.generation_history.push(result.clone());
        self.result = Some(result);
        self.status = NodeStatus::Completed;
        self.stale = false;
        self.error_message = None;
    }

    /// `completed + result present + not stale` — the cached precondition.
    /// A node satisfying this is skipped unless the run is forced.
    pub fn is_cached(&self) -> bool {
        !self.stale && self.status == NodeStatus::Completed && self.result.is_some()
    }

    /// Typed read-only view over the `params` bag.
    pub fn params(&self) -> Params<'_> {
        Params(&self.params)
    }
}

/// Typed accessors over a node's heterogeneous `params` map.
///
/// Every getter falls back to the documented default when the key is absent
/// or has the wrong shape.
#[derive(Debug, Clone, Copy)]
pub struct Params<'a>(pub &'a Map<String, Value>);

impl<'a> Params<'a> {
    pub fn str(&self, key: &str) -> Option<&'a str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn f64_or(&self, key: &str, default: f64) -> f64 {
        self.0.get(key).and_then(Value::as_f64).unwrap_or(default)
    }

    pub fn u64_or(&self, key: &str, default: u64) -> u64 {
        self.0.get(key).and_then(Value::as_u64).unwrap_or(default)
    }

    /// The node's own prompt text.
    pub fn prompt(&self) -> &'a str {
        self.str("prompt").unwrap_or("")
    }

    /// Whether the enrichment pass runs before generation. Defaults to true.
    pub fn enrich(&self) -> bool {
        self.bool_or("enrich", true)
    }

    /// Video generation: attach upstream images as reference assets instead
    /// of a first-frame seed.
    pub fn reference_mode(&self) -> bool {
        self.bool_or("reference_mode", false)
    }

    /// Structured-output mode for text generation.
    pub fn structured_output(&self) -> Option<&'a Vec<Value>> {
        if self.str("output_mode") != Some("structured") {
            return None;
        }
        self.0.get("output_fields").and_then(Value::as_array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaType, MediaUrls};

    #[test]
    fn new_node_derives_ports_from_type() {
        let node = Node::new("n1", NodeType::GenerateImage, "img", Map::new(), Position::default());
        assert_eq!(node.input_ports.len(), 1);
        assert_eq!(node.input_ports[0].id, "n1_input_in");
        assert_eq!(node.input_ports[0].port_type, PortType::Any);
        assert_eq!(node.output_ports[0].id, "n1_output_image");
        assert_eq!(node.output_ports[0].port_type, PortType::Image);
    }

    #[test]
    fn add_generation_completes_and_clears_stale() {
        let mut node =
            Node::new("n1", NodeType::GenerateText, "txt", Map::new(), Position::default());
        node.stale = true;
        node.error_message = Some("old failure".into());
        let result = MediaResult::new(
            MediaType::Text,
            MediaUrls::single("hello"),
            "p",
            Map::new(),
        );
        node.add_generation(result.clone());
        assert_eq!(node.status, NodeStatus::Completed);
        assert!(!node.stale);
        assert!(node.error_message.is_none());
        assert_eq!(node.generation_history.len(), 1);
        assert_eq!(node.result, Some(result));
        assert!(node.is_cached());
    }

    #[test]
    fn stale_node_is_not_cached() {
        let mut node =
            Node::new("n1", NodeType::GenerateText, "txt", Map::new(), Position::default());
        node.add_generation(MediaResult::new(
            MediaType::Text,
            MediaUrls::single("hello"),
            "p",
            Map::new(),
        ));
        node.stale = true;
        assert!(!node.is_cached());
    }

    #[test]
    fn params_defaults() {
        let node = Node::new("n1", NodeType::GenerateVideo, "v", Map::new(), Position::default());
        assert!(node.params().enrich());
        assert!(!node.params().reference_mode());
        assert_eq!(node.params().prompt(), "");
    }
}
