//! Typed ports and port-to-port connections.
//!
//! Every node exposes a fixed set of input and output ports derived from its
//! node type. An edge may only connect an output port to an input port whose
//! types are compatible: either side may be [`PortType::Any`], otherwise the
//! types must match exactly.

use serde::{Deserialize, Serialize};

/// Data types that can flow through ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    Image,
    Video,
    Audio,
    Text,
    /// Accepts or produces any media type.
    Any,
}

impl PortType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Text => "text",
            Self::Any => "any",
        }
    }
}

/// Whether a port receives or produces data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    Input,
    Output,
}

/// A typed connection point on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    /// Stable id, `{node_id}_{direction}_{name}`.
    pub id: String,
    pub name: String,
    pub port_type: PortType,
    pub direction: PortDirection,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

fn default_required() -> bool {
    true
}

impl Port {
    /// Two ports are compatible iff their directions differ and either side
    /// is `Any` or their types match.
    pub fn is_compatible_with(&self, other: &Port) -> bool {
        if self.direction == other.direction {
            return false;
        }
        if self.port_type == PortType::Any || other.port_type == PortType::Any {
            return true;
        }
        self.port_type == other.port_type
    }
}

/// A link between two specific ports on two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub from_node_id: String,
    pub from_port_id: String,
    pub to_node_id: String,
    pub to_port_id: String,
}

impl Connection {
    /// Deterministic edge identity derived from the four endpoints.
    pub fn id(&self) -> String {
        format!(
            "{}:{}->{}:{}",
            self.from_node_id, self.from_port_id, self.to_node_id, self.to_port_id
        )
    }
}
