//! Error types for graph construction, validation, and execution.
//!
//! All errors implement `std::error::Error` via the `thiserror` crate.
//! Graph-structural errors (`NodeNotFound`, `PortIncompatible`, `CycleDetected`,
//! `DuplicateEdge`) are raised during graph mutation and never reach the
//! streaming path; per-node runtime errors (`Backend`, `Store`) are reported
//! through the event stream and never abort the run's outer task.

use thiserror::Error;

/// Convenience result type using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error type for all engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// No graph with the given id exists in the repository.
    #[error("graph not found: {0}")]
    GraphNotFound(String),

    /// No node with the given id exists in the graph.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// No port with the given id exists on the node.
    #[error("port not found: {0}")]
    PortNotFound(String),

    /// An edge would connect two ports that cannot carry the same data,
    /// or two ports with the same direction.
    #[error("incompatible ports: {from} -> {to}")]
    PortIncompatible {
        /// Source port type
        from: String,
        /// Target port type
        to: String,
    },

    /// Inserting the edge would create a directed cycle.
    #[error("connection would create a cycle")]
    CycleDetected,

    /// An edge with the same endpoints already exists.
    #[error("duplicate edge: {0}")]
    DuplicateEdge(String),

    /// A structural precondition of execution was violated, e.g. a node
    /// type with no registered handler or a required input that is absent.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The generation backend rejected or failed a request.
    #[error("backend error: {0}")]
    Backend(String),

    /// The media blob store failed to read or write an artifact.
    #[error("store error: {0}")]
    Store(String),

    /// No run with the given id is registered.
    #[error("run not found: {0}")]
    RunNotFound(String),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create a backend error from any displayable source.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }

    /// Create a store error from any displayable source.
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::Store(err.to_string())
    }

    /// Create an invariant-violation error.
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }
}
