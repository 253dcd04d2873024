//! # mediagraph-core — DAG execution engine for media-generation pipelines
//!
//! Users author a DAG of processing nodes, each invoking one external
//! generative model (text, image, video, speech, music, vision), and submit
//! it for execution. The engine resolves dependencies, schedules nodes
//! under per-type concurrency caps, streams progress events as execution
//! proceeds, persists intermediate results so reruns skip unchanged work,
//! and isolates failures so one failing graph never aborts its batch
//! siblings.
//!
//! ## Core concepts
//!
//! - [`Graph`]: nodes connected by typed port edges; validated to be
//!   acyclic and port-compatible at every mutation.
//! - [`topology`]: Kahn ordering, reverse reachability from the requested
//!   outputs, and level partitioning of the required sub-DAG.
//! - [`GraphExecutor`]: level-synchronous execution of one graph with a
//!   streaming event feed.
//! - [`BatchScheduler`]: many graphs flattened into one pool under
//!   per-node-type semaphores with priority tie-breaking and per-graph
//!   failure isolation.
//! - [`ExecutionManager`] / [`BatchManager`]: run registries, event
//!   fan-out queues, cooperative cancellation, and persistence touchpoints.
//!
//! ## Staleness
//!
//! Content-affecting changes (params, label, incoming topology) mark a node
//! and everything downstream of it stale. A node is only skipped when it is
//! `completed`, holds a result, and is not stale — and the run is not
//! forced.
//!
//! ## External collaborators
//!
//! The generation backend, media blob store, graph repository, and canvas
//! memory resolver are trait contracts in [`traits`]; implementations live
//! in sibling crates.

pub mod audio;
pub mod batch;
pub mod error;
pub mod execution;
pub mod executor;
pub mod graph;
pub mod handlers;
pub mod media;
pub mod node;
pub mod port;
pub mod resolver;
pub mod runs;
pub mod scheduler;
pub mod topology;
pub mod traits;

pub use batch::{
    default_type_configs, BatchContext, BatchEvent, BatchEventType, BatchStatus, GraphOutcome,
    NodeTypeConfig, SchedulableNode,
};
pub use error::{EngineError, Result};
pub use execution::{
    CancelToken, ExecutionContext, ExecutionEvent, ExecutionEventType, ExecutionStatus,
};
pub use executor::GraphExecutor;
pub use graph::{Edge, Graph};
pub use handlers::NodeDispatcher;
pub use media::{MediaMetadata, MediaResult, MediaType, MediaUrls};
pub use node::{Node, NodeStatus, NodeType, Position};
pub use port::{Connection, Port, PortDirection, PortType};
pub use resolver::{InputResolver, ResolvedInputs};
pub use runs::{BatchManager, ExecutionManager};
pub use scheduler::{BatchScheduler, SharedGraphs};
pub use traits::{
    CanvasMemory, GenerationBackend, GraphRepository, MediaStore, NoopEnricher, PromptEnricher,
    StaticCanvasMemory, TextInputs, VideoImageInput,
};
