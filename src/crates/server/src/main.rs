//! mediagraph server binary.
//!
//! Wires the engine to its concrete collaborators — the Gemini backend,
//! the local blob store, the JSON graph repository — and serves the REST +
//! SSE control plane.

mod api;
mod repository;
mod settings;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use genai::{GeminiClient, HybridEnricher};
use mediagraph_core::handlers::NodeDispatcher;
use mediagraph_core::resolver::InputResolver;
use mediagraph_core::runs::{BatchManager, ExecutionManager};
use mediagraph_core::scheduler::BatchScheduler;
use mediagraph_core::traits::{
    GenerationBackend, GraphRepository, MediaStore, NoopEnricher, PromptEnricher,
    StaticCanvasMemory,
};
use mediagraph_core::GraphExecutor;
use mediastore::LocalMediaStore;

use crate::api::routes::{create_router, AppState};
use crate::repository::JsonGraphRepository;
use crate::settings::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = Settings::parse();
    if settings.gemini_api_key.is_empty() {
        tracing::warn!("GEMINI_API_KEY is not set; generation calls will fail");
    }

    let store: Arc<dyn MediaStore> = Arc::new(LocalMediaStore::new(&settings.storage_path)?);
    let repo: Arc<dyn GraphRepository> = Arc::new(JsonGraphRepository::new(&settings.storage_path)?);
    let backend: Arc<dyn GenerationBackend> =
        Arc::new(GeminiClient::new(settings.gemini_config())?);

    let enricher: Arc<dyn PromptEnricher> = if settings.enrichment_enabled {
        Arc::new(HybridEnricher::new(Arc::clone(&backend)))
    } else {
        Arc::new(NoopEnricher)
    };

    let dispatcher = Arc::new(NodeDispatcher::new(
        Arc::clone(&backend),
        Arc::clone(&store),
        enricher,
    ));
    let resolver = InputResolver::new(Arc::clone(&store));
    let memory = Arc::new(StaticCanvasMemory);

    let executions = Arc::new(ExecutionManager::new(
        Arc::new(GraphExecutor::new(Arc::clone(&dispatcher), resolver.clone())),
        Arc::clone(&repo),
        memory.clone(),
    ));
    let batches = Arc::new(BatchManager::new(
        Arc::new(BatchScheduler::new(dispatcher, resolver)),
        Arc::clone(&repo),
        memory,
    ));

    let state = AppState {
        repo,
        store,
        executions,
        batches,
    };
    let media_dir = PathBuf::from(&settings.storage_path).join("media");
    let app = create_router(state, media_dir);

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port).parse()?;
    tracing::info!(%addr, "mediagraph server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
