//! JSON-file graph repository.
//!
//! One pretty-printed file per graph under `{storage}/graphs/`. Saving
//! bumps `updated_at`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::warn;

use mediagraph_core::error::Result;
use mediagraph_core::graph::Graph;
use mediagraph_core::traits::GraphRepository;

pub struct JsonGraphRepository {
    dir: PathBuf,
}

impl JsonGraphRepository {
    pub fn new(storage_path: impl AsRef<Path>) -> Result<Self> {
        let dir = storage_path.as_ref().join("graphs");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, graph_id: &str) -> PathBuf {
        self.dir.join(format!("{graph_id}.json"))
    }
}

#[async_trait]
impl GraphRepository for JsonGraphRepository {
    async fn save(&self, graph: &Graph) -> Result<()> {
        let mut graph = graph.clone();
        graph.updated_at = chrono::Utc::now().timestamp();
        let json = serde_json::to_string_pretty(&graph)?;
        tokio::fs::write(self.path(&graph.id), json).await?;
        Ok(())
    }

    async fn load(&self, graph_id: &str) -> Result<Option<Graph>> {
        let path = self.path(graph_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, graph_id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path(graph_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_all(&self) -> Result<Vec<Graph>> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut graphs = Vec::with_capacity(paths.len());
        for path in paths {
            let json = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str(&json) {
                Ok(graph) => graphs.push(graph),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable graph file"),
            }
        }
        Ok(graphs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_load_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonGraphRepository::new(dir.path()).unwrap();

        let graph = Graph::new("g1", "test graph");
        repo.save(&graph).await.unwrap();

        let loaded = repo.load("g1").await.unwrap().unwrap();
        assert_eq!(loaded.id, "g1");
        assert_eq!(loaded.name, "test graph");
        assert!(loaded.updated_at >= graph.updated_at);

        assert_eq!(repo.list_all().await.unwrap().len(), 1);

        repo.delete("g1").await.unwrap();
        assert!(repo.load("g1").await.unwrap().is_none());
        repo.delete("g1").await.unwrap();
    }
}
