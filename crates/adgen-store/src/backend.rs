//! Durable persistence for generation documents.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use adgen_models::{Generation, GenerationId};

use crate::error::StoreResult;

/// Where generation documents are persisted.
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// Load every stored document.
    async fn load_all(&self) -> StoreResult<Vec<Generation>>;

    /// Write one document, replacing any previous version.
    async fn write(&self, generation: &Generation) -> StoreResult<()>;

    fn name(&self) -> &'static str;
}

/// Keeps nothing beyond the in-process map. State is lost on restart.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend;

#[async_trait]
impl DocumentBackend for MemoryBackend {
    async fn load_all(&self) -> StoreResult<Vec<Generation>> {
        Ok(Vec::new())
    }

    async fn write(&self, _generation: &Generation) -> StoreResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// One JSON document per generation under `<root>/generations/<id>.json`.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Open (and create if needed) the generations directory under `root`.
    pub async fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = root.as_ref().join("generations");
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &GenerationId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

#[async_trait]
impl DocumentBackend for FileBackend {
    async fn load_all(&self) -> StoreResult<Vec<Generation>> {
        let mut generations = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<Generation>(&bytes) {
                Ok(generation) => generations.push(generation),
                // A corrupt document must not keep the others from loading.
                Err(e) => warn!(path = %path.display(), "Skipping unreadable generation document: {}", e),
            }
        }

        debug!(count = generations.len(), dir = %self.dir.display(), "Loaded generation documents");
        Ok(generations)
    }

    async fn write(&self, generation: &Generation) -> StoreResult<()> {
        let path = self.path_for(&generation.id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(generation)?;

        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
