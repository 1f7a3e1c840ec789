//! Content-addressed analysis cache.
//!
//! The vision call is the slowest and most expensive step before a script is
//! approved, so its result is memoized by the SHA-256 of the image bytes.
//! Entries are immutable: the first script stored for a hash is the one every
//! later caller receives.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use adgen_models::ScriptData;

use crate::error::{EngineError, EngineResult};
use crate::metrics;

/// Hex SHA-256 of the image bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Vision-model collaborator that writes a script for a product image.
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    async fn analyze(&self, image: &[u8], mime_type: &str) -> EngineResult<ScriptData>;

    fn name(&self) -> &'static str;
}

/// Hash to script map with an optional directory mirror.
pub struct AnalysisCache {
    entries: RwLock<HashMap<String, Arc<ScriptData>>>,
    dir: Option<PathBuf>,
}

impl AnalysisCache {
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            dir: None,
        }
    }

    /// Open a cache mirrored to `dir`, loading the entries already there.
    pub async fn open(dir: impl AsRef<Path>) -> EngineResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let mut entries = HashMap::new();
        let mut listing = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = listing.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(hash) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<ScriptData>(&bytes) {
                Ok(script) => {
                    entries.insert(hash, Arc::new(script));
                }
                Err(e) => warn!(path = %path.display(), "Skipping unreadable analysis entry: {}", e),
            }
        }

        info!(entries = entries.len(), dir = %dir.display(), "Opened analysis cache");
        Ok(Self {
            entries: RwLock::new(entries),
            dir: Some(dir),
        })
    }

    pub async fn lookup(&self, hash: &str) -> Option<Arc<ScriptData>> {
        self.entries.read().await.get(hash).cloned()
    }

    /// Insert `script` under `hash` unless an entry exists; returns the entry
    /// that is now cached.
    pub async fn store(&self, hash: &str, script: ScriptData) -> EngineResult<Arc<ScriptData>> {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(hash) {
            return Ok(existing.clone());
        }

        if let Some(dir) = &self.dir {
            let path = dir.join(format!("{hash}.json"));
            let tmp = path.with_extension("json.tmp");
            tokio::fs::write(&tmp, serde_json::to_vec_pretty(&script)?).await?;
            tokio::fs::rename(&tmp, &path).await?;
        }

        let script = Arc::new(script);
        entries.insert(hash.to_string(), script.clone());
        debug!(hash = %hash, "Cached analysis");
        Ok(script)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Result of analysing one image.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub hash: String,
    pub script: Arc<ScriptData>,
    /// Served without calling the vision model
    pub cached: bool,
}

/// Cache-fronted vision analysis with single-flight misses: concurrent
/// requests for the same image wait for one vision call.
pub struct ScriptAnalyzer {
    cache: Arc<AnalysisCache>,
    vision: Arc<dyn VisionAnalyzer>,
    inflight: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ScriptAnalyzer {
    pub fn new(cache: Arc<AnalysisCache>, vision: Arc<dyn VisionAnalyzer>) -> Self {
        Self {
            cache,
            vision,
            inflight: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<AnalysisCache> {
        &self.cache
    }

    pub async fn analyze(&self, image: &[u8], mime_type: &str) -> EngineResult<AnalysisOutcome> {
        if image.is_empty() {
            return Err(EngineError::analysis("image is empty"));
        }
        let hash = content_hash(image);

        if let Some(script) = self.cache.lookup(&hash).await {
            metrics::record_analysis_cache(true);
            return Ok(AnalysisOutcome {
                hash,
                script,
                cached: true,
            });
        }

        let gate = self.gate(&hash);
        let _flight = gate.lock().await;

        // Another caller may have filled the entry while we waited.
        if let Some(script) = self.cache.lookup(&hash).await {
            metrics::record_analysis_cache(true);
            return Ok(AnalysisOutcome {
                hash,
                script,
                cached: true,
            });
        }

        metrics::record_analysis_cache(false);
        info!(hash = %hash, analyzer = self.vision.name(), "Analysis cache miss");
        let result = self.vision.analyze(image, mime_type).await;
        let outcome = match result {
            Ok(script) => self.cache.store(&hash, script).await.map(|script| AnalysisOutcome {
                hash: hash.clone(),
                script,
                cached: false,
            }),
            Err(e) => Err(e),
        };

        self.release(&hash);
        outcome
    }

    fn gate(&self, hash: &str) -> Arc<Mutex<()>> {
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inflight
            .entry(hash.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release(&self, hash: &str) {
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inflight.remove(hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeVision;

    #[test]
    fn test_content_hash_is_stable_hex() {
        let a = content_hash(b"product");
        assert_eq!(a.len(), 64);
        assert_eq!(a, content_hash(b"product"));
        assert_ne!(a, content_hash(b"product2"));
    }

    #[tokio::test]
    async fn test_first_store_wins() {
        let cache = AnalysisCache::in_memory();
        let first = FakeVision::script("First");
        let stored = cache.store("h", first.clone()).await.unwrap();
        let again = cache.store("h", FakeVision::script("Second")).await.unwrap();

        assert_eq!(*stored, first);
        assert_eq!(*again, first);
        assert_eq!(*cache.lookup("h").await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_disk_mirror_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = AnalysisCache::open(dir.path()).await.unwrap();
            cache.store("abc", FakeVision::script("Lamp")).await.unwrap();
        }
        tokio::fs::write(dir.path().join("junk.json"), b"{").await.unwrap();

        let reopened = AnalysisCache::open(dir.path()).await.unwrap();
        assert_eq!(reopened.len().await, 1);
        assert_eq!(reopened.lookup("abc").await.unwrap().product_name, "Lamp");
    }

    #[tokio::test]
    async fn test_concurrent_misses_call_vision_once() {
        let vision = Arc::new(FakeVision::new().with_delay(std::time::Duration::from_millis(50)));
        let analyzer = Arc::new(ScriptAnalyzer::new(
            Arc::new(AnalysisCache::in_memory()),
            vision.clone(),
        ));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let analyzer = analyzer.clone();
                tokio::spawn(async move { analyzer.analyze(b"same-image", "image/png").await })
            })
            .collect();

        let mut fresh = 0;
        for task in tasks {
            let outcome = task.await.unwrap().unwrap();
            if !outcome.cached {
                fresh += 1;
            }
        }
        assert_eq!(fresh, 1);
        assert_eq!(vision.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_analysis_is_not_cached() {
        let vision = Arc::new(FakeVision::new().failing());
        let analyzer = ScriptAnalyzer::new(Arc::new(AnalysisCache::in_memory()), vision.clone());

        assert!(analyzer.analyze(b"img", "image/png").await.is_err());
        assert!(analyzer.cache().is_empty().await);
        assert!(analyzer.analyze(b"img", "image/png").await.is_err());
        assert_eq!(vision.calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_image_is_rejected() {
        let analyzer = ScriptAnalyzer::new(
            Arc::new(AnalysisCache::in_memory()),
            Arc::new(FakeVision::new()),
        );
        assert!(matches!(
            analyzer.analyze(b"", "image/png").await,
            Err(EngineError::Analysis(_))
        ));
    }
}
