//! Read-only status projection for polling clients.

use std::path::Path;
use std::sync::Arc;

use adgen_models::{GenerationId, GenerationStatusView};
use adgen_store::GenerationStore;

use crate::error::EngineResult;

/// Serves [`GenerationStatusView`]s. Never mutates the store.
#[derive(Clone)]
pub struct StatusQuery {
    store: Arc<GenerationStore>,
    public_output_base: Option<String>,
}

impl StatusQuery {
    pub fn new(store: Arc<GenerationStore>, public_output_base: Option<String>) -> Self {
        Self {
            store,
            public_output_base: public_output_base.map(|b| b.trim_end_matches('/').to_string()),
        }
    }

    pub async fn get_status(&self, id: &GenerationId) -> EngineResult<GenerationStatusView> {
        let generation = self.store.get(id).await?;
        let mut view = generation.status_view();
        view.final_video_url = view.final_video_url.map(|path| self.public_url(&path));
        Ok(view)
    }

    /// Map a stored artifact path onto the public prefix, keeping only the
    /// file name.
    fn public_url(&self, path: &str) -> String {
        let Some(base) = &self.public_output_base else {
            return path.to_string();
        };
        match Path::new(path).file_name().and_then(|n| n.to_str()) {
            Some(name) => format!("{}/{}", base, name),
            None => path.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::testing::FakeVision;
    use adgen_models::{Generation, GenerationStatus, SourceImage};

    #[tokio::test]
    async fn test_pending_generation_view() {
        let store = Arc::new(GenerationStore::in_memory());
        let snapshot = FakeVision::script("Lamp").approve().unwrap();
        let g = store
            .create(Generation::from_script(snapshot, SourceImage::from_path("/tmp/p.png")).unwrap())
            .await
            .unwrap();

        let query = StatusQuery::new(store, Some("/outputs/".into()));
        let view = query.get_status(&g.id).await.unwrap();
        assert_eq!(view.status, GenerationStatus::Pending);
        assert_eq!(view.clips.len(), 12);
        assert!(view
            .clips
            .iter()
            .enumerate()
            .all(|(i, c)| c.sequence_index == i as u32));
        assert!(view.final_video_url.is_none());
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let query = StatusQuery::new(Arc::new(GenerationStore::in_memory()), None);
        let err = query
            .get_status(&GenerationId::from_string("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn test_public_url_mapping() {
        let store = Arc::new(GenerationStore::in_memory());
        let with_base = StatusQuery::new(store.clone(), Some("https://cdn.test/outputs/".into()));
        assert_eq!(
            with_base.public_url("./data/outputs/g1_final.mp4"),
            "https://cdn.test/outputs/g1_final.mp4"
        );

        let without = StatusQuery::new(store, None);
        assert_eq!(
            without.public_url("./data/outputs/g1_final.mp4"),
            "./data/outputs/g1_final.mp4"
        );
    }
}
