//! Startup ordering. Kept in its own test binary because the Prometheus
//! recorder can be installed once per process.

use std::sync::Arc;
use std::time::Duration;

use adgen_api::bootstrap::bootstrap;
use adgen_api::ApiConfig;
use adgen_engine::testing::{FakeAssembler, FakeRender, FakeVision};
use adgen_engine::{Collaborators, EngineConfig};
use adgen_models::{Generation, SourceImage};
use adgen_store::{GenerationStore, StoreConfig};

#[tokio::test]
async fn test_recovery_is_recorded_by_installed_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let store_config = StoreConfig {
        data_dir: Some(dir.path().join("store")),
    };

    // A generation left behind by a previous process.
    {
        let store = GenerationStore::open(&store_config).await.unwrap();
        let snapshot = FakeVision::script("Glow Serum").approve().unwrap();
        let generation =
            Generation::from_script(snapshot, SourceImage::from_path("/uploads/p.png")).unwrap();
        store.create(generation).await.unwrap();
    }

    let engine_config = EngineConfig {
        retry_base_delay: Duration::ZERO,
        retry_max_delay: Duration::ZERO,
        verify_clip_duration: false,
        clips_dir: dir.path().join("clips"),
        output_dir: dir.path().join("outputs"),
        analysis_cache_dir: None,
        ..EngineConfig::default()
    };
    let config = ApiConfig {
        metrics_enabled: true,
        upload_dir: dir.path().join("uploads"),
        ..ApiConfig::default()
    };
    let collaborators = Collaborators {
        render: Arc::new(FakeRender::new()),
        vision: Arc::new(FakeVision::new()),
        assembler: Arc::new(FakeAssembler::new()),
    };

    let runtime = bootstrap(&config, engine_config, &store_config, collaborators)
        .await
        .unwrap();
    let handle = runtime.metrics.expect("metrics enabled");

    let rendered = handle.render();
    assert!(
        rendered.contains("adgen_generations_active 1"),
        "recovery gauge missing from:\n{rendered}"
    );
    assert_eq!(runtime.engine.store().len().await, 1);
}
