//! Process startup: metrics, storage, collaborators and engine recovery.

use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::{info, warn};

use adgen_engine::{
    AnalysisCache, Collaborators, EngineConfig, FfmpegAssembler, GeminiConfig,
    GeminiVisionClient, Orchestrator,
};
use adgen_media::AssemblyParams;
use adgen_render::RenderBackend;
use adgen_store::{GenerationStore, StoreConfig};

use crate::config::ApiConfig;
use crate::metrics;

/// A recovered engine and the metrics handle the router serves.
pub struct Runtime {
    pub engine: Orchestrator,
    pub metrics: Option<PrometheusHandle>,
}

/// Render, vision and assembly services configured from the environment.
pub fn collaborators_from_env() -> anyhow::Result<Collaborators> {
    let render = RenderBackend::from_env()
        .connect()
        .context("Failed to create render client")?;
    info!("Render service: {}", render.name());

    let vision = GeminiVisionClient::new(GeminiConfig::from_env()?)?;
    if let Err(e) = adgen_media::check_ffmpeg() {
        warn!("FFmpeg not available, assembly will fail: {}", e);
    }

    Ok(Collaborators {
        render,
        vision: Arc::new(vision),
        assembler: Arc::new(FfmpegAssembler::new(AssemblyParams::default())),
    })
}

/// Install the metrics recorder, then open storage and recover the engine.
///
/// The recorder goes in before anything that records, so recovery counts
/// and the first ticks of the loop are exported.
pub async fn bootstrap(
    config: &ApiConfig,
    engine_config: EngineConfig,
    store_config: &StoreConfig,
    collaborators: Collaborators,
) -> anyhow::Result<Runtime> {
    let metrics = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("Failed to install Prometheus recorder")?)
    } else {
        None
    };

    let store = Arc::new(
        GenerationStore::open(store_config)
            .await
            .context("Failed to open generation store")?,
    );
    let cache = Arc::new(match &engine_config.analysis_cache_dir {
        Some(dir) => AnalysisCache::open(dir)
            .await
            .context("Failed to open analysis cache")?,
        None => AnalysisCache::in_memory(),
    });

    let engine = Orchestrator::new(engine_config, store, cache, collaborators);
    let resumed = engine.recover().await?;
    info!("Resuming {} active generations", resumed);

    Ok(Runtime { engine, metrics })
}
