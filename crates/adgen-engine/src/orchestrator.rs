//! Orchestration loop.
//!
//! A fixed-interval timer drives every active generation one step:
//! watchdog, poll generating clips, submit ready clips, assemble when the
//! aggregate says so. Work for one generation is serialized by a per-id
//! gate; a generation whose previous step is still running is skipped for
//! that tick rather than queued behind it.

use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use adgen_models::{
    AssemblyOutcome, FailureKind, Generation, GenerationId, GenerationStatus,
    GenerationStatusView, ScriptData, SourceImage,
};
use adgen_render::RenderService;
use adgen_store::GenerationStore;

use crate::analysis::{AnalysisCache, AnalysisOutcome, ScriptAnalyzer, VisionAnalyzer};
use crate::assembly::{Assembler, AssemblyStage};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::logging::GenerationLogger;
use crate::metrics;
use crate::scheduler::ClipScheduler;
use crate::status::StatusQuery;

/// External collaborators the engine drives.
#[derive(Clone)]
pub struct Collaborators {
    pub render: Arc<dyn RenderService>,
    pub vision: Arc<dyn VisionAnalyzer>,
    pub assembler: Arc<dyn Assembler>,
}

struct Inner {
    config: EngineConfig,
    store: Arc<GenerationStore>,
    analyzer: ScriptAnalyzer,
    scheduler: ClipScheduler,
    assembly: AssemblyStage,
    status: StatusQuery,
    gates: std::sync::Mutex<HashMap<GenerationId, Arc<Mutex<()>>>>,
    shutdown: watch::Sender<bool>,
}

/// Handle to the engine. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        store: Arc<GenerationStore>,
        cache: Arc<AnalysisCache>,
        collaborators: Collaborators,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let scheduler = ClipScheduler::new(collaborators.render, store.clone(), config.clone());
        let assembly = AssemblyStage::new(collaborators.assembler, store.clone(), &config);
        let status = StatusQuery::new(store.clone(), config.public_output_base.clone());
        let analyzer = ScriptAnalyzer::new(cache, collaborators.vision);

        Self {
            inner: Arc::new(Inner {
                config,
                store,
                analyzer,
                scheduler,
                assembly,
                status,
                gates: std::sync::Mutex::new(HashMap::new()),
                shutdown,
            }),
        }
    }

    pub fn store(&self) -> &Arc<GenerationStore> {
        &self.inner.store
    }

    pub fn scheduler(&self) -> &ClipScheduler {
        &self.inner.scheduler
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Produce (or fetch from cache) a script for a product image.
    pub async fn analyze(&self, image: &[u8], mime_type: &str) -> EngineResult<AnalysisOutcome> {
        self.inner.analyzer.analyze(image, mime_type).await
    }

    /// Freeze an edited script and create its generation with one pending
    /// clip per scene. Scheduling starts on the next tick.
    pub async fn approve(
        &self,
        script: ScriptData,
        source_image: SourceImage,
    ) -> EngineResult<GenerationStatusView> {
        let snapshot = script.approve()?;
        let generation = Generation::from_script(snapshot, source_image)?
            .with_assembly_policy(self.inner.config.assembly_policy());
        let generation = self.inner.store.create(generation).await?;

        metrics::record_generation_created();
        GenerationLogger::new(&generation.id, "approve")
            .log_start(&format!("{} clips for {}", generation.clips.len(), generation.script.product_name()));
        self.inner.status.get_status(&generation.id).await
    }

    pub async fn status(&self, id: &GenerationId) -> EngineResult<GenerationStatusView> {
        self.inner.status.get_status(id).await
    }

    /// Stop a generation on the user's request. Completed clip artifacts
    /// are kept; outstanding render jobs are cancelled best-effort.
    pub async fn cancel(&self, id: &GenerationId) -> EngineResult<GenerationStatusView> {
        self.abort(id, FailureKind::Cancelled, "cancelled by user", "cancelled")
            .await?;
        self.inner.status.get_status(id).await
    }

    /// Advance one generation by one step.
    pub async fn drive(&self, id: &GenerationId) -> EngineResult<()> {
        let gate = self.gate(id);
        let Ok(_busy) = gate.try_lock() else {
            debug!(generation_id = %id, "Generation busy, skipping tick");
            return Ok(());
        };

        let generation = self.inner.store.get(id).await?;
        if generation.is_terminal() {
            self.release(id);
            return Ok(());
        }

        if self.watchdog_expired(&generation) {
            let reason = format!(
                "not finished within {}s",
                self.inner.config.watchdog_timeout.as_secs()
            );
            GenerationLogger::new(id, "watchdog").log_error(&reason);
            self.abort(id, FailureKind::Timeout, &reason, "watchdog").await?;
            self.release(id);
            return Ok(());
        }

        let scheduler = &self.inner.scheduler;
        scheduler.poll_generating(&generation).await?;
        let generation = self.inner.store.get(id).await?;
        scheduler.submit_ready(&generation).await?;

        let generation = self.inner.store.get(id).await?;
        if generation.needs_assembly() {
            self.inner.assembly.run(id).await?;
        }

        let generation = self.inner.store.get(id).await?;
        if generation.is_terminal() {
            match generation.status {
                GenerationStatus::Completed => metrics::record_generation_completed(),
                _ => metrics::record_generation_failed(failure_label(&generation)),
            }
            self.release(id);
        }
        Ok(())
    }

    /// Drive every active generation once and wait for all of them.
    pub async fn poll_once(&self) -> usize {
        let active = self.inner.store.list_active().await;
        metrics::set_active_generations(active.len());

        let results = join_all(active.iter().map(|g| self.drive(&g.id))).await;
        for (generation, result) in active.iter().zip(results) {
            if let Err(e) = result {
                warn!(generation_id = %generation.id, "Orchestration step failed: {}", e);
            }
        }
        active.len()
    }

    /// Resume after a restart.
    ///
    /// Generating clips keep their job ids and are re-polled by the loop;
    /// pending clips are submitted. A generation whose assembly was in
    /// progress when the process stopped is failed, because the assembly
    /// may already have run once.
    pub async fn recover(&self) -> EngineResult<usize> {
        let active = self.inner.store.list_active().await;
        let mut interrupted = 0;
        for generation in &active {
            if matches!(generation.assembly, AssemblyOutcome::InProgress { .. }) {
                self.abort(
                    &generation.id,
                    FailureKind::Cancelled,
                    "assembly interrupted by restart",
                    "assembly_interrupted",
                )
                .await?;
                interrupted += 1;
            }
        }

        metrics::set_active_generations(active.len() - interrupted);
        info!(
            active = active.len(),
            in_flight_jobs = active.iter().map(|g| g.in_flight_jobs().len()).sum::<usize>(),
            interrupted_assemblies = interrupted,
            "Recovered generations"
        );
        Ok(active.len() - interrupted)
    }

    /// Run the timer loop until [`Orchestrator::shutdown`] is called.
    ///
    /// Each tick dispatches one step per active generation without waiting
    /// for it; slow external calls never hold up the timer.
    pub async fn run(&self) {
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        let mut interval = tokio::time::interval(self.inner.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut steps = JoinSet::new();

        info!(
            poll_interval_secs = self.inner.config.poll_interval.as_secs_f64(),
            max_concurrent_calls = self.inner.config.max_concurrent_calls,
            "Starting orchestration loop"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping orchestration loop");
                        break;
                    }
                }
                _ = interval.tick() => {
                    while let Some(done) = steps.try_join_next() {
                        if let Err(e) = done {
                            error!("Orchestration step panicked: {}", e);
                        }
                    }

                    let active = self.inner.store.list_active().await;
                    metrics::set_active_generations(active.len());
                    for generation in active {
                        let engine = self.clone();
                        steps.spawn(async move {
                            if let Err(e) = engine.drive(&generation.id).await {
                                warn!(generation_id = %generation.id, "Orchestration step failed: {}", e);
                            }
                        });
                    }
                }
            }
        }

        info!("Waiting for in-flight orchestration steps...");
        let drained = tokio::time::timeout(Duration::from_secs(60), async {
            while steps.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Abandoning orchestration steps still running after 60s");
            steps.abort_all();
        }
    }

    /// Signal the loop to stop.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
    }

    fn watchdog_expired(&self, generation: &Generation) -> bool {
        (Utc::now() - generation.created_at)
            .to_std()
            .map_or(false, |age| age > self.inner.config.watchdog_timeout)
    }

    async fn abort(
        &self,
        id: &GenerationId,
        kind: FailureKind,
        reason: &str,
        label: &'static str,
    ) -> EngineResult<()> {
        let update = match self.inner.store.abort(id, kind, reason).await {
            Ok(update) => update,
            Err(e) if e.is_invalid_transition() => {
                debug!(generation_id = %id, "Generation already terminal: {}", e);
                return Ok(());
            }
            Err(e) => return Err(EngineError::from(e)),
        };
        metrics::record_generation_failed(label);
        self.inner
            .scheduler
            .cancel_jobs(id, &update.cancelled_jobs)
            .await;
        Ok(())
    }

    fn gate(&self, id: &GenerationId) -> Arc<Mutex<()>> {
        self.lock_gates()
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release(&self, id: &GenerationId) {
        self.lock_gates().remove(id);
    }

    fn lock_gates(&self) -> std::sync::MutexGuard<'_, HashMap<GenerationId, Arc<Mutex<()>>>> {
        self.inner
            .gates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn failure_label(generation: &Generation) -> &'static str {
    match generation.assembly {
        AssemblyOutcome::Failed { .. } => "assembly_failed",
        _ => "clip_failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ClipBehaviour, FakeAssembler, FakeRender, FakeVision};

    fn engine(render: FakeRender, dir: &std::path::Path) -> Orchestrator {
        let config = EngineConfig {
            retry_base_delay: Duration::ZERO,
            retry_max_delay: Duration::ZERO,
            verify_clip_duration: false,
            clips_dir: dir.join("clips"),
            output_dir: dir.join("out"),
            ..EngineConfig::default()
        };
        Orchestrator::new(
            config,
            Arc::new(GenerationStore::in_memory()),
            Arc::new(AnalysisCache::in_memory()),
            Collaborators {
                render: Arc::new(render),
                vision: Arc::new(FakeVision::new()),
                assembler: Arc::new(FakeAssembler::new()),
            },
        )
    }

    async fn approved(engine: &Orchestrator, dir: &std::path::Path) -> GenerationId {
        let image = dir.join("p.png");
        tokio::fs::write(&image, b"png").await.unwrap();
        engine
            .approve(FakeVision::script("Lamp"), SourceImage::from_path(&image))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_approve_rejects_sequence_gap() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(FakeRender::new(), dir.path());
        let mut script = FakeVision::script("Lamp");
        script.scenes.remove(5);

        let err = engine
            .approve(script, SourceImage::from_path("/tmp/p.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SequenceIntegrity(_)));
        assert!(engine.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_cancel_fails_generation_and_cancels_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(FakeRender::new().with_default(ClipBehaviour::Hang), dir.path());
        let id = approved(&engine, dir.path()).await;
        engine.poll_once().await;

        let view = engine.cancel(&id).await.unwrap();
        assert_eq!(view.status, GenerationStatus::Failed);
        assert!(view.final_video_url.is_none());

        let g = engine.store().get(&id).await.unwrap();
        assert_eq!(g.failure_reason.as_deref(), Some("cancelled by user"));
        assert_eq!(engine.poll_once().await, 0);

        // Cancelling twice is harmless.
        assert_eq!(engine.cancel(&id).await.unwrap().status, GenerationStatus::Failed);
    }

    #[tokio::test]
    async fn test_busy_generation_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let render = FakeRender::new();
        let engine = engine(render, dir.path());
        let id = approved(&engine, dir.path()).await;

        let gate = engine.gate(&id);
        let held = gate.lock().await;
        engine.drive(&id).await.unwrap();
        drop(held);

        let g = engine.store().get(&id).await.unwrap();
        assert_eq!(g.status, GenerationStatus::Pending);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(FakeRender::new(), dir.path());
        let handle = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
