//! Assembly stage.
//!
//! Runs at most once per generation. Two guards stack: an in-process set of
//! generations currently assembling, and the store's compare-and-set on the
//! assembly outcome, which is persisted and so also holds across restarts.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use adgen_media::AssemblyParams;
use adgen_models::{Generation, GenerationId};
use adgen_store::GenerationStore;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::logging::GenerationLogger;
use crate::metrics;

/// Concatenation and normalization collaborator.
#[async_trait]
pub trait Assembler: Send + Sync {
    /// Join `inputs` in order into `output`; returns the written path.
    async fn assemble(&self, inputs: &[PathBuf], output: &Path) -> EngineResult<PathBuf>;

    fn name(&self) -> &'static str;
}

/// FFmpeg-backed [`Assembler`] producing a 9:16 720x1280 video.
#[derive(Debug, Clone, Default)]
pub struct FfmpegAssembler {
    params: AssemblyParams,
}

impl FfmpegAssembler {
    pub fn new(params: AssemblyParams) -> Self {
        Self { params }
    }
}

#[async_trait]
impl Assembler for FfmpegAssembler {
    async fn assemble(&self, inputs: &[PathBuf], output: &Path) -> EngineResult<PathBuf> {
        let report = adgen_media::assemble(inputs, output, &self.params)
            .await
            .map_err(|e| EngineError::assembly(e.detail()))?;
        Ok(report.output)
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

/// What a call to [`AssemblyStage::run`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyRun {
    /// Another task holds the slot, or the generation is not ready.
    Skipped,
    Succeeded(String),
    Failed(String),
}

pub struct AssemblyStage {
    assembler: Arc<dyn Assembler>,
    store: Arc<GenerationStore>,
    output_dir: PathBuf,
    cleanup_clip_artifacts: bool,
    running: Mutex<HashSet<GenerationId>>,
}

/// Removes the generation from the running set when dropped.
struct RunningGuard<'a> {
    running: &'a Mutex<HashSet<GenerationId>>,
    id: GenerationId,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.id);
    }
}

impl AssemblyStage {
    pub fn new(assembler: Arc<dyn Assembler>, store: Arc<GenerationStore>, config: &EngineConfig) -> Self {
        Self {
            assembler,
            store,
            output_dir: config.output_dir.clone(),
            cleanup_clip_artifacts: config.cleanup_clip_artifacts,
            running: Mutex::new(HashSet::new()),
        }
    }

    /// Final video location for a generation.
    pub fn output_path(&self, id: &GenerationId) -> PathBuf {
        self.output_dir.join(format!("{}_final.mp4", id))
    }

    /// Assemble `id` if every clip completed and no assembly was attempted.
    pub async fn run(&self, id: &GenerationId) -> EngineResult<AssemblyRun> {
        let Some(_guard) = self.enter(id) else {
            return Ok(AssemblyRun::Skipped);
        };
        if !self.store.begin_assembly(id).await? {
            return Ok(AssemblyRun::Skipped);
        }

        let logger = GenerationLogger::new(id, "assembly");
        let generation = self.store.get(id).await?;
        let started = Instant::now();
        logger.log_start(&format!("assembling {} clips", generation.clips.len()));

        let outcome = match ordered_inputs(&generation) {
            Ok(inputs) => {
                let output = self.output_path(id);
                self.assembler
                    .assemble(&inputs, &output)
                    .await
                    .map(|path| (path, inputs))
            }
            Err(e) => Err(e),
        };
        metrics::record_assembly_duration(started.elapsed().as_secs_f64());

        match outcome {
            Ok((path, inputs)) => {
                let path = path.to_string_lossy().into_owned();
                self.store.set_final_artifact(id, path.clone()).await?;
                logger.log_completion(&format!(
                    "final video at {} after {:.1}s",
                    path,
                    started.elapsed().as_secs_f64()
                ));
                if self.cleanup_clip_artifacts {
                    adgen_media::remove_files(&inputs).await;
                }
                Ok(AssemblyRun::Succeeded(path))
            }
            Err(e) => {
                let reason = e.to_string();
                logger.log_error(&reason);
                self.store.record_assembly_failure(id, reason.clone()).await?;
                Ok(AssemblyRun::Failed(reason))
            }
        }
    }

    fn enter(&self, id: &GenerationId) -> Option<RunningGuard<'_>> {
        let mut running = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !running.insert(id.clone()) {
            return None;
        }
        Some(RunningGuard {
            running: &self.running,
            id: id.clone(),
        })
    }
}

/// Clip artifacts in sequence order, rechecking sequence integrity.
fn ordered_inputs(generation: &Generation) -> EngineResult<Vec<PathBuf>> {
    generation.validate_sequence()?;
    let artifacts = generation
        .ordered_artifacts()
        .ok_or_else(|| EngineError::assembly("not every clip has an artifact"))?;
    Ok(artifacts.into_iter().map(PathBuf::from).collect())
}
