//! Clip job scheduler.
//!
//! Submits one render job per pending clip, polls generating clips to a
//! terminal state and applies the retry policy. Every external call holds a
//! permit from one global semaphore, so at most `max_concurrent_calls` render
//! calls are outstanding across all generations. Tokio's semaphore is FIFO,
//! which keeps the budget fair between generations.
//!
//! The scheduler never keeps state of its own: everything it needs to resume
//! after a restart is read from the store. A clip with a job id is polled,
//! never resubmitted.

use chrono::Utc;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::timeout;
use tracing::{debug, warn};

use adgen_models::{
    Clip, ClipId, ClipState, ClipTransition, FailureKind, Generation, GenerationId, RenderJobId,
};
use adgen_render::{ReferenceImage, RenderJobState, RenderRequest, RenderService};
use adgen_store::GenerationStore;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::logging::GenerationLogger;
use crate::metrics;
use crate::retry::{RetryDecision, RetryPolicy};

pub struct ClipScheduler {
    render: Arc<dyn RenderService>,
    store: Arc<GenerationStore>,
    permits: Semaphore,
    policy: RetryPolicy,
    config: EngineConfig,
}

impl ClipScheduler {
    pub fn new(
        render: Arc<dyn RenderService>,
        store: Arc<GenerationStore>,
        config: EngineConfig,
    ) -> Self {
        let policy = RetryPolicy::new(
            config.max_retries,
            config.retry_base_delay,
            config.retry_max_delay,
        );
        Self {
            render,
            store,
            permits: Semaphore::new(config.max_concurrent_calls.max(1)),
            policy,
            config,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Permits currently free; equals the cap when nothing is in flight.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Submit every pending clip whose backoff has elapsed, in sequence
    /// order. Returns the number of clips that moved to generating.
    pub async fn submit_ready(&self, generation: &Generation) -> EngineResult<usize> {
        let now = Utc::now();
        let mut ready: Vec<&Clip> = generation
            .clips
            .iter()
            .filter(|c| c.ready_for_submission(now))
            .collect();
        if ready.is_empty() || generation.is_terminal() {
            return Ok(0);
        }
        ready.sort_by_key(|c| c.sequence_index);

        let logger = GenerationLogger::new(&generation.id, "schedule");
        let image = match load_reference_image(generation).await {
            Ok(image) => image,
            Err(e) => {
                logger.log_error(&format!("cannot read source image: {}", e));
                let retryable = e.kind() != std::io::ErrorKind::NotFound;
                if let Some(first) = ready.first() {
                    self.handle_failure(
                        &generation.id,
                        &first.id,
                        format!("source image unavailable: {}", e),
                        retryable,
                        "submit",
                    )
                    .await?;
                }
                return Ok(0);
            }
        };

        let results = join_all(
            ready
                .iter()
                .map(|clip| self.submit_clip(&generation.id, &clip.id, &image, &logger)),
        )
        .await;

        let mut submitted = 0;
        for result in results {
            match result {
                Ok(true) => submitted += 1,
                Ok(false) => {}
                Err(e) => logger.log_warning(&format!("submission step failed: {}", e)),
            }
        }
        Ok(submitted)
    }

    async fn submit_clip(
        &self,
        generation_id: &GenerationId,
        clip_id: &ClipId,
        image: &ReferenceImage,
        logger: &GenerationLogger,
    ) -> EngineResult<bool> {
        let permit = self.acquire().await?;

        // The generation may have failed while this clip waited for a permit.
        let current = self.store.get(generation_id).await?;
        if current.is_terminal() {
            return Ok(false);
        }
        let Some(clip) = current
            .clip(clip_id)
            .filter(|c| c.ready_for_submission(Utc::now()))
        else {
            return Ok(false);
        };

        let request = RenderRequest {
            prompt: clip.prompt.clone(),
            image: image.clone(),
            duration_secs: self.config.clip_duration_secs,
        };
        let result = timeout(self.config.call_timeout, self.render.submit(&request)).await;
        drop(permit);

        match result {
            Ok(Ok(job_id)) => {
                let transition = ClipTransition::Submitted {
                    job_id: job_id.clone(),
                };
                match self.store.update_clip(generation_id, clip_id, transition).await {
                    Ok(update) => {
                        metrics::record_clip_submitted();
                        if let Some(clip) = update.generation.clip(clip_id) {
                            logger.log_clip(clip, "submitted");
                        }
                        Ok(true)
                    }
                    Err(e) => {
                        // The job exists at the provider but is not recorded.
                        warn!(
                            generation_id = %generation_id,
                            job_id = %job_id,
                            "Could not record submitted job, cancelling it: {}", e
                        );
                        self.cancel_jobs(generation_id, &[(clip_id.clone(), job_id)])
                            .await;
                        if e.is_invalid_transition() {
                            Ok(false)
                        } else {
                            Err(e.into())
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                let retryable = e.is_retryable();
                self.handle_failure(generation_id, clip_id, e.to_string(), retryable, "submit")
                    .await?;
                Ok(false)
            }
            Err(_) => {
                self.handle_failure(
                    generation_id,
                    clip_id,
                    "submission timed out".to_string(),
                    true,
                    "submit",
                )
                .await?;
                Ok(false)
            }
        }
    }

    /// Query every generating clip once and apply what the service reports.
    pub async fn poll_generating(&self, generation: &Generation) -> EngineResult<()> {
        if generation.is_terminal() {
            return Ok(());
        }
        let logger = GenerationLogger::new(&generation.id, "poll");
        let generating = generation
            .clips
            .iter()
            .filter(|c| matches!(c.state, ClipState::Generating { .. }));

        let results = join_all(generating.map(|clip| self.poll_clip(&generation.id, clip, &logger))).await;
        for result in results {
            if let Err(e) = result {
                logger.log_warning(&format!("poll step failed: {}", e));
            }
        }
        Ok(())
    }

    async fn poll_clip(
        &self,
        generation_id: &GenerationId,
        clip: &Clip,
        logger: &GenerationLogger,
    ) -> EngineResult<()> {
        let ClipState::Generating {
            job_id,
            submitted_at,
        } = &clip.state
        else {
            return Ok(());
        };

        let rendering_for = (Utc::now() - *submitted_at).to_std().unwrap_or_default();
        if rendering_for > self.config.clip_timeout {
            logger.warn_clip(clip, "render timed out");
            let message = format!(
                "render exceeded {}s",
                self.config.clip_timeout.as_secs()
            );
            self.fail_clip(generation_id, &clip.id, FailureKind::Timeout, message, Some(job_id.clone()))
                .await?;
            return Ok(());
        }

        let permit = self.acquire().await?;
        let result = timeout(self.config.call_timeout, self.render.status(job_id)).await;
        drop(permit);

        match result {
            Err(_) => {
                debug!(generation_id = %generation_id, job_id = %job_id, "Status query timed out");
                Ok(())
            }
            Ok(Err(e)) if e.is_retryable() => {
                debug!(generation_id = %generation_id, job_id = %job_id, "Status query failed, will re-poll: {}", e);
                Ok(())
            }
            // The job is unusable; render it again under the retry budget.
            Ok(Err(e)) => {
                self.handle_failure(generation_id, &clip.id, format!("status query: {}", e), true, "status")
                    .await
            }
            Ok(Ok(RenderJobState::Queued | RenderJobState::Running)) => Ok(()),
            Ok(Ok(RenderJobState::Succeeded { artifact_url })) => {
                self.persist_artifact(generation_id, clip, &artifact_url, logger)
                    .await
            }
            Ok(Ok(RenderJobState::Failed { reason, retryable })) => {
                logger.warn_clip(clip, &format!("render failed: {}", reason));
                self.handle_failure(generation_id, &clip.id, reason, retryable, "render")
                    .await
            }
        }
    }

    async fn persist_artifact(
        &self,
        generation_id: &GenerationId,
        clip: &Clip,
        artifact_url: &str,
        logger: &GenerationLogger,
    ) -> EngineResult<()> {
        let dest = self.clip_path(&clip.id);
        tokio::fs::create_dir_all(&self.config.clips_dir).await?;

        let permit = self.acquire().await?;
        let downloaded = self.render.download(artifact_url, &dest).await;
        drop(permit);

        if let Err(e) = downloaded {
            if e.is_retryable() {
                logger.warn_clip(clip, &format!("download failed, will retry: {}", e));
                return Ok(());
            }
            return self
                .handle_failure(generation_id, &clip.id, format!("download: {}", e), true, "download")
                .await;
        }

        let duration_secs = self.confirm_duration(clip, &dest, logger).await;
        let transition = ClipTransition::Completed {
            artifact_path: dest.to_string_lossy().into_owned(),
            duration_secs,
        };
        let update = self.store.update_clip(generation_id, &clip.id, transition).await?;
        metrics::record_clip_completed();
        if let Some(done) = update.generation.clip(&clip.id) {
            logger.log_clip(done, "completed");
        }
        Ok(())
    }

    /// Probe the downloaded clip. A mismatch is logged, never fatal.
    async fn confirm_duration(&self, clip: &Clip, path: &std::path::Path, logger: &GenerationLogger) -> f64 {
        let target = clip.target_duration_secs;
        if !self.config.verify_clip_duration {
            return target;
        }
        match adgen_media::get_duration(path).await {
            Ok(actual) => {
                if (actual - target).abs() > self.config.duration_tolerance_secs {
                    logger.warn_clip(
                        clip,
                        &format!("rendered {:.2}s, expected {:.2}s", actual, target),
                    );
                }
                actual
            }
            Err(e) => {
                logger.warn_clip(clip, &format!("could not probe duration: {}", e));
                target
            }
        }
    }

    /// Apply the retry policy to a failed attempt.
    async fn handle_failure(
        &self,
        generation_id: &GenerationId,
        clip_id: &ClipId,
        reason: String,
        retryable: bool,
        source: &'static str,
    ) -> EngineResult<()> {
        let current = self.store.get(generation_id).await?;
        let Some(clip) = current.clip(clip_id) else {
            return Err(EngineError::not_found(format!("{}/clips/{}", generation_id, clip_id)));
        };
        if clip.status().is_terminal() || current.is_terminal() {
            return Ok(());
        }

        match self.policy.decide(clip.retry_count, retryable) {
            RetryDecision::Retry { delay } => {
                metrics::record_clip_retry(source);
                let logger = GenerationLogger::new(generation_id, "schedule");
                logger.warn_clip(
                    clip,
                    &format!(
                        "retry {}/{} in {}s: {}",
                        clip.retry_count + 1,
                        self.policy.max_retries,
                        delay.as_secs(),
                        reason
                    ),
                );
                let retry_after = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                let transition = ClipTransition::RetryScheduled {
                    reason,
                    retry_after,
                };
                match self.store.update_clip(generation_id, clip_id, transition).await {
                    Ok(_) => Ok(()),
                    Err(e) if e.is_invalid_transition() => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
            RetryDecision::Exhausted => {
                self.fail_clip(generation_id, clip_id, FailureKind::RetriesExhausted, reason, None)
                    .await
            }
            RetryDecision::Permanent => {
                self.fail_clip(generation_id, clip_id, FailureKind::Permanent, reason, None)
                    .await
            }
        }
    }

    /// Fail one clip and cancel whatever the cascade left in flight,
    /// including the clip's own job when it still has one.
    async fn fail_clip(
        &self,
        generation_id: &GenerationId,
        clip_id: &ClipId,
        kind: FailureKind,
        message: String,
        own_job: Option<RenderJobId>,
    ) -> EngineResult<()> {
        let transition = ClipTransition::Failed { kind, message };
        let update = match self.store.update_clip(generation_id, clip_id, transition).await {
            Ok(update) => update,
            Err(e) if e.is_invalid_transition() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        metrics::record_clip_failed(kind);

        let mut jobs = update.cancelled_jobs;
        if let Some(job) = own_job {
            jobs.push((clip_id.clone(), job));
        }
        self.cancel_jobs(generation_id, &jobs).await;
        Ok(())
    }

    /// Best-effort cancellation of outstanding jobs. Errors are logged.
    pub async fn cancel_jobs(&self, generation_id: &GenerationId, jobs: &[(ClipId, RenderJobId)]) {
        if jobs.is_empty() {
            return;
        }
        metrics::record_render_cancels(jobs.len());

        join_all(jobs.iter().map(|(clip_id, job_id)| async move {
            let Ok(_permit) = self.acquire().await else {
                return;
            };
            match timeout(self.config.call_timeout, self.render.cancel(job_id)).await {
                Ok(Ok(())) => debug!(
                    generation_id = %generation_id,
                    clip_id = %clip_id,
                    job_id = %job_id,
                    "Cancelled render job"
                ),
                Ok(Err(e)) => warn!(
                    generation_id = %generation_id,
                    job_id = %job_id,
                    "Render job cancel failed: {}", e
                ),
                Err(_) => warn!(
                    generation_id = %generation_id,
                    job_id = %job_id,
                    "Render job cancel timed out"
                ),
            }
        }))
        .await;
    }

    /// Where the artifact of `clip_id` is persisted.
    pub fn clip_path(&self, clip_id: &ClipId) -> PathBuf {
        self.config.clips_dir.join(format!("{}.mp4", clip_id))
    }

    async fn acquire(&self) -> EngineResult<SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|_| EngineError::config_error("render call budget closed"))
    }
}

async fn load_reference_image(generation: &Generation) -> std::io::Result<ReferenceImage> {
    let bytes = tokio::fs::read(&generation.source_image.reference).await?;
    Ok(ReferenceImage::new(
        bytes,
        generation.source_image.mime_type.clone(),
    ))
}
