//! Structured generation logging.
//!
//! Every lifecycle event of a generation carries the generation id and the
//! stage that emitted it, so one ad request can be followed across the
//! scheduler, the assembly stage and the watchdog.

use tracing::{error, info, warn, Span};

use adgen_models::{Clip, GenerationId};

/// Logger bound to one generation and one stage.
#[derive(Debug, Clone)]
pub struct GenerationLogger {
    generation_id: String,
    stage: &'static str,
}

impl GenerationLogger {
    /// Create a logger for `stage` (e.g. "schedule", "assembly", "watchdog").
    pub fn new(generation_id: &GenerationId, stage: &'static str) -> Self {
        Self {
            generation_id: generation_id.to_string(),
            stage,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            generation_id = %self.generation_id,
            stage = self.stage,
            "Generation started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            generation_id = %self.generation_id,
            stage = self.stage,
            "Generation progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            generation_id = %self.generation_id,
            stage = self.stage,
            "Generation warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            generation_id = %self.generation_id,
            stage = self.stage,
            "Generation error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            generation_id = %self.generation_id,
            stage = self.stage,
            "Generation completed: {}", message
        );
    }

    /// Clip-level event with the clip's position and job attached.
    pub fn log_clip(&self, clip: &Clip, message: &str) {
        info!(
            generation_id = %self.generation_id,
            stage = self.stage,
            clip_id = %clip.id,
            sequence_index = clip.sequence_index,
            job_id = clip.job_id().map(|j| j.as_str()).unwrap_or("-"),
            "Clip {}: {}", clip.sequence_index, message
        );
    }

    /// Clip-level warning, e.g. a retry or a duration mismatch.
    pub fn warn_clip(&self, clip: &Clip, message: &str) {
        warn!(
            generation_id = %self.generation_id,
            stage = self.stage,
            clip_id = %clip.id,
            sequence_index = clip.sequence_index,
            retry_count = clip.retry_count,
            "Clip {}: {}", clip.sequence_index, message
        );
    }

    pub fn generation_id(&self) -> &str {
        &self.generation_id
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    /// Span covering work done for this generation.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "generation",
            generation_id = %self.generation_id,
            stage = self.stage
        )
    }
}
