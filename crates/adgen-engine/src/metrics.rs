//! Engine metrics recorded through the `metrics` facade.
//!
//! The binary installs the Prometheus recorder; without one these calls are
//! no-ops, which is what the tests rely on.

use metrics::{counter, gauge, histogram};

use adgen_models::FailureKind;

/// Metric names as constants for consistency.
pub mod names {
    pub const CLIPS_SUBMITTED_TOTAL: &str = "adgen_clips_submitted_total";
    pub const CLIP_RETRIES_TOTAL: &str = "adgen_clip_retries_total";
    pub const CLIPS_COMPLETED_TOTAL: &str = "adgen_clips_completed_total";
    pub const CLIPS_FAILED_TOTAL: &str = "adgen_clips_failed_total";
    pub const RENDER_CANCELS_TOTAL: &str = "adgen_render_cancels_total";

    pub const GENERATIONS_CREATED_TOTAL: &str = "adgen_generations_created_total";
    pub const GENERATIONS_COMPLETED_TOTAL: &str = "adgen_generations_completed_total";
    pub const GENERATIONS_FAILED_TOTAL: &str = "adgen_generations_failed_total";
    pub const GENERATIONS_ACTIVE: &str = "adgen_generations_active";

    pub const ASSEMBLY_DURATION_SECONDS: &str = "adgen_assembly_duration_seconds";

    pub const ANALYSIS_CACHE_HITS_TOTAL: &str = "adgen_analysis_cache_hits_total";
    pub const ANALYSIS_CACHE_MISSES_TOTAL: &str = "adgen_analysis_cache_misses_total";
}

pub fn record_clip_submitted() {
    counter!(names::CLIPS_SUBMITTED_TOTAL).increment(1);
}

pub fn record_clip_retry(source: &'static str) {
    counter!(names::CLIP_RETRIES_TOTAL, "source" => source).increment(1);
}

pub fn record_clip_completed() {
    counter!(names::CLIPS_COMPLETED_TOTAL).increment(1);
}

/// Record a terminal clip failure, labelled by kind.
pub fn record_clip_failed(kind: FailureKind) {
    counter!(names::CLIPS_FAILED_TOTAL, "kind" => kind.as_str()).increment(1);
}

pub fn record_render_cancels(count: usize) {
    counter!(names::RENDER_CANCELS_TOTAL).increment(count as u64);
}

pub fn record_generation_created() {
    counter!(names::GENERATIONS_CREATED_TOTAL).increment(1);
}

pub fn record_generation_completed() {
    counter!(names::GENERATIONS_COMPLETED_TOTAL).increment(1);
}

pub fn record_generation_failed(reason: &'static str) {
    counter!(names::GENERATIONS_FAILED_TOTAL, "reason" => reason).increment(1);
}

/// Update the active generations gauge.
pub fn set_active_generations(count: usize) {
    gauge!(names::GENERATIONS_ACTIVE).set(count as f64);
}

pub fn record_assembly_duration(duration_secs: f64) {
    histogram!(names::ASSEMBLY_DURATION_SECONDS).record(duration_secs);
}

pub fn record_analysis_cache(hit: bool) {
    if hit {
        counter!(names::ANALYSIS_CACHE_HITS_TOTAL).increment(1);
    } else {
        counter!(names::ANALYSIS_CACHE_MISSES_TOTAL).increment(1);
    }
}
