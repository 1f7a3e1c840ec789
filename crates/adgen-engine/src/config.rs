//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use adgen_models::AssemblyPolicy;

/// Orchestration settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cadence of the orchestration loop
    pub poll_interval: Duration,
    /// Retry budget per clip (R)
    pub max_retries: u32,
    /// First backoff delay; doubles per retry
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Global cap on outstanding render calls (C)
    pub max_concurrent_calls: usize,
    /// Bound on each submit, status and cancel call
    pub call_timeout: Duration,
    /// Longest a clip may stay generating
    pub clip_timeout: Duration,
    /// Longest a generation may stay non-terminal
    pub watchdog_timeout: Duration,
    /// Target clip length sent to the render service
    pub clip_duration_secs: u32,
    /// Allowed deviation of a rendered clip from the target length
    pub duration_tolerance_secs: f64,
    /// Probe downloaded clips with ffprobe
    pub verify_clip_duration: bool,
    /// Downloaded clip artifacts
    pub clips_dir: PathBuf,
    /// Assembled videos
    pub output_dir: PathBuf,
    /// Public prefix for final video URLs; the store path is returned when unset
    pub public_output_base: Option<String>,
    /// Delete per-clip artifacts after a successful assembly
    pub cleanup_clip_artifacts: bool,
    /// On-disk mirror of the analysis cache; memory only when unset
    pub analysis_cache_dir: Option<PathBuf>,
    /// Assemble from the clips that completed instead of failing on the first
    /// failed clip
    pub allow_partial_assembly: bool,
    /// Fewest completed clips a partial assembly accepts
    pub min_partial_clips: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(5),
            retry_max_delay: Duration::from_secs(120),
            max_concurrent_calls: 3,
            call_timeout: Duration::from_secs(30),
            clip_timeout: Duration::from_secs(600),
            watchdog_timeout: Duration::from_secs(1800),
            clip_duration_secs: 5,
            duration_tolerance_secs: 1.0,
            verify_clip_duration: true,
            clips_dir: PathBuf::from("./data/clips"),
            output_dir: PathBuf::from("./data/outputs"),
            public_output_base: Some("/outputs".to_string()),
            cleanup_clip_artifacts: false,
            analysis_cache_dir: Some(PathBuf::from("./data/analysis")),
            allow_partial_assembly: false,
            min_partial_clips: 8,
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: Duration::from_secs(env_parse("ENGINE_POLL_INTERVAL_SECS", 5)),
            max_retries: env_parse("ENGINE_MAX_RETRIES", defaults.max_retries),
            retry_base_delay: Duration::from_secs(env_parse("ENGINE_RETRY_BASE_SECS", 5)),
            retry_max_delay: Duration::from_secs(env_parse("ENGINE_RETRY_MAX_SECS", 120)),
            max_concurrent_calls: env_parse(
                "ENGINE_MAX_CONCURRENT_CALLS",
                defaults.max_concurrent_calls,
            ),
            call_timeout: Duration::from_secs(env_parse("ENGINE_CALL_TIMEOUT_SECS", 30)),
            clip_timeout: Duration::from_secs(env_parse("ENGINE_CLIP_TIMEOUT_SECS", 600)),
            watchdog_timeout: Duration::from_secs(env_parse("ENGINE_WATCHDOG_SECS", 1800)),
            clip_duration_secs: env_parse("ENGINE_CLIP_DURATION_SECS", defaults.clip_duration_secs),
            duration_tolerance_secs: env_parse(
                "ENGINE_DURATION_TOLERANCE_SECS",
                defaults.duration_tolerance_secs,
            ),
            verify_clip_duration: env_parse("ENGINE_VERIFY_CLIP_DURATION", true),
            clips_dir: std::env::var("ENGINE_CLIPS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.clips_dir),
            output_dir: std::env::var("ENGINE_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            public_output_base: match std::env::var("ENGINE_PUBLIC_OUTPUT_BASE") {
                Ok(base) if base.is_empty() => None,
                Ok(base) => Some(base),
                Err(_) => defaults.public_output_base,
            },
            cleanup_clip_artifacts: env_parse("ENGINE_CLEANUP_CLIPS", false),
            analysis_cache_dir: match std::env::var("ENGINE_ANALYSIS_CACHE_DIR") {
                Ok(dir) if dir.is_empty() => None,
                Ok(dir) => Some(PathBuf::from(dir)),
                Err(_) => defaults.analysis_cache_dir,
            },
            allow_partial_assembly: env_parse("ENGINE_ALLOW_PARTIAL_ASSEMBLY", false),
            min_partial_clips: env_parse("ENGINE_MIN_PARTIAL_CLIPS", defaults.min_partial_clips),
        }
    }

    /// Policy stamped on new generations.
    pub fn assembly_policy(&self) -> AssemblyPolicy {
        if self.allow_partial_assembly {
            AssemblyPolicy::partial(self.min_partial_clips)
        } else {
            AssemblyPolicy::FailFast
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
