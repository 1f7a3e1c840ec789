//! Generation orchestration engine.
//!
//! This crate provides:
//! - The content-addressed analysis cache and the Gemini vision client
//! - The clip job scheduler with retry, backoff and a global call budget
//! - The at-most-once assembly stage
//! - The timer-driven orchestrator with watchdog, cancellation and restart recovery
//! - The read-only status query interface

pub mod analysis;
pub mod assembly;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod vision;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use analysis::{content_hash, AnalysisCache, AnalysisOutcome, ScriptAnalyzer, VisionAnalyzer};
pub use assembly::{Assembler, AssemblyRun, AssemblyStage, FfmpegAssembler};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use logging::GenerationLogger;
pub use orchestrator::{Collaborators, Orchestrator};
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::ClipScheduler;
pub use status::StatusQuery;
pub use vision::{GeminiConfig, GeminiVisionClient};
