//! Shared data models for the ad generation engine.
//!
//! This crate provides Serde-serializable types for:
//! - Generations (one end-to-end ad request) and their clips
//! - Approved script snapshots and scene prompts
//! - The pure status aggregator that derives a generation's status
//! - The read-only status projection served to polling clients

pub mod aggregate;
pub mod clip;
pub mod error;
pub mod generation;
pub mod prompt;
pub mod script;
pub mod status;

// Re-export common types
pub use aggregate::{aggregate, aggregate_with, needs_assembly, AssemblyPolicy, ClipSignal};
pub use clip::{
    Clip, ClipId, ClipState, ClipStatus, ClipTransition, FailureKind, RenderJobId,
    CLIP_DURATION_SECS,
};
pub use error::{SequenceError, TransitionError};
pub use generation::{AssemblyOutcome, Generation, GenerationId, GenerationStatus, SourceImage};
pub use script::{check_contiguous, Scene, ScriptData, ScriptSnapshot, DEFAULT_SCENE_COUNT};
pub use status::{ClipStatusEntry, GenerationStatusView};
