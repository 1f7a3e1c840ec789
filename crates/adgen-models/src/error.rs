//! Validation errors for scripts and clip transitions.

use thiserror::Error;

use crate::clip::{ClipId, ClipStatus};

/// Scene ordering problems detected before any clip is scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceError {
    #[error("Script has no scenes")]
    Empty,

    #[error("Duplicate sequence index {0}")]
    Duplicate(u32),

    #[error("Sequence index {0} is missing")]
    Missing(u32),

    #[error("Scene ids must start at 0 or 1, found {0}")]
    BadStart(u32),

    #[error("Scene ids must be set on every scene or on none")]
    MixedIds,

    #[error("Scene at position {0} has an empty prompt")]
    EmptyPrompt(usize),
}

/// A clip transition that is not valid from the clip's current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Clip {clip_id} cannot apply '{transition}' while {from}")]
pub struct TransitionError {
    pub clip_id: ClipId,
    pub from: ClipStatus,
    pub transition: &'static str,
}
