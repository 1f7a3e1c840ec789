//! Clip records: one rendered scene of a generation.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::aggregate::ClipSignal;
use crate::error::TransitionError;
use crate::generation::GenerationId;

/// Target length of every rendered clip, in seconds.
pub const CLIP_DURATION_SECS: f64 = 5.0;

/// Unique identifier for a clip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ClipId(pub String);

impl ClipId {
    /// Generate a new random clip ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClipId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job identifier assigned by the render service on submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct RenderJobId(pub String);

impl RenderJobId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RenderJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse clip status exposed to readers and to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClipStatus {
    /// Not submitted yet, or waiting for a retry
    Pending,
    /// Submitted and rendering
    Generating,
    /// Rendered and persisted locally
    Completed,
    /// Terminally failed
    Failed,
}

impl ClipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipStatus::Pending => "pending",
            ClipStatus::Generating => "generating",
            ClipStatus::Completed => "completed",
            ClipStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ClipStatus::Completed | ClipStatus::Failed)
    }
}

impl fmt::Display for ClipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a clip ended up failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient failures used up the retry budget
    RetriesExhausted,
    /// The render service rejected the input
    Permanent,
    /// Per-clip render timeout or generation watchdog
    Timeout,
    /// Stopped because the generation failed or was cancelled
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::RetriesExhausted => "retries_exhausted",
            FailureKind::Permanent => "permanent",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Full clip state. Each variant carries only the fields valid for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClipState {
    Pending {
        /// Earliest time the next submission may happen
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after: Option<DateTime<Utc>>,
        /// Error that caused the last retry
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_error: Option<String>,
    },
    Generating {
        job_id: RenderJobId,
        submitted_at: DateTime<Utc>,
    },
    Completed {
        artifact_path: String,
        duration_secs: f64,
    },
    Failed {
        kind: FailureKind,
        message: String,
    },
}

impl Default for ClipState {
    fn default() -> Self {
        ClipState::Pending {
            retry_after: None,
            last_error: None,
        }
    }
}

impl ClipState {
    pub fn status(&self) -> ClipStatus {
        match self {
            ClipState::Pending { .. } => ClipStatus::Pending,
            ClipState::Generating { .. } => ClipStatus::Generating,
            ClipState::Completed { .. } => ClipStatus::Completed,
            ClipState::Failed { .. } => ClipStatus::Failed,
        }
    }

    /// Render job currently in flight, if any.
    pub fn job_id(&self) -> Option<&RenderJobId> {
        match self {
            ClipState::Generating { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

/// A requested change to a clip's state.
#[derive(Debug, Clone, PartialEq)]
pub enum ClipTransition {
    /// Render job accepted: pending -> generating.
    Submitted { job_id: RenderJobId },
    /// Transient failure with budget left: back to pending, retry counter +1.
    RetryScheduled {
        reason: String,
        retry_after: DateTime<Utc>,
    },
    /// Artifact persisted: generating -> completed.
    Completed {
        artifact_path: String,
        duration_secs: f64,
    },
    /// Terminal failure from pending or generating.
    Failed { kind: FailureKind, message: String },
}

impl ClipTransition {
    pub fn name(&self) -> &'static str {
        match self {
            ClipTransition::Submitted { .. } => "submitted",
            ClipTransition::RetryScheduled { .. } => "retry_scheduled",
            ClipTransition::Completed { .. } => "completed",
            ClipTransition::Failed { .. } => "failed",
        }
    }
}

/// One scene of a generation, rendered as a short clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Clip {
    pub id: ClipId,
    pub generation_id: GenerationId,
    /// Position in the final concatenation, 0-based
    pub sequence_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Full render prompt including the shared continuity context
    pub prompt: String,
    pub target_duration_secs: f64,
    /// Retries consumed so far (submission or render)
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub state: ClipState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Clip {
    /// Create a pending clip.
    pub fn new(
        generation_id: GenerationId,
        sequence_index: u32,
        role: Option<String>,
        prompt: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ClipId::new(),
            generation_id,
            sequence_index,
            role,
            prompt: prompt.into(),
            target_duration_secs: CLIP_DURATION_SECS,
            retry_count: 0,
            state: ClipState::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> ClipStatus {
        self.state.status()
    }

    /// A submission was attempted at least once, including a pending clip
    /// that is waiting on a retry.
    pub fn was_submitted(&self) -> bool {
        self.status() != ClipStatus::Pending || self.retry_count > 0
    }

    pub fn signal(&self) -> ClipSignal {
        ClipSignal::new(self.status(), self.was_submitted())
    }

    pub fn job_id(&self) -> Option<&RenderJobId> {
        self.state.job_id()
    }

    /// Whether the clip is pending and its backoff (if any) has elapsed.
    pub fn ready_for_submission(&self, now: DateTime<Utc>) -> bool {
        match &self.state {
            ClipState::Pending { retry_after, .. } => retry_after.map_or(true, |at| at <= now),
            _ => false,
        }
    }

    /// Apply a transition, rejecting anything not valid from the current state.
    pub fn apply(
        &mut self,
        transition: ClipTransition,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let from = self.status();
        let name = transition.name();
        let next = match (transition, from) {
            (ClipTransition::Submitted { job_id }, ClipStatus::Pending) => ClipState::Generating {
                job_id,
                submitted_at: now,
            },
            (
                ClipTransition::RetryScheduled {
                    reason,
                    retry_after,
                },
                ClipStatus::Pending | ClipStatus::Generating,
            ) => {
                self.retry_count += 1;
                ClipState::Pending {
                    retry_after: Some(retry_after),
                    last_error: Some(reason),
                }
            }
            (
                ClipTransition::Completed {
                    artifact_path,
                    duration_secs,
                },
                ClipStatus::Generating,
            ) => ClipState::Completed {
                artifact_path,
                duration_secs,
            },
            (ClipTransition::Failed { kind, message }, ClipStatus::Pending | ClipStatus::Generating) => {
                ClipState::Failed { kind, message }
            }
            _ => {
                return Err(TransitionError {
                    clip_id: self.id.clone(),
                    from,
                    transition: name,
                })
            }
        };

        self.state = next;
        self.updated_at = now;
        Ok(())
    }
}
