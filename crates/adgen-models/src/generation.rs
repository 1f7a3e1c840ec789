//! Generation aggregate: one end-to-end ad request and its clips.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use uuid::Uuid;

use crate::aggregate::{aggregate_with, needs_assembly, AssemblyPolicy, ClipSignal};
use crate::clip::{Clip, ClipId, ClipState, RenderJobId};
use crate::error::SequenceError;
use crate::prompt::{shared_context, shot_prompt};
use crate::script::{check_contiguous, ScriptSnapshot};
use crate::status::{ClipStatusEntry, GenerationStatusView};

/// Unique identifier for a generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct GenerationId(pub String);

impl GenerationId {
    /// Generate a new random generation ID.
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

impl Default for GenerationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Overall generation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    /// No clip submitted yet
    #[default]
    Pending,
    /// At least one clip in flight
    Generating,
    /// All clips rendered, assembly pending or running
    Assembling,
    /// Final video produced
    Completed,
    /// A clip or the assembly failed
    Failed,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Pending => "pending",
            GenerationStatus::Generating => "generating",
            GenerationStatus::Assembling => "assembling",
            GenerationStatus::Completed => "completed",
            GenerationStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationStatus::Completed | GenerationStatus::Failed)
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of the single assembly step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AssemblyOutcome {
    #[default]
    NotAttempted,
    InProgress {
        started_at: DateTime<Utc>,
    },
    Succeeded {
        artifact_path: String,
    },
    Failed {
        reason: String,
    },
}

impl AssemblyOutcome {
    pub fn is_attempted(&self) -> bool {
        !matches!(self, AssemblyOutcome::NotAttempted)
    }
}

/// Reference to the uploaded product image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SourceImage {
    /// Local path of the stored upload
    pub reference: String,
    pub mime_type: String,
}

impl SourceImage {
    /// Build a reference, guessing the MIME type from the file extension.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mime_type = match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("png") => "image/png",
            Some("webp") => "image/webp",
            Some("gif") => "image/gif",
            _ => "image/jpeg",
        };
        Self {
            reference: path.to_string_lossy().into_owned(),
            mime_type: mime_type.to_string(),
        }
    }
}

/// One ad request: the approved script, its clips and the assembly result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Generation {
    pub id: GenerationId,
    pub source_image: SourceImage,
    pub script: ScriptSnapshot,
    /// Clips ordered by `sequence_index`
    pub clips: Vec<Clip>,
    /// Derived from clips and assembly; written only through `refresh_status`
    pub status: GenerationStatus,
    #[serde(default)]
    pub assembly: AssemblyOutcome,
    /// Fixed at approval
    #[serde(default)]
    pub assembly_policy: AssemblyPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_artifact: Option<String>,
    /// Diagnostic reason for a failed generation. Never exposed to clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Generation {
    /// Create a generation with one pending clip per scene.
    pub fn from_script(
        script: ScriptSnapshot,
        source_image: SourceImage,
    ) -> Result<Self, SequenceError> {
        let id = GenerationId::new();
        let shared = shared_context(&script);
        let total = script.scenes().len();

        let clips: Vec<Clip> = script
            .scenes()
            .iter()
            .enumerate()
            .map(|(pos, scene)| {
                Clip::new(
                    id.clone(),
                    pos as u32,
                    scene.role.clone(),
                    shot_prompt(&shared, scene, pos, total),
                )
            })
            .collect();

        let now = Utc::now();
        let generation = Self {
            id,
            source_image,
            script,
            clips,
            status: GenerationStatus::Pending,
            assembly: AssemblyOutcome::NotAttempted,
            assembly_policy: AssemblyPolicy::FailFast,
            final_artifact: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        generation.validate_sequence()?;
        Ok(generation)
    }

    pub fn with_assembly_policy(mut self, policy: AssemblyPolicy) -> Self {
        self.assembly_policy = policy;
        self
    }

    /// Check that clip indices are exactly `0..N`.
    pub fn validate_sequence(&self) -> Result<(), SequenceError> {
        let indices: Vec<u32> = self.clips.iter().map(|c| c.sequence_index).collect();
        check_contiguous(&indices, 0)
    }

    pub fn clip_signals(&self) -> Vec<ClipSignal> {
        self.clips.iter().map(Clip::signal).collect()
    }

    /// Status the aggregator computes for the current clips and assembly.
    pub fn derived_status(&self) -> GenerationStatus {
        aggregate_with(self.assembly_policy, &self.clip_signals(), &self.assembly)
    }

    pub fn needs_assembly(&self) -> bool {
        !self.is_terminal()
            && needs_assembly(self.assembly_policy, &self.clip_signals(), &self.assembly)
    }

    /// Recompute `status` from clips and assembly.
    pub fn refresh_status(&mut self, now: DateTime<Utc>) {
        self.status = self.derived_status();
        self.updated_at = now;
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn clip(&self, clip_id: &ClipId) -> Option<&Clip> {
        self.clips.iter().find(|c| &c.id == clip_id)
    }

    pub fn clip_mut(&mut self, clip_id: &ClipId) -> Option<&mut Clip> {
        self.clips.iter_mut().find(|c| &c.id == clip_id)
    }

    /// Clips with a render job currently outstanding.
    pub fn in_flight_jobs(&self) -> Vec<(ClipId, RenderJobId)> {
        self.clips
            .iter()
            .filter_map(|c| c.job_id().map(|j| (c.id.clone(), j.clone())))
            .collect()
    }

    /// Artifact paths in concatenation order.
    ///
    /// `None` unless every clip completed, or under a partial policy unless
    /// every clip is terminal. Failed clips are skipped in the partial case.
    pub fn ordered_artifacts(&self) -> Option<Vec<String>> {
        let mut clips: Vec<&Clip> = self.clips.iter().collect();
        clips.sort_by_key(|c| c.sequence_index);
        let skip_failed = self.assembly_policy.allows_partial();
        let artifacts: Vec<String> = clips
            .into_iter()
            .filter_map(|c| match &c.state {
                ClipState::Completed { artifact_path, .. } => Some(Some(artifact_path.clone())),
                ClipState::Failed { .. } if skip_failed => None,
                _ => Some(None),
            })
            .collect::<Option<_>>()?;
        (!artifacts.is_empty()).then_some(artifacts)
    }

    /// Read-only projection for polling clients.
    pub fn status_view(&self) -> GenerationStatusView {
        let mut clips: Vec<ClipStatusEntry> = self
            .clips
            .iter()
            .map(|c| ClipStatusEntry {
                sequence_index: c.sequence_index,
                status: c.status(),
            })
            .collect();
        clips.sort_by_key(|c| c.sequence_index);

        GenerationStatusView {
            id: self.id.clone(),
            status: self.status,
            clips,
            final_video_url: if self.status == GenerationStatus::Completed {
                self.final_artifact.clone()
            } else {
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::ClipTransition;
    use crate::script::{Scene, ScriptData, DEFAULT_SCENE_COUNT};

    fn generation(scenes: usize) -> Generation {
        let script = ScriptData {
            product_name: "Glow Serum".into(),
            master_description: "amber bottle".into(),
            scenes: (0..scenes)
                .map(|i| Scene {
                    id: Some(i as u32 + 1),
                    role: None,
                    prompt: format!("scene {}", i + 1),
                    continuity_constraint: None,
                    shot_type: None,
                })
                .collect(),
            tone: None,
        }
        .approve()
        .unwrap();
        Generation::from_script(script, SourceImage::from_path("/uploads/p.png")).unwrap()
    }

    #[test]
    fn test_creates_one_clip_per_scene_with_contiguous_indices() {
        let g = generation(DEFAULT_SCENE_COUNT);
        assert_eq!(g.clips.len(), DEFAULT_SCENE_COUNT);
        let indices: Vec<u32> = g.clips.iter().map(|c| c.sequence_index).collect();
        assert_eq!(indices, (0..DEFAULT_SCENE_COUNT as u32).collect::<Vec<_>>());
        assert!(g.clips.iter().all(|c| c.generation_id == g.id));
        assert!(g.clips[3].prompt.contains("Shot 4 of 12: scene 4"));
        assert_eq!(g.status, GenerationStatus::Pending);
        assert_eq!(g.source_image.mime_type, "image/png");
    }

    #[test]
    fn test_ordered_artifacts_requires_every_clip() {
        let mut g = generation(2);
        let now = Utc::now();
        for (i, clip) in g.clips.iter_mut().enumerate().rev() {
            clip.apply(
                ClipTransition::Submitted {
                    job_id: RenderJobId::new(format!("t{i}")),
                },
                now,
            )
            .unwrap();
        }
        assert!(g.ordered_artifacts().is_none());
        assert_eq!(g.in_flight_jobs().len(), 2);

        for clip in g.clips.iter_mut().rev() {
            let path = format!("/clips/{}.mp4", clip.sequence_index);
            clip.apply(
                ClipTransition::Completed {
                    artifact_path: path,
                    duration_secs: 5.0,
                },
                now,
            )
            .unwrap();
        }
        assert_eq!(
            g.ordered_artifacts().unwrap(),
            vec!["/clips/0.mp4".to_string(), "/clips/1.mp4".to_string()]
        );
        g.refresh_status(now);
        assert_eq!(g.status, GenerationStatus::Assembling);
    }

    #[test]
    fn test_partial_policy_skips_failed_clips() {
        let mut g = generation(3).with_assembly_policy(AssemblyPolicy::partial(2));
        let now = Utc::now();
        g.clips[1]
            .apply(
                ClipTransition::Failed {
                    kind: crate::clip::FailureKind::Permanent,
                    message: "unsafe image".into(),
                },
                now,
            )
            .unwrap();
        assert!(g.ordered_artifacts().is_none());

        for i in [2, 0] {
            g.clips[i]
                .apply(
                    ClipTransition::Submitted {
                        job_id: RenderJobId::new(format!("t{i}")),
                    },
                    now,
                )
                .unwrap();
            g.clips[i]
                .apply(
                    ClipTransition::Completed {
                        artifact_path: format!("/clips/{i}.mp4"),
                        duration_secs: 5.0,
                    },
                    now,
                )
                .unwrap();
        }
        assert_eq!(
            g.ordered_artifacts().unwrap(),
            vec!["/clips/0.mp4".to_string(), "/clips/2.mp4".to_string()]
        );
        g.refresh_status(now);
        assert_eq!(g.status, GenerationStatus::Assembling);
        assert!(g.needs_assembly());

        g.assembly_policy = AssemblyPolicy::FailFast;
        assert!(g.ordered_artifacts().is_none());
        assert_eq!(g.derived_status(), GenerationStatus::Failed);
    }

    #[test]
    fn test_policy_defaults_to_fail_fast_for_old_documents() {
        let g = generation(1);
        let mut value = serde_json::to_value(&g).unwrap();
        value.as_object_mut().unwrap().remove("assembly_policy");
        let restored: Generation = serde_json::from_value(value).unwrap();
        assert_eq!(restored.assembly_policy, AssemblyPolicy::FailFast);
    }

    #[test]
    fn test_validate_sequence_detects_gap() {
        let mut g = generation(3);
        g.clips[2].sequence_index = 5;
        assert_eq!(g.validate_sequence(), Err(SequenceError::Missing(2)));
    }

    #[test]
    fn test_status_view_hides_artifact_until_completed() {
        let mut g = generation(1);
        g.final_artifact = Some("/out/x_final.mp4".into());
        assert!(g.status_view().final_video_url.is_none());

        g.assembly = AssemblyOutcome::Succeeded {
            artifact_path: "/out/x_final.mp4".into(),
        };
        g.status = GenerationStatus::Completed;
        let view = g.status_view();
        assert_eq!(view.final_video_url.as_deref(), Some("/out/x_final.mp4"));
        assert_eq!(view.clips.len(), 1);
    }
}
