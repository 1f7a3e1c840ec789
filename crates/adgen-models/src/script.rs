//! Script data produced by the vision model and the approved snapshot.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::SequenceError;

/// Number of scenes the vision model is asked for (12 x 5s = 60s).
pub const DEFAULT_SCENE_COUNT: usize = 12;

/// Tone applied when the script does not name one.
pub const DEFAULT_TONE: &str = "UGC";

/// One scene of a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Scene {
    /// Position as numbered by the script author (0- or 1-based)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    /// Narrative role: hook, problem, solution, cta
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub prompt: String,
    #[serde(
        default,
        alias = "continuity_constraints",
        skip_serializing_if = "Option::is_none"
    )]
    pub continuity_constraint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shot_type: Option<String>,
}

/// Editable script as returned by analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ScriptData {
    pub product_name: String,
    pub master_description: String,
    pub scenes: Vec<Scene>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
}

impl ScriptData {
    /// Validate scene ordering and freeze the script.
    ///
    /// Scenes are ordered by their `id` when every scene has one, otherwise
    /// by list position. Gaps, duplicates and empty prompts are rejected.
    pub fn approve(self) -> Result<ScriptSnapshot, SequenceError> {
        if self.scenes.is_empty() {
            return Err(SequenceError::Empty);
        }
        if let Some(pos) = self.scenes.iter().position(|s| s.prompt.trim().is_empty()) {
            return Err(SequenceError::EmptyPrompt(pos));
        }

        let with_ids = self.scenes.iter().filter(|s| s.id.is_some()).count();
        let mut scenes = self.scenes;

        if with_ids == scenes.len() {
            let ids: Vec<u32> = scenes.iter().filter_map(|s| s.id).collect();
            let start = ids.iter().copied().min().unwrap_or(0);
            if start > 1 {
                return Err(SequenceError::BadStart(start));
            }
            check_contiguous(&ids, start)?;
            scenes.sort_by_key(|s| s.id);
        } else if with_ids != 0 {
            return Err(SequenceError::MixedIds);
        }

        Ok(ScriptSnapshot {
            product_name: self.product_name,
            master_description: self.master_description,
            tone: self
                .tone
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_TONE.to_string()),
            scenes,
            approved_at: Utc::now(),
        })
    }
}

/// Immutable script captured when the user approves it.
///
/// Fields are private; edits require a new generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ScriptSnapshot {
    product_name: String,
    master_description: String,
    scenes: Vec<Scene>,
    tone: String,
    approved_at: DateTime<Utc>,
}

impl ScriptSnapshot {
    pub fn product_name(&self) -> &str {
        &self.product_name
    }

    pub fn master_description(&self) -> &str {
        &self.master_description
    }

    /// Scenes in final concatenation order.
    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn tone(&self) -> &str {
        &self.tone
    }

    pub fn approved_at(&self) -> DateTime<Utc> {
        self.approved_at
    }
}

/// Check that `indices` are exactly `start..start + len` with no repeats.
pub fn check_contiguous(indices: &[u32], start: u32) -> Result<(), SequenceError> {
    if indices.is_empty() {
        return Err(SequenceError::Empty);
    }

    let mut sorted = indices.to_vec();
    sorted.sort_unstable();

    for (pos, &value) in sorted.iter().enumerate() {
        if pos > 0 && sorted[pos - 1] == value {
            return Err(SequenceError::Duplicate(value));
        }
        let expected = start + pos as u32;
        if value != expected {
            return Err(SequenceError::Missing(expected));
        }
    }
    Ok(())
}
