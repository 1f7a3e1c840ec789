//! Status projection served to polling clients.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::clip::ClipStatus;
use crate::generation::{GenerationId, GenerationStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ClipStatusEntry {
    pub sequence_index: u32,
    pub status: ClipStatus,
}

/// Coarse status of a generation. Carries no error detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GenerationStatusView {
    pub id: GenerationId,
    pub status: GenerationStatus,
    pub clips: Vec<ClipStatusEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_video_url: Option<String>,
}

impl GenerationStatusView {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of clips that finished rendering.
    pub fn completed_clips(&self) -> usize {
        self.clips
            .iter()
            .filter(|c| c.status == ClipStatus::Completed)
            .count()
    }
}
