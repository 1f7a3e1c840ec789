//! Render service boundary.

use async_trait::async_trait;
use base64::Engine;
use std::path::Path;

use adgen_models::RenderJobId;

use crate::error::RenderResult;

/// Product image sent as the visual anchor of every clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ReferenceImage {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// Inline `data:` URI with base64 payload.
    pub fn to_data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

/// One render submission.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub prompt: String,
    pub image: ReferenceImage,
    pub duration_secs: u32,
}

/// External job state as reported by the render service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderJobState {
    Queued,
    Running,
    Succeeded { artifact_url: String },
    Failed { reason: String, retryable: bool },
}

/// Image-to-video render collaborator.
#[async_trait]
pub trait RenderService: Send + Sync {
    /// Submit a render job and return its id.
    async fn submit(&self, request: &RenderRequest) -> RenderResult<RenderJobId>;

    /// Current state of a submitted job.
    async fn status(&self, job_id: &RenderJobId) -> RenderResult<RenderJobState>;

    /// Best-effort cancellation of an outstanding job.
    async fn cancel(&self, job_id: &RenderJobId) -> RenderResult<()>;

    /// Fetch a finished artifact to `dest`, returning the byte count.
    async fn download(&self, artifact_url: &str, dest: &Path) -> RenderResult<u64>;

    fn name(&self) -> &'static str;
}
