//! Generation handlers: approve, poll, cancel.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use adgen_models::{GenerationId, GenerationStatusView, ScriptData, SourceImage};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Request body for `POST /api/generations`.
#[derive(Debug, Deserialize)]
pub struct CreateGenerationRequest {
    /// The approved (possibly edited) script
    pub script: ScriptData,
    /// `image_ref` returned by the analysis endpoint
    pub image_ref: String,
}

/// Approve a script and start generating its clips.
pub async fn create_generation(
    State(state): State<AppState>,
    Json(request): Json<CreateGenerationRequest>,
) -> ApiResult<(StatusCode, Json<GenerationStatusView>)> {
    let image_path = resolve_upload(&state, &request.image_ref).await?;
    let view = state
        .engine
        .approve(request.script, SourceImage::from_path(image_path))
        .await?;

    info!(generation_id = %view.id, clips = view.clips.len(), "Generation created");
    Ok((StatusCode::CREATED, Json(view)))
}

/// Current status of a generation.
pub async fn generation_status(
    State(state): State<AppState>,
    Path(generation_id): Path<String>,
) -> ApiResult<Json<GenerationStatusView>> {
    let view = state
        .engine
        .status(&GenerationId::from_string(generation_id))
        .await?;
    Ok(Json(view))
}

/// Cancel a running generation.
pub async fn cancel_generation(
    State(state): State<AppState>,
    Path(generation_id): Path<String>,
) -> ApiResult<Json<GenerationStatusView>> {
    let id = GenerationId::from_string(generation_id);
    let view = state.engine.cancel(&id).await?;
    info!(generation_id = %id, status = ?view.status, "Generation cancelled");
    Ok(Json(view))
}

/// Map an `image_ref` onto a stored upload. Only bare file names are
/// accepted.
async fn resolve_upload(state: &AppState, image_ref: &str) -> ApiResult<std::path::PathBuf> {
    if !is_bare_file_name(image_ref) {
        return Err(ApiError::bad_request("invalid image_ref"));
    }
    let path = state.config.upload_dir.join(image_ref);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(ApiError::bad_request(format!(
            "unknown image_ref: {}",
            image_ref
        )));
    }
    Ok(path)
}

fn is_bare_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_file_names() {
        assert!(is_bare_file_name("ab12cd.png"));
        assert!(!is_bare_file_name(""));
        assert!(!is_bare_file_name("../etc/passwd"));
        assert!(!is_bare_file_name("dir/file.png"));
        assert!(!is_bare_file_name(".hidden"));
        assert!(!is_bare_file_name("a b.png"));
    }
}
