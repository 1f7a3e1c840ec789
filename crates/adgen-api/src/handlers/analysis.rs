//! Product image analysis handler.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::Json;
use serde::Serialize;
use tracing::info;

use adgen_models::ScriptData;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Response for `POST /api/analyze-product`.
#[derive(Serialize)]
pub struct AnalyzeProductResponse {
    /// Name of the stored upload; pass it back when approving the script
    pub image_ref: String,
    pub script: ScriptData,
    pub cached: bool,
}

/// Analyze a product image (raw body, `Content-Type: image/*`) into an
/// editable script.
pub async fn analyze_product(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<AnalyzeProductResponse>> {
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
        .ok_or_else(|| ApiError::bad_request("Content-Type header is required"))?;
    let extension = image_extension(&mime_type).ok_or_else(|| {
        ApiError::bad_request(format!("unsupported image type: {}", mime_type))
    })?;
    if body.is_empty() {
        return Err(ApiError::bad_request("image body is empty"));
    }
    metrics::record_upload_bytes(body.len());

    let outcome = state.engine.analyze(&body, &mime_type).await?;

    // Uploads are keyed by content so a re-upload reuses the stored file
    let image_ref = format!("{}.{}", outcome.hash, extension);
    let path = state.config.upload_dir.join(&image_ref);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        tokio::fs::create_dir_all(&state.config.upload_dir).await?;
        tokio::fs::write(&path, &body).await?;
    }

    info!(
        image_ref = %image_ref,
        cached = outcome.cached,
        scenes = outcome.script.scenes.len(),
        "Product analyzed"
    );

    Ok(Json(AnalyzeProductResponse {
        image_ref,
        script: (*outcome.script).clone(),
        cached: outcome.cached,
    }))
}

fn image_extension(mime_type: &str) -> Option<&'static str> {
    match mime_type {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}
