//! Offline render service that synthesizes clips locally with FFmpeg.
//!
//! Used when no render API key is configured. Jobs succeed immediately and
//! the "artifact" is a solid-color clip with a silent audio track, produced
//! at download time. Job ids carry the clip length, so nothing is kept in
//! memory and jobs survive a restart.

use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info};

use adgen_media::{FfmpegCommand, FfmpegRunner};
use adgen_models::RenderJobId;

use crate::error::{RenderError, RenderResult};
use crate::types::{RenderJobState, RenderRequest, RenderService};

const JOB_PREFIX: &str = "placeholder-";
const ARTIFACT_SCHEME: &str = "placeholder://";

/// Frame and encoding settings for synthesized clips.
#[derive(Debug, Clone)]
pub struct PlaceholderConfig {
    pub width: u32,
    pub height: u32,
    pub color: String,
    pub frame_rate: u32,
    /// Timeout for each FFmpeg run
    pub timeout_secs: u64,
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            width: 720,
            height: 1280,
            color: "black".to_string(),
            frame_rate: 30,
            timeout_secs: 120,
        }
    }
}

/// Render service backed by FFmpeg's `lavfi` sources.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderRenderer {
    config: PlaceholderConfig,
}

impl PlaceholderRenderer {
    pub fn new(config: PlaceholderConfig) -> Self {
        Self { config }
    }

    fn command(&self, duration_secs: u32, dest: &Path) -> FfmpegCommand {
        let c = &self.config;
        let video = format!(
            "color=c={}:s={}x{}:r={}:d={}",
            c.color, c.width, c.height, c.frame_rate, duration_secs
        );
        let audio = format!("anullsrc=r=44100:cl=stereo:d={duration_secs}");
        FfmpegCommand::new(video, dest)
            .input_args(["-f", "lavfi", "-i"])
            .input_args([audio])
            .input_args(["-f", "lavfi"])
            .video_codec("libx264")
            .preset("veryfast")
            .pixel_format("yuv420p")
            .audio_codec("aac")
            .output_arg("-shortest")
    }
}

fn job_id(duration_secs: u32) -> RenderJobId {
    RenderJobId::new(format!(
        "{JOB_PREFIX}{duration_secs}s-{}",
        uuid::Uuid::new_v4().simple()
    ))
}

/// Clip length encoded in a placeholder job id.
fn job_duration(job_id: &RenderJobId) -> Option<u32> {
    let rest = job_id.as_str().strip_prefix(JOB_PREFIX)?;
    let (secs, _) = rest.split_once("s-")?;
    secs.parse().ok()
}

fn artifact_duration(artifact_url: &str) -> Option<u32> {
    artifact_url.strip_prefix(ARTIFACT_SCHEME)?.parse().ok()
}

#[async_trait]
impl RenderService for PlaceholderRenderer {
    async fn submit(&self, request: &RenderRequest) -> RenderResult<RenderJobId> {
        let id = job_id(request.duration_secs);
        info!(task_id = %id, "Placeholder render task created");
        Ok(id)
    }

    async fn status(&self, job_id: &RenderJobId) -> RenderResult<RenderJobState> {
        let secs = job_duration(job_id).ok_or_else(|| {
            RenderError::invalid_response(format!("not a placeholder job: {job_id}"))
        })?;
        Ok(RenderJobState::Succeeded {
            artifact_url: format!("{ARTIFACT_SCHEME}{secs}"),
        })
    }

    async fn cancel(&self, job_id: &RenderJobId) -> RenderResult<()> {
        debug!(task_id = %job_id, "Placeholder render task dropped");
        Ok(())
    }

    async fn download(&self, artifact_url: &str, dest: &Path) -> RenderResult<u64> {
        let secs = artifact_duration(artifact_url).ok_or_else(|| {
            RenderError::invalid_response(format!("not a placeholder artifact: {artifact_url}"))
        })?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        FfmpegRunner::new()
            .with_timeout(self.config.timeout_secs)
            .run(&self.command(secs, dest))
            .await?;

        let size = tokio::fs::metadata(dest).await?.len();
        info!(path = %dest.display(), bytes = size, "Placeholder clip written");
        Ok(size)
    }

    fn name(&self) -> &'static str {
        "placeholder"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReferenceImage;

    fn request(duration_secs: u32) -> RenderRequest {
        RenderRequest {
            prompt: "Shot 1: product on a marble counter".into(),
            image: ReferenceImage::new(b"png".to_vec(), "image/png"),
            duration_secs,
        }
    }

    #[tokio::test]
    async fn test_jobs_succeed_immediately_with_their_duration() {
        let renderer = PlaceholderRenderer::default();
        let first = renderer.submit(&request(5)).await.unwrap();
        let second = renderer.submit(&request(5)).await.unwrap();
        assert_ne!(first, second);

        let state = renderer.status(&first).await.unwrap();
        assert_eq!(
            state,
            RenderJobState::Succeeded {
                artifact_url: "placeholder://5".into()
            }
        );
        renderer.cancel(&second).await.unwrap();
    }

    #[tokio::test]
    async fn test_foreign_job_id_is_permanent_error() {
        let renderer = PlaceholderRenderer::default();
        let err = renderer
            .status(&RenderJobId::new("0385dc79-5ff8-4d82-bcb6-caa8bd9e9a11"))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());

        let dir = tempfile::tempdir().unwrap();
        let err = renderer
            .download("https://cdn.example.com/clip.mp4", &dir.path().join("c.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::InvalidResponse(_)));
    }

    #[test]
    fn test_command_reads_both_lavfi_sources() {
        let args = PlaceholderRenderer::default()
            .command(5, Path::new("clip.mp4"))
            .build_args();
        let inputs: Vec<&str> = args
            .iter()
            .enumerate()
            .filter(|(_, a)| *a == "-i")
            .map(|(i, _)| args[i + 1].as_str())
            .collect();
        assert_eq!(
            inputs,
            vec![
                "anullsrc=r=44100:cl=stereo:d=5",
                "color=c=black:s=720x1280:r=30:d=5"
            ]
        );
        assert!(args.contains(&"-shortest".to_string()));
    }

    #[tokio::test]
    async fn test_download_writes_playable_clip() {
        if adgen_media::check_ffmpeg().is_err() {
            return;
        }
        let renderer = PlaceholderRenderer::default();
        let id = renderer.submit(&request(2)).await.unwrap();
        let RenderJobState::Succeeded { artifact_url } = renderer.status(&id).await.unwrap() else {
            panic!("placeholder job did not succeed");
        };

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("clips").join("shot_01.mp4");
        let size = renderer.download(&artifact_url, &dest).await.unwrap();
        assert!(size > 0);
        assert!(dest.exists());
    }
}
