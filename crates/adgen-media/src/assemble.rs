//! Final video assembly: concat, loudness normalization, color normalization.
//!
//! Only the concat step is mandatory. Each normalization step falls back to
//! the previous step's output when FFmpeg rejects it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::probe_video;

/// Fixed output parameters for the assembled ad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyParams {
    /// Output frame width (9:16 portrait)
    pub width: u32,
    pub height: u32,
    pub crf: u8,
    pub preset: String,
    /// Integrated loudness target (LUFS)
    pub loudness_i: f64,
    pub loudness_lra: f64,
    /// True peak ceiling (dBTP)
    pub loudness_tp: f64,
    pub contrast: f64,
    pub saturation: f64,
    pub brightness: f64,
    /// Timeout for each FFmpeg step
    pub step_timeout_secs: u64,
}

impl Default for AssemblyParams {
    fn default() -> Self {
        Self {
            width: 720,
            height: 1280,
            crf: 18,
            preset: "medium".to_string(),
            loudness_i: -16.0,
            loudness_lra: 11.0,
            loudness_tp: -1.0,
            contrast: 1.05,
            saturation: 1.05,
            brightness: 0.02,
            step_timeout_secs: 600,
        }
    }
}

impl AssemblyParams {
    /// Scale into the target frame, letterboxing when the aspect differs.
    pub fn frame_filter(&self) -> String {
        let (w, h) = (self.width, self.height);
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1"
        )
    }

    pub fn loudness_filter(&self) -> String {
        format!(
            "loudnorm=I={}:LRA={}:tp={}",
            self.loudness_i, self.loudness_lra, self.loudness_tp
        )
    }

    pub fn color_filter(&self) -> String {
        format!(
            "eq=contrast={}:saturation={}:brightness={}",
            self.contrast, self.saturation, self.brightness
        )
    }
}

/// What the assembly actually applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyReport {
    pub output: PathBuf,
    pub loudness_normalized: bool,
    pub color_normalized: bool,
}

/// Concatenate `inputs` in order into `output` and normalize the result.
///
/// Intermediate files live in a temporary directory next to `output` and are
/// removed when this returns.
pub async fn assemble(
    inputs: &[PathBuf],
    output: &Path,
    params: &AssemblyParams,
) -> MediaResult<AssemblyReport> {
    if inputs.is_empty() {
        return Err(MediaError::NoInputs);
    }
    for input in inputs {
        if !input.exists() {
            return Err(MediaError::FileNotFound(input.clone()));
        }
    }

    let out_dir = output.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(out_dir).await?;
    let work = tempfile::Builder::new()
        .prefix(".assembly-")
        .tempdir_in(out_dir)?;

    let runner = FfmpegRunner::new().with_timeout(params.step_timeout_secs);

    // 1. Concatenate and re-encode into the target frame.
    let list_path = work.path().join("concat.txt");
    let mut list = String::new();
    for input in inputs {
        let absolute = tokio::fs::canonicalize(input).await?;
        list.push_str(&concat_list_entry(&absolute));
        list.push('\n');
    }
    tokio::fs::write(&list_path, list).await?;

    let concatenated = work.path().join("concat.mp4");
    let concat = FfmpegCommand::concat_list(&list_path, &concatenated)
        .video_filter(params.frame_filter())
        .video_codec("libx264")
        .audio_codec("aac")
        .preset(params.preset.clone())
        .crf(params.crf)
        .pixel_format("yuv420p");
    runner.run(&concat).await?;
    info!(clips = inputs.len(), "Concatenated clips");

    let mut current = concatenated;

    // 2. Loudness normalization, only when there is audio to normalize.
    let has_audio = match probe_video(&current).await {
        Ok(info) => info.has_audio,
        Err(e) => {
            debug!("Probe before loudnorm failed, attempting anyway: {}", e);
            true
        }
    };
    let mut loudness_normalized = false;
    if has_audio {
        let normalized = work.path().join("loudnorm.mp4");
        let cmd = FfmpegCommand::new(&current, &normalized)
            .audio_filter(params.loudness_filter())
            .video_codec("copy");
        match runner.run(&cmd).await {
            Ok(()) => {
                current = normalized;
                loudness_normalized = true;
            }
            Err(e) => warn!("Loudness normalization failed, keeping original audio: {}", e.detail()),
        }
    }

    // 3. Light color normalization.
    let graded = work.path().join("color.mp4");
    let cmd = FfmpegCommand::new(&current, &graded)
        .video_filter(params.color_filter())
        .video_codec("libx264")
        .preset(params.preset.clone())
        .crf(params.crf)
        .pixel_format("yuv420p")
        .audio_codec("copy")
        .faststart();
    let color_normalized = match runner.run(&cmd).await {
        Ok(()) => {
            current = graded;
            true
        }
        Err(e) => {
            warn!("Color normalization failed, keeping ungraded video: {}", e.detail());
            false
        }
    };

    tokio::fs::rename(&current, output).await?;
    info!(output = %output.display(), "Assembled final video");

    Ok(AssemblyReport {
        output: output.to_path_buf(),
        loudness_normalized,
        color_normalized,
    })
}

/// Best-effort removal of files; missing files are ignored.
pub async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "Removed file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), "Failed to remove file: {}", e),
        }
    }
}

/// One line of a concat demuxer list, with single quotes escaped.
fn concat_list_entry(path: &Path) -> String {
    let escaped = path.to_string_lossy().replace('\'', r"'\''");
    format!("file '{escaped}'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filters() {
        let params = AssemblyParams::default();
        assert_eq!(
            params.frame_filter(),
            "scale=720:1280:force_original_aspect_ratio=decrease,pad=720:1280:(ow-iw)/2:(oh-ih)/2,setsar=1"
        );
        assert_eq!(params.loudness_filter(), "loudnorm=I=-16:LRA=11:tp=-1");
        assert_eq!(
            params.color_filter(),
            "eq=contrast=1.05:saturation=1.05:brightness=0.02"
        );
    }

    #[test]
    fn test_concat_list_entry_escapes_quotes() {
        assert_eq!(
            concat_list_entry(Path::new("/clips/it's.mp4")),
            r"file '/clips/it'\''s.mp4'"
        );
    }

    #[tokio::test]
    async fn test_assemble_rejects_empty_input() {
        let dir = tempfile::tempdir().unwrap();
        let result = assemble(&[], &dir.path().join("out.mp4"), &AssemblyParams::default()).await;
        assert!(matches!(result, Err(MediaError::NoInputs)));
    }

    #[tokio::test]
    async fn test_assemble_rejects_missing_clip() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.mp4");
        let result = assemble(
            &[missing.clone()],
            &dir.path().join("out.mp4"),
            &AssemblyParams::default(),
        )
        .await;
        assert!(matches!(result, Err(MediaError::FileNotFound(p)) if p == missing));
    }

    #[tokio::test]
    async fn test_remove_files_ignores_missing() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.mp4");
        tokio::fs::write(&present, b"x").await.unwrap();
        remove_files(&[present.clone(), dir.path().join("b.mp4")]).await;
        assert!(!present.exists());
    }
}
