//! FFmpeg CLI wrapper for clip assembly.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - An async runner with a per-command timeout
//! - FFprobe inspection of rendered clips
//! - The concat, loudness and color assembly pipeline

pub mod assemble;
pub mod command;
pub mod error;
pub mod probe;

pub use assemble::{assemble, remove_files, AssemblyParams, AssemblyReport};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use probe::{get_duration, probe_video, VideoInfo};
