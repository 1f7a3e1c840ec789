//! Client for the image-to-video render service.
//!
//! This crate provides:
//! - The `RenderService` trait the scheduler drives
//! - A DashScope (Wan) async task client
//! - An offline FFmpeg placeholder service for runs without an API key
//! - Transient/permanent classification of render failures

pub mod config;
pub mod dashscope;
pub mod error;
pub mod placeholder;
pub mod types;

pub use config::{RenderBackend, RenderConfig};
pub use dashscope::DashScopeClient;
pub use error::{is_transient_code, is_transient_status, RenderError, RenderResult};
pub use placeholder::{PlaceholderConfig, PlaceholderRenderer};
pub use types::{ReferenceImage, RenderJobState, RenderRequest, RenderService};
