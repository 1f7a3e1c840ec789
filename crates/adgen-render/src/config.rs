//! Render client configuration.

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::dashscope::DashScopeClient;
use crate::error::{RenderError, RenderResult};
use crate::placeholder::PlaceholderRenderer;
use crate::types::RenderService;

pub const DEFAULT_SUBMIT_URL: &str =
    "https://dashscope.aliyuncs.com/api/v1/services/aigc/video-generation/generation";

/// Settings for the DashScope image-to-video API.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub api_key: String,
    /// Task submission endpoint; query and cancel endpoints are derived from it
    pub submit_url: String,
    pub model: String,
    pub resolution: String,
    pub aspect_ratio: String,
    /// Timeout for submit, query and cancel requests
    pub request_timeout: Duration,
    /// Timeout for artifact downloads
    pub download_timeout: Duration,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            submit_url: DEFAULT_SUBMIT_URL.to_string(),
            model: "wan2.6-i2v".to_string(),
            resolution: "720P".to_string(),
            aspect_ratio: "9:16".to_string(),
            request_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(300),
        }
    }
}

impl RenderConfig {
    /// Load from environment variables. `WAN_API_KEY` is required.
    pub fn from_env() -> RenderResult<Self> {
        let api_key = std::env::var("WAN_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| RenderError::config("WAN_API_KEY not set"))?;

        let defaults = Self::default();
        Ok(Self {
            api_key,
            submit_url: std::env::var("WAN_API_URL").unwrap_or(defaults.submit_url),
            model: std::env::var("WAN_MODEL_NAME").unwrap_or(defaults.model),
            resolution: std::env::var("WAN_RESOLUTION").unwrap_or(defaults.resolution),
            aspect_ratio: std::env::var("WAN_ASPECT_RATIO").unwrap_or(defaults.aspect_ratio),
            request_timeout: Duration::from_secs(
                std::env::var("WAN_REQUEST_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            download_timeout: Duration::from_secs(
                std::env::var("WAN_DOWNLOAD_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
        })
    }

    /// Base path shared by the submit, query and cancel endpoints.
    fn base_url(&self) -> &str {
        let url = self.submit_url.trim_end_matches('/');
        for suffix in ["/video-synthesis", "/generation"] {
            if let Some(base) = url.strip_suffix(suffix) {
                return base;
            }
        }
        url.rsplit_once('/').map(|(base, _)| base).unwrap_or(url)
    }

    pub fn query_url(&self) -> String {
        format!("{}/query", self.base_url())
    }

    pub fn cancel_url(&self) -> String {
        format!("{}/cancel", self.base_url())
    }
}

/// Which render service the engine talks to.
#[derive(Debug, Clone)]
pub enum RenderBackend {
    DashScope(RenderConfig),
    /// Local FFmpeg clips, for offline runs
    Placeholder,
}

impl RenderBackend {
    /// `RENDER_MODE=placeholder` forces offline clips; otherwise DashScope is
    /// used when `WAN_API_KEY` is set and placeholder clips when it is not.
    pub fn from_env() -> Self {
        Self::choose(std::env::var("RENDER_MODE").ok().as_deref(), RenderConfig::from_env())
    }

    fn choose(mode: Option<&str>, config: RenderResult<RenderConfig>) -> Self {
        if mode.is_some_and(|m| m.eq_ignore_ascii_case("placeholder")) {
            return Self::Placeholder;
        }
        match config {
            Ok(config) => Self::DashScope(config),
            Err(e) => {
                warn!("{}, rendering placeholder clips", e);
                Self::Placeholder
            }
        }
    }

    pub fn connect(self) -> RenderResult<Arc<dyn RenderService>> {
        Ok(match self {
            Self::DashScope(config) => Arc::new(DashScopeClient::new(config)?),
            Self::Placeholder => Arc::new(PlaceholderRenderer::default()),
        })
    }
}
