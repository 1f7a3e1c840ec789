//! Gemini vision client that writes the 12-scene ad script.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use adgen_models::{ScriptData, DEFAULT_SCENE_COUNT};

use crate::analysis::VisionAnalyzer;
use crate::error::{EngineError, EngineResult};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini settings.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    /// Tried in order until one returns a usable script
    pub models: Vec<String>,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            models: vec![
                "gemini-2.5-flash".to_string(),
                "gemini-2.5-flash-lite".to_string(),
                "gemini-2.5-pro".to_string(),
            ],
            timeout: Duration::from_secs(120),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> EngineResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| EngineError::config_error("GEMINI_API_KEY not set"))?;
        let mut config = Self::new(api_key);

        if let Ok(url) = std::env::var("GEMINI_API_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(models) = std::env::var("GEMINI_MODELS") {
            let models: Vec<String> = models
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect();
            if !models.is_empty() {
                config.models = models;
            }
        }
        if let Some(secs) = std::env::var("GEMINI_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    Image { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

/// Gemini-backed [`VisionAnalyzer`].
pub struct GeminiVisionClient {
    config: GeminiConfig,
    client: Client,
}

impl GeminiVisionClient {
    pub fn new(config: GeminiConfig) -> EngineResult<Self> {
        if config.api_key.is_empty() {
            return Err(EngineError::config_error("Gemini API key is empty"));
        }
        if config.models.is_empty() {
            return Err(EngineError::config_error("No Gemini models configured"));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EngineError::config_error(format!("HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    async fn call_model(
        &self,
        model: &str,
        image: &[u8],
        mime_type: &str,
    ) -> EngineResult<ScriptData> {
        // Key goes in a header, never the query string
        let url = format!("{}/models/{}:generateContent", self.config.base_url, model);

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: script_prompt(DEFAULT_SCENE_COUNT),
                    },
                    Part::Image {
                        inline_data: InlineData {
                            mime_type: mime_type.to_string(),
                            data: base64::engine::general_purpose::STANDARD.encode(image),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
            },
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout(format!("Gemini request to {}", model))
                } else {
                    EngineError::TransientExternal(format!(
                        "Gemini request failed: {}",
                        e.without_url()
                    ))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("Gemini returned {}: {}", status, body);
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                EngineError::TransientExternal(message)
            } else {
                EngineError::analysis(message)
            });
        }

        let body: GeminiResponse = response
            .json()
            .await
            .map_err(|e| {
                EngineError::analysis(format!(
                    "Failed to parse Gemini response: {}",
                    e.without_url()
                ))
            })?;

        let text = body
            .candidates
            .first()
            .and_then(|c| c.content.parts.iter().find_map(|p| p.text.as_deref()))
            .ok_or_else(|| EngineError::analysis("No content in Gemini response"))?;

        parse_script(text)
    }
}

#[async_trait]
impl VisionAnalyzer for GeminiVisionClient {
    async fn analyze(&self, image: &[u8], mime_type: &str) -> EngineResult<ScriptData> {
        let mut last_error = None;

        for model in &self.config.models {
            info!("Attempting Gemini API with model: {}", model);
            match self.call_model(model, image, mime_type).await {
                Ok(script) => {
                    info!(scenes = script.scenes.len(), "Got script from {}", model);
                    return Ok(script);
                }
                Err(e) => {
                    warn!("Failed with model {}: {}", model, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| EngineError::analysis("All Gemini models failed")))
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

/// Instruction sent alongside the product image.
fn script_prompt(scenes: usize) -> String {
    format!(
        r#"You are a short-form video strategist writing a 60-second vertical ad for the product in this photo.

Write EXACTLY {scenes} scenes of 5 seconds each, in this arc:
- Scenes 1-3: Hook
- Scenes 4-6: Problem
- Scenes 7-9: Solution
- Scenes 10-12: Call to action

Visual style: authentic user-generated content. Handheld phone footage, natural
light, real homes, no studio polish. The product must look exactly like the
photo in every scene: same shape, color, label and packaging.

Return ONLY a JSON object with this schema:
{{
  "product_name": "Name",
  "master_description": "Precise visual description of the product",
  "scenes": [
    {{
      "id": 1,
      "role": "hook",
      "prompt": "What happens on screen",
      "shot_type": "close-up",
      "continuity_constraints": "What must stay consistent with earlier scenes"
    }}
  ]
}}"#
    )
}

/// Parse the model's reply into a script.
///
/// Accepts bare JSON, JSON wrapped in a markdown fence, or JSON surrounded by
/// prose (the outermost `{...}` block is used). The tone is always UGC.
pub fn parse_script(text: &str) -> EngineResult<ScriptData> {
    let text = strip_fence(text.trim());

    let mut script: ScriptData = match serde_json::from_str(text) {
        Ok(script) => script,
        Err(first) => {
            let block = match (text.find('{'), text.rfind('}')) {
                (Some(start), Some(end)) if start < end => &text[start..=end],
                _ => return Err(EngineError::analysis(format!("Script is not JSON: {}", first))),
            };
            serde_json::from_str(block)
                .map_err(|e| EngineError::analysis(format!("Failed to parse script JSON: {}", e)))?
        }
    };

    if script.scenes.is_empty() {
        return Err(EngineError::analysis("Script has no scenes"));
    }
    script.tone = Some("UGC".to_string());
    Ok(script)
}

fn strip_fence(text: &str) -> &str {
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SCRIPT: &str = r#"{"product_name":"Glow Serum","master_description":"amber dropper bottle","scenes":[{"id":1,"role":"hook","prompt":"hand lifts the bottle"},{"id":2,"role":"cta","prompt":"bottle on shelf","continuity_constraints":"same shelf"}]}"#;

    fn reply(text: &str) -> serde_json::Value {
        json!({"candidates": [{"content": {"parts": [{"text": text}]}}]})
    }

    fn client(server: &MockServer, models: &[&str]) -> GeminiVisionClient {
        let mut config = GeminiConfig::new("test-key");
        config.base_url = server.uri();
        config.models = models.iter().map(|m| m.to_string()).collect();
        GeminiVisionClient::new(config).unwrap()
    }

    #[test]
    fn test_parse_fenced_script_forces_ugc() {
        let script = parse_script(&format!("```json\n{}\n```", SCRIPT)).unwrap();
        assert_eq!(script.product_name, "Glow Serum");
        assert_eq!(script.scenes.len(), 2);
        assert_eq!(
            script.scenes[1].continuity_constraint.as_deref(),
            Some("same shelf")
        );
        assert_eq!(script.tone.as_deref(), Some("UGC"));
    }

    #[test]
    fn test_parse_script_inside_prose() {
        let script = parse_script(&format!("Here is your script:\n{}\nEnjoy!", SCRIPT)).unwrap();
        assert_eq!(script.scenes[0].role.as_deref(), Some("hook"));
    }

    #[test]
    fn test_parse_rejects_empty_and_garbage() {
        assert!(parse_script(r#"{"product_name":"x","master_description":"y","scenes":[]}"#).is_err());
        assert!(parse_script("no json here").is_err());
    }

    #[test]
    fn test_prompt_asks_for_exact_scene_count() {
        assert!(script_prompt(12).contains("EXACTLY 12 scenes"));
    }

    #[tokio::test]
    async fn test_analyze_sends_image_and_parses_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/model-a:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply(SCRIPT)))
            .expect(1)
            .mount(&server)
            .await;

        let script = client(&server, &["model-a"])
            .analyze(b"png-bytes", "image/png")
            .await
            .unwrap();
        assert_eq!(script.product_name, "Glow Serum");

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].url.query().is_none());
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(parts[1]["inline_data"]["data"], "cG5nLWJ5dGVz");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    }

    #[tokio::test]
    async fn test_analyze_falls_back_to_next_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/broken:generateContent"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/models/working:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply(SCRIPT)))
            .mount(&server)
            .await;

        let script = client(&server, &["broken", "working"])
            .analyze(b"img", "image/jpeg")
            .await
            .unwrap();
        assert_eq!(script.scenes.len(), 2);
    }

    #[tokio::test]
    async fn test_analyze_reports_last_error_when_all_models_fail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad image"))
            .mount(&server)
            .await;

        let err = client(&server, &["a", "b"])
            .analyze(b"img", "image/jpeg")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Analysis(_)));
    }

    #[tokio::test]
    async fn test_transport_error_does_not_leak_api_key() {
        let mut config = GeminiConfig::new("SECRET-KEY-123");
        // Nothing listens on port 1
        config.base_url = "http://127.0.0.1:1".to_string();
        config.models = vec!["m".to_string()];
        let client = GeminiVisionClient::new(config).unwrap();

        let err = client.analyze(b"img", "image/png").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::TransientExternal(_) | EngineError::Timeout(_)
        ));
        assert!(!err.to_string().contains("SECRET-KEY-123"), "{}", err);
    }
}
