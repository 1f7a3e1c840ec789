//! DashScope (Wan image-to-video) async task client.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use adgen_models::RenderJobId;

use crate::config::RenderConfig;
use crate::error::{is_transient_code, RenderError, RenderResult};
use crate::types::{RenderJobState, RenderRequest, RenderService};

/// DashScope API client.
pub struct DashScopeClient {
    config: RenderConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    model: &'a str,
    input: SubmitInput<'a>,
    parameters: SubmitParameters<'a>,
}

#[derive(Debug, Serialize)]
struct SubmitInput<'a> {
    img_url: String,
    prompt: &'a str,
}

#[derive(Debug, Serialize)]
struct SubmitParameters<'a> {
    aspect_ratio: &'a str,
    duration: u32,
    resolution: &'a str,
}

#[derive(Debug, Serialize)]
struct TaskRequest<'a> {
    model: &'a str,
    task_id: &'a str,
}

impl DashScopeClient {
    /// Create a new client.
    pub fn new(config: RenderConfig) -> RenderResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(RenderError::config("render API key is empty"));
        }
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        async_task: bool,
    ) -> RenderResult<Value> {
        let mut request = self
            .client
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(body);
        if async_task {
            request = request.header("X-DashScope-Async", "enable");
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RenderError::Timeout
            } else {
                RenderError::Network(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RenderError::from_http_status(status.as_u16(), body));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| RenderError::invalid_response(format!("malformed JSON: {}", e)))?;
        check_error_code(&value)?;
        Ok(value)
    }
}

#[async_trait]
impl RenderService for DashScopeClient {
    async fn submit(&self, request: &RenderRequest) -> RenderResult<RenderJobId> {
        let body = SubmitRequest {
            model: &self.config.model,
            input: SubmitInput {
                img_url: request.image.to_data_uri(),
                prompt: &request.prompt,
            },
            parameters: SubmitParameters {
                aspect_ratio: &self.config.aspect_ratio,
                duration: request.duration_secs,
                resolution: &self.config.resolution,
            },
        };

        let value = self.post_json(&self.config.submit_url, &body, true).await?;
        let task_id = extract_task_id(&value)
            .ok_or_else(|| RenderError::invalid_response("no task_id in submit response"))?;

        info!(task_id = %task_id, model = %self.config.model, "Render task submitted");
        Ok(RenderJobId::new(task_id))
    }

    async fn status(&self, job_id: &RenderJobId) -> RenderResult<RenderJobState> {
        let body = TaskRequest {
            model: &self.config.model,
            task_id: job_id.as_str(),
        };
        let value = self.post_json(&self.config.query_url(), &body, false).await?;
        let state = parse_task_state(&value)?;
        debug!(task_id = %job_id, state = ?state, "Render task polled");
        Ok(state)
    }

    async fn cancel(&self, job_id: &RenderJobId) -> RenderResult<()> {
        let body = TaskRequest {
            model: &self.config.model,
            task_id: job_id.as_str(),
        };
        self.post_json(&self.config.cancel_url(), &body, false)
            .await?;
        info!(task_id = %job_id, "Render task cancelled");
        Ok(())
    }

    async fn download(&self, artifact_url: &str, dest: &Path) -> RenderResult<u64> {
        let response = self
            .client
            .get(artifact_url)
            .timeout(self.config.download_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RenderError::Timeout
                } else {
                    RenderError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RenderError::from_http_status(status.as_u16(), body));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = dest.with_extension("part");
        let mut file = tokio::fs::File::create(&tmp).await?;
        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        if written == 0 {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(RenderError::invalid_response("downloaded artifact is empty"));
        }
        tokio::fs::rename(&tmp, dest).await?;

        debug!(bytes = written, dest = %dest.display(), "Artifact downloaded");
        Ok(written)
    }

    fn name(&self) -> &'static str {
        "dashscope"
    }
}

/// Reject bodies that carry a non-success provider `code`.
fn check_error_code(value: &Value) -> RenderResult<()> {
    match value.get("code").and_then(Value::as_str) {
        Some(code) if !code.is_empty() && code != "Success" => {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or(code);
            Err(RenderError::api(code, message))
        }
        _ => Ok(()),
    }
}

fn extract_task_id(value: &Value) -> Option<String> {
    value
        .pointer("/output/task_id")
        .or_else(|| value.get("task_id"))
        .or_else(|| value.get("request_id"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_task_state(value: &Value) -> RenderResult<RenderJobState> {
    let output = value.get("output").cloned().unwrap_or(Value::Null);
    let status = output
        .get("task_status")
        .or_else(|| output.get("status"))
        .or_else(|| value.get("status"))
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN")
        .to_ascii_uppercase();

    let state = match status.as_str() {
        "SUCCEEDED" | "SUCCESS" | "COMPLETED" => {
            let url = ["video_url", "video", "url"]
                .iter()
                .find_map(|k| output.get(*k).and_then(Value::as_str))
                .or_else(|| value.get("video_url").and_then(Value::as_str))
                .ok_or_else(|| RenderError::invalid_response("succeeded task has no video URL"))?;
            RenderJobState::Succeeded {
                artifact_url: url.to_string(),
            }
        }
        "FAILED" | "ERROR" => {
            let code = output.get("code").and_then(Value::as_str);
            let reason = output
                .get("message")
                .or_else(|| output.get("error"))
                .and_then(Value::as_str)
                .unwrap_or("Unknown error");
            RenderJobState::Failed {
                reason: match code {
                    Some(code) => format!("{}: {}", code, reason),
                    None => reason.to_string(),
                },
                retryable: code.map_or(true, is_transient_code),
            }
        }
        "CANCELED" | "CANCELLED" => RenderJobState::Failed {
            reason: "task cancelled by provider".to_string(),
            retryable: false,
        },
        "PENDING" | "QUEUED" => RenderJobState::Queued,
        "RUNNING" | "PROCESSING" => RenderJobState::Running,
        other => {
            warn!(status = %other, "Unrecognized render task status, treating as running");
            RenderJobState::Running
        }
    };
    Ok(state)
}
