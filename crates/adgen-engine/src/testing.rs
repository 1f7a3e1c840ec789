//! In-process fakes for the render, vision and assembly collaborators.
//!
//! Compiled for this crate's unit tests and, through the `test-util`
//! feature, for the integration scenarios and the API crate's tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use adgen_models::{RenderJobId, Scene, ScriptData, DEFAULT_SCENE_COUNT};
use adgen_render::{RenderError, RenderJobState, RenderRequest, RenderResult, RenderService};

use crate::analysis::VisionAnalyzer;
use crate::assembly::Assembler;
use crate::error::{EngineError, EngineResult};

/// How the fake render service treats one shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipBehaviour {
    /// Report running for `polls` status calls, then succeed.
    Succeed { polls: u32 },
    /// Every render attempt fails.
    RenderFails { retryable: bool },
    /// Every submission is rejected.
    RejectSubmit { retryable: bool },
    /// Never leaves the running state.
    Hang,
}

#[derive(Debug)]
struct FakeJob {
    shot: u32,
    polls: u32,
}

#[derive(Debug, Default)]
struct RenderState {
    next_job: u64,
    jobs: HashMap<String, FakeJob>,
    submits_per_shot: HashMap<u32, usize>,
    cancelled: Vec<RenderJobId>,
}

/// Scriptable [`RenderService`]. Shots are identified by the `Shot N of M`
/// marker in the prompt and numbered from 0.
#[derive(Debug)]
pub struct FakeRender {
    default: ClipBehaviour,
    behaviours: HashMap<u32, ClipBehaviour>,
    state: Mutex<RenderState>,
    status_calls: AtomicUsize,
    downloads: AtomicUsize,
}

impl Default for FakeRender {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRender {
    pub fn new() -> Self {
        Self {
            default: ClipBehaviour::Succeed { polls: 1 },
            behaviours: HashMap::new(),
            state: Mutex::new(RenderState::default()),
            status_calls: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
        }
    }

    pub fn with_default(mut self, behaviour: ClipBehaviour) -> Self {
        self.default = behaviour;
        self
    }

    pub fn with_behaviour(mut self, shot: u32, behaviour: ClipBehaviour) -> Self {
        self.behaviours.insert(shot, behaviour);
        self
    }

    /// Total submissions accepted or rejected.
    pub fn submits(&self) -> usize {
        self.lock().submits_per_shot.values().sum()
    }

    pub fn submits_for(&self, shot: u32) -> usize {
        self.lock().submits_per_shot.get(&shot).copied().unwrap_or(0)
    }

    pub fn cancelled(&self) -> Vec<RenderJobId> {
        self.lock().cancelled.clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn behaviour(&self, shot: u32) -> ClipBehaviour {
        self.behaviours.get(&shot).copied().unwrap_or(self.default)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RenderState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 0-based shot number parsed from a render prompt.
pub fn shot_number(prompt: &str) -> u32 {
    prompt
        .find("\n\nShot ")
        .map(|at| &prompt[at + "\n\nShot ".len()..])
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|n| n.parse::<u32>().ok())
        .map_or(0, |n| n.saturating_sub(1))
}

#[async_trait]
impl RenderService for FakeRender {
    async fn submit(&self, request: &RenderRequest) -> RenderResult<RenderJobId> {
        let shot = shot_number(&request.prompt);
        let mut state = self.lock();
        *state.submits_per_shot.entry(shot).or_default() += 1;

        if let ClipBehaviour::RejectSubmit { retryable } = self.behaviour(shot) {
            let status = if retryable { 503 } else { 400 };
            return Err(RenderError::from_http_status(status, "submission rejected"));
        }

        state.next_job += 1;
        let id = format!("job-{}-{}", shot, state.next_job);
        state.jobs.insert(id.clone(), FakeJob { shot, polls: 0 });
        Ok(RenderJobId::new(id))
    }

    async fn status(&self, job_id: &RenderJobId) -> RenderResult<RenderJobState> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        let job = state
            .jobs
            .get_mut(job_id.as_str())
            .ok_or_else(|| RenderError::from_http_status(404, "unknown task"))?;
        job.polls += 1;
        let (shot, polls) = (job.shot, job.polls);

        Ok(match self.behaviour(shot) {
            ClipBehaviour::Succeed { polls: needed } if polls > needed => {
                RenderJobState::Succeeded {
                    artifact_url: format!("https://render.test/{}.mp4", job_id),
                }
            }
            ClipBehaviour::RenderFails { retryable } => RenderJobState::Failed {
                reason: "render failed".to_string(),
                retryable,
            },
            _ => RenderJobState::Running,
        })
    }

    async fn cancel(&self, job_id: &RenderJobId) -> RenderResult<()> {
        self.lock().cancelled.push(job_id.clone());
        Ok(())
    }

    async fn download(&self, artifact_url: &str, dest: &Path) -> RenderResult<u64> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = format!("clip from {artifact_url}");
        tokio::fs::write(dest, body.as_bytes()).await?;
        Ok(body.len() as u64)
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Counting [`VisionAnalyzer`] that returns a fixed 12-scene script.
#[derive(Debug, Default)]
pub struct FakeVision {
    calls: AtomicUsize,
    delay: Option<Duration>,
    fail: bool,
}

impl FakeVision {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// A full script for `product`, scenes numbered from 1.
    pub fn script(product: &str) -> ScriptData {
        let roles = ["hook", "problem", "solution", "cta"];
        ScriptData {
            product_name: product.to_string(),
            master_description: format!("{product} on a kitchen counter"),
            scenes: (0..DEFAULT_SCENE_COUNT)
                .map(|i| Scene {
                    id: Some(i as u32 + 1),
                    role: Some(roles[i / 3 % roles.len()].to_string()),
                    prompt: format!("scene {} with the {}", i + 1, product),
                    continuity_constraint: None,
                    shot_type: None,
                })
                .collect(),
            tone: Some("UGC".to_string()),
        }
    }
}

#[async_trait]
impl VisionAnalyzer for FakeVision {
    async fn analyze(&self, _image: &[u8], _mime_type: &str) -> EngineResult<ScriptData> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(EngineError::analysis("vision unavailable"));
        }
        Ok(Self::script("Glow Serum"))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Counting [`Assembler`] that writes a placeholder output file.
#[derive(Debug, Default)]
pub struct FakeAssembler {
    calls: AtomicUsize,
    delay: Option<Duration>,
    failure: Option<String>,
    inputs: Mutex<Vec<PathBuf>>,
}

impl FakeAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Inputs of the last call, in the order they were given.
    pub fn last_inputs(&self) -> Vec<PathBuf> {
        self.inputs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Assembler for FakeAssembler {
    async fn assemble(&self, inputs: &[PathBuf], output: &Path) -> EngineResult<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .inputs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = inputs.to_vec();

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.failure {
            return Err(EngineError::assembly(reason.clone()));
        }
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, b"final video").await?;
        Ok(output.to_path_buf())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shot_number_parsing() {
        assert_eq!(shot_number("context\n\nShot 8 of 12: a hand"), 7);
        assert_eq!(shot_number("Shot 3 of 12 without context"), 0);
    }
}
