//! Generation store.
//!
//! Every mutation runs under the generation's own lock, is applied to a copy,
//! persisted, and only then committed. Status is recomputed by the aggregator
//! inside the same critical section, so readers never observe a status that
//! disagrees with the clips.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use adgen_models::{
    AssemblyOutcome, ClipId, ClipState, ClipStatus, ClipTransition, FailureKind,
    Generation, GenerationId, GenerationStatus, RenderJobId,
};

use crate::backend::{DocumentBackend, FileBackend, MemoryBackend};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};

/// Result of a mutation: the committed generation and any render jobs that
/// were in flight for clips the mutation just failed.
#[derive(Debug, Clone)]
pub struct StoreUpdate {
    pub generation: Generation,
    pub cancelled_jobs: Vec<(ClipId, RenderJobId)>,
}

/// Durable keyed storage for generations and their clips.
pub struct GenerationStore {
    entries: RwLock<HashMap<GenerationId, Arc<Mutex<Generation>>>>,
    backend: Arc<dyn DocumentBackend>,
}

impl GenerationStore {
    /// Store without durable persistence.
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            backend: Arc::new(MemoryBackend),
        }
    }

    /// Open the store described by `config`, loading persisted generations.
    pub async fn open(config: &StoreConfig) -> StoreResult<Self> {
        match &config.data_dir {
            Some(dir) => Self::with_backend(Arc::new(FileBackend::open(dir).await?)).await,
            None => Ok(Self::in_memory()),
        }
    }

    /// Build a store over `backend`, loading everything it holds.
    pub async fn with_backend(backend: Arc<dyn DocumentBackend>) -> StoreResult<Self> {
        let loaded = backend.load_all().await?;
        let count = loaded.len();
        let entries = loaded
            .into_iter()
            .map(|g| (g.id.clone(), Arc::new(Mutex::new(g))))
            .collect();

        info!(backend = backend.name(), generations = count, "Opened generation store");
        Ok(Self {
            entries: RwLock::new(entries),
            backend,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Insert a new generation together with all of its clips.
    pub async fn create(&self, mut generation: Generation) -> StoreResult<Generation> {
        generation.validate_sequence()?;
        if let Some(stray) = generation
            .clips
            .iter()
            .find(|c| c.generation_id != generation.id)
        {
            return Err(StoreError::invalid_transition(format!(
                "clip {} belongs to generation {}",
                stray.id, stray.generation_id
            )));
        }
        generation.refresh_status(Utc::now());

        let mut entries = self.entries.write().await;
        if entries.contains_key(&generation.id) {
            return Err(StoreError::AlreadyExists(generation.id.to_string()));
        }
        self.backend.write(&generation).await?;
        entries.insert(
            generation.id.clone(),
            Arc::new(Mutex::new(generation.clone())),
        );

        info!(
            generation_id = %generation.id,
            clips = generation.clips.len(),
            "Created generation"
        );
        Ok(generation)
    }

    pub async fn get(&self, id: &GenerationId) -> StoreResult<Generation> {
        let entry = self.entry(id).await?;
        let generation = entry.lock().await;
        Ok(generation.clone())
    }

    /// Non-terminal generations, oldest first.
    pub async fn list_active(&self) -> Vec<Generation> {
        let entries: Vec<_> = self.entries.read().await.values().cloned().collect();
        let mut active = Vec::new();
        for entry in entries {
            let generation = entry.lock().await;
            if !generation.is_terminal() {
                active.push(generation.clone());
            }
        }
        active.sort_by_key(|g| g.created_at);
        active
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Apply a clip transition.
    ///
    /// When the transition fails more clips than the generation's policy
    /// tolerates, every other non-terminal clip is failed as cancelled in the
    /// same mutation and its in-flight job is returned for cancellation.
    pub async fn update_clip(
        &self,
        id: &GenerationId,
        clip_id: &ClipId,
        transition: ClipTransition,
    ) -> StoreResult<StoreUpdate> {
        let (generation, cancelled_jobs) = self
            .mutate(id, |g, now| {
                ensure_mutable(g)?;
                let clip = g
                    .clip_mut(clip_id)
                    .ok_or_else(|| StoreError::not_found(format!("{}/clips/{}", id, clip_id)))?;
                clip.apply(transition, now)?;

                let failed_clip = match &clip.state {
                    ClipState::Failed { kind, message } => {
                        Some(format!("clip {} {}: {}", clip.sequence_index, kind, message))
                    }
                    _ => None,
                };

                let failed = g
                    .clips
                    .iter()
                    .filter(|c| c.status() == ClipStatus::Failed)
                    .count();
                let fatal = !g.assembly_policy.tolerates(failed, g.clips.len());

                match failed_clip {
                    Some(reason) if fatal => {
                        let jobs = fail_remaining(
                            g,
                            FailureKind::Cancelled,
                            "generation failed",
                            now,
                        )?;
                        g.failure_reason.get_or_insert(reason);
                        Ok(jobs)
                    }
                    _ => Ok(Vec::new()),
                }
            })
            .await?;

        Ok(StoreUpdate {
            generation,
            cancelled_jobs,
        })
    }

    /// Confirm a status for the generation.
    ///
    /// Status is derived, so only the aggregator's value is accepted.
    pub async fn update_generation_status(
        &self,
        id: &GenerationId,
        status: GenerationStatus,
    ) -> StoreResult<Generation> {
        let (generation, ()) = self
            .mutate(id, |g, _| {
                let derived = g.derived_status();
                if status != derived {
                    return Err(StoreError::invalid_transition(format!(
                        "generation {} status {} does not match aggregate {}",
                        g.id, status, derived
                    )));
                }
                Ok(())
            })
            .await?;
        Ok(generation)
    }

    /// Claim the single assembly slot. Returns `true` for exactly one caller
    /// once every clip has completed.
    pub async fn begin_assembly(&self, id: &GenerationId) -> StoreResult<bool> {
        let (_, won) = self
            .mutate(id, |g, now| {
                if !g.needs_assembly() {
                    return Ok(false);
                }
                g.assembly = AssemblyOutcome::InProgress { started_at: now };
                Ok(true)
            })
            .await?;

        if won {
            debug!(generation_id = %id, "Assembly slot claimed");
        }
        Ok(won)
    }

    /// Record a successful assembly. The final artifact is written once.
    pub async fn set_final_artifact(
        &self,
        id: &GenerationId,
        path: impl Into<String>,
    ) -> StoreResult<Generation> {
        let path = path.into();
        let (generation, ()) = self
            .mutate(id, |g, _| {
                ensure_mutable(g)?;
                if g.final_artifact.is_some() {
                    return Err(StoreError::invalid_transition(format!(
                        "generation {} already has a final artifact",
                        g.id
                    )));
                }
                if !matches!(g.assembly, AssemblyOutcome::InProgress { .. }) {
                    return Err(StoreError::invalid_transition(format!(
                        "generation {} has no assembly in progress",
                        g.id
                    )));
                }
                g.assembly = AssemblyOutcome::Succeeded {
                    artifact_path: path.clone(),
                };
                g.final_artifact = Some(path);
                Ok(())
            })
            .await?;
        Ok(generation)
    }

    /// Record a failed assembly.
    pub async fn record_assembly_failure(
        &self,
        id: &GenerationId,
        reason: impl Into<String>,
    ) -> StoreResult<Generation> {
        let reason = reason.into();
        let (generation, ()) = self
            .mutate(id, |g, _| {
                ensure_mutable(g)?;
                if !matches!(g.assembly, AssemblyOutcome::InProgress { .. }) {
                    return Err(StoreError::invalid_transition(format!(
                        "generation {} has no assembly in progress",
                        g.id
                    )));
                }
                g.assembly = AssemblyOutcome::Failed {
                    reason: reason.clone(),
                };
                g.failure_reason.get_or_insert(reason);
                Ok(())
            })
            .await?;
        Ok(generation)
    }

    /// Force a non-terminal generation to `failed`.
    ///
    /// Pending and generating clips fail with `kind`. The assembly is marked
    /// failed too when every clip had already completed, or when the policy
    /// would otherwise assemble the surviving clips. Completed clip artifacts
    /// are left in place.
    pub async fn abort(
        &self,
        id: &GenerationId,
        kind: FailureKind,
        reason: impl Into<String>,
    ) -> StoreResult<StoreUpdate> {
        let reason = reason.into();
        let (generation, cancelled_jobs) = self
            .mutate(id, |g, now| {
                ensure_mutable(g)?;
                let jobs = fail_remaining(g, kind, &reason, now)?;
                let all_completed = g.clips.iter().all(|c| c.status() == ClipStatus::Completed);
                if all_completed || g.assembly_policy.allows_partial() {
                    g.assembly = AssemblyOutcome::Failed {
                        reason: reason.clone(),
                    };
                }
                g.failure_reason.get_or_insert(reason.clone());
                Ok(jobs)
            })
            .await?;

        info!(
            generation_id = %id,
            reason = %reason,
            cancelled_jobs = cancelled_jobs.len(),
            "Generation aborted"
        );
        Ok(StoreUpdate {
            generation,
            cancelled_jobs,
        })
    }

    async fn entry(&self, id: &GenerationId) -> StoreResult<Arc<Mutex<Generation>>> {
        self.entries
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(id.as_str()))
    }

    /// Run `f` on a copy of the generation under its lock, then recompute
    /// status, persist and commit. Nothing is committed if `f` or the write
    /// fails; unchanged documents are not rewritten.
    async fn mutate<T, F>(&self, id: &GenerationId, f: F) -> StoreResult<(Generation, T)>
    where
        F: FnOnce(&mut Generation, DateTime<Utc>) -> StoreResult<T>,
    {
        let entry = self.entry(id).await?;
        let mut current = entry.lock().await;

        let now = Utc::now();
        let mut next = current.clone();
        let out = f(&mut next, now)?;
        if next == *current {
            return Ok((next, out));
        }

        let before = current.status;
        next.refresh_status(now);
        self.backend.write(&next).await?;
        *current = next.clone();

        if before != next.status {
            info!(
                generation_id = %id,
                from = %before,
                to = %next.status,
                "Generation status changed"
            );
        }
        Ok((next, out))
    }
}

fn ensure_mutable(g: &Generation) -> StoreResult<()> {
    if g.is_terminal() {
        return Err(StoreError::invalid_transition(format!(
            "generation {} is {}",
            g.id, g.status
        )));
    }
    Ok(())
}

/// Fail every non-terminal clip, returning the jobs that were in flight.
fn fail_remaining(
    g: &mut Generation,
    kind: FailureKind,
    message: &str,
    now: DateTime<Utc>,
) -> StoreResult<Vec<(ClipId, RenderJobId)>> {
    let mut jobs = Vec::new();
    for clip in g.clips.iter_mut().filter(|c| !c.status().is_terminal()) {
        if let Some(job) = clip.job_id() {
            jobs.push((clip.id.clone(), job.clone()));
        }
        clip.apply(
            ClipTransition::Failed {
                kind,
                message: message.to_string(),
            },
            now,
        )?;
    }
    Ok(jobs)
}
